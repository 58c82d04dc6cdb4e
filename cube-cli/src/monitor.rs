// Copyright 2026 the Cube authors. MIT license.
//
// Process monitor (§D "Process monitor"). `original_source/web/internal/
// monitor.go` polls CPU/memory via `gopsutil` and prints a formatted
// line; spec.md §1 excludes reproducing that *presentation*, but a
// periodic pool-utilization tick is ambient observability, not a feature.
// We log structured fields instead of printing a line.

use std::sync::Arc;
use std::time::Duration;

use crate::state::AppState;

const TICK: Duration = Duration::from_secs(30);

pub async fn run(state: Arc<AppState>) {
    let mut interval = tokio::time::interval(TICK);
    loop {
        interval.tick().await;
        tracing::info!(
            workers_idle = state.pool.idle_count(),
            workers_total = state.pool.size(),
            daemons_running = state.daemons.running_count(),
            crontabs_scheduled = state.crontabs.scheduled_count(),
            "pool status"
        );
    }
}
