// Copyright 2026 the Cube authors. MIT license.
//
// Daemon supervisor (§4.F.2). Grounded in
// `original_source/internal/daemon.go`'s `RunDaemons`: enumerate active
// daemons, spawn one long-lived runner per name not already tracked, and
// treat a second call for the same name as a no-op. The original spawns
// a goroutine per daemon against a blocking channel receive; we spawn a
// dedicated OS thread per daemon doing the equivalent blocking
// `VmPool::acquire_blocking`/`PoolTicket::run_entry` pair, since those
// calls block the calling thread by design (§4.D "Acquire").

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{bounded, Sender};
use dashmap::DashMap;

use cube_core::{ArtifactStore, CubeResult, VmPool};

/// No default timeout for daemons (§5 "Daemons and crontabs have no
/// default timeout; they run until the user deactivates or until the
/// process exits"). A huge-but-finite duration keeps `PoolTicket::run_entry`'s
/// `crossbeam_channel::select!` well-defined without special-casing "no
/// timeout" as a separate code path.
const NO_TIMEOUT: Duration = Duration::from_secs(60 * 60 * 24 * 365 * 100);

pub struct DaemonSupervisor {
    pool: Arc<VmPool>,
    store: Arc<dyn ArtifactStore>,
    running: Arc<DashMap<String, Sender<()>>>,
}

impl DaemonSupervisor {
    pub fn new(pool: Arc<VmPool>, store: Arc<dyn ArtifactStore>) -> Self {
        Self {
            pool,
            store,
            running: Arc::new(DashMap::new()),
        }
    }

    pub fn running_count(&self) -> usize {
        self.running.len()
    }

    /// §4.F.2: enumerate, start what's missing, stop what's no longer
    /// active. Called at startup (prefix `""`, all daemons) and again
    /// whenever the (out-of-scope) CRUD layer bulk-imports or flips a
    /// daemon's `active` flag.
    pub fn run_daemons(&self, prefix: &str) -> CubeResult<()> {
        let active = self.store.list_active_daemons(prefix)?;
        let active_set: HashSet<&str> = active.iter().map(String::as_str).collect();

        let stale: Vec<String> = self
            .running
            .iter()
            .map(|entry| entry.key().clone())
            .filter(|name| !active_set.contains(name.as_str()))
            .collect();
        for name in stale {
            self.stop(&name);
        }

        for name in active {
            if self.running.contains_key(&name) {
                continue;
            }
            self.spawn(name);
        }
        Ok(())
    }

    /// §4.F.2 "Stop semantics": interrupts the daemon's Worker via the
    /// same cancel-channel mechanism `PoolTicket::run_entry` already races
    /// against timeout, rather than a separate code path.
    pub fn stop(&self, name: &str) {
        if let Some((_, cancel_tx)) = self.running.remove(name) {
            let _ = cancel_tx.send(());
        }
    }

    fn spawn(&self, name: String) {
        let (cancel_tx, cancel_rx) = bounded(1);
        self.running.insert(name.clone(), cancel_tx);
        let pool = self.pool.clone();
        let running = self.running.clone();
        let thread_name = format!("cube-daemon-{name}");
        let spawned = std::thread::Builder::new().name(thread_name).spawn(move || {
            let mut ticket = match pool.acquire_blocking() {
                Ok(ticket) => ticket,
                Err(err) => {
                    tracing::warn!(daemon = %name, error = %err, "daemon failed to acquire a Worker");
                    running.remove(&name);
                    return;
                }
            };
            let import_id = format!("./daemon/{name}");
            tracing::info!(daemon = %name, worker = ticket.worker_id(), "daemon started");
            if let Err(err) = ticket.run_entry(&import_id, Vec::new(), NO_TIMEOUT, cancel_rx, "Daemon stopped") {
                if err.is_cancelled() {
                    tracing::info!(daemon = %name, "daemon stopped");
                } else {
                    tracing::warn!(daemon = %name, error = %err, "daemon exited with an error");
                }
            }
            running.remove(&name);
        });
        if let Err(err) = spawned {
            tracing::error!(error = %err, "failed to spawn daemon thread");
            self.running.remove(&name);
        }
    }
}
