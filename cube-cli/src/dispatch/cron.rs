// Copyright 2026 the Cube authors. MIT license.
//
// Cron supervisor (§4.F.3). Grounded in
// `original_source/internal/crontab.go`'s `RunCrontabs`, which registers
// one `robfig/cron` entry per active crontab name and removes it on
// deactivation; ported onto `tokio_cron_scheduler`, the scheduling crate
// an `allframe`-style scheduled-jobs service in the retrieval pack wires
// up the same way (`JobScheduler::new`, `Job::new_async`, `scheduler.add`).
//
// Overlap policy is "no overlap protection... the new firing will fail
// fast on acquire" (§4.F.3): each firing uses `VmPool::try_acquire`
// (non-blocking), so a crontab still running when its next tick lands
// simply skips that tick rather than queuing behind it.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio_cron_scheduler::{Job as CronJob, JobScheduler};
use uuid::Uuid;

use cube_core::{ArtifactStore, CubeResult, VmPool};

/// Same rationale as the daemon supervisor's `NO_TIMEOUT`: crontabs have
/// no wall-clock ceiling of their own (§5).
const NO_TIMEOUT: Duration = Duration::from_secs(60 * 60 * 24 * 365 * 100);

pub struct CronSupervisor {
    scheduler: JobScheduler,
    scheduled: Arc<DashMap<String, Uuid>>,
    pool: Arc<VmPool>,
}

impl CronSupervisor {
    pub async fn new(pool: Arc<VmPool>) -> anyhow::Result<Self> {
        let scheduler = JobScheduler::new().await?;
        scheduler.start().await?;
        Ok(Self {
            scheduler,
            scheduled: Arc::new(DashMap::new()),
            pool,
        })
    }

    pub fn scheduled_count(&self) -> usize {
        self.scheduled.len()
    }

    pub async fn run_crontabs(&self, store: &Arc<dyn ArtifactStore>, prefix: &str) -> CubeResult<()> {
        let active = store.list_active_crontabs(prefix)?;
        let active_set: HashSet<&str> = active.iter().map(|c| c.name.as_str()).collect();

        let stale: Vec<String> = self
            .scheduled
            .iter()
            .map(|entry| entry.key().clone())
            .filter(|name| !active_set.contains(name.as_str()))
            .collect();
        for name in stale {
            self.stop(&name).await;
        }

        for entry in active {
            if self.scheduled.contains_key(&entry.name) {
                continue;
            }
            self.schedule(entry.name, entry.cron).await?;
        }
        Ok(())
    }

    pub async fn stop(&self, name: &str) {
        if let Some((_, uuid)) = self.scheduled.remove(name) {
            let _ = self.scheduler.remove(&uuid).await;
        }
    }

    async fn schedule(&self, name: String, cron_expr: String) -> CubeResult<()> {
        let expr = normalize_cron(&cron_expr);
        let pool = self.pool.clone();
        let job_name = name.clone();
        let cron_job = CronJob::new_async(expr.as_str(), move |_uuid, _lock| {
            let pool = pool.clone();
            let name = job_name.clone();
            Box::pin(async move {
                let import_id = format!("./crontab/{name}");
                let outcome = tokio::task::spawn_blocking(move || match pool.try_acquire() {
                    Some(mut ticket) => Some(ticket.run_entry(
                        &import_id,
                        Vec::new(),
                        NO_TIMEOUT,
                        crossbeam_channel::never(),
                        "crontab cancelled",
                    )),
                    None => None,
                })
                .await;
                match outcome {
                    Ok(Some(Err(err))) => tracing::warn!(crontab = %name, error = %err, "crontab run failed"),
                    Ok(None) => tracing::debug!(crontab = %name, "pool exhausted, skipping this firing"),
                    Err(join_err) => tracing::error!(crontab = %name, error = %join_err, "crontab task panicked"),
                    _ => {}
                }
            })
        })
        .map_err(|e| cube_core::CubeError::Native(anyhow::anyhow!("bad cron expression for {name}: {e}")))?;

        let uuid = self
            .scheduler
            .add(cron_job)
            .await
            .map_err(|e| cube_core::CubeError::Native(anyhow::anyhow!("failed to schedule {name}: {e}")))?;
        self.scheduled.insert(name, uuid);
        Ok(())
    }
}

/// `tokio_cron_scheduler` parses a 6/7-field expression (seconds first);
/// the original's stored cron strings are plain 5-field cron (no seconds
/// field, matching `robfig/cron`'s default parser). A bare 5-field
/// expression is prefixed with a `0` seconds field so existing crontab
/// rows keep firing on the minute boundary they were authored for.
fn normalize_cron(expr: &str) -> String {
    let field_count = expr.split_whitespace().count();
    if field_count == 5 {
        format!("0 {expr}")
    } else {
        expr.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn five_field_cron_gets_a_seconds_field() {
        assert_eq!(normalize_cron("*/5 * * * *"), "0 */5 * * * *");
    }

    #[test]
    fn six_field_cron_is_left_alone() {
        assert_eq!(normalize_cron("0 */5 * * * *"), "0 */5 * * * *");
    }
}
