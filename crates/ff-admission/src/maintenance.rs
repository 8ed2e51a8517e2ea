//! Periodic sweeping of limiter windows and queue jobs.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::queue::JobQueue;
use crate::rate_limit::RateLimiter;

/// What one maintenance pass removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MaintenanceReport {
    pub expired_windows: usize,
    pub reaped_jobs: usize,
    pub purged_jobs: usize,
}

impl MaintenanceReport {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Run a single pass: drop expired rate-limit windows, fail jobs stuck in
/// processing, then purge terminal jobs past retention.
pub fn run_once(limiter: &RateLimiter, queue: &JobQueue) -> MaintenanceReport {
    let expired_windows = limiter.sweep();
    let reaped_jobs = queue.reap_timed_out().len();
    let purged_jobs = queue.purge_finished();

    MaintenanceReport {
        expired_windows,
        reaped_jobs,
        purged_jobs,
    }
}

/// Spawn the maintenance loop.
///
/// The first pass runs one full `period` after start. Runs until `cancel`
/// is triggered.
pub fn spawn_maintenance(
    limiter: Arc<RateLimiter>,
    queue: Arc<JobQueue>,
    period: Duration,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let start = tokio::time::Instant::now() + period;
        let mut interval = tokio::time::interval_at(start, period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        tracing::info!(period_secs = period.as_secs(), "Maintenance task started");

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = cancel.cancelled() => break,
            }

            let report = run_once(&limiter, &queue);
            if report.is_empty() {
                tracing::trace!("Maintenance pass: nothing to do");
            } else {
                tracing::debug!(
                    expired_windows = report.expired_windows,
                    reaped_jobs = report.reaped_jobs,
                    purged_jobs = report.purged_jobs,
                    "Maintenance pass complete"
                );
            }
        }

        tracing::info!("Maintenance task stopped");
    })
}
