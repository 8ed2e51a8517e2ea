//! Sequential job queue for heavyweight (video) conversions.
//!
//! Jobs enter as `queued` and are promoted to `processing` in strict FIFO
//! order of `added_at` whenever a processing slot is free. The caller polls
//! [`JobQueue::can_process`] (or awaits [`JobQueue::wait_until_runnable`]),
//! performs the conversion, and reports the outcome with
//! [`JobQueue::complete`], which frees the slot and promotes the next job.
//!
//! Status only moves forward: `queued -> processing -> completed | error`.
//! Maintenance reaps jobs stuck in `processing` past the job timeout and
//! purges terminal jobs after the retention window.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Notify;

use ff_core::config::QueueConfig;
use ff_core::events::{EventBus, EventPayload};
use ff_core::{Clock, JobId, JobType};

/// Error recorded on jobs reaped for exceeding the job timeout.
pub const TIMEOUT_ERROR: &str = "processing took too long";

/// Lifecycle state of a queued job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Error,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Error => "error",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A job tracked by the queue.
#[derive(Debug, Clone, Serialize)]
pub struct QueueJob {
    pub id: JobId,
    pub job_type: JobType,
    pub status: JobStatus,
    /// Submitting client, for accounting only.
    pub owner_id: String,
    pub added_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    /// Submission sequence; breaks `added_at` ties.
    #[serde(skip)]
    seq: u64,
}

impl QueueJob {
    fn order_key(&self) -> (DateTime<Utc>, u64) {
        (self.added_at, self.seq)
    }
}

/// Tunables for a [`JobQueue`].
#[derive(Debug, Clone)]
pub struct QueueSettings {
    /// Maximum jobs that may be queued or processing at once.
    pub max_queue_size: usize,
    /// Number of jobs allowed in `processing` simultaneously.
    pub concurrency: usize,
    pub average_job_duration_secs: u64,
    pub job_timeout: Duration,
    pub retention: Duration,
}

impl QueueSettings {
    pub fn from_config(queue: &QueueConfig, concurrency: usize) -> Self {
        Self {
            max_queue_size: queue.max_queue_size,
            concurrency,
            average_job_duration_secs: queue.average_job_duration_secs,
            job_timeout: queue.job_timeout(),
            retention: queue.retention(),
        }
    }
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self::from_config(&QueueConfig::default(), 1)
    }
}

/// Result of an accepted [`JobQueue::submit`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Submitted {
    pub job_id: JobId,
    /// Status right after submission; `processing` if a slot was free.
    pub status: JobStatus,
    /// Place in line at insertion time (1 = next).
    pub position: usize,
    pub estimated_wait_secs: u64,
}

/// Why a submission was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueRejection {
    #[error("queue is full ({max} jobs)")]
    Full { max: usize },
    #[error("job {0} already exists")]
    Duplicate(JobId),
}

/// Why a completion report was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompletionError {
    #[error("job {0} not found")]
    NotFound(JobId),
    #[error("job {id} is {status}, not processing")]
    NotProcessing { id: JobId, status: JobStatus },
}

/// Caller-facing view of a job, as served by the queue status endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobStatusView {
    pub job_id: JobId,
    pub job_type: JobType,
    pub status: JobStatus,
    pub position: usize,
    pub estimated_wait_secs: u64,
    pub error: Option<String>,
}

/// Counts by status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, utoipa::ToSchema)]
pub struct QueueStats {
    pub queued: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub max_queue_size: usize,
    pub concurrency: usize,
}

struct QueueState {
    jobs: HashMap<JobId, QueueJob>,
    next_seq: u64,
}

impl QueueState {
    fn count(&self, status: JobStatus) -> usize {
        self.jobs.values().filter(|j| j.status == status).count()
    }

    fn position(&self, id: &JobId) -> usize {
        let Some(job) = self.jobs.get(id) else {
            return 0;
        };
        if job.status != JobStatus::Queued {
            return 0;
        }
        let key = job.order_key();
        1 + self
            .jobs
            .values()
            .filter(|other| other.status == JobStatus::Queued && other.order_key() < key)
            .count()
    }

    /// Fill free processing slots with the oldest queued jobs.
    fn promote(&mut self, now: DateTime<Utc>, concurrency: usize) -> Vec<JobId> {
        let mut promoted = Vec::new();
        let mut processing = self.count(JobStatus::Processing);

        while processing < concurrency {
            let next = self
                .jobs
                .values()
                .filter(|j| j.status == JobStatus::Queued)
                .min_by_key(|j| j.order_key())
                .map(|j| j.id.clone());
            let Some(id) = next else {
                break;
            };
            if let Some(job) = self.jobs.get_mut(&id) {
                job.status = JobStatus::Processing;
                job.started_at = Some(now);
            }
            processing += 1;
            promoted.push(id);
        }

        promoted
    }

    fn finish(
        &mut self,
        id: &JobId,
        now: DateTime<Utc>,
        error: Option<String>,
    ) -> Result<QueueJob, CompletionError> {
        let job = self
            .jobs
            .get_mut(id)
            .ok_or_else(|| CompletionError::NotFound(id.clone()))?;
        if job.status != JobStatus::Processing {
            return Err(CompletionError::NotProcessing {
                id: id.clone(),
                status: job.status,
            });
        }
        job.status = if error.is_some() {
            JobStatus::Error
        } else {
            JobStatus::Completed
        };
        job.error = error;
        job.completed_at = Some(now);
        Ok(job.clone())
    }

    fn record_depth(&self) {
        metrics::gauge!("fileforge_queue_depth").set(self.count(JobStatus::Queued) as f64);
        metrics::gauge!("fileforge_queue_processing")
            .set(self.count(JobStatus::Processing) as f64);
    }
}

/// In-memory FIFO queue guarded by a single mutex.
pub struct JobQueue {
    state: Mutex<QueueState>,
    settings: QueueSettings,
    clock: Arc<dyn Clock>,
    events: Option<Arc<EventBus>>,
    promoted: Notify,
}

impl JobQueue {
    pub fn new(settings: QueueSettings, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(QueueState {
                jobs: HashMap::new(),
                next_seq: 0,
            }),
            settings,
            clock,
            events: None,
            promoted: Notify::new(),
        }
    }

    /// Create a queue that broadcasts lifecycle events.
    pub fn with_events(settings: QueueSettings, clock: Arc<dyn Clock>, events: Arc<EventBus>) -> Self {
        Self {
            events: Some(events),
            ..Self::new(settings, clock)
        }
    }

    /// Register a new job and start it immediately if a slot is free.
    pub fn submit(
        &self,
        job_id: JobId,
        job_type: JobType,
        owner_id: impl Into<String>,
    ) -> Result<Submitted, QueueRejection> {
        let now = self.clock.now();

        let (submitted, promoted) = {
            let mut state = self.state.lock();

            if state.jobs.contains_key(&job_id) {
                tracing::debug!(job_id = %job_id, "Duplicate job submission rejected");
                return Err(QueueRejection::Duplicate(job_id));
            }
            let active = state.count(JobStatus::Queued) + state.count(JobStatus::Processing);
            if active >= self.settings.max_queue_size {
                metrics::counter!("fileforge_queue_rejected_total").increment(1);
                tracing::debug!(
                    job_id = %job_id,
                    max = self.settings.max_queue_size,
                    "Queue full; submission rejected"
                );
                return Err(QueueRejection::Full {
                    max: self.settings.max_queue_size,
                });
            }

            let seq = state.next_seq;
            state.next_seq += 1;
            state.jobs.insert(
                job_id.clone(),
                QueueJob {
                    id: job_id.clone(),
                    job_type,
                    status: JobStatus::Queued,
                    owner_id: owner_id.into(),
                    added_at: now,
                    started_at: None,
                    completed_at: None,
                    error: None,
                    seq,
                },
            );

            let position = state.position(&job_id);
            let promoted = state.promote(now, self.settings.concurrency);
            let status = state
                .jobs
                .get(&job_id)
                .map_or(JobStatus::Queued, |j| j.status);
            let estimated_wait_secs =
                state.position(&job_id) as u64 * self.settings.average_job_duration_secs;
            state.record_depth();

            (
                Submitted {
                    job_id: job_id.clone(),
                    status,
                    position,
                    estimated_wait_secs,
                },
                promoted,
            )
        };

        metrics::counter!("fileforge_jobs_submitted_total").increment(1);
        tracing::info!(
            job_id = %job_id,
            job_type = %job_type,
            position = submitted.position,
            "Job queued"
        );
        self.emit(EventPayload::JobQueued {
            job_id,
            job_type,
            position: submitted.position,
        });
        self.after_promotion(promoted);

        Ok(submitted)
    }

    /// 1-based place in line for a queued job; 0 for any other job.
    pub fn position(&self, id: &JobId) -> usize {
        self.state.lock().position(id)
    }

    /// `position * average_job_duration_secs`.
    pub fn estimated_wait_secs(&self, id: &JobId) -> u64 {
        self.position(id) as u64 * self.settings.average_job_duration_secs
    }

    /// True only while the job holds a processing slot.
    pub fn can_process(&self, id: &JobId) -> bool {
        self.state
            .lock()
            .jobs
            .get(id)
            .is_some_and(|j| j.status == JobStatus::Processing)
    }

    pub fn get(&self, id: &JobId) -> Option<QueueJob> {
        self.state.lock().jobs.get(id).cloned()
    }

    pub fn status(&self, id: &JobId) -> Option<JobStatusView> {
        let state = self.state.lock();
        let job = state.jobs.get(id)?;
        let position = state.position(id);
        Some(JobStatusView {
            job_id: job.id.clone(),
            job_type: job.job_type,
            status: job.status,
            position,
            estimated_wait_secs: position as u64 * self.settings.average_job_duration_secs,
            error: job.error.clone(),
        })
    }

    /// Record the outcome of a processing job, free its slot, and promote
    /// the next queued job.
    ///
    /// Reporting twice, or for a job that is not processing, is refused and
    /// never frees a second slot.
    pub fn complete(&self, id: &JobId, error: Option<String>) -> Result<QueueJob, CompletionError> {
        let now = self.clock.now();

        let (job, promoted) = {
            let mut state = self.state.lock();
            let job = state.finish(id, now, error)?;
            let promoted = state.promote(now, self.settings.concurrency);
            state.record_depth();
            (job, promoted)
        };

        match &job.error {
            None => {
                tracing::info!(job_id = %id, "Job completed");
                self.emit(EventPayload::JobCompleted { job_id: id.clone() });
            }
            Some(err) => {
                tracing::info!(job_id = %id, error = %err, "Job failed");
                self.emit(EventPayload::JobFailed {
                    job_id: id.clone(),
                    error: err.clone(),
                });
            }
        }
        self.after_promotion(promoted);

        Ok(job)
    }

    /// Force-fail every processing job that has run past the job timeout.
    ///
    /// Returns the ids of the reaped jobs.
    pub fn reap_timed_out(&self) -> Vec<JobId> {
        let now = self.clock.now();
        let timeout = chrono::Duration::from_std(self.settings.job_timeout)
            .unwrap_or(chrono::Duration::MAX);

        let (reaped, promoted) = {
            let mut state = self.state.lock();
            let stuck: Vec<JobId> = state
                .jobs
                .values()
                .filter(|j| j.status == JobStatus::Processing)
                .filter(|j| j.started_at.is_some_and(|started| now - started >= timeout))
                .map(|j| j.id.clone())
                .collect();
            for id in &stuck {
                let _ = state.finish(id, now, Some(TIMEOUT_ERROR.to_string()));
            }
            let promoted = if stuck.is_empty() {
                Vec::new()
            } else {
                state.promote(now, self.settings.concurrency)
            };
            state.record_depth();
            (stuck, promoted)
        };

        for id in &reaped {
            metrics::counter!("fileforge_jobs_reaped_total").increment(1);
            tracing::warn!(job_id = %id, "Reaped job stuck in processing");
            self.emit(EventPayload::JobReaped { job_id: id.clone() });
            self.emit(EventPayload::JobFailed {
                job_id: id.clone(),
                error: TIMEOUT_ERROR.to_string(),
            });
        }
        self.after_promotion(promoted);

        reaped
    }

    /// Delete terminal jobs whose retention window has passed.
    ///
    /// Returns the number of jobs removed.
    pub fn purge_finished(&self) -> usize {
        let now = self.clock.now();
        let retention = chrono::Duration::from_std(self.settings.retention)
            .unwrap_or(chrono::Duration::MAX);

        let removed = {
            let mut state = self.state.lock();
            let before = state.jobs.len();
            state.jobs.retain(|_, job| {
                let expired = job.status.is_terminal()
                    && job
                        .completed_at
                        .is_some_and(|done| now - done >= retention);
                !expired
            });
            before - state.jobs.len()
        };

        if removed > 0 {
            tracing::debug!(removed, "Purged finished jobs");
            self.emit(EventPayload::JobsPurged { count: removed });
        }
        removed
    }

    /// Wait until the job is promoted, it leaves the queue, or `timeout`
    /// passes. Returns whether the job may now be processed.
    pub async fn wait_until_runnable(&self, id: &JobId, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let notified = self.promoted.notified();
            tokio::pin!(notified);
            // Register before checking so a promotion in between is not missed.
            notified.as_mut().enable();

            match self.get(id).map(|j| j.status) {
                Some(JobStatus::Processing) => return true,
                Some(JobStatus::Queued) => {}
                _ => return false,
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.can_process(id);
            }
        }
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.state.lock();
        QueueStats {
            queued: state.count(JobStatus::Queued),
            processing: state.count(JobStatus::Processing),
            completed: state.count(JobStatus::Completed),
            failed: state.count(JobStatus::Error),
            max_queue_size: self.settings.max_queue_size,
            concurrency: self.settings.concurrency,
        }
    }

    /// Number of tracked jobs in any status.
    pub fn len(&self) -> usize {
        self.state.lock().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn after_promotion(&self, promoted: Vec<JobId>) {
        if promoted.is_empty() {
            return;
        }
        for job_id in promoted {
            tracing::info!(job_id = %job_id, "Job promoted to processing");
            self.emit(EventPayload::JobStarted { job_id });
        }
        self.promoted.notify_waiters();
    }

    fn emit(&self, payload: EventPayload) {
        if let Some(ref events) = self.events {
            events.broadcast(payload);
        }
    }
}
