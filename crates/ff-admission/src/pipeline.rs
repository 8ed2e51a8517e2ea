//! Per-request admission: rate limit, then queue or semaphore.
//!
//! [`AdmissionPipeline::admit`] never performs the conversion itself. It
//! returns an [`Admission`] describing what the caller should answer, and
//! when work may start it hands out a [`Grant`] that must be settled with
//! the conversion outcome. Grants settle themselves on drop, so an early
//! return or a panic in the handler cannot leak a slot.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashSet;

use ff_core::config::RateLimitsConfig;
use ff_core::events::{EventBus, EventPayload};
use ff_core::{JobId, JobType, Operation, ResourceClass};

use crate::queue::{CompletionError, JobQueue, JobStatus, QueueRejection, Submitted};
use crate::rate_limit::{RateLimitDecision, RateLimiter};
use crate::semaphore::{AdmissionControl, AdmissionPermit, SlotSnapshot};

/// Error recorded on a job whose grant was dropped without an outcome.
pub const ABORTED_ERROR: &str = "conversion aborted";

/// One inbound conversion request.
#[derive(Debug, Clone)]
pub struct AdmissionRequest {
    /// Caller identity used for rate limiting.
    pub client_key: String,
    /// Route key used for rate limiting.
    pub route: String,
    pub operation: Operation,
    /// Job id from an earlier queued response, when re-polling.
    pub job_id: Option<JobId>,
}

/// Outcome of [`AdmissionPipeline::admit`].
///
/// Every variant except `RateLimited` carries the rate-limit decision that
/// let the request through, for the informational response headers.
#[derive(Debug)]
pub enum Admission {
    RateLimited(RateLimitDecision),
    /// First submission of a heavyweight job.
    Queued {
        submitted: Submitted,
        rate: RateLimitDecision,
    },
    /// The job is still waiting for a processing slot.
    NotYetRunnable {
        job_id: JobId,
        position: usize,
        estimated_wait_secs: u64,
        rate: RateLimitDecision,
    },
    /// Lightweight class has no free slot.
    AtCapacity {
        class: ResourceClass,
        rate: RateLimitDecision,
    },
    QueueRejected {
        rejection: QueueRejection,
        rate: RateLimitDecision,
    },
    UnknownJob {
        job_id: JobId,
        rate: RateLimitDecision,
    },
    /// The job already finished or failed.
    JobClosed {
        job_id: JobId,
        status: JobStatus,
        rate: RateLimitDecision,
    },
    /// Another request is already converting this job.
    InProgress {
        job_id: JobId,
        rate: RateLimitDecision,
    },
    /// The job was queued for a different operation than the one polled.
    WrongJobType {
        job_id: JobId,
        queued_as: JobType,
        polled_as: JobType,
        rate: RateLimitDecision,
    },
    /// Work may start now.
    Proceed {
        grant: Grant,
        rate: RateLimitDecision,
    },
}

impl Admission {
    pub fn rate(&self) -> &RateLimitDecision {
        match self {
            Admission::RateLimited(rate)
            | Admission::Queued { rate, .. }
            | Admission::NotYetRunnable { rate, .. }
            | Admission::AtCapacity { rate, .. }
            | Admission::QueueRejected { rate, .. }
            | Admission::UnknownJob { rate, .. }
            | Admission::JobClosed { rate, .. }
            | Admission::InProgress { rate, .. }
            | Admission::WrongJobType { rate, .. }
            | Admission::Proceed { rate, .. } => rate,
        }
    }
}

/// Permission to run one conversion.
#[derive(Debug)]
pub enum Grant {
    /// Lightweight slot; released when the grant is dropped.
    Permit(AdmissionPermit),
    /// Processing slot of a queued job.
    Job(JobGrant),
}

impl Grant {
    pub fn class(&self) -> ResourceClass {
        match self {
            Grant::Permit(permit) => permit.class(),
            Grant::Job(_) => ResourceClass::Video,
        }
    }

    pub fn job_id(&self) -> Option<&JobId> {
        match self {
            Grant::Permit(_) => None,
            Grant::Job(job) => Some(job.job_id()),
        }
    }

    /// Settle the grant with a conversion outcome.
    pub fn finish<T, E: fmt::Display>(self, outcome: &Result<T, E>) {
        match self {
            Grant::Permit(permit) => permit.release(),
            Grant::Job(job) => {
                let _ = match outcome {
                    Ok(_) => job.succeed(),
                    Err(err) => job.fail(err.to_string()),
                };
            }
        }
    }

    /// Run `work` under this grant and settle it with the result.
    pub async fn run<F, T, E>(self, work: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let outcome = work.await;
        self.finish(&outcome);
        outcome
    }
}

/// Exclusive claim on a processing job.
///
/// Dropping it without [`succeed`](Self::succeed) or [`fail`](Self::fail)
/// completes the job with [`ABORTED_ERROR`].
pub struct JobGrant {
    queue: Arc<JobQueue>,
    claimed: Arc<DashSet<JobId>>,
    job_id: JobId,
    settled: bool,
}

impl JobGrant {
    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn succeed(mut self) -> Result<(), CompletionError> {
        self.settle(None)
    }

    pub fn fail(mut self, error: impl Into<String>) -> Result<(), CompletionError> {
        self.settle(Some(error.into()))
    }

    fn settle(&mut self, error: Option<String>) -> Result<(), CompletionError> {
        self.settled = true;
        match self.queue.complete(&self.job_id, error) {
            Ok(_) => Ok(()),
            Err(err) => {
                // Usually the reaper got there first.
                tracing::warn!(job_id = %self.job_id, error = %err, "Could not record job outcome");
                Err(err)
            }
        }
    }
}

impl Drop for JobGrant {
    fn drop(&mut self) {
        if !self.settled {
            let _ = self.settle(Some(ABORTED_ERROR.to_string()));
        }
        self.claimed.remove(&self.job_id);
    }
}

impl fmt::Debug for JobGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobGrant")
            .field("job_id", &self.job_id)
            .field("settled", &self.settled)
            .finish()
    }
}

/// Composes the limiter, the semaphore and the queue.
pub struct AdmissionPipeline {
    limiter: Arc<RateLimiter>,
    control: AdmissionControl,
    queue: Arc<JobQueue>,
    limits: RateLimitsConfig,
    claimed: Arc<DashSet<JobId>>,
    events: Option<Arc<EventBus>>,
}

impl AdmissionPipeline {
    pub fn new(
        limiter: Arc<RateLimiter>,
        control: AdmissionControl,
        queue: Arc<JobQueue>,
        limits: RateLimitsConfig,
    ) -> Self {
        Self {
            limiter,
            control,
            queue,
            limits,
            claimed: Arc::new(DashSet::new()),
            events: None,
        }
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn control(&self) -> &AdmissionControl {
        &self.control
    }

    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.queue
    }

    /// Per-class slot usage. Queued classes report the queue's processing
    /// jobs, which hold their slots instead of the semaphore.
    pub fn slots(&self) -> Vec<SlotSnapshot> {
        let stats = self.queue.stats();
        self.control
            .snapshot()
            .into_iter()
            .map(|slot| {
                if slot.class.is_queued() {
                    SlotSnapshot {
                        active: stats.processing,
                        limit: stats.concurrency,
                        ..slot
                    }
                } else {
                    slot
                }
            })
            .collect()
    }

    /// Decide what to do with one conversion request. Never blocks.
    pub fn admit(&self, request: AdmissionRequest) -> Admission {
        let rate = match self.check_rate(&request) {
            Ok(rate) => rate,
            Err(denied) => return Admission::RateLimited(denied),
        };

        match request.operation.job_type() {
            Some(job_type) => self.admit_queued(request, job_type, rate),
            None => self.admit_immediate(request.operation.class(), rate),
        }
    }

    /// Like [`admit`](Self::admit), but a heavyweight job still waiting for
    /// its slot is held for up to `wait` before answering.
    pub async fn admit_with_wait(&self, request: AdmissionRequest, wait: Duration) -> Admission {
        let job_type = request.operation.job_type();
        let admission = self.admit(request);
        if wait.is_zero() {
            return admission;
        }
        let Some(job_type) = job_type else {
            return admission;
        };

        let (job_id, rate) = match &admission {
            Admission::Queued { submitted, rate } => (submitted.job_id.clone(), *rate),
            Admission::NotYetRunnable { job_id, rate, .. } => (job_id.clone(), *rate),
            _ => return admission,
        };

        if self.queue.wait_until_runnable(&job_id, wait).await {
            return self.claim(job_id, rate);
        }

        match admission {
            Admission::Queued { mut submitted, rate } => {
                submitted.position = self.queue.position(&job_id);
                submitted.estimated_wait_secs = self.queue.estimated_wait_secs(&job_id);
                submitted.status = self
                    .queue
                    .get(&job_id)
                    .map_or(submitted.status, |job| job.status);
                Admission::Queued { submitted, rate }
            }
            _ => self.poll_job(job_id, job_type, rate),
        }
    }

    /// Apply the burst preset, then the conversion preset. Both must allow.
    fn check_rate(&self, request: &AdmissionRequest) -> Result<RateLimitDecision, RateLimitDecision> {
        let burst_route = format!("{}#burst", request.route);
        let burst = self
            .limiter
            .check(&request.client_key, &burst_route, &self.limits.burst);
        if !burst.allowed {
            self.record_rate_limited(&request.route, "burst");
            return Err(burst);
        }

        let conversion =
            self.limiter
                .check(&request.client_key, &request.route, &self.limits.conversion);
        if !conversion.allowed {
            self.record_rate_limited(&request.route, "conversion");
            return Err(conversion);
        }

        // Report whichever window is closer to running out.
        Ok(if burst.remaining < conversion.remaining {
            burst
        } else {
            conversion
        })
    }

    fn admit_immediate(&self, class: ResourceClass, rate: RateLimitDecision) -> Admission {
        match self.control.acquire(class) {
            Some(permit) => Admission::Proceed {
                grant: Grant::Permit(permit),
                rate,
            },
            None => {
                metrics::counter!("fileforge_capacity_rejected_total", "class" => class.as_str())
                    .increment(1);
                self.emit(EventPayload::CapacityRejected { class });
                Admission::AtCapacity { class, rate }
            }
        }
    }

    fn admit_queued(
        &self,
        request: AdmissionRequest,
        job_type: JobType,
        rate: RateLimitDecision,
    ) -> Admission {
        match request.job_id {
            None => {
                match self
                    .queue
                    .submit(JobId::generate(), job_type, request.client_key)
                {
                    Ok(submitted) => Admission::Queued { submitted, rate },
                    Err(rejection) => Admission::QueueRejected { rejection, rate },
                }
            }
            Some(job_id) => self.poll_job(job_id, job_type, rate),
        }
    }

    fn poll_job(&self, job_id: JobId, job_type: JobType, rate: RateLimitDecision) -> Admission {
        let Some(job) = self.queue.get(&job_id) else {
            return Admission::UnknownJob { job_id, rate };
        };
        if job.job_type != job_type {
            return Admission::WrongJobType {
                job_id,
                queued_as: job.job_type,
                polled_as: job_type,
                rate,
            };
        }

        match job.status {
            JobStatus::Processing => self.claim(job_id, rate),
            JobStatus::Queued => Admission::NotYetRunnable {
                position: self.queue.position(&job_id),
                estimated_wait_secs: self.queue.estimated_wait_secs(&job_id),
                job_id,
                rate,
            },
            status => Admission::JobClosed {
                job_id,
                status,
                rate,
            },
        }
    }

    fn claim(&self, job_id: JobId, rate: RateLimitDecision) -> Admission {
        if !self.claimed.insert(job_id.clone()) {
            return Admission::InProgress { job_id, rate };
        }

        // Re-check under the claim; a reap may have closed the job meanwhile.
        if !self.queue.can_process(&job_id) {
            self.claimed.remove(&job_id);
            return match self.queue.get(&job_id) {
                Some(job) => Admission::JobClosed {
                    job_id,
                    status: job.status,
                    rate,
                },
                None => Admission::UnknownJob { job_id, rate },
            };
        }

        Admission::Proceed {
            grant: Grant::Job(JobGrant {
                queue: self.queue.clone(),
                claimed: self.claimed.clone(),
                job_id,
                settled: false,
            }),
            rate,
        }
    }

    fn record_rate_limited(&self, route: &str, preset: &'static str) {
        metrics::counter!("fileforge_rate_limited_total", "preset" => preset).increment(1);
        self.emit(EventPayload::RateLimited {
            route: route.to_string(),
        });
    }

    fn emit(&self, payload: EventPayload) {
        if let Some(ref events) = self.events {
            events.broadcast(payload);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::QueueSettings;
    use ff_core::config::{ConcurrencyConfig, RateLimitPreset};
    use ff_core::ManualClock;

    struct Fixture {
        clock: Arc<ManualClock>,
        pipeline: AdmissionPipeline,
    }

    fn generous_limits() -> RateLimitsConfig {
        RateLimitsConfig {
            conversion: RateLimitPreset::new(60, 1_000),
            burst: RateLimitPreset::new(10, 1_000),
            api: RateLimitPreset::new(60, 1_000),
        }
    }

    fn fixture_with(limits: RateLimitsConfig, concurrency: ConcurrencyConfig) -> Fixture {
        let clock = Arc::new(ManualClock::default());
        let limiter = Arc::new(RateLimiter::new(clock.clone()));
        let queue = Arc::new(JobQueue::new(
            QueueSettings::from_config(&Default::default(), concurrency.video),
            clock.clone(),
        ));
        let pipeline =
            AdmissionPipeline::new(limiter, AdmissionControl::new(&concurrency), queue, limits);
        Fixture { clock, pipeline }
    }

    fn fixture() -> Fixture {
        fixture_with(generous_limits(), ConcurrencyConfig::default())
    }

    fn request(operation: Operation, job_id: Option<JobId>) -> AdmissionRequest {
        AdmissionRequest {
            client_key: "10.0.0.1".into(),
            route: format!("/api/convert/{}", operation.as_str()),
            operation,
            job_id,
        }
    }

    fn submit_video(f: &Fixture) -> JobId {
        match f.pipeline.admit(request(Operation::VideoConvert, None)) {
            Admission::Queued { submitted, .. } => submitted.job_id,
            other => panic!("expected queued, got {other:?}"),
        }
    }

    #[test]
    fn lightweight_permit_released_after_finish() {
        let f = fixture();
        let admission = f.pipeline.admit(request(Operation::ImageConvert, None));
        let Admission::Proceed { grant, .. } = admission else {
            panic!("expected proceed");
        };
        assert_eq!(grant.class(), ResourceClass::Image);
        assert_eq!(f.pipeline.control().active(ResourceClass::Image), 1);

        grant.finish(&Err::<(), _>("magick failed"));
        assert_eq!(f.pipeline.control().active(ResourceClass::Image), 0);
    }

    #[test]
    fn lightweight_at_capacity_fails_fast() {
        let concurrency = ConcurrencyConfig {
            pdf: 1,
            ..ConcurrencyConfig::default()
        };
        let f = fixture_with(generous_limits(), concurrency);

        let first = f.pipeline.admit(request(Operation::PdfConvert, None));
        assert!(matches!(first, Admission::Proceed { .. }));
        let second = f.pipeline.admit(request(Operation::PdfConvert, None));
        assert!(matches!(
            second,
            Admission::AtCapacity {
                class: ResourceClass::Pdf,
                ..
            }
        ));

        drop(first);
        assert!(matches!(
            f.pipeline.admit(request(Operation::PdfConvert, None)),
            Admission::Proceed { .. }
        ));
    }

    #[test]
    fn burst_preset_denies_before_conversion_preset() {
        let limits = RateLimitsConfig {
            burst: RateLimitPreset::new(10, 2),
            ..generous_limits()
        };
        let f = fixture_with(limits, ConcurrencyConfig::default());

        for _ in 0..2 {
            assert!(matches!(
                f.pipeline.admit(request(Operation::TextConvert, None)),
                Admission::Proceed { .. }
            ));
        }
        let denied = f.pipeline.admit(request(Operation::TextConvert, None));
        let Admission::RateLimited(decision) = denied else {
            panic!("expected rate limited");
        };
        assert_eq!(decision.limit, 2);
        assert_eq!(decision.retry_after_secs, Some(10));

        f.clock.advance_secs(10);
        assert!(matches!(
            f.pipeline.admit(request(Operation::TextConvert, None)),
            Admission::Proceed { .. }
        ));
    }

    #[test]
    fn rate_limited_request_takes_no_slot() {
        let limits = RateLimitsConfig {
            conversion: RateLimitPreset::new(60, 1),
            ..generous_limits()
        };
        let f = fixture_with(limits, ConcurrencyConfig::default());
        let _held = f.pipeline.admit(request(Operation::AudioConvert, None));
        let denied = f.pipeline.admit(request(Operation::AudioConvert, None));
        assert!(matches!(denied, Admission::RateLimited(_)));
        assert_eq!(f.pipeline.control().active(ResourceClass::Audio), 1);
    }

    #[test]
    fn video_first_submission_is_queued_then_proceeds() {
        let f = fixture();
        let job_id = submit_video(&f);
        assert!(f.pipeline.queue().can_process(&job_id));

        let admission = f
            .pipeline
            .admit(request(Operation::VideoConvert, Some(job_id.clone())));
        let Admission::Proceed { grant, .. } = admission else {
            panic!("expected proceed");
        };
        assert_eq!(grant.job_id(), Some(&job_id));

        grant.finish(&Ok::<_, String>(()));
        assert_eq!(
            f.pipeline.queue().get(&job_id).unwrap().status,
            JobStatus::Completed
        );
    }

    #[test]
    fn second_video_job_waits_for_first() {
        let f = fixture();
        let first = submit_video(&f);
        let second = submit_video(&f);

        let poll = f
            .pipeline
            .admit(request(Operation::VideoConvert, Some(second.clone())));
        let Admission::NotYetRunnable {
            position,
            estimated_wait_secs,
            ..
        } = poll
        else {
            panic!("expected not yet runnable");
        };
        assert_eq!(position, 1);
        assert_eq!(estimated_wait_secs, 30);

        let Admission::Proceed { grant, .. } = f
            .pipeline
            .admit(request(Operation::VideoConvert, Some(first)))
        else {
            panic!("expected proceed");
        };
        grant.finish(&Err::<(), _>("ffmpeg crashed"));

        assert!(matches!(
            f.pipeline
                .admit(request(Operation::VideoConvert, Some(second))),
            Admission::Proceed { .. }
        ));
    }

    #[test]
    fn dropped_job_grant_records_abort_and_frees_slot() {
        let f = fixture();
        let first = submit_video(&f);
        let second = submit_video(&f);

        let admission = f
            .pipeline
            .admit(request(Operation::VideoConvert, Some(first.clone())));
        drop(admission);

        let job = f.pipeline.queue().get(&first).unwrap();
        assert_eq!(job.status, JobStatus::Error);
        assert_eq!(job.error.as_deref(), Some(ABORTED_ERROR));
        assert!(f.pipeline.queue().can_process(&second));
    }

    #[test]
    fn concurrent_claim_on_same_job_is_refused() {
        let f = fixture();
        let job_id = submit_video(&f);

        let held = f
            .pipeline
            .admit(request(Operation::VideoConvert, Some(job_id.clone())));
        assert!(matches!(held, Admission::Proceed { .. }));
        assert!(matches!(
            f.pipeline
                .admit(request(Operation::VideoConvert, Some(job_id.clone()))),
            Admission::InProgress { .. }
        ));
    }

    #[test]
    fn poll_with_other_operation_is_refused() {
        let f = fixture();
        let job_id = submit_video(&f);

        let admission = f
            .pipeline
            .admit(request(Operation::VideoCompress, Some(job_id.clone())));
        assert!(matches!(
            admission,
            Admission::WrongJobType {
                queued_as: JobType::VideoConvert,
                polled_as: JobType::VideoCompress,
                ..
            }
        ));

        // The job keeps its slot for the right operation.
        let job = f.pipeline.queue().get(&job_id).unwrap();
        assert_eq!(job.status, JobStatus::Processing);
        assert!(matches!(
            f.pipeline
                .admit(request(Operation::VideoConvert, Some(job_id))),
            Admission::Proceed { .. }
        ));
    }

    #[test]
    fn slots_report_processing_video_jobs() {
        let f = fixture();
        let _first = submit_video(&f);
        let _second = submit_video(&f);
        let _image = f.pipeline.admit(request(Operation::ImageConvert, None));

        let slots = f.pipeline.slots();
        let video = slots
            .iter()
            .find(|s| s.class == ResourceClass::Video)
            .unwrap();
        assert_eq!((video.active, video.limit), (1, 1));
        let image = slots
            .iter()
            .find(|s| s.class == ResourceClass::Image)
            .unwrap();
        assert_eq!(image.active, 1);
        assert!(slots
            .iter()
            .filter(|s| !matches!(s.class, ResourceClass::Video | ResourceClass::Image))
            .all(|s| s.active == 0));
    }

    #[test]
    fn unknown_and_closed_jobs() {
        let f = fixture();
        let ghost: JobId = "ghost".parse().unwrap();
        assert!(matches!(
            f.pipeline
                .admit(request(Operation::VideoConvert, Some(ghost))),
            Admission::UnknownJob { .. }
        ));

        let job_id = submit_video(&f);
        f.pipeline.queue().complete(&job_id, None).unwrap();
        assert!(matches!(
            f.pipeline
                .admit(request(Operation::VideoConvert, Some(job_id))),
            Admission::JobClosed {
                status: JobStatus::Completed,
                ..
            }
        ));
    }

    #[test]
    fn full_queue_is_rejected() {
        let clock = Arc::new(ManualClock::default());
        let queue = Arc::new(JobQueue::new(
            QueueSettings {
                max_queue_size: 1,
                ..QueueSettings::default()
            },
            clock.clone(),
        ));
        let pipeline = AdmissionPipeline::new(
            Arc::new(RateLimiter::new(clock)),
            AdmissionControl::new(&ConcurrencyConfig::default()),
            queue,
            generous_limits(),
        );

        assert!(matches!(
            pipeline.admit(request(Operation::VideoConvert, None)),
            Admission::Queued { .. }
        ));
        assert!(matches!(
            pipeline.admit(request(Operation::VideoConvert, None)),
            Admission::QueueRejected {
                rejection: QueueRejection::Full { max: 1 },
                ..
            }
        ));
    }

    #[tokio::test]
    async fn admit_with_wait_collapses_submit_and_poll() {
        let f = fixture();
        let admission = f
            .pipeline
            .admit_with_wait(request(Operation::VideoConvert, None), Duration::from_secs(1))
            .await;
        let Admission::Proceed { grant, .. } = admission else {
            panic!("expected proceed");
        };

        let result: Result<u32, String> = grant.run(async { Ok(7) }).await;
        assert_eq!(result, Ok(7));
        assert_eq!(f.pipeline.queue().stats().completed, 1);
    }

    #[tokio::test]
    async fn admit_with_wait_returns_queued_on_timeout() {
        let f = fixture();
        let _first = submit_video(&f);
        let admission = f
            .pipeline
            .admit_with_wait(
                request(Operation::VideoConvert, None),
                Duration::from_millis(20),
            )
            .await;
        let Admission::Queued { submitted, .. } = admission else {
            panic!("expected queued");
        };
        assert_eq!(submitted.status, JobStatus::Queued);
        assert_eq!(submitted.position, 1);
    }
}
