//! ff-admission: admission control and job queueing.
//!
//! Three collaborating pieces keep a single memory- and CPU-constrained
//! process from being overwhelmed by concurrent conversions:
//!
//! - [`RateLimiter`]: fixed-window request counting per (client, route)
//! - [`AdmissionControl`]: fail-fast per-class concurrency gate
//! - [`JobQueue`]: strict-FIFO queue for heavyweight (video) jobs with
//!   position and wait estimates
//!
//! [`AdmissionPipeline`] composes them for each inbound conversion request,
//! and [`maintenance`] sweeps expired state in the background.

pub mod maintenance;
pub mod pipeline;
pub mod queue;
pub mod rate_limit;
pub mod semaphore;

pub use maintenance::{spawn_maintenance, MaintenanceReport};
pub use pipeline::{Admission, AdmissionPipeline, AdmissionRequest, Grant, JobGrant};
pub use queue::{
    CompletionError, JobQueue, JobStatus, JobStatusView, QueueJob, QueueRejection, QueueSettings,
    QueueStats, Submitted,
};
pub use rate_limit::{client_key, RateLimitDecision, RateLimitEntry, RateLimiter, UNKNOWN_CLIENT};
pub use semaphore::{AdmissionControl, AdmissionPermit, SlotSnapshot};
