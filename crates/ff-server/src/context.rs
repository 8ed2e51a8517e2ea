//! Application context shared by all request handlers.

use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusHandle;

use ff_admission::{
    AdmissionControl, AdmissionPipeline, JobQueue, QueueSettings, RateLimiter,
};
use ff_convert::Converter;
use ff_core::config::Config;
use ff_core::events::EventBus;
use ff_core::Clock;

/// Shared state, cheaply cloneable because it only holds `Arc`s.
#[derive(Clone)]
pub struct AppContext {
    /// Immutable configuration snapshot.
    pub config: Arc<Config>,
    /// Rate limiter, semaphore and video queue.
    pub pipeline: Arc<AdmissionPipeline>,
    /// Performs admitted conversions.
    pub converter: Arc<dyn Converter>,
    /// Broadcast event bus for SSE.
    pub event_bus: Arc<EventBus>,
    /// Prometheus renderer; `None` when no recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

impl AppContext {
    /// Wire up the admission components from `config`.
    pub fn new(config: Config, converter: Arc<dyn Converter>, clock: Arc<dyn Clock>) -> Self {
        let event_bus = Arc::new(EventBus::default().with_clock(clock.clone()));

        let limiter = Arc::new(RateLimiter::new(clock.clone()));
        let control = AdmissionControl::new(&config.concurrency);
        let queue = Arc::new(JobQueue::with_events(
            QueueSettings::from_config(&config.queue, config.concurrency.video),
            clock,
            event_bus.clone(),
        ));
        let pipeline = AdmissionPipeline::new(limiter, control, queue, config.rate_limits.clone())
            .with_events(event_bus.clone());

        Self {
            config: Arc::new(config),
            pipeline: Arc::new(pipeline),
            converter,
            event_bus,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        self.pipeline.limiter()
    }

    pub fn queue(&self) -> &Arc<JobQueue> {
        self.pipeline.queue()
    }
}
