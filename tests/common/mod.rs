//! Shared test harness for integration tests.
//!
//! [`TestHarness`] builds a full [`AppContext`] around a [`ManualClock`] and
//! a [`StubConverter`], and can mount the router on a random port for
//! HTTP-level testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Notify;

use ff_convert::{ConversionInput, ConversionOutput, Converter};
use ff_core::config::{Config, RateLimitPreset};
use ff_core::ManualClock;
use ff_server::context::AppContext;
use ff_server::router::build_router;

/// Body that makes the stub fail.
pub const FAIL_BODY: &[u8] = b"fail";
/// Body that makes the stub wait for [`StubConverter::release`].
pub const BLOCK_BODY: &[u8] = b"block";

/// Converter that echoes its input back.
#[derive(Default)]
pub struct StubConverter {
    pub calls: AtomicUsize,
    pub started: Notify,
    pub release: Notify,
}

impl StubConverter {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Converter for StubConverter {
    async fn convert(&self, input: ConversionInput) -> ff_core::Result<ConversionOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if input.data.as_ref() == BLOCK_BODY {
            self.started.notify_one();
            self.release.notified().await;
        }
        if input.data.as_ref() == FAIL_BODY {
            return Err(ff_core::Error::tool("stub", "conversion exploded"));
        }
        Ok(ConversionOutput::new(input.data, input.target_format))
    }
}

/// Defaults with rate limits raised far out of the way.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.rate_limits.conversion = RateLimitPreset::new(60, 10_000);
    config.rate_limits.burst = RateLimitPreset::new(10, 10_000);
    config.rate_limits.api = RateLimitPreset::new(60, 10_000);
    config
}

pub struct TestHarness {
    pub ctx: AppContext,
    pub clock: Arc<ManualClock>,
    pub converter: Arc<StubConverter>,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: Config) -> Self {
        let clock = Arc::new(ManualClock::default());
        let converter = Arc::new(StubConverter::default());
        let ctx = AppContext::new(config, converter.clone(), clock.clone());
        Self {
            ctx,
            clock,
            converter,
        }
    }

    /// Start the server on a random port with [`test_config`].
    pub async fn with_server() -> (Self, SocketAddr) {
        Self::with_server_config(test_config()).await
    }

    pub async fn with_server_config(config: Config) -> (Self, SocketAddr) {
        let harness = Self::with_config(config);
        let app = build_router(harness.ctx.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind random port");
        let addr = listener.local_addr().expect("failed to get local addr");

        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        (harness, addr)
    }
}

/// POST a conversion and return the response.
pub async fn post_convert(
    client: &reqwest::Client,
    addr: SocketAddr,
    path_and_query: &str,
    body: &'static [u8],
) -> reqwest::Response {
    client
        .post(format!("http://{addr}/api/convert/{path_and_query}"))
        .body(body)
        .send()
        .await
        .unwrap()
}
