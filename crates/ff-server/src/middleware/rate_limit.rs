//! Fixed-window rate limiting for the general API.
//!
//! Conversion routes are limited inside the admission pipeline instead,
//! where the `burst` and `conversion` presets apply.

use axum::extract::{MatchedPath, Request, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use ff_admission::{client_key, RateLimitDecision};

use crate::context::AppContext;

pub static X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub static X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub static X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Caller identity from `x-forwarded-for` / `x-real-ip`.
pub fn client_key_from_headers(headers: &HeaderMap) -> String {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
    client_key(header("x-forwarded-for"), header("x-real-ip"))
}

/// Write the informational `x-ratelimit-*` headers, plus `retry-after` on
/// denial.
pub fn insert_rate_headers(headers: &mut HeaderMap, decision: &RateLimitDecision) {
    headers.insert(X_RATELIMIT_LIMIT.clone(), HeaderValue::from(decision.limit));
    headers.insert(
        X_RATELIMIT_REMAINING.clone(),
        HeaderValue::from(decision.remaining),
    );
    headers.insert(
        X_RATELIMIT_RESET.clone(),
        HeaderValue::from(decision.reset_unix()),
    );
    if let Some(secs) = decision.retry_after_secs {
        headers.insert(axum::http::header::RETRY_AFTER, HeaderValue::from(secs));
    }
}

/// 429 response for a denied decision.
pub fn too_many_requests(decision: &RateLimitDecision) -> Response {
    let retry_after = decision.retry_after_secs.unwrap_or(0);
    let body = json!({
        "error": format!("Rate limit exceeded; retry in {retry_after}s"),
        "code": "rate_limited",
        "retryAfter": retry_after,
    });
    let mut response = (StatusCode::TOO_MANY_REQUESTS, axum::Json(body)).into_response();
    insert_rate_headers(response.headers_mut(), decision);
    response
}

/// Middleware applying the `api` preset, keyed by client and matched route.
pub async fn api_rate_limit(State(ctx): State<AppContext>, request: Request, next: Next) -> Response {
    let client = client_key_from_headers(request.headers());
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| request.uri().path().to_owned());

    let decision = ctx
        .limiter()
        .check(&client, &route, &ctx.config.rate_limits.api);

    if !decision.allowed {
        metrics::counter!("fileforge_rate_limited_total", "preset" => "api").increment(1);
        ctx.event_bus
            .broadcast(ff_core::events::EventPayload::RateLimited { route });
        return too_many_requests(&decision);
    }

    let mut response = next.run(request).await;
    insert_rate_headers(response.headers_mut(), &decision);
    response
}
