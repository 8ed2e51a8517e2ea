//! Axum router construction.

use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::context::AppContext;
use crate::middleware::rate_limit::api_rate_limit;
use crate::middleware::request_id::request_id_middleware;
use crate::routes;

#[derive(OpenApi)]
#[openapi(
    paths(
        routes::health::health_check,
        routes::convert::convert,
        routes::queue::job_status,
        routes::queue::queue_overview,
    ),
    components(schemas(
        routes::health::HealthResponse,
        routes::convert::QueuedResponse,
        routes::convert::DenialResponse,
        routes::queue::QueueStatusResponse,
        routes::queue::QueueOverviewResponse,
        ff_admission::JobStatus,
        ff_admission::QueueStats,
        ff_admission::SlotSnapshot,
        ff_core::Operation,
        ff_core::ResourceClass,
    ))
)]
struct ApiDoc;

/// Build the complete Axum router.
pub fn build_router(ctx: AppContext) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let upload_limit = ctx.config.server.max_upload_bytes;

    // Limited by the admission pipeline's own presets.
    let convert_routes = Router::new()
        .route("/convert/{operation}", post(routes::convert::convert))
        .layer(DefaultBodyLimit::max(upload_limit));

    let api_routes = Router::new()
        .route("/queue", get(routes::queue::queue_overview))
        .route("/queue/{job_id}", get(routes::queue::job_status))
        .route("/events", get(routes::events::events_handler))
        .route_layer(middleware::from_fn_with_state(ctx.clone(), api_rate_limit));

    Router::new()
        .route("/health", get(routes::health::health_check))
        .nest("/api", convert_routes.merge(api_routes))
        .merge(SwaggerUi::new("/api-docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/metrics", get(routes::metrics::metrics_handler))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use ff_convert::{ConversionInput, ConversionOutput, Converter};
    use ff_core::config::Config;
    use ff_core::ManualClock;

    struct Echo;

    #[async_trait]
    impl Converter for Echo {
        async fn convert(&self, input: ConversionInput) -> ff_core::Result<ConversionOutput> {
            Ok(ConversionOutput::new(input.data, input.target_format))
        }
    }

    fn app(config: Config) -> Router {
        let ctx = AppContext::new(config, Arc::new(Echo), Arc::new(ManualClock::default()));
        build_router(ctx)
    }

    #[tokio::test]
    async fn health_is_not_rate_limited() {
        let mut config = Config::default();
        config.rate_limits.api.max_requests = 1;
        let app = app(config);

        for _ in 0..3 {
            let resp = app
                .clone()
                .oneshot(Request::get("/health").body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::OK);
            assert!(resp.headers().contains_key("x-request-id"));
        }
    }

    #[tokio::test]
    async fn api_preset_applies_per_route() {
        let mut config = Config::default();
        config.rate_limits.api.max_requests = 2;
        let app = app(config);

        let get = |uri: &str| Request::get(uri).body(Body::empty()).unwrap();

        for _ in 0..2 {
            let resp = app.clone().oneshot(get("/api/queue")).await.unwrap();
            assert_eq!(resp.status(), StatusCode::OK);
        }
        let resp = app.clone().oneshot(get("/api/queue")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(resp.headers().contains_key("retry-after"));

        // A different route has its own window.
        let resp = app.oneshot(get("/api/queue/unknown-job")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn openapi_document_is_served() {
        let resp = app(Config::default())
            .oneshot(
                Request::get("/api-docs/openapi.json")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
