//! Queue status and statistics.

use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;

use ff_admission::{JobStatus, QueueStats, SlotSnapshot};
use ff_core::{Error, JobId};

use crate::context::AppContext;
use crate::error::AppError;

/// Status of one queued job, as polled by the UI.
#[derive(Debug, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatusResponse {
    pub job_id: String,
    pub status: JobStatus,
    /// 1-based place in line; 0 once processing or finished.
    pub position: usize,
    /// Seconds, from the configured average job duration.
    pub estimated_wait: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct QueueOverviewResponse {
    pub queue: QueueStats,
    pub slots: Vec<SlotSnapshot>,
}

/// GET /api/queue/{job_id}
#[utoipa::path(
    get,
    path = "/api/queue/{job_id}",
    params(("job_id" = String, Path, description = "Job id from a queued response")),
    responses(
        (status = 200, description = "Job status", body = QueueStatusResponse),
        (status = 400, description = "Malformed job id"),
        (status = 404, description = "Unknown or purged job")
    )
)]
pub async fn job_status(
    State(ctx): State<AppContext>,
    Path(job_id): Path<String>,
) -> Result<Json<QueueStatusResponse>, AppError> {
    let id: JobId = job_id
        .parse()
        .map_err(|e| Error::Validation(format!("invalid job id: {e}")))?;

    let view = ctx
        .queue()
        .status(&id)
        .ok_or_else(|| Error::not_found("job", &id))?;

    Ok(Json(QueueStatusResponse {
        job_id: view.job_id.to_string(),
        status: view.status,
        position: view.position,
        estimated_wait: view.estimated_wait_secs,
        error: view.error,
    }))
}

/// GET /api/queue
#[utoipa::path(
    get,
    path = "/api/queue",
    responses((status = 200, description = "Queue and slot counters", body = QueueOverviewResponse))
)]
pub async fn queue_overview(State(ctx): State<AppContext>) -> Json<QueueOverviewResponse> {
    Json(QueueOverviewResponse {
        queue: ctx.queue().stats(),
        slots: ctx.pipeline.slots(),
    })
}
