//! Conversion endpoint: the admission pipeline over HTTP.
//!
//! Video operations follow a two-step protocol. The first request is
//! answered `202` with a job id; the caller re-submits with that id (query
//! `job_id` or header `x-job-id`) until its slot is free, getting `425`
//! meanwhile. `wait_secs` lets the server hold the request instead.
//! Other operations run immediately or fail fast with `503`.

use std::time::{Duration, Instant};

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use ff_admission::{Admission, AdmissionRequest, Grant, Submitted};
use ff_convert::{normalize_format, ConversionInput};
use ff_core::{Error, JobId, Operation};

use crate::context::AppContext;
use crate::error::AppError;
use crate::middleware::rate_limit::{client_key_from_headers, insert_rate_headers, too_many_requests};

pub static X_JOB_ID: HeaderName = HeaderName::from_static("x-job-id");

/// Upper bound on `wait_secs`.
pub const MAX_WAIT_SECS: u64 = 30;

#[derive(Debug, Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ConvertParams {
    /// Target extension, e.g. `mp4`.
    pub format: String,
    /// Job id from an earlier `202` response.
    pub job_id: Option<String>,
    /// Original file name; its extension tells the converter the input type.
    pub name: Option<String>,
    /// Hold a queued video request up to this many seconds.
    pub wait_secs: Option<u64>,
}

/// First submission of a video job.
#[derive(Debug, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct QueuedResponse {
    pub job_id: String,
    /// Always `queued`.
    pub status: &'static str,
    pub position: usize,
    pub estimated_wait: u64,
    /// True when the job already holds a slot; re-submit right away.
    pub runnable: bool,
    pub message: String,
}

/// Body of `425`/`503` admission denials.
#[derive(Debug, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DenialResponse {
    pub error: String,
    pub code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_wait: Option<u64>,
}

impl DenialResponse {
    fn new(err: &Error) -> Self {
        Self {
            error: err.to_string(),
            code: err.code(),
            job_id: None,
            position: None,
            estimated_wait: None,
        }
    }

    fn into_response_for(self, err: &Error) -> Response {
        let status =
            StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::SERVICE_UNAVAILABLE);
        (status, Json(self)).into_response()
    }
}

/// POST /api/convert/{operation}
#[utoipa::path(
    post,
    path = "/api/convert/{operation}",
    params(
        ("operation" = Operation, Path, description = "Conversion operation"),
        ConvertParams
    ),
    request_body(content = Vec<u8>, content_type = "application/octet-stream"),
    responses(
        (status = 200, description = "Converted file"),
        (status = 202, description = "Video job queued", body = QueuedResponse),
        (status = 400, description = "Bad format, job id or empty body"),
        (status = 404, description = "Unknown operation or job"),
        (status = 409, description = "Job finished, already running or queued for another operation"),
        (status = 425, description = "Job not yet runnable", body = DenialResponse),
        (status = 429, description = "Rate limit exceeded"),
        (status = 502, description = "Converter failed"),
        (status = 503, description = "No capacity", body = DenialResponse)
    )
)]
pub async fn convert(
    State(ctx): State<AppContext>,
    Path(operation): Path<String>,
    Query(params): Query<ConvertParams>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let operation: Operation = operation
        .parse()
        .map_err(|_| Error::not_found("operation", &operation))?;
    let target_format = normalize_format(&params.format)?;

    let job_id = params
        .job_id
        .as_deref()
        .or_else(|| headers.get(&X_JOB_ID).and_then(|v| v.to_str().ok()))
        .map(str::parse::<JobId>)
        .transpose()
        .map_err(|e| Error::Validation(format!("invalid job id: {e}")))?;

    if body.is_empty() {
        return Err(Error::Validation("request body is empty".into()).into());
    }

    let source_ext = params
        .name
        .as_deref()
        .and_then(|n| std::path::Path::new(n).extension())
        .and_then(|e| e.to_str())
        .map(str::to_owned);

    let request = AdmissionRequest {
        client_key: client_key_from_headers(&headers),
        route: format!("/api/convert/{operation}"),
        operation,
        job_id,
    };
    let wait = Duration::from_secs(params.wait_secs.unwrap_or(0).min(MAX_WAIT_SECS));

    let admission = ctx.pipeline.admit_with_wait(request, wait).await;
    let rate = *admission.rate();

    let mut response = match admission {
        Admission::RateLimited(decision) => return Ok(too_many_requests(&decision)),
        Admission::Queued { submitted, .. } => queued_response(submitted),
        Admission::NotYetRunnable {
            job_id,
            position,
            estimated_wait_secs,
            ..
        } => {
            let err = Error::NotReady(format!(
                "job {job_id} is #{position} in the queue; retry in about {estimated_wait_secs}s"
            ));
            DenialResponse {
                job_id: Some(job_id.to_string()),
                position: Some(position),
                estimated_wait: Some(estimated_wait_secs),
                ..DenialResponse::new(&err)
            }
            .into_response_for(&err)
        }
        Admission::AtCapacity { class, .. } => {
            let err = Error::Unavailable(format!(
                "all {class} conversion slots are busy; try again shortly"
            ));
            DenialResponse::new(&err).into_response_for(&err)
        }
        Admission::QueueRejected { rejection, .. } => AppError::from(rejection).into_response(),
        Admission::UnknownJob { job_id, .. } => {
            AppError::from(Error::not_found("job", &job_id)).into_response()
        }
        Admission::JobClosed { job_id, status, .. } => {
            AppError::from(Error::Conflict(format!("job {job_id} is already {status}")))
                .into_response()
        }
        Admission::InProgress { job_id, .. } => AppError::from(Error::Conflict(format!(
            "job {job_id} is already being converted"
        )))
        .into_response(),
        Admission::WrongJobType {
            job_id,
            queued_as,
            polled_as,
            ..
        } => AppError::from(Error::Conflict(format!(
            "job {job_id} was queued for {queued_as}, not {polled_as}"
        )))
        .into_response(),
        Admission::Proceed { grant, .. } => {
            let input = ConversionInput {
                operation,
                data: body,
                source_ext,
                target_format,
            };
            run_conversion(&ctx, grant, input).await
        }
    };

    insert_rate_headers(response.headers_mut(), &rate);
    Ok(response)
}

fn queued_response(submitted: Submitted) -> Response {
    let runnable = submitted.status == ff_admission::JobStatus::Processing;
    let job_id = submitted.job_id.to_string();
    let message = if runnable {
        format!("Your job is ready; re-submit with job_id={job_id} to start the conversion")
    } else {
        format!(
            "Your job is #{} in the queue (about {}s); re-submit with job_id={job_id} to check again",
            submitted.position, submitted.estimated_wait_secs
        )
    };

    let mut response = (
        StatusCode::ACCEPTED,
        Json(QueuedResponse {
            job_id: job_id.clone(),
            status: "queued",
            position: submitted.position,
            estimated_wait: submitted.estimated_wait_secs,
            runnable,
            message,
        }),
    )
        .into_response();

    if let Ok(val) = HeaderValue::from_str(&job_id) {
        response.headers_mut().insert(X_JOB_ID.clone(), val);
    }
    if let Ok(val) = HeaderValue::from_str(&format!("/api/queue/{job_id}")) {
        response.headers_mut().insert(header::LOCATION, val);
    }
    response
}

async fn run_conversion(ctx: &AppContext, grant: Grant, input: ConversionInput) -> Response {
    let job_id = grant.job_id().cloned();
    let class = grant.class();
    let operation = input.operation;
    let started = Instant::now();

    let result = grant.run(ctx.converter.convert(input)).await;

    metrics::histogram!("fileforge_conversion_seconds", "class" => class.as_str())
        .record(started.elapsed().as_secs_f64());

    match result {
        Ok(output) => {
            tracing::info!(
                operation = %operation,
                job_id = ?job_id.as_ref().map(JobId::as_str),
                bytes = output.data.len(),
                "Conversion succeeded"
            );
            let disposition = format!("attachment; filename=\"converted.{}\"", output.format);
            let mut response = (
                StatusCode::OK,
                [(header::CONTENT_TYPE, output.content_type)],
                output.data,
            )
                .into_response();
            if let Ok(val) = HeaderValue::from_str(&disposition) {
                response.headers_mut().insert(header::CONTENT_DISPOSITION, val);
            }
            if let Some(val) = job_id.and_then(|id| HeaderValue::from_str(id.as_str()).ok()) {
                response.headers_mut().insert(X_JOB_ID.clone(), val);
            }
            response
        }
        Err(err) => {
            tracing::warn!(operation = %operation, error = %err, "Conversion failed");
            AppError::from(err).into_response()
        }
    }
}
