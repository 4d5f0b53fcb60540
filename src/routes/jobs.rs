use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use base64::Engine;
use garde::Validate;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::models::api::{JobSummary, LimitQuery, SubmitQuery, SubmitRequest, SubmitResponse};
use crate::models::job::{JobRecord, JobStatus};
use crate::models::parse::ParseOptions;
use crate::routes::error::ApiError;
use crate::services::queue::Submission;

const DEFAULT_JOBS_LIMIT: usize = 50;

/// POST /parse: enqueue a base64 screenshot (OmniParser-compatible body).
pub async fn submit_parse(
    State(state): State<AppState>,
    Query(query): Query<SubmitQuery>,
    Json(request): Json<SubmitRequest>,
) -> Result<Response, ApiError> {
    request
        .validate()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let image = decode_base64_image(&request.base64_image)?;
    let submission = state.queue.submit(image, request.options).await?;
    respond(submission, query.wait).await
}

/// POST /jobs: enqueue a screenshot uploaded as multipart form data.
pub async fn submit_upload(
    State(state): State<AppState>,
    Query(query): Query<SubmitQuery>,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    let mut image: Option<Vec<u8>> = None;
    let mut options = ParseOptions::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.to_string()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "image" => {
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(e.to_string()))?;
                image = Some(data.to_vec());
            }
            "use_paddleocr" => options.use_paddleocr = Some(parse_field(field, &name).await?),
            "text_threshold" => options.text_threshold = Some(parse_field(field, &name).await?),
            "box_threshold" => options.box_threshold = Some(parse_field(field, &name).await?),
            "iou_threshold" => options.iou_threshold = Some(parse_field(field, &name).await?),
            _ => {}
        }
    }

    options
        .validate()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let image = image.ok_or_else(|| ApiError::BadRequest("missing `image` field".to_string()))?;
    ensure_image(&image)?;

    let submission = state.queue.submit(image, options).await?;
    respond(submission, query.wait).await
}

/// GET /jobs: most recent job records, newest first.
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> Json<Vec<JobSummary>> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_JOBS_LIMIT)
        .min(state.settings.job_history_size);
    let jobs = state.stats.jobs(limit).await;
    Json(jobs.iter().map(JobSummary::from).collect())
}

/// GET /jobs/{job_id}: full record of one job, including its parse result.
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobRecord>, ApiError> {
    state
        .stats
        .job(job_id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("job {job_id} not found")))
}

async fn respond(submission: Submission, wait: bool) -> Result<Response, ApiError> {
    if !wait {
        let body = SubmitResponse {
            job_id: submission.job_id,
            status: JobStatus::Queued.wire_name().to_string(),
            queue_position: submission.queue_position,
        };
        return Ok((StatusCode::ACCEPTED, Json(body)).into_response());
    }

    let record = submission
        .wait()
        .await
        .ok_or_else(|| ApiError::Unavailable("dispatcher stopped before the job finished".to_string()))?;
    let status = match record.status {
        JobStatus::Succeeded => StatusCode::OK,
        JobStatus::TimedOut => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::BAD_GATEWAY,
    };
    Ok((status, Json(record)).into_response())
}

async fn parse_field<T: std::str::FromStr>(
    field: axum::extract::multipart::Field<'_>,
    name: &str,
) -> Result<T, ApiError> {
    let text = field
        .text()
        .await
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    text.trim()
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid value for `{name}`: {text}")))
}

/// Decode a base64 image, tolerating a `data:image/...;base64,` prefix.
pub fn decode_base64_image(encoded: &str) -> Result<Vec<u8>, ApiError> {
    let encoded = match encoded.split_once(";base64,") {
        Some((prefix, data)) if prefix.starts_with("data:") => data,
        _ => encoded,
    };
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|e| ApiError::BadRequest(format!("base64_image is not valid base64: {e}")))?;
    ensure_image(&bytes)?;
    Ok(bytes)
}

fn ensure_image(bytes: &[u8]) -> Result<(), ApiError> {
    image::guess_format(bytes)
        .map(|_| ())
        .map_err(|_| ApiError::UnsupportedMedia("payload is not a PNG, JPEG or WebP image".to_string()))
}
