//! Job intake.

use std::time::Instant;

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use serde_json::{Value, json};

use piecework_types::job::JobEnvelope;

use crate::http::error::AppError;
use crate::http::response::{ApiResponse, new_request_id};
use crate::state::WorkerState;

/// POST /v1/jobs - Queue one job envelope.
///
/// Returns 202 once the job is queued. The result is reported later to the
/// envelope's `(worker_server_id, request_id)` address, never in this response.
pub async fn submit_job(
    State(state): State<WorkerState>,
    body: Result<Json<JobEnvelope>, JsonRejection>,
) -> Result<ApiResponse<Value>, AppError> {
    let start = Instant::now();
    let Json(envelope) = body.map_err(|e| AppError::Validation(e.body_text()))?;

    if envelope.request_id.trim().is_empty() {
        return Err(AppError::Validation("request_id must not be empty".to_string()));
    }
    if envelope.worker_server_id.trim().is_empty() {
        return Err(AppError::Validation("worker_server_id must not be empty".to_string()));
    }

    let request_id = envelope.request_id.clone();
    let job_kind = envelope.job.kind_name();
    state.pool.submit(envelope)?;
    tracing::debug!(request_id = %request_id, job_kind, "job queued");

    let elapsed = start.elapsed().as_millis() as u64;
    Ok(ApiResponse::success(
        json!({
            "request_id": request_id,
            "job_kind": job_kind,
            "status": "queued",
        }),
        new_request_id(),
        elapsed,
    )
    .with_status(StatusCode::ACCEPTED))
}
