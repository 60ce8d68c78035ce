//! Health endpoint.

use std::time::Instant;

use axum::extract::State;
use serde::Serialize;

use piecework_core::engine::IsolationStrategy;

use crate::http::response::{ApiResponse, new_request_id};
use crate::state::WorkerState;

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub version: &'static str,
    pub worker_server_id: String,
    pub execution_mode: String,
    pub strategy: &'static str,
    pub cursor_backend: &'static str,
    pub queue_depth: usize,
    pub in_flight: usize,
    pub enabled_triggers: usize,
    pub uptime_secs: u64,
}

/// GET /v1/health
pub async fn health(State(state): State<WorkerState>) -> ApiResponse<HealthStatus> {
    let start = Instant::now();
    let status = HealthStatus {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        worker_server_id: state.config.worker_server_id.clone(),
        execution_mode: state.runner.mode().to_string(),
        strategy: state.runner.name(),
        cursor_backend: state.cursor_backend,
        queue_depth: state.pool.queue_depth(),
        in_flight: state.pool.in_flight(),
        enabled_triggers: state.triggers.enabled().len(),
        uptime_secs: state.started_at.elapsed().as_secs(),
    };
    ApiResponse::success(status, new_request_id(), start.elapsed().as_millis() as u64)
}
