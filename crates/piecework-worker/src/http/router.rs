//! Axum router configuration with middleware.

use axum::Router;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

use crate::http::handlers;
use crate::state::WorkerState;

pub fn build_router(state: WorkerState) -> Router {
    Router::new()
        .route("/v1/jobs", post(handlers::jobs::submit_job))
        .route(
            "/v1/webhooks/{flow_id}",
            get(handlers::webhooks::receive_webhook).post(handlers::webhooks::receive_webhook),
        )
        .route(
            "/v1/webhooks/{flow_id}/simulate",
            get(handlers::webhooks::simulate_webhook).post(handlers::webhooks::simulate_webhook),
        )
        .route("/v1/health", get(handlers::health::health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
