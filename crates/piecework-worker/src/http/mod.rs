//! HTTP surface of the worker.
//!
//! Axum routes under `/v1/`: job intake, webhook receiver and health.
//! Job and health responses use the envelope format; webhook responses are
//! whatever the trigger answers, since they go back to a third-party sender.

pub mod error;
pub mod handlers;
pub mod response;
pub mod router;
