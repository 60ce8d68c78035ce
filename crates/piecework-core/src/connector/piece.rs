//! Connector trait definition.
//!
//! A connector ("piece") is third-party integration code. The engine treats
//! each one as an opaque set of callables with a fixed signature per call
//! kind. Uses RPITIT (native async fn in traits, Rust 2024 edition); see
//! [`BoxConnector`](super::box_connector::BoxConnector) for dynamic dispatch.

use serde_json::Value;

use piecework_types::engine::{ActionInvocation, PropertyInvocation, TriggerHookInvocation};
use piecework_types::error::ConnectorError;
use piecework_types::piece::{AuthValidation, PieceMetadata};

/// Callable contract every installed piece satisfies.
///
/// Output shapes per trigger hook:
/// - `Run` / `Test`: a JSON array of items (newest-first for polling triggers)
/// - `Handshake`: a serialized `WebhookResponse`
/// - `OnEnable` / `OnDisable` / `Renew`: ignored
pub trait Connector: Send + Sync {
    /// Static description of the piece, its triggers and actions.
    fn metadata(&self) -> &PieceMetadata;

    /// Check whether the supplied credentials are accepted by the third party.
    fn validate_auth(
        &self,
        auth: &Value,
    ) -> impl std::future::Future<Output = Result<AuthValidation, ConnectorError>> + Send;

    /// Invoke one trigger hook.
    fn trigger_hook(
        &self,
        invocation: &TriggerHookInvocation,
    ) -> impl std::future::Future<Output = Result<Value, ConnectorError>> + Send;

    /// Run an action step.
    fn run_action(
        &self,
        invocation: &ActionInvocation,
    ) -> impl std::future::Future<Output = Result<Value, ConnectorError>> + Send;

    /// Resolve the options of a dynamic dropdown property.
    fn resolve_property(
        &self,
        invocation: &PropertyInvocation,
    ) -> impl std::future::Future<Output = Result<Value, ConnectorError>> + Send;
}
