//! BoxConnector -- object-safe dynamic dispatch wrapper for Connector.
//!
//! 1. `ConnectorDyn` is the object-safe mirror of `Connector` with boxed futures
//! 2. Blanket-impl `ConnectorDyn` for all `T: Connector`
//! 3. `BoxConnector` wraps `Arc<dyn ConnectorDyn>` and delegates
//!
//! The handle is `Arc`-backed so strategies can move a clone into a spawned task.

use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde_json::Value;

use piecework_types::engine::{ActionInvocation, PropertyInvocation, TriggerHookInvocation};
use piecework_types::error::ConnectorError;
use piecework_types::piece::{AuthValidation, PieceMetadata};

use super::piece::Connector;

/// Object-safe version of [`Connector`] with boxed futures.
pub trait ConnectorDyn: Send + Sync {
    fn metadata(&self) -> &PieceMetadata;

    fn validate_auth_boxed<'a>(
        &'a self,
        auth: &'a Value,
    ) -> BoxFuture<'a, Result<AuthValidation, ConnectorError>>;

    fn trigger_hook_boxed<'a>(
        &'a self,
        invocation: &'a TriggerHookInvocation,
    ) -> BoxFuture<'a, Result<Value, ConnectorError>>;

    fn run_action_boxed<'a>(
        &'a self,
        invocation: &'a ActionInvocation,
    ) -> BoxFuture<'a, Result<Value, ConnectorError>>;

    fn resolve_property_boxed<'a>(
        &'a self,
        invocation: &'a PropertyInvocation,
    ) -> BoxFuture<'a, Result<Value, ConnectorError>>;
}

impl<T: Connector> ConnectorDyn for T {
    fn metadata(&self) -> &PieceMetadata {
        Connector::metadata(self)
    }

    fn validate_auth_boxed<'a>(
        &'a self,
        auth: &'a Value,
    ) -> BoxFuture<'a, Result<AuthValidation, ConnectorError>> {
        Box::pin(self.validate_auth(auth))
    }

    fn trigger_hook_boxed<'a>(
        &'a self,
        invocation: &'a TriggerHookInvocation,
    ) -> BoxFuture<'a, Result<Value, ConnectorError>> {
        Box::pin(self.trigger_hook(invocation))
    }

    fn run_action_boxed<'a>(
        &'a self,
        invocation: &'a ActionInvocation,
    ) -> BoxFuture<'a, Result<Value, ConnectorError>> {
        Box::pin(self.run_action(invocation))
    }

    fn resolve_property_boxed<'a>(
        &'a self,
        invocation: &'a PropertyInvocation,
    ) -> BoxFuture<'a, Result<Value, ConnectorError>> {
        Box::pin(self.resolve_property(invocation))
    }
}

/// Type-erased connector handle stored in the registry.
#[derive(Clone)]
pub struct BoxConnector {
    inner: Arc<dyn ConnectorDyn>,
}

impl BoxConnector {
    pub fn new<T: Connector + 'static>(connector: T) -> Self {
        Self {
            inner: Arc::new(connector),
        }
    }

    pub fn metadata(&self) -> &PieceMetadata {
        self.inner.metadata()
    }

    pub async fn validate_auth(&self, auth: &Value) -> Result<AuthValidation, ConnectorError> {
        self.inner.validate_auth_boxed(auth).await
    }

    pub async fn trigger_hook(
        &self,
        invocation: &TriggerHookInvocation,
    ) -> Result<Value, ConnectorError> {
        self.inner.trigger_hook_boxed(invocation).await
    }

    pub async fn run_action(&self, invocation: &ActionInvocation) -> Result<Value, ConnectorError> {
        self.inner.run_action_boxed(invocation).await
    }

    pub async fn resolve_property(
        &self,
        invocation: &PropertyInvocation,
    ) -> Result<Value, ConnectorError> {
        self.inner.resolve_property_boxed(invocation).await
    }
}

impl std::fmt::Debug for BoxConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let meta = self.metadata();
        f.debug_struct("BoxConnector")
            .field("name", &meta.name)
            .field("version", &meta.version.to_string())
            .finish()
    }
}
