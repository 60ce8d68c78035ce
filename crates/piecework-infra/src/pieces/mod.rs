//! Pieces compiled into the worker binary.
//!
//! The sandbox child builds the same registry, so a piece resolves to the same
//! code on both sides of the isolation boundary.

pub mod catch_webhook;
pub mod http_poll;

pub use catch_webhook::CatchWebhook;
pub use http_poll::HttpPoll;

use piecework_core::connector::ConnectorRegistry;

/// Registry holding every built-in piece.
pub fn builtin_registry() -> ConnectorRegistry {
    let registry = ConnectorRegistry::new();
    registry.register(CatchWebhook::new());
    registry.register(HttpPoll::new());
    registry
}
