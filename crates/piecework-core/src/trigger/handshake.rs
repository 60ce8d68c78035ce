//! Webhook handshake negotiation.
//!
//! Some providers verify a webhook URL before sending real events (echo a
//! challenge, return a token header). The trigger definition declares where
//! the provider signals this; when the signal is present the connector's
//! `Handshake` hook produces the response and the request never reaches
//! normal trigger processing. Stateless: the same request always yields the
//! same decision.

use std::future::Future;

use serde_json::Value;

use piecework_types::engine::EngineResult;
use piecework_types::trigger::{HandshakeStrategy, WebhookRequest, WebhookResponse};

/// Whether the request carries the declared handshake signal.
pub fn is_handshake_request(strategy: &HandshakeStrategy, request: &WebhookRequest) -> bool {
    match strategy {
        HandshakeStrategy::None => false,
        HandshakeStrategy::HeaderPresent { param_name } => request.header(param_name).is_some(),
        HandshakeStrategy::QueryPresent { param_name } => {
            request.query_param(param_name).is_some()
        }
        HandshakeStrategy::BodyParamPresent { param_name } => {
            request.body_param(param_name).is_some()
        }
    }
}

/// Negotiate a handshake.
///
/// Returns `None` when the request is not a handshake; `handshake_hook` is
/// then dropped without being polled. Otherwise returns the hook's response,
/// or a fixed 500 when the hook fails or produces no usable response.
pub async fn try_handshake<F>(
    strategy: &HandshakeStrategy,
    request: &WebhookRequest,
    handshake_hook: F,
) -> Option<WebhookResponse>
where
    F: Future<Output = EngineResult>,
{
    if !is_handshake_request(strategy, request) {
        return None;
    }

    let response = match handshake_hook.await.into_result() {
        Ok(Value::Null) => {
            tracing::warn!("handshake hook returned no response");
            WebhookResponse::internal_error("handshake hook returned no response")
        }
        Ok(output) => match serde_json::from_value::<WebhookResponse>(output) {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(error = %e, "handshake hook returned an invalid response");
                WebhookResponse::internal_error(format!("invalid handshake response: {e}"))
            }
        },
        Err(reason) => {
            tracing::warn!(error = %reason, "handshake hook failed");
            WebhookResponse::internal_error(format!("handshake failed: {reason}"))
        }
    };
    Some(response)
}
