//! `catch-webhook`: a piece whose webhook trigger emits every request it receives.
//!
//! Trigger input:
//! - `handshake_param` (optional) -- query parameter whose value is echoed
//!   back on a handshake request (the usual `?challenge=...` verification).

use std::collections::BTreeMap;

use serde_json::{Value, json};

use piecework_core::connector::Connector;
use piecework_types::engine::{ActionInvocation, PropertyInvocation, TriggerHookInvocation};
use piecework_types::error::ConnectorError;
use piecework_types::piece::{ActionDefinition, AuthValidation, PieceMetadata, TriggerDefinition};
use piecework_types::trigger::{HandshakeStrategy, HookType, TriggerStrategy, WebhookResponse};

pub const PIECE_NAME: &str = "catch-webhook";
pub const TRIGGER_NAME: &str = "catch_request";

pub struct CatchWebhook {
    metadata: PieceMetadata,
}

impl CatchWebhook {
    pub fn new() -> Self {
        Self {
            metadata: PieceMetadata {
                name: PIECE_NAME.to_string(),
                display_name: "Catch Webhook".to_string(),
                version: semver::Version::new(0, 1, 0),
                description: "Receive HTTP requests and start a flow run for each one".to_string(),
                triggers: vec![TriggerDefinition {
                    name: TRIGGER_NAME.to_string(),
                    display_name: "Catch Request".to_string(),
                    strategy: TriggerStrategy::Webhook,
                    handshake: HandshakeStrategy::None,
                    requires_renewal: false,
                    sample_data: json!({
                        "method": "POST",
                        "headers": {"content-type": "application/json"},
                        "queryParams": {},
                        "body": {"message": "hello"},
                    }),
                }],
                actions: vec![ActionDefinition {
                    name: "echo".to_string(),
                    display_name: "Echo".to_string(),
                    description: "Return the input unchanged".to_string(),
                }],
            },
        }
    }

    fn handshake(&self, invocation: &TriggerHookInvocation) -> Result<Value, ConnectorError> {
        let param = invocation
            .input
            .get("handshake_param")
            .and_then(Value::as_str)
            .unwrap_or("challenge");
        let challenge = invocation
            .payload
            .as_ref()
            .and_then(|payload| payload["queryParams"].get(param))
            .and_then(Value::as_str)
            .ok_or_else(|| {
                ConnectorError::InvalidInput(format!("handshake request has no '{param}' parameter"))
            })?;

        let response = WebhookResponse {
            status: 200,
            body: Value::String(challenge.to_string()),
            headers: BTreeMap::from([("content-type".to_string(), "text/plain".to_string())]),
        };
        serde_json::to_value(response).map_err(|e| ConnectorError::Upstream(e.to_string()))
    }
}

impl Default for CatchWebhook {
    fn default() -> Self {
        Self::new()
    }
}

impl Connector for CatchWebhook {
    fn metadata(&self) -> &PieceMetadata {
        &self.metadata
    }

    async fn validate_auth(&self, _auth: &Value) -> Result<AuthValidation, ConnectorError> {
        Ok(AuthValidation::valid())
    }

    async fn trigger_hook(
        &self,
        invocation: &TriggerHookInvocation,
    ) -> Result<Value, ConnectorError> {
        if invocation.trigger_name != TRIGGER_NAME {
            return Err(ConnectorError::UnknownTrigger(invocation.trigger_name.clone()));
        }
        match invocation.hook {
            HookType::OnEnable | HookType::OnDisable => Ok(Value::Null),
            HookType::Run => Ok(json!([invocation.payload.clone().unwrap_or(Value::Null)])),
            HookType::Handshake => self.handshake(invocation),
            HookType::Test => Ok(json!([self.metadata.triggers[0].sample_data.clone()])),
            HookType::Renew => Err(ConnectorError::UnsupportedHook {
                trigger: TRIGGER_NAME.to_string(),
                hook: invocation.hook.to_string(),
            }),
        }
    }

    async fn run_action(&self, invocation: &ActionInvocation) -> Result<Value, ConnectorError> {
        match invocation.action_name.as_str() {
            "echo" => Ok(invocation.input.clone()),
            other => Err(ConnectorError::UnknownAction(other.to_string())),
        }
    }

    async fn resolve_property(
        &self,
        invocation: &PropertyInvocation,
    ) -> Result<Value, ConnectorError> {
        Err(ConnectorError::UnknownProperty(invocation.property_name.clone()))
    }
}
