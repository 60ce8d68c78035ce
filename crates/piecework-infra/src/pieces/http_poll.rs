//! `http-poll`: a polling trigger over any JSON endpoint.
//!
//! Trigger input:
//! - `url` -- endpoint returning the items, newest first
//! - `items_path` (optional) -- dotted path to the array inside the response
//!   body, e.g. `data.items`; the body itself when absent
//! - `headers` (optional) -- object of extra request headers

use std::time::Duration;

use serde_json::{Value, json};

use piecework_core::connector::Connector;
use piecework_types::engine::{ActionInvocation, PropertyInvocation, TriggerHookInvocation};
use piecework_types::error::ConnectorError;
use piecework_types::piece::{ActionDefinition, AuthValidation, PieceMetadata, TriggerDefinition};
use piecework_types::trigger::{
    DedupStrategy, HandshakeStrategy, HookType, OrderDirection, TriggerStrategy,
};

pub const PIECE_NAME: &str = "http-poll";
pub const TRIGGER_NAME: &str = "new_items";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct HttpPoll {
    metadata: PieceMetadata,
    http: reqwest::Client,
}

impl HttpPoll {
    pub fn new() -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("piecework-http-poll/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();

        Self {
            metadata: PieceMetadata {
                name: PIECE_NAME.to_string(),
                display_name: "HTTP Poll".to_string(),
                version: semver::Version::new(0, 1, 0),
                description: "Poll a JSON endpoint and emit items not seen before".to_string(),
                triggers: vec![TriggerDefinition {
                    name: TRIGGER_NAME.to_string(),
                    display_name: "New Items".to_string(),
                    strategy: TriggerStrategy::Polling {
                        dedup: DedupStrategy::LastItem {
                            order_by: "id".to_string(),
                            direction: OrderDirection::Descending,
                            max_items: None,
                        },
                    },
                    handshake: HandshakeStrategy::None,
                    requires_renewal: false,
                    sample_data: json!({"id": 1, "title": "example item"}),
                }],
                actions: vec![ActionDefinition {
                    name: "fetch".to_string(),
                    display_name: "Fetch".to_string(),
                    description: "GET a URL and return its JSON body".to_string(),
                }],
            },
            http,
        }
    }

    async fn get_json(&self, input: &Value) -> Result<Value, ConnectorError> {
        let url = input
            .get("url")
            .and_then(Value::as_str)
            .ok_or_else(|| ConnectorError::InvalidInput("missing 'url'".to_string()))?;

        let mut request = self.http.get(url);
        if let Some(headers) = input.get("headers").and_then(Value::as_object) {
            for (name, value) in headers {
                if let Some(value) = value.as_str() {
                    request = request.header(name.as_str(), value);
                }
            }
        }

        let response = request
            .send()
            .await
            .map_err(|e| ConnectorError::Upstream(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(ConnectorError::Upstream(format!("{url} returned {status}")));
        }
        response
            .json::<Value>()
            .await
            .map_err(|e| ConnectorError::Upstream(format!("{url} returned invalid JSON: {e}")))
    }

    async fn fetch_items(&self, input: &Value) -> Result<Value, ConnectorError> {
        let body = self.get_json(input).await?;
        let Some(path) = input.get("items_path").and_then(Value::as_str) else {
            return Ok(body);
        };
        path.split('.')
            .filter(|segment| !segment.is_empty())
            .try_fold(&body, |current, segment| current.get(segment))
            .cloned()
            .ok_or_else(|| ConnectorError::InvalidInput(format!("'{path}' not found in response")))
    }
}

impl Default for HttpPoll {
    fn default() -> Self {
        Self::new()
    }
}

impl Connector for HttpPoll {
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
            HookType::OnEnable | HookType::Run | HookType::Test => {
                self.fetch_items(&invocation.input).await
            }
            HookType::OnDisable => Ok(Value::Null),
            HookType::Renew | HookType::Handshake => Err(ConnectorError::UnsupportedHook {
                trigger: TRIGGER_NAME.to_string(),
                hook: invocation.hook.to_string(),
            }),
        }
    }

    async fn run_action(&self, invocation: &ActionInvocation) -> Result<Value, ConnectorError> {
        match invocation.action_name.as_str() {
            "fetch" => self.get_json(&invocation.input).await,
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

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Json, Router, routing::get};

    async fn serve(body: Value) -> String {
        let app = Router::new().route("/items", get(move || async move { Json(body) }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/items")
    }

    fn invocation(hook: HookType, input: Value) -> TriggerHookInvocation {
        TriggerHookInvocation {
            flow_id: "flow-1".to_string(),
            project_id: "proj-1".to_string(),
            trigger_name: TRIGGER_NAME.to_string(),
            hook,
            input,
            webhook_url: String::new(),
            payload: None,
        }
    }

    #[tokio::test]
    async fn run_returns_items_at_path() {
        let url = serve(json!({"data": {"items": [{"id": 2}, {"id": 1}]}})).await;
        let piece = HttpPoll::new();
        let output = piece
            .trigger_hook(&invocation(
                HookType::Run,
                json!({"url": url, "items_path": "data.items"}),
            ))
            .await
            .unwrap();
        assert_eq!(output, json!([{"id": 2}, {"id": 1}]));
    }

    #[tokio::test]
    async fn missing_path_is_invalid_input() {
        let url = serve(json!({"data": []})).await;
        let piece = HttpPoll::new();
        let err = piece
            .trigger_hook(&invocation(HookType::Run, json!({"url": url, "items_path": "nope"})))
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectorError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn missing_url_is_invalid_input() {
        let piece = HttpPoll::new();
        let err = piece
            .trigger_hook(&invocation(HookType::Run, json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectorError::InvalidInput(_)));
    }
}
