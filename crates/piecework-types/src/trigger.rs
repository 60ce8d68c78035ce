//! Trigger definitions: hook types, strategies, handshake and webhook shapes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// HookType
// ---------------------------------------------------------------------------

/// Connector entry point invoked for an inbound trigger signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HookType {
    /// Trigger was enabled (register webhooks, take the polling baseline).
    OnEnable,
    /// Trigger was disabled (unregister webhooks, drop the cursor).
    OnDisable,
    /// Normal event extraction.
    Run,
    /// Periodic lease/subscription renewal.
    Renew,
    /// Webhook verification round-trip.
    Handshake,
    /// Preview against sample data; never mutates the cursor.
    Test,
}

impl HookType {
    pub fn as_str(&self) -> &'static str {
        match self {
            HookType::OnEnable => "ON_ENABLE",
            HookType::OnDisable => "ON_DISABLE",
            HookType::Run => "RUN",
            HookType::Renew => "RENEW",
            HookType::Handshake => "HANDSHAKE",
            HookType::Test => "TEST",
        }
    }
}

impl std::fmt::Display for HookType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Strategies
// ---------------------------------------------------------------------------

/// How a trigger learns about new events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggerStrategy {
    /// The engine polls the connector and deduplicates its output.
    Polling { dedup: DedupStrategy },
    /// The third party calls a per-flow webhook URL.
    Webhook,
    /// The third party calls an app-level webhook shared by many flows.
    AppWebhook,
}

impl TriggerStrategy {
    pub fn is_polling(&self) -> bool {
        matches!(self, TriggerStrategy::Polling { .. })
    }
}

/// Direction in which the ordering key grows as items get newer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderDirection {
    /// Newer items have smaller keys.
    Ascending,
    /// Newer items have larger keys (timestamps, auto-increment ids).
    Descending,
}

/// Dedup strategy for polling triggers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DedupStrategy {
    /// Track the newest item seen and stop scanning when it is reached.
    LastItem {
        order_by: String,
        direction: OrderDirection,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_items: Option<usize>,
    },
    /// Track the newest epoch-milliseconds timestamp seen.
    TimeBased {
        timestamp_field: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_items: Option<usize>,
    },
}

impl DedupStrategy {
    pub fn max_items(&self) -> Option<usize> {
        match self {
            DedupStrategy::LastItem { max_items, .. } | DedupStrategy::TimeBased { max_items, .. } => {
                *max_items
            }
        }
    }
}

/// Where a webhook provider signals that a request is a handshake.
///
/// Declared once per trigger definition and read-only at request time.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HandshakeStrategy {
    #[default]
    None,
    HeaderPresent { param_name: String },
    QueryPresent { param_name: String },
    BodyParamPresent { param_name: String },
}

// ---------------------------------------------------------------------------
// Webhook request / response
// ---------------------------------------------------------------------------

/// Inbound webhook request as seen by the trigger engine.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WebhookRequest {
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub query: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Value,
}

fn default_method() -> String {
    "POST".to_string()
}

impl WebhookRequest {
    /// Look up a header by name, ignoring case.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Look up a query parameter (exact match).
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }

    /// Look up a top-level field of a JSON object body.
    pub fn body_param(&self, name: &str) -> Option<&Value> {
        self.body.as_object().and_then(|body| body.get(name))
    }

    /// JSON view of the whole request, handed to connector hooks as payload.
    pub fn to_payload(&self) -> Value {
        serde_json::json!({
            "method": self.method,
            "headers": self.headers,
            "queryParams": self.query,
            "body": self.body,
        })
    }
}

/// Response synthesized for a webhook sender.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookResponse {
    pub status: u16,
    #[serde(default)]
    pub body: Value,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl WebhookResponse {
    pub fn new(status: u16, body: Value) -> Self {
        Self {
            status,
            body,
            headers: BTreeMap::new(),
        }
    }

    /// Fixed 500 used when a handshake cannot be completed.
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(500, serde_json::json!({ "error": message.into() }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn header_lookup_ignores_case() {
        let mut request = WebhookRequest::default();
        request
            .headers
            .insert("X-Hook-Secret".to_string(), "abc".to_string());
        assert_eq!(request.header("x-hook-secret"), Some("abc"));
        assert_eq!(request.header("X-HOOK-SECRET"), Some("abc"));
        assert_eq!(request.header("x-other"), None);
    }

    #[test]
    fn body_param_requires_object_body() {
        let request = WebhookRequest {
            body: json!({"challenge": "xyz"}),
            ..Default::default()
        };
        assert_eq!(request.body_param("challenge"), Some(&json!("xyz")));

        let list_body = WebhookRequest {
            body: json!(["challenge"]),
            ..Default::default()
        };
        assert_eq!(list_body.body_param("challenge"), None);
    }

    #[test]
    fn handshake_strategy_serde_shape() {
        let strategy = HandshakeStrategy::QueryPresent {
            param_name: "hub.challenge".to_string(),
        };
        let value = serde_json::to_value(&strategy).unwrap();
        assert_eq!(value, json!({"strategy": "QUERY_PRESENT", "param_name": "hub.challenge"}));

        let none: HandshakeStrategy = serde_json::from_value(json!({"strategy": "NONE"})).unwrap();
        assert_eq!(none, HandshakeStrategy::None);
    }

    #[test]
    fn polling_strategy_serde_shape() {
        let strategy: TriggerStrategy = serde_json::from_value(json!({
            "type": "POLLING",
            "dedup": {"strategy": "LAST_ITEM", "order_by": "id", "direction": "DESCENDING"}
        }))
        .unwrap();
        assert!(strategy.is_polling());
        match strategy {
            TriggerStrategy::Polling { dedup } => assert_eq!(dedup.max_items(), None),
            _ => unreachable!(),
        }
    }

    #[test]
    fn webhook_request_defaults_to_post() {
        let request: WebhookRequest = serde_json::from_value(json!({})).unwrap();
        assert_eq!(request.method, "POST");
        assert!(request.body.is_null());
    }

    #[test]
    fn internal_error_is_500() {
        let response = WebhookResponse::internal_error("handshake failed");
        assert_eq!(response.status, 500);
        assert_eq!(response.body["error"], "handshake failed");
    }
}
