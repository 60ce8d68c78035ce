//! Webhook receiver.
//!
//! Deliveries are synchronous: handshake negotiation runs first, then the
//! trigger's `Run` hook, and the sender gets the resulting response. Senders
//! retry on 5xx according to their own policy.

use std::collections::BTreeMap;

use axum::body::{Body, Bytes};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde_json::Value;

use piecework_types::trigger::{WebhookRequest, WebhookResponse};

use crate::http::error::AppError;
use crate::state::WorkerState;

/// GET|POST /v1/webhooks/{flow_id}
pub async fn receive_webhook(
    State(state): State<WorkerState>,
    Path(flow_id): Path<String>,
    method: Method,
    Query(query): Query<BTreeMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let request = webhook_request(method, query, &headers, &body);
    deliver(&state, &flow_id, request, false).await
}

/// GET|POST /v1/webhooks/{flow_id}/simulate
pub async fn simulate_webhook(
    State(state): State<WorkerState>,
    Path(flow_id): Path<String>,
    method: Method,
    Query(query): Query<BTreeMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let request = webhook_request(method, query, &headers, &body);
    deliver(&state, &flow_id, request, true).await
}

async fn deliver(
    state: &WorkerState,
    flow_id: &str,
    request: WebhookRequest,
    simulate: bool,
) -> Result<Response, AppError> {
    tracing::info!(flow_id, method = %request.method, simulate, "webhook received");
    let response = state
        .triggers
        .handle_webhook(flow_id, request, simulate, state.webhook_timeout())
        .await?;
    Ok(into_http_response(response))
}

fn webhook_request(
    method: Method,
    query: BTreeMap<String, String>,
    headers: &HeaderMap,
    body: &[u8],
) -> WebhookRequest {
    let headers = headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.as_str().to_string(), value.to_string()))
        })
        .collect();

    WebhookRequest {
        method: method.to_string(),
        headers,
        query,
        body: parse_body(body),
    }
}

/// JSON when the body parses as JSON, a string when it is UTF-8, else null.
fn parse_body(body: &[u8]) -> Value {
    if body.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(body).unwrap_or_else(|_| match std::str::from_utf8(body) {
        Ok(text) => Value::String(text.to_string()),
        Err(_) => Value::Null,
    })
}

fn into_http_response(response: WebhookResponse) -> Response {
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    let (content_type, body) = match response.body {
        Value::Null => (None, Body::empty()),
        Value::String(text) => (Some("text/plain; charset=utf-8"), Body::from(text)),
        other => (Some("application/json"), Body::from(other.to_string())),
    };

    let mut http = (status, body).into_response();
    if let Some(content_type) = content_type {
        http.headers_mut()
            .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    }
    for (name, value) in response.headers {
        match (
            HeaderName::try_from(name.as_str()),
            HeaderValue::try_from(value.as_str()),
        ) {
            (Ok(name), Ok(value)) => {
                http.headers_mut().insert(name, value);
            }
            _ => tracing::warn!(header = %name, "dropping invalid webhook response header"),
        }
    }
    http
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn body_parsing() {
        assert_eq!(parse_body(br#"{"a":1}"#), json!({"a": 1}));
        assert_eq!(parse_body(b"a=1&b=2"), json!("a=1&b=2"));
        assert_eq!(parse_body(b""), Value::Null);
        assert_eq!(parse_body(&[0xff, 0xfe]), Value::Null);
    }

    #[test]
    fn response_headers_override_content_type() {
        let mut response = WebhookResponse::new(200, json!("challenge"));
        response
            .headers
            .insert("content-type".to_string(), "text/html".to_string());
        let http = into_http_response(response);
        assert_eq!(http.status(), StatusCode::OK);
        assert_eq!(http.headers()[header::CONTENT_TYPE], "text/html");
    }

    #[test]
    fn invalid_status_becomes_500() {
        let http = into_http_response(WebhookResponse::new(42, Value::Null));
        assert_eq!(http.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
