//! Job requests consumed by the dispatcher and the reports it produces.
//!
//! A [`JobEnvelope`] is created by the external queue, carries the
//! `(worker_server_id, request_id)` address its report must go back to, and
//! is consumed exactly once.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::engine::EngineResult;
use crate::trigger::{HandshakeStrategy, HookType, TriggerStrategy, WebhookRequest};

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// Piece identity: name plus exact version or semver requirement.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PieceRef {
    pub name: String,
    pub version: String,
}

impl PieceRef {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

impl std::fmt::Display for PieceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

/// Trigger settings captured in a flow version.
///
/// Strategy and handshake come from the piece metadata extracted when the
/// flow was published, so the host never has to call into connector code to
/// learn how a trigger behaves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerSettings {
    pub piece: PieceRef,
    pub trigger_name: String,
    #[serde(default)]
    pub input: Value,
    pub strategy: TriggerStrategy,
    #[serde(default)]
    pub handshake: HandshakeStrategy,
}

/// Immutable snapshot of the flow version a job runs against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowVersionSnapshot {
    pub flow_id: String,
    pub flow_version_id: String,
    pub project_id: String,
    pub trigger: TriggerSettings,
}

impl FlowVersionSnapshot {
    /// Opaque key addressing this flow's trigger state in the cursor store.
    pub fn cursor_key(&self) -> String {
        cursor_key(&self.flow_id, &self.trigger.trigger_name)
    }
}

/// Derive the cursor-store key for a `(flow, trigger)` pair.
pub fn cursor_key(flow_id: &str, trigger_name: &str) -> String {
    format!("trigger_cursor:{flow_id}:{trigger_name}")
}

// ---------------------------------------------------------------------------
// JobRequest
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidateAuthJob {
    pub project_id: String,
    pub piece: PieceRef,
    pub auth: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractPieceMetadataJob {
    pub piece: PieceRef,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerHookJob {
    pub flow: FlowVersionSnapshot,
    pub hook: HookType,
    /// Inbound webhook request (webhook deliveries and handshakes).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook: Option<WebhookRequest>,
    /// Use the simulation webhook URL (builder test runs).
    #[serde(default)]
    pub simulate: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionJob {
    pub project_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow: Option<FlowVersionSnapshot>,
    pub piece: PieceRef,
    pub action_name: String,
    #[serde(default)]
    pub input: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyJob {
    pub project_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow: Option<FlowVersionSnapshot>,
    pub piece: PieceRef,
    pub step_name: String,
    pub property_name: String,
    #[serde(default)]
    pub input: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_value: Option<String>,
}

/// Tagged union over job kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobRequest {
    ValidateAuth(ValidateAuthJob),
    ExtractPieceMetadata(ExtractPieceMetadataJob),
    ExecuteTriggerHook(TriggerHookJob),
    ExecuteAction(ActionJob),
    ExecuteProperty(PropertyJob),
}

impl JobRequest {
    pub fn kind_name(&self) -> &'static str {
        match self {
            JobRequest::ValidateAuth(_) => "VALIDATE_AUTH",
            JobRequest::ExtractPieceMetadata(_) => "EXTRACT_PIECE_METADATA",
            JobRequest::ExecuteTriggerHook(_) => "EXECUTE_TRIGGER_HOOK",
            JobRequest::ExecuteAction(_) => "EXECUTE_ACTION",
            JobRequest::ExecuteProperty(_) => "EXECUTE_PROPERTY",
        }
    }
}

// ---------------------------------------------------------------------------
// Envelope and report
// ---------------------------------------------------------------------------

/// A job plus the address its single report must be sent to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEnvelope {
    pub request_id: String,
    pub worker_server_id: String,
    /// Overrides the worker's default call timeout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    pub job: JobRequest,
}

impl JobEnvelope {
    /// Wrap a job with a fresh UUIDv7 request id.
    pub fn new(worker_server_id: impl Into<String>, job: JobRequest) -> Self {
        Self {
            request_id: Uuid::now_v7().to_string(),
            worker_server_id: worker_server_id.into(),
            timeout_secs: None,
            job,
        }
    }
}

/// The one report produced per job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobReport {
    pub request_id: String,
    pub worker_server_id: String,
    pub job_kind: String,
    pub result: EngineResult,
    pub finished_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trigger::{DedupStrategy, OrderDirection};
    use serde_json::json;

    fn snapshot() -> FlowVersionSnapshot {
        FlowVersionSnapshot {
            flow_id: "flow-1".to_string(),
            flow_version_id: "fv-1".to_string(),
            project_id: "proj-1".to_string(),
            trigger: TriggerSettings {
                piece: PieceRef::new("http-poll", "0.1.0"),
                trigger_name: "new_items".to_string(),
                input: json!({"url": "https://example.com/items"}),
                strategy: TriggerStrategy::Polling {
                    dedup: DedupStrategy::LastItem {
                        order_by: "created_at".to_string(),
                        direction: OrderDirection::Descending,
                        max_items: None,
                    },
                },
                handshake: HandshakeStrategy::None,
            },
        }
    }

    #[test]
    fn cursor_key_is_derived_from_flow_and_trigger() {
        assert_eq!(snapshot().cursor_key(), "trigger_cursor:flow-1:new_items");
    }

    #[test]
    fn job_request_is_tagged_by_type() {
        let job = JobRequest::ExtractPieceMetadata(ExtractPieceMetadataJob {
            piece: PieceRef::new("catch-webhook", "^0.1"),
        });
        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(value["type"], "EXTRACT_PIECE_METADATA");
        assert_eq!(value["piece"]["version"], "^0.1");
    }

    #[test]
    fn trigger_hook_job_parses_with_defaults() {
        let value = json!({
            "type": "EXECUTE_TRIGGER_HOOK",
            "flow": serde_json::to_value(snapshot()).unwrap(),
            "hook": "RUN"
        });
        let job: JobRequest = serde_json::from_value(value).unwrap();
        match job {
            JobRequest::ExecuteTriggerHook(hook_job) => {
                assert_eq!(hook_job.hook, HookType::Run);
                assert!(hook_job.webhook.is_none());
                assert!(!hook_job.simulate);
            }
            other => panic!("unexpected job {other:?}"),
        }
    }

    #[test]
    fn envelope_new_assigns_request_id() {
        let a = JobEnvelope::new(
            "worker-1",
            JobRequest::ExtractPieceMetadata(ExtractPieceMetadataJob {
                piece: PieceRef::new("p", "1.0.0"),
            }),
        );
        let b = JobEnvelope::new("worker-1", a.job.clone());
        assert_ne!(a.request_id, b.request_id);
        assert_eq!(a.worker_server_id, "worker-1");
    }

    #[test]
    fn piece_ref_display() {
        assert_eq!(PieceRef::new("http-poll", "0.1.0").to_string(), "http-poll@0.1.0");
    }
}
