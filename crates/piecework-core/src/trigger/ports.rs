//! Downstream collaborators of the trigger engine.
//!
//! Object-safe (boxed futures) because the worker picks the implementation at
//! runtime: the HTTP API client when an API URL is configured, a tracing-only
//! sink otherwise.

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use piecework_types::engine::FailureReason;
use piecework_types::error::DispatchError;
use piecework_types::job::FlowVersionSnapshot;

/// Ordered new events for one flow. One flow run is started per payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowRunBatch {
    pub flow_id: String,
    pub flow_version_id: String,
    pub project_id: String,
    pub trigger_name: String,
    pub payloads: Vec<Value>,
}

impl FlowRunBatch {
    pub fn for_flow(flow: &FlowVersionSnapshot, payloads: Vec<Value>) -> Self {
        Self {
            flow_id: flow.flow_id.clone(),
            flow_version_id: flow.flow_version_id.clone(),
            project_id: flow.project_id.clone(),
            trigger_name: flow.trigger.trigger_name.clone(),
            payloads,
        }
    }
}

/// Starts flow runs for new trigger events.
pub trait FlowRunDispatcher: Send + Sync {
    fn dispatch<'a>(&'a self, batch: &'a FlowRunBatch) -> BoxFuture<'a, Result<(), DispatchError>>;
}

/// A trigger that has failed `consecutive_failures` times in a row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerIssue {
    pub flow_id: String,
    pub project_id: String,
    pub trigger_name: String,
    pub consecutive_failures: u32,
    pub last_failure: FailureReason,
    pub observed_at: DateTime<Utc>,
}

/// Surfaces degraded triggers to the user-facing issue tracker.
pub trait IssueReporter: Send + Sync {
    fn report_issue<'a>(&'a self, issue: &'a TriggerIssue)
    -> BoxFuture<'a, Result<(), DispatchError>>;
}
