//! Hand-written fakes shared by the unit tests of this crate.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::BoxFuture;
use serde_json::{Value, json};

use piecework_types::engine::{
    ActionInvocation, EngineCall, PropertyInvocation, TriggerHookInvocation,
};
use piecework_types::error::{ConnectorError, DispatchError, RepositoryError};
use piecework_types::job::{FlowVersionSnapshot, JobReport, PieceRef, TriggerSettings};
use piecework_types::poll::{DedupCursor, VersionedCursor};
use piecework_types::piece::{
    ActionDefinition, AuthValidation, PieceMetadata, TriggerDefinition,
};
use piecework_types::trigger::{
    DedupStrategy, HandshakeStrategy, HookType, OrderDirection, TriggerStrategy,
};

use crate::connector::{Connector, ConnectorRegistry};
use crate::engine::ThreadStrategy;
use crate::job::{JobDispatcher, ResultReporter};
use crate::repository::{CursorStore, InMemoryCursorStore};
use crate::trigger::{
    FlowRunBatch, FlowRunDispatcher, IssueReporter, TriggerCollaborators, TriggerEngineSettings,
    TriggerHookService, TriggerIssue, WebhookUrlResolver,
};

pub const POLLING_TRIGGER: &str = "new_items";
pub const WEBHOOK_TRIGGER: &str = "catch";

// ---------------------------------------------------------------------------
// ScriptedConnector
// ---------------------------------------------------------------------------

type HookFn = dyn Fn(&TriggerHookInvocation) -> Result<Value, ConnectorError> + Send + Sync;

/// Connector whose trigger hooks run a test-supplied closure.
///
/// `validate_auth` accepts `{"token": "good"}` only; the `echo` action returns
/// its input.
pub struct ScriptedConnector {
    metadata: PieceMetadata,
    hook: Arc<HookFn>,
    delay: Option<Duration>,
    calls: Arc<Mutex<Vec<TriggerHookInvocation>>>,
}

impl ScriptedConnector {
    pub fn new(name: &str, version: &str) -> Self {
        let metadata = PieceMetadata {
            name: name.to_string(),
            display_name: name.to_string(),
            version: semver::Version::parse(version).unwrap(),
            description: String::new(),
            triggers: vec![
                TriggerDefinition {
                    name: POLLING_TRIGGER.to_string(),
                    display_name: "New items".to_string(),
                    strategy: polling_strategy(),
                    handshake: HandshakeStrategy::None,
                    requires_renewal: false,
                    sample_data: Value::Null,
                },
                TriggerDefinition {
                    name: WEBHOOK_TRIGGER.to_string(),
                    display_name: "Catch webhook".to_string(),
                    strategy: TriggerStrategy::Webhook,
                    handshake: HandshakeStrategy::None,
                    requires_renewal: false,
                    sample_data: Value::Null,
                },
            ],
            actions: vec![ActionDefinition {
                name: "echo".to_string(),
                display_name: "Echo".to_string(),
                description: String::new(),
            }],
        };
        Self {
            metadata,
            hook: Arc::new(|_| Ok(json!([]))),
            delay: None,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn on_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&TriggerHookInvocation) -> Result<Value, ConnectorError> + Send + Sync + 'static,
    {
        self.hook = Arc::new(hook);
        self
    }

    /// Sleep before every async call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Every trigger hook invocation received so far.
    pub fn calls(&self) -> Arc<Mutex<Vec<TriggerHookInvocation>>> {
        Arc::clone(&self.calls)
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

impl Connector for ScriptedConnector {
    fn metadata(&self) -> &PieceMetadata {
        &self.metadata
    }

    async fn validate_auth(&self, auth: &Value) -> Result<AuthValidation, ConnectorError> {
        self.pause().await;
        if auth["token"] == "good" {
            Ok(AuthValidation::valid())
        } else {
            Ok(AuthValidation::invalid("token rejected"))
        }
    }

    async fn trigger_hook(
        &self,
        invocation: &TriggerHookInvocation,
    ) -> Result<Value, ConnectorError> {
        self.pause().await;
        self.calls.lock().unwrap().push(invocation.clone());
        (self.hook)(invocation)
    }

    async fn run_action(&self, invocation: &ActionInvocation) -> Result<Value, ConnectorError> {
        self.pause().await;
        match invocation.action_name.as_str() {
            "echo" => Ok(invocation.input.clone()),
            other => Err(ConnectorError::UnknownAction(other.to_string())),
        }
    }

    async fn resolve_property(
        &self,
        invocation: &PropertyInvocation,
    ) -> Result<Value, ConnectorError> {
        self.pause().await;
        Ok(json!({
            "search": invocation.search_value,
            "options": [{"label": "general", "value": "C1"}],
        }))
    }
}

// ---------------------------------------------------------------------------
// Flows and calls
// ---------------------------------------------------------------------------

fn polling_strategy() -> TriggerStrategy {
    TriggerStrategy::Polling {
        dedup: DedupStrategy::LastItem {
            order_by: "t".to_string(),
            direction: OrderDirection::Descending,
            max_items: None,
        },
    }
}

/// Polling flow ordered by field `t`, newest (largest) first.
pub fn polling_flow(flow_id: &str, piece: &str) -> FlowVersionSnapshot {
    FlowVersionSnapshot {
        flow_id: flow_id.to_string(),
        flow_version_id: format!("{flow_id}-v1"),
        project_id: "proj-1".to_string(),
        trigger: TriggerSettings {
            piece: PieceRef::new(piece, "*"),
            trigger_name: POLLING_TRIGGER.to_string(),
            input: json!({}),
            strategy: polling_strategy(),
            handshake: HandshakeStrategy::None,
        },
    }
}

pub fn webhook_flow(flow_id: &str, piece: &str, handshake: HandshakeStrategy) -> FlowVersionSnapshot {
    FlowVersionSnapshot {
        flow_id: flow_id.to_string(),
        flow_version_id: format!("{flow_id}-v1"),
        project_id: "proj-1".to_string(),
        trigger: TriggerSettings {
            piece: PieceRef::new(piece, "*"),
            trigger_name: WEBHOOK_TRIGGER.to_string(),
            input: json!({}),
            strategy: TriggerStrategy::Webhook,
            handshake,
        },
    }
}

pub fn hook_call(piece: &str, hook: HookType) -> EngineCall {
    EngineCall::TriggerHook {
        piece: PieceRef::new(piece, "*"),
        invocation: TriggerHookInvocation {
            flow_id: "flow-1".to_string(),
            project_id: "proj-1".to_string(),
            trigger_name: POLLING_TRIGGER.to_string(),
            hook,
            input: json!({}),
            webhook_url: "http://localhost:3000/v1/webhooks/flow-1".to_string(),
            payload: None,
        },
    }
}

// ---------------------------------------------------------------------------
// Recording collaborators
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingFlowRuns {
    batches: Mutex<Vec<FlowRunBatch>>,
    fail: AtomicBool,
}

impl RecordingFlowRuns {
    pub fn batches(&self) -> Vec<FlowRunBatch> {
        self.batches.lock().unwrap().clone()
    }

    /// Make every following dispatch fail until reset.
    pub fn fail_next(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

impl FlowRunDispatcher for RecordingFlowRuns {
    fn dispatch<'a>(&'a self, batch: &'a FlowRunBatch) -> BoxFuture<'a, Result<(), DispatchError>> {
        Box::pin(async move {
            if self.fail.load(Ordering::SeqCst) {
                return Err(DispatchError::Transport("flow runs unavailable".to_string()));
            }
            self.batches.lock().unwrap().push(batch.clone());
            Ok(())
        })
    }
}

#[derive(Default)]
pub struct RecordingIssues {
    issues: Mutex<Vec<TriggerIssue>>,
}

impl RecordingIssues {
    pub fn issues(&self) -> Vec<TriggerIssue> {
        self.issues.lock().unwrap().clone()
    }
}

impl IssueReporter for RecordingIssues {
    fn report_issue<'a>(
        &'a self,
        issue: &'a TriggerIssue,
    ) -> BoxFuture<'a, Result<(), DispatchError>> {
        Box::pin(async move {
            self.issues.lock().unwrap().push(issue.clone());
            Ok(())
        })
    }
}

#[derive(Default)]
pub struct RecordingReporter {
    reports: Mutex<Vec<JobReport>>,
    fail: AtomicBool,
}

impl RecordingReporter {
    pub fn reports(&self) -> Vec<JobReport> {
        self.reports.lock().unwrap().clone()
    }

    pub fn fail_next(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

impl ResultReporter for RecordingReporter {
    fn report<'a>(&'a self, report: &'a JobReport) -> BoxFuture<'a, Result<(), DispatchError>> {
        Box::pin(async move {
            if self.fail.load(Ordering::SeqCst) {
                return Err(DispatchError::Rejected {
                    status: 503,
                    body: "unavailable".to_string(),
                });
            }
            self.reports.lock().unwrap().push(report.clone());
            Ok(())
        })
    }
}

// ---------------------------------------------------------------------------
// RacingCursorStore
// ---------------------------------------------------------------------------

/// In-memory store where another writer can be made to win the next swap.
///
/// When armed, the next `compare_and_swap` first stores the rival cursor
/// under a fresh version, then applies the caller's write against its now
/// stale expected version.
#[derive(Default)]
pub struct RacingCursorStore {
    inner: InMemoryCursorStore,
    rival: Mutex<Option<DedupCursor>>,
}

impl RacingCursorStore {
    pub fn race_next_swap(&self, rival: DedupCursor) {
        *self.rival.lock().unwrap() = Some(rival);
    }
}

impl CursorStore for RacingCursorStore {
    async fn get(&self, key: &str) -> Result<Option<VersionedCursor>, RepositoryError> {
        self.inner.get(key).await
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected_version: Option<u64>,
        cursor: &DedupCursor,
    ) -> Result<u64, RepositoryError> {
        let rival = self.rival.lock().unwrap().take();
        if let Some(rival) = rival {
            let current = self.inner.get(key).await?.map(|stored| stored.version);
            self.inner.compare_and_swap(key, current, &rival).await?;
        }
        self.inner.compare_and_swap(key, expected_version, cursor).await
    }

    async fn delete(&self, key: &str) -> Result<(), RepositoryError> {
        self.inner.delete(key).await
    }
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

pub fn trigger_service(
    strategy: Arc<ThreadStrategy>,
    store: Arc<InMemoryCursorStore>,
) -> TriggerHookService<ThreadStrategy, InMemoryCursorStore> {
    TriggerHookService::new(
        strategy,
        store,
        TriggerCollaborators {
            flow_runs: Arc::new(RecordingFlowRuns::default()),
            issues: Arc::new(RecordingIssues::default()),
        },
        WebhookUrlResolver::new("http://localhost:3000"),
        TriggerEngineSettings::default(),
    )
}

pub fn dispatcher_with(
    registry: ConnectorRegistry,
    reporter: Arc<RecordingReporter>,
) -> JobDispatcher<ThreadStrategy, InMemoryCursorStore> {
    let strategy = Arc::new(ThreadStrategy::new(Arc::new(registry)));
    let triggers = trigger_service(Arc::clone(&strategy), Arc::new(InMemoryCursorStore::new()));
    JobDispatcher::new(strategy, Arc::new(triggers), reporter, Duration::from_secs(5))
}
