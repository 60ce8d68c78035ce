//! Trigger hook protocol.
//!
//! Decides, for each inbound signal (enable, disable, run tick, renewal,
//! test, webhook delivery), which connector hook runs and how its result is
//! interpreted. A closed `match` over [`HookType`]; each arm has its own
//! expected output shape.
//!
//! | hook        | connector output           | engine effect                                  |
//! |-------------|----------------------------|------------------------------------------------|
//! | `OnEnable`  | ignored                    | polling baseline, register trigger             |
//! | `OnDisable` | ignored (best effort)      | delete cursor, unregister, reset failures      |
//! | `Run`       | array                      | dedup (polling) then dispatch flow runs        |
//! | `Renew`     | ignored                    | success / failure only                         |
//! | `Handshake` | `WebhookResponse`          | response for the webhook sender                |
//! | `Test`      | array                      | sample items; cursor is never touched          |

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::{Value, json};

use piecework_types::engine::{EngineCall, EngineResult, FailureReason, TriggerHookInvocation};
use piecework_types::job::{FlowVersionSnapshot, TriggerHookJob};
use piecework_types::trigger::{
    DedupStrategy, HookType, TriggerStrategy, WebhookRequest, WebhookResponse,
};

use super::dedup::expect_items;
use super::failures::FailureTracker;
use super::handshake::try_handshake;
use super::poller::PollingEngine;
use super::ports::{FlowRunBatch, FlowRunDispatcher, IssueReporter, TriggerIssue};
use super::registry::EnabledTriggers;
use super::webhook_url::WebhookUrlResolver;
use crate::engine::IsolationStrategy;
use crate::repository::CursorStore;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Reasons a webhook delivery cannot be processed at all.
#[derive(Debug, thiserror::Error)]
pub enum WebhookDeliveryError {
    #[error("no enabled trigger for flow {0}")]
    NotEnabled(String),

    #[error("flow {0} uses a polling trigger and does not accept webhooks")]
    PollingTrigger(String),
}

// ---------------------------------------------------------------------------
// Settings and collaborators
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct TriggerEngineSettings {
    /// Items returned by `Test` on polling triggers.
    pub test_sample_size: usize,
    /// Consecutive failures before an issue is raised.
    pub failure_threshold: u32,
}

impl Default for TriggerEngineSettings {
    fn default() -> Self {
        Self {
            test_sample_size: 5,
            failure_threshold: 5,
        }
    }
}

/// Downstream collaborators, chosen by the worker at startup.
#[derive(Clone)]
pub struct TriggerCollaborators {
    pub flow_runs: Arc<dyn FlowRunDispatcher>,
    pub issues: Arc<dyn IssueReporter>,
}

// ---------------------------------------------------------------------------
// TriggerHookService
// ---------------------------------------------------------------------------

pub struct TriggerHookService<S: IsolationStrategy, C: CursorStore> {
    strategy: Arc<S>,
    poller: PollingEngine<C>,
    collaborators: TriggerCollaborators,
    failures: FailureTracker,
    webhook_urls: WebhookUrlResolver,
    enabled: EnabledTriggers,
    test_sample_size: usize,
}

impl<S: IsolationStrategy, C: CursorStore> TriggerHookService<S, C> {
    pub fn new(
        strategy: Arc<S>,
        store: Arc<C>,
        collaborators: TriggerCollaborators,
        webhook_urls: WebhookUrlResolver,
        settings: TriggerEngineSettings,
    ) -> Self {
        Self {
            strategy,
            poller: PollingEngine::new(store),
            collaborators,
            failures: FailureTracker::new(settings.failure_threshold),
            webhook_urls,
            enabled: EnabledTriggers::new(),
            test_sample_size: settings.test_sample_size,
        }
    }

    pub fn enabled(&self) -> &EnabledTriggers {
        &self.enabled
    }

    pub fn failures(&self) -> &FailureTracker {
        &self.failures
    }

    /// Execute one trigger hook job. Always yields exactly one result.
    pub async fn execute(&self, job: &TriggerHookJob, timeout: Duration) -> EngineResult {
        let flow = &job.flow;
        let payload = job.webhook.as_ref().map(WebhookRequest::to_payload);
        tracing::debug!(
            flow_id = %flow.flow_id,
            trigger = %flow.trigger.trigger_name,
            hook = %job.hook,
            simulate = job.simulate,
            "executing trigger hook"
        );

        match job.hook {
            HookType::OnEnable => self.on_enable(flow, job.simulate, timeout).await,
            HookType::OnDisable => self.on_disable(flow, timeout).await,
            HookType::Run => match &flow.trigger.strategy {
                TriggerStrategy::Polling { dedup } => self.run_polling(flow, dedup, timeout).await,
                TriggerStrategy::Webhook | TriggerStrategy::AppWebhook => {
                    self.run_webhook(flow, payload, job.simulate, timeout).await
                }
            },
            HookType::Renew => self.renew(flow, timeout).await,
            HookType::Handshake => self.handshake(flow, payload, job.simulate, timeout).await,
            HookType::Test => self.test(flow, payload, job.simulate, timeout).await,
        }
    }

    /// Handle an inbound webhook: handshake negotiation first, then `Run`.
    pub async fn handle_webhook(
        &self,
        flow_id: &str,
        request: WebhookRequest,
        simulate: bool,
        timeout: Duration,
    ) -> Result<WebhookResponse, WebhookDeliveryError> {
        let flow = self
            .enabled
            .get(flow_id)
            .ok_or_else(|| WebhookDeliveryError::NotEnabled(flow_id.to_string()))?;
        if flow.trigger.strategy.is_polling() {
            return Err(WebhookDeliveryError::PollingTrigger(flow_id.to_string()));
        }

        let payload = request.to_payload();
        let handshake_hook =
            self.call_hook(&flow, HookType::Handshake, Some(payload.clone()), simulate, timeout);
        if let Some(response) = try_handshake(&flow.trigger.handshake, &request, handshake_hook).await
        {
            tracing::info!(flow_id, status = response.status, "webhook handshake answered");
            return Ok(response);
        }

        let result = self.run_webhook(&flow, Some(payload), simulate, timeout).await;
        let response = match result.into_result() {
            Ok(output) => {
                let accepted = output.as_array().map(Vec::len).unwrap_or(0);
                WebhookResponse::new(200, json!({ "accepted": accepted }))
            }
            Err(reason) => WebhookResponse::internal_error(reason.to_string()),
        };
        Ok(response)
    }

    // -----------------------------------------------------------------------
    // Hook arms
    // -----------------------------------------------------------------------

    async fn on_enable(
        &self,
        flow: &FlowVersionSnapshot,
        simulate: bool,
        timeout: Duration,
    ) -> EngineResult {
        let started = Instant::now();
        let result = self
            .call_hook(flow, HookType::OnEnable, None, simulate, timeout)
            .await;
        let output = match result.into_result() {
            Ok(output) => output,
            Err(reason) => {
                tracing::warn!(flow_id = %flow.flow_id, error = %reason, "enable hook failed");
                return EngineResult::failed(reason, elapsed_ms(started));
            }
        };

        if let TriggerStrategy::Polling { dedup } = &flow.trigger.strategy {
            let fetch = self.fetch_items(flow, HookType::Run, timeout);
            match self.poller.baseline(flow, dedup, fetch).await {
                Ok(cursor) => tracing::info!(
                    flow_id = %flow.flow_id,
                    trigger = %flow.trigger.trigger_name,
                    empty = cursor.is_empty(),
                    "polling baseline recorded"
                ),
                Err(err) => {
                    tracing::warn!(flow_id = %flow.flow_id, error = %err, "polling baseline failed");
                    return EngineResult::failed(err.into(), elapsed_ms(started));
                }
            }
        }

        self.enabled.enable(flow.clone());
        self.failures.reset(&flow.flow_id);
        tracing::info!(flow_id = %flow.flow_id, trigger = %flow.trigger.trigger_name, "trigger enabled");
        EngineResult::ok(Some(output), elapsed_ms(started))
    }

    async fn on_disable(&self, flow: &FlowVersionSnapshot, timeout: Duration) -> EngineResult {
        let started = Instant::now();
        let result = self
            .call_hook(flow, HookType::OnDisable, None, false, timeout)
            .await;
        if let Some(reason) = result.failure_reason() {
            tracing::warn!(
                flow_id = %flow.flow_id,
                error = %reason,
                "disable hook failed, removing trigger state anyway"
            );
        }

        if let Err(err) = self.poller.reset(flow).await {
            tracing::error!(flow_id = %flow.flow_id, error = %err, "failed to delete dedup cursor");
            return EngineResult::failed(err.into(), elapsed_ms(started));
        }
        self.enabled.disable(&flow.flow_id);
        self.failures.reset(&flow.flow_id);
        tracing::info!(flow_id = %flow.flow_id, trigger = %flow.trigger.trigger_name, "trigger disabled");
        result
    }

    async fn run_polling(
        &self,
        flow: &FlowVersionSnapshot,
        dedup: &DedupStrategy,
        timeout: Duration,
    ) -> EngineResult {
        let started = Instant::now();
        let fetch = self.fetch_items(flow, HookType::Run, timeout);
        let report = self
            .poller
            .poll(flow, dedup, fetch, self.collaborators.flow_runs.as_ref())
            .await;

        match report {
            Ok(report) => {
                self.failures.record_success(&flow.flow_id);
                let payloads = report.emitted.into_iter().map(|item| item.data).collect();
                EngineResult::ok(Some(Value::Array(payloads)), elapsed_ms(started))
            }
            Err(err) => self.fail(flow, err.into(), elapsed_ms(started)).await,
        }
    }

    async fn run_webhook(
        &self,
        flow: &FlowVersionSnapshot,
        payload: Option<Value>,
        simulate: bool,
        timeout: Duration,
    ) -> EngineResult {
        let result = self
            .call_hook(flow, HookType::Run, payload, simulate, timeout)
            .await;
        let duration = result.duration_ms();
        let items = match result.into_result().and_then(|output| {
            expect_items(output).map_err(FailureReason::from)
        }) {
            Ok(items) => items,
            Err(reason) if simulate => return EngineResult::failed(reason, duration),
            Err(reason) => return self.fail(flow, reason, duration).await,
        };

        // Simulated deliveries only capture sample data.
        if !simulate && !items.is_empty() {
            let batch = FlowRunBatch::for_flow(flow, items.clone());
            if let Err(e) = self.collaborators.flow_runs.dispatch(&batch).await {
                tracing::error!(flow_id = %flow.flow_id, error = %e, "flow run dispatch failed");
                return EngineResult::failed(
                    FailureReason::host(format!("flow run dispatch: {e}")),
                    duration,
                );
            }
        }
        if !simulate {
            self.failures.record_success(&flow.flow_id);
        }
        EngineResult::ok(Some(Value::Array(items)), duration)
    }

    async fn renew(&self, flow: &FlowVersionSnapshot, timeout: Duration) -> EngineResult {
        let result = self
            .call_hook(flow, HookType::Renew, None, false, timeout)
            .await;
        let duration = result.duration_ms();
        match result.into_result() {
            Ok(_) => {
                self.failures.record_success(&flow.flow_id);
                EngineResult::ok(None, duration)
            }
            Err(reason) => self.fail(flow, reason, duration).await,
        }
    }

    async fn handshake(
        &self,
        flow: &FlowVersionSnapshot,
        payload: Option<Value>,
        simulate: bool,
        timeout: Duration,
    ) -> EngineResult {
        let result = self
            .call_hook(flow, HookType::Handshake, payload, simulate, timeout)
            .await;
        let duration = result.duration_ms();
        match result.into_result() {
            Ok(output) => match serde_json::from_value::<WebhookResponse>(output.clone()) {
                Ok(response) => EngineResult::ok(Some(json!(response)), duration),
                Err(_) => EngineResult::failed(
                    FailureReason::invalid_shape("webhook response", &output),
                    duration,
                ),
            },
            Err(reason) => EngineResult::failed(reason, duration),
        }
    }

    /// Preview hook. Never reads or writes the dedup cursor.
    async fn test(
        &self,
        flow: &FlowVersionSnapshot,
        payload: Option<Value>,
        simulate: bool,
        timeout: Duration,
    ) -> EngineResult {
        let started = Instant::now();
        let fetched = match &flow.trigger.strategy {
            TriggerStrategy::Polling { .. } => self.fetch_items(flow, HookType::Test, timeout).await,
            TriggerStrategy::Webhook | TriggerStrategy::AppWebhook => {
                self.call_hook(flow, HookType::Test, payload, simulate, timeout)
                    .await
                    .into_result()
            }
        };

        match fetched.and_then(|output| expect_items(output).map_err(FailureReason::from)) {
            Ok(mut items) => {
                if flow.trigger.strategy.is_polling() {
                    items.truncate(self.test_sample_size);
                }
                EngineResult::ok(Some(Value::Array(items)), elapsed_ms(started))
            }
            Err(reason) => EngineResult::failed(reason, elapsed_ms(started)),
        }
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    /// Invoke one trigger hook through the isolation strategy.
    async fn call_hook(
        &self,
        flow: &FlowVersionSnapshot,
        hook: HookType,
        payload: Option<Value>,
        simulate: bool,
        timeout: Duration,
    ) -> EngineResult {
        let invocation = TriggerHookInvocation {
            flow_id: flow.flow_id.clone(),
            project_id: flow.project_id.clone(),
            trigger_name: flow.trigger.trigger_name.clone(),
            hook,
            input: flow.trigger.input.clone(),
            webhook_url: self.webhook_urls.resolve(&flow.flow_id, simulate),
            payload,
        };
        let call = EngineCall::TriggerHook {
            piece: flow.trigger.piece.clone(),
            invocation,
        };
        self.strategy.execute(call, timeout).await
    }

    async fn fetch_items(
        &self,
        flow: &FlowVersionSnapshot,
        hook: HookType,
        timeout: Duration,
    ) -> Result<Value, FailureReason> {
        self.call_hook(flow, hook, None, false, timeout)
            .await
            .into_result()
    }

    /// Record a failed invocation and raise an issue when the streak crosses the threshold.
    async fn fail(
        &self,
        flow: &FlowVersionSnapshot,
        reason: FailureReason,
        duration_ms: u64,
    ) -> EngineResult {
        if reason.is_timeout() {
            tracing::warn!(
                flow_id = %flow.flow_id,
                trigger = %flow.trigger.trigger_name,
                "trigger hook timed out, nothing emitted"
            );
        } else {
            tracing::warn!(
                flow_id = %flow.flow_id,
                trigger = %flow.trigger.trigger_name,
                error = %reason,
                "trigger hook failed"
            );
        }

        if reason.counts_against_flow() {
            let streak = self.failures.record_failure(&flow.flow_id);
            if streak.threshold_reached {
                let issue = TriggerIssue {
                    flow_id: flow.flow_id.clone(),
                    project_id: flow.project_id.clone(),
                    trigger_name: flow.trigger.trigger_name.clone(),
                    consecutive_failures: streak.consecutive,
                    last_failure: reason.clone(),
                    observed_at: Utc::now(),
                };
                if let Err(e) = self.collaborators.issues.report_issue(&issue).await {
                    tracing::error!(flow_id = %flow.flow_id, error = %e, "failed to report trigger issue");
                }
            }
        }

        EngineResult::failed(reason, duration_ms)
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::connector::ConnectorRegistry;
    use crate::engine::ThreadStrategy;
    use crate::repository::InMemoryCursorStore;
    use crate::testing::{
        RacingCursorStore, RecordingFlowRuns, RecordingIssues, ScriptedConnector, polling_flow, webhook_flow,
    };
    use piecework_types::trigger::HandshakeStrategy;

    const TIMEOUT: Duration = Duration::from_secs(5);

    struct Harness {
        service: TriggerHookService<ThreadStrategy, InMemoryCursorStore>,
        store: Arc<InMemoryCursorStore>,
        flow_runs: Arc<RecordingFlowRuns>,
        issues: Arc<RecordingIssues>,
    }

    fn harness(connector: ScriptedConnector, failure_threshold: u32) -> Harness {
        let registry = ConnectorRegistry::new();
        registry.register(connector);
        let store = Arc::new(InMemoryCursorStore::new());
        let flow_runs = Arc::new(RecordingFlowRuns::default());
        let issues = Arc::new(RecordingIssues::default());
        let service = TriggerHookService::new(
            Arc::new(ThreadStrategy::new(Arc::new(registry))),
            Arc::clone(&store),
            TriggerCollaborators {
                flow_runs: flow_runs.clone(),
                issues: issues.clone(),
            },
            WebhookUrlResolver::new("https://hooks.example.com"),
            TriggerEngineSettings {
                test_sample_size: 2,
                failure_threshold,
            },
        );
        Harness {
            service,
            store,
            flow_runs,
            issues,
        }
    }

    fn job(flow: &FlowVersionSnapshot, hook: HookType) -> TriggerHookJob {
        TriggerHookJob {
            flow: flow.clone(),
            hook,
            webhook: None,
            simulate: false,
        }
    }

    fn source_connector(source: Arc<Mutex<Value>>) -> ScriptedConnector {
        ScriptedConnector::new("demo", "1.0.0").on_hook(move |invocation| match invocation.hook {
            HookType::Run | HookType::Test => Ok(source.lock().unwrap().clone()),
            _ => Ok(Value::Null),
        })
    }

    #[tokio::test]
    async fn polling_lifecycle_enable_run_disable() {
        let source = Arc::new(Mutex::new(json!([{"t": 1, "name": "A"}])));
        let h = harness(source_connector(Arc::clone(&source)), 3);
        let flow = polling_flow("flow-1", "demo");

        let enabled = h.service.execute(&job(&flow, HookType::OnEnable), TIMEOUT).await;
        assert!(enabled.is_success());
        assert!(h.service.enabled().get("flow-1").is_some());
        assert!(h.store.get(&flow.cursor_key()).await.unwrap().is_some());
        assert!(h.flow_runs.batches().is_empty());

        *source.lock().unwrap() = json!([{"t": 2, "name": "B"}, {"t": 1, "name": "A"}]);
        let run = h.service.execute(&job(&flow, HookType::Run), TIMEOUT).await;
        assert_eq!(run.output(), Some(&json!([{"t": 2, "name": "B"}])));
        assert_eq!(h.flow_runs.batches().len(), 1);

        let disabled = h.service.execute(&job(&flow, HookType::OnDisable), TIMEOUT).await;
        assert!(disabled.is_success());
        assert!(h.store.get(&flow.cursor_key()).await.unwrap().is_none());
        assert!(h.service.enabled().get("flow-1").is_none());
    }

    #[tokio::test]
    async fn test_hook_samples_without_touching_cursor() {
        let source = Arc::new(Mutex::new(json!([
            {"t": 3, "name": "C"}, {"t": 2, "name": "B"}, {"t": 1, "name": "A"}
        ])));
        let h = harness(source_connector(source), 3);
        let flow = polling_flow("flow-1", "demo");

        let result = h.service.execute(&job(&flow, HookType::Test), TIMEOUT).await;
        assert_eq!(result.output().unwrap().as_array().unwrap().len(), 2);
        assert!(h.store.is_empty());
        assert!(h.flow_runs.batches().is_empty());
    }

    #[tokio::test]
    async fn non_list_run_output_counts_as_failure_and_raises_issue() {
        let connector = ScriptedConnector::new("demo", "1.0.0").on_hook(|_| Ok(json!({"oops": 1})));
        let h = harness(connector, 2);
        let flow = webhook_flow("flow-1", "demo", HandshakeStrategy::None);

        let first = h.service.execute(&job(&flow, HookType::Run), TIMEOUT).await;
        assert!(matches!(
            first.failure_reason(),
            Some(FailureReason::InvalidOutputShape { .. })
        ));
        assert!(h.issues.issues().is_empty());

        h.service.execute(&job(&flow, HookType::Run), TIMEOUT).await;
        let issues = h.issues.issues();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].consecutive_failures, 2);
    }

    #[tokio::test]
    async fn timeout_is_soft_and_distinguished() {
        let connector =
            ScriptedConnector::new("demo", "1.0.0").with_delay(Duration::from_secs(10));
        let h = harness(connector, 5);
        let flow = polling_flow("flow-1", "demo");

        let result = h
            .service
            .execute(&job(&flow, HookType::Run), Duration::from_millis(30))
            .await;
        assert!(result.failure_reason().unwrap().is_timeout());
        assert_eq!(h.service.failures().consecutive("flow-1"), 1);
        assert!(h.flow_runs.batches().is_empty());
        assert!(h.store.is_empty());
    }

    #[tokio::test]
    async fn webhook_delivery_runs_and_dispatches() {
        let connector = ScriptedConnector::new("demo", "1.0.0").on_hook(|invocation| {
            Ok(json!([invocation.payload.as_ref().map(|p| p["body"].clone())]))
        });
        let h = harness(connector, 3);
        let flow = webhook_flow("flow-1", "demo", HandshakeStrategy::None);
        h.service.execute(&job(&flow, HookType::OnEnable), TIMEOUT).await;

        let request = WebhookRequest {
            body: json!({"event": "created"}),
            ..Default::default()
        };
        let response = h
            .service
            .handle_webhook("flow-1", request, false, TIMEOUT)
            .await
            .unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body["accepted"], 1);
        let batches = h.flow_runs.batches();
        assert_eq!(batches[0].payloads, vec![json!({"event": "created"})]);
    }

    #[tokio::test]
    async fn handshake_short_circuits_before_run() {
        let connector = ScriptedConnector::new("demo", "1.0.0").on_hook(|invocation| {
            match invocation.hook {
                HookType::Handshake => {
                    let challenge = invocation
                        .payload
                        .as_ref()
                        .and_then(|p| p["queryParams"]["hub.challenge"].as_str())
                        .unwrap_or_default()
                        .to_string();
                    Ok(json!({"status": 200, "body": challenge}))
                }
                _ => Ok(json!([{"real": "event"}])),
            }
        });
        let h = harness(connector, 3);
        let flow = webhook_flow(
            "flow-1",
            "demo",
            HandshakeStrategy::QueryPresent {
                param_name: "hub.challenge".to_string(),
            },
        );
        h.service.execute(&job(&flow, HookType::OnEnable), TIMEOUT).await;

        let mut request = WebhookRequest::default();
        request
            .query
            .insert("hub.challenge".to_string(), "xyz".to_string());
        let response = h
            .service
            .handle_webhook("flow-1", request, false, TIMEOUT)
            .await
            .unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body, json!("xyz"));
        assert!(h.flow_runs.batches().is_empty());
    }

    #[tokio::test]
    async fn webhook_for_unknown_flow_is_rejected() {
        let h = harness(ScriptedConnector::new("demo", "1.0.0"), 3);
        let err = h
            .service
            .handle_webhook("missing", WebhookRequest::default(), false, TIMEOUT)
            .await
            .unwrap_err();
        assert!(matches!(err, WebhookDeliveryError::NotEnabled(_)));
    }

    #[tokio::test]
    async fn failed_enable_hook_does_not_register() {
        let connector = ScriptedConnector::new("demo", "1.0.0").on_hook(|invocation| {
            match invocation.hook {
                HookType::OnEnable => Err(piecework_types::error::ConnectorError::Upstream(
                    "401 from provider".to_string(),
                )),
                _ => Ok(json!([])),
            }
        });
        let h = harness(connector, 3);
        let flow = polling_flow("flow-1", "demo");
        let result = h.service.execute(&job(&flow, HookType::OnEnable), TIMEOUT).await;
        assert!(!result.is_success());
        assert!(h.service.enabled().is_empty());
        assert!(h.store.is_empty());
    }

    #[tokio::test]
    async fn failed_disable_hook_still_removes_cursor() {
        let source = Arc::new(Mutex::new(json!([{"t": 1}])));
        let run_source = Arc::clone(&source);
        let connector = ScriptedConnector::new("demo", "1.0.0").on_hook(move |invocation| {
            match invocation.hook {
                HookType::OnDisable => Err(piecework_types::error::ConnectorError::Upstream(
                    "gone".to_string(),
                )),
                _ => Ok(run_source.lock().unwrap().clone()),
            }
        });
        let h = harness(connector, 3);
        let flow = polling_flow("flow-1", "demo");
        h.service.execute(&job(&flow, HookType::OnEnable), TIMEOUT).await;
        assert!(!h.store.is_empty());

        let result = h.service.execute(&job(&flow, HookType::OnDisable), TIMEOUT).await;
        assert!(!result.is_success());
        assert!(h.store.is_empty());
        assert!(h.service.enabled().is_empty());
    }

    #[tokio::test]
    async fn hooks_receive_resolved_webhook_url() {
        let connector = ScriptedConnector::new("demo", "1.0.0");
        let calls = connector.calls();
        let h = harness(connector, 3);
        let flow = webhook_flow("flow-9", "demo", HandshakeStrategy::None);
        let mut simulate_job = job(&flow, HookType::OnEnable);
        simulate_job.simulate = true;
        h.service.execute(&simulate_job, TIMEOUT).await;

        let recorded = calls.lock().unwrap();
        assert_eq!(
            recorded[0].webhook_url,
            "https://hooks.example.com/v1/webhooks/flow-9/simulate"
        );
    }

    #[tokio::test]
    async fn cursor_conflict_is_reported_without_counting_against_flow() {
        let source = Arc::new(Mutex::new(json!([{"t": 1, "name": "A"}])));
        let registry = ConnectorRegistry::new();
        registry.register(source_connector(Arc::clone(&source)));
        let store = Arc::new(RacingCursorStore::default());
        let flow_runs = Arc::new(RecordingFlowRuns::default());
        let issues = Arc::new(RecordingIssues::default());
        let service = TriggerHookService::new(
            Arc::new(ThreadStrategy::new(Arc::new(registry))),
            Arc::clone(&store),
            TriggerCollaborators {
                flow_runs: flow_runs.clone(),
                issues: issues.clone(),
            },
            WebhookUrlResolver::new("https://hooks.example.com"),
            TriggerEngineSettings {
                test_sample_size: 2,
                failure_threshold: 1,
            },
        );
        let flow = polling_flow("flow-1", "demo");
        assert!(service.execute(&job(&flow, HookType::OnEnable), TIMEOUT).await.is_success());

        let b = json!({"t": 2, "name": "B"});
        *source.lock().unwrap() = json!([b.clone(), {"t": 1, "name": "A"}]);
        store.race_next_swap(piecework_types::poll::DedupCursor {
            last_item_id: Some(crate::trigger::dedup::item_id(&json!(2), &b)),
            last_order_key: Some(json!(2)),
            last_observed_at: Utc::now(),
        });

        let run = service.execute(&job(&flow, HookType::Run), TIMEOUT).await;
        assert_eq!(
            run.failure_reason(),
            Some(&FailureReason::CursorConflict {
                key: flow.cursor_key()
            })
        );
        assert_eq!(service.failures().consecutive("flow-1"), 0);
        assert!(issues.issues().is_empty());

        let retry = service.execute(&job(&flow, HookType::Run), TIMEOUT).await;
        assert_eq!(retry.output(), Some(&json!([])));
        let emitted: Vec<Value> = flow_runs
            .batches()
            .into_iter()
            .flat_map(|batch| batch.payloads)
            .collect();
        assert_eq!(emitted, vec![b]);
    }
}
