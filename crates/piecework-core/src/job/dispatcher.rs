//! Job dispatcher: route one job to the isolation strategy, report once.
//!
//! The dispatcher performs no retries. Every envelope produces exactly one
//! [`JobReport`], handed to the [`ResultReporter`] and returned to the caller.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::Instrument;

use piecework_types::engine::{
    ActionInvocation, EngineCall, EngineResult, FailureReason, PropertyInvocation,
};
use piecework_types::job::{JobEnvelope, JobReport, JobRequest};

use super::reporter::ResultReporter;
use crate::engine::IsolationStrategy;
use crate::repository::CursorStore;
use crate::trigger::TriggerHookService;

pub struct JobDispatcher<S: IsolationStrategy, C: CursorStore> {
    strategy: Arc<S>,
    triggers: Arc<TriggerHookService<S, C>>,
    reporter: Arc<dyn ResultReporter>,
    default_timeout: Duration,
}

impl<S: IsolationStrategy, C: CursorStore> JobDispatcher<S, C> {
    pub fn new(
        strategy: Arc<S>,
        triggers: Arc<TriggerHookService<S, C>>,
        reporter: Arc<dyn ResultReporter>,
        default_timeout: Duration,
    ) -> Self {
        Self {
            strategy,
            triggers,
            reporter,
            default_timeout,
        }
    }

    pub fn strategy(&self) -> &Arc<S> {
        &self.strategy
    }

    pub fn triggers(&self) -> &Arc<TriggerHookService<S, C>> {
        &self.triggers
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Execute one job and send its report.
    pub async fn dispatch(&self, envelope: JobEnvelope) -> JobReport {
        let span = tracing::info_span!(
            "job.dispatch",
            request_id = %envelope.request_id,
            worker_server_id = %envelope.worker_server_id,
            job = envelope.job.kind_name(),
        );

        async move {
            let timeout = envelope
                .timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(self.default_timeout);
            let result = self.execute(&envelope.job, timeout).await;

            match result.failure_reason() {
                None => tracing::info!(duration_ms = result.duration_ms(), "job succeeded"),
                Some(reason) => tracing::warn!(
                    duration_ms = result.duration_ms(),
                    error = %reason,
                    "job failed"
                ),
            }

            let report = build_report(&envelope, result);
            self.send_report(&report).await;
            report
        }
        .instrument(span)
        .await
    }

    /// Route a job to the call it needs. A closed match over job kinds.
    pub async fn execute(&self, job: &JobRequest, timeout: Duration) -> EngineResult {
        match job {
            JobRequest::ValidateAuth(job) => {
                let call = EngineCall::ValidateAuth {
                    piece: job.piece.clone(),
                    auth: job.auth.clone(),
                };
                self.strategy.execute(call, timeout).await
            }
            JobRequest::ExtractPieceMetadata(job) => {
                let call = EngineCall::ExtractPieceMetadata {
                    piece: job.piece.clone(),
                };
                self.strategy.execute(call, timeout).await
            }
            JobRequest::ExecuteTriggerHook(job) => self.triggers.execute(job, timeout).await,
            JobRequest::ExecuteAction(job) => {
                let call = EngineCall::Action {
                    piece: job.piece.clone(),
                    invocation: ActionInvocation {
                        project_id: job.project_id.clone(),
                        flow_id: job.flow.as_ref().map(|f| f.flow_id.clone()),
                        action_name: job.action_name.clone(),
                        input: job.input.clone(),
                    },
                };
                self.strategy.execute(call, timeout).await
            }
            JobRequest::ExecuteProperty(job) => {
                let call = EngineCall::Property {
                    piece: job.piece.clone(),
                    invocation: PropertyInvocation {
                        project_id: job.project_id.clone(),
                        step_name: job.step_name.clone(),
                        property_name: job.property_name.clone(),
                        input: job.input.clone(),
                        search_value: job.search_value.clone(),
                    },
                };
                self.strategy.execute(call, timeout).await
            }
        }
    }

    /// Report a job whose execution never produced a result (panicked task).
    pub async fn report_host_failure(&self, envelope: &JobEnvelope, message: String) -> JobReport {
        let report = build_report(envelope, EngineResult::failed(FailureReason::host(message), 0));
        self.send_report(&report).await;
        report
    }

    async fn send_report(&self, report: &JobReport) {
        if let Err(e) = self.reporter.report(report).await {
            tracing::error!(
                request_id = %report.request_id,
                error = %e,
                "failed to deliver job report"
            );
        }
    }
}

fn build_report(envelope: &JobEnvelope, result: EngineResult) -> JobReport {
    JobReport {
        request_id: envelope.request_id.clone(),
        worker_server_id: envelope.worker_server_id.clone(),
        job_kind: envelope.job.kind_name().to_string(),
        result,
        finished_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::ConnectorRegistry;
    use crate::engine::ThreadStrategy;
    use crate::repository::InMemoryCursorStore;
    use crate::testing::{RecordingReporter, ScriptedConnector, dispatcher_with};
    use piecework_types::job::{
        ActionJob, ExtractPieceMetadataJob, PieceRef, PropertyJob, ValidateAuthJob,
    };
    use serde_json::json;

    fn registry() -> ConnectorRegistry {
        let registry = ConnectorRegistry::new();
        registry.register(ScriptedConnector::new("demo", "1.2.0"));
        registry
    }

    #[tokio::test]
    async fn validate_auth_reports_once() {
        let reporter = Arc::new(RecordingReporter::default());
        let dispatcher = dispatcher_with(registry(), reporter.clone());

        let envelope = JobEnvelope::new(
            "worker-1",
            JobRequest::ValidateAuth(ValidateAuthJob {
                project_id: "proj-1".to_string(),
                piece: PieceRef::new("demo", "^1"),
                auth: json!({"token": "good"}),
            }),
        );
        let request_id = envelope.request_id.clone();
        let report = dispatcher.dispatch(envelope).await;

        assert!(report.result.is_success());
        assert_eq!(report.result.output().unwrap()["valid"], true);
        let sent = reporter.reports();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].request_id, request_id);
        assert_eq!(sent[0].job_kind, "VALIDATE_AUTH");
    }

    #[tokio::test]
    async fn unknown_piece_is_forwarded_as_typed_failure() {
        let reporter = Arc::new(RecordingReporter::default());
        let dispatcher = dispatcher_with(registry(), reporter.clone());

        let envelope = JobEnvelope::new(
            "worker-1",
            JobRequest::ExtractPieceMetadata(ExtractPieceMetadataJob {
                piece: PieceRef::new("missing", "1.0.0"),
            }),
        );
        let report = dispatcher.dispatch(envelope).await;

        assert!(matches!(
            report.result.failure_reason(),
            Some(FailureReason::ConnectorFailure { .. })
        ));
        assert_eq!(reporter.reports().len(), 1);
    }

    #[tokio::test]
    async fn action_and_property_are_routed() {
        let reporter = Arc::new(RecordingReporter::default());
        let dispatcher = dispatcher_with(registry(), reporter.clone());

        let action = dispatcher
            .execute(
                &JobRequest::ExecuteAction(ActionJob {
                    project_id: "proj-1".to_string(),
                    flow: None,
                    piece: PieceRef::new("demo", "1.2.0"),
                    action_name: "echo".to_string(),
                    input: json!({"hello": "world"}),
                }),
                Duration::from_secs(5),
            )
            .await;
        assert_eq!(action.output(), Some(&json!({"hello": "world"})));

        let property = dispatcher
            .execute(
                &JobRequest::ExecuteProperty(PropertyJob {
                    project_id: "proj-1".to_string(),
                    flow: None,
                    piece: PieceRef::new("demo", "1.2.0"),
                    step_name: "echo".to_string(),
                    property_name: "channel".to_string(),
                    input: json!({}),
                    search_value: Some("gen".to_string()),
                }),
                Duration::from_secs(5),
            )
            .await;
        assert_eq!(property.output().unwrap()["search"], "gen");
    }

    #[tokio::test]
    async fn envelope_timeout_overrides_default() {
        let registry = ConnectorRegistry::new();
        registry.register(
            ScriptedConnector::new("slow", "1.0.0").with_delay(Duration::from_secs(10)),
        );
        let reporter = Arc::new(RecordingReporter::default());
        let strategy = Arc::new(ThreadStrategy::new(Arc::new(registry)));
        let dispatcher = JobDispatcher::new(
            Arc::clone(&strategy),
            Arc::new(crate::testing::trigger_service(
                strategy,
                Arc::new(InMemoryCursorStore::new()),
            )),
            reporter.clone(),
            Duration::from_secs(60),
        );

        let mut envelope = JobEnvelope::new(
            "worker-1",
            JobRequest::ValidateAuth(ValidateAuthJob {
                project_id: "proj-1".to_string(),
                piece: PieceRef::new("slow", "1.0.0"),
                auth: json!({"token": "good"}),
            }),
        );
        envelope.timeout_secs = Some(0);
        let report = dispatcher.dispatch(envelope).await;
        assert!(report.result.failure_reason().unwrap().is_timeout());
    }

    #[tokio::test]
    async fn reporter_failure_still_returns_report() {
        let reporter = Arc::new(RecordingReporter::default());
        reporter.fail_next(true);
        let dispatcher = dispatcher_with(registry(), reporter.clone());

        let envelope = JobEnvelope::new(
            "worker-1",
            JobRequest::ExtractPieceMetadata(ExtractPieceMetadataJob {
                piece: PieceRef::new("demo", "1.2.0"),
            }),
        );
        let report = dispatcher.dispatch(envelope).await;
        assert!(report.result.is_success());
        assert!(reporter.reports().is_empty());
    }
}
