//! Outbound collaborators: the control-plane HTTP API and a log-only fallback.
//!
//! [`ApiClient`] POSTs job reports, flow-run batches and trigger issues to the
//! API server. [`LogOnly`] is wired instead when no API URL is configured, so
//! a standalone worker still runs end to end.

use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde::Serialize;

use piecework_core::job::ResultReporter;
use piecework_core::trigger::{FlowRunBatch, FlowRunDispatcher, IssueReporter, TriggerIssue};
use piecework_types::error::DispatchError;
use piecework_types::job::JobReport;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum response-body bytes quoted in a rejection error.
const BODY_EXCERPT: usize = 500;

// ---------------------------------------------------------------------------
// ApiClient
// ---------------------------------------------------------------------------

pub struct ApiClient {
    base_url: String,
    worker_server_id: String,
    http: reqwest::Client,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, worker_server_id: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("piecework-worker/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();

        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            worker_server_id: worker_server_id.into(),
            http,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<(), DispatchError> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .http
            .post(&url)
            .header("x-worker-server-id", &self.worker_server_id)
            .json(body)
            .send()
            .await
            .map_err(|e| DispatchError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            tracing::debug!(url = %url, status = status.as_u16(), "api call accepted");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(DispatchError::Rejected {
            status: status.as_u16(),
            body: body.chars().take(BODY_EXCERPT).collect(),
        })
    }
}

impl ResultReporter for ApiClient {
    fn report<'a>(&'a self, report: &'a JobReport) -> BoxFuture<'a, Result<(), DispatchError>> {
        self.post("/v1/engine/results", report).boxed()
    }
}

impl FlowRunDispatcher for ApiClient {
    fn dispatch<'a>(&'a self, batch: &'a FlowRunBatch) -> BoxFuture<'a, Result<(), DispatchError>> {
        self.post("/v1/flow-runs", batch).boxed()
    }
}

impl IssueReporter for ApiClient {
    fn report_issue<'a>(
        &'a self,
        issue: &'a TriggerIssue,
    ) -> BoxFuture<'a, Result<(), DispatchError>> {
        self.post("/v1/trigger-issues", issue).boxed()
    }
}

// ---------------------------------------------------------------------------
// LogOnly
// ---------------------------------------------------------------------------

/// Writes every outbound message to the log and drops it.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogOnly;

impl ResultReporter for LogOnly {
    fn report<'a>(&'a self, report: &'a JobReport) -> BoxFuture<'a, Result<(), DispatchError>> {
        async move {
            tracing::info!(
                request_id = %report.request_id,
                job_kind = %report.job_kind,
                success = report.result.is_success(),
                duration_ms = report.result.duration_ms(),
                "job finished"
            );
            Ok(())
        }
        .boxed()
    }
}

impl FlowRunDispatcher for LogOnly {
    fn dispatch<'a>(&'a self, batch: &'a FlowRunBatch) -> BoxFuture<'a, Result<(), DispatchError>> {
        async move {
            tracing::info!(
                flow_id = %batch.flow_id,
                trigger = %batch.trigger_name,
                runs = batch.payloads.len(),
                "flow runs requested"
            );
            Ok(())
        }
        .boxed()
    }
}

impl IssueReporter for LogOnly {
    fn report_issue<'a>(
        &'a self,
        issue: &'a TriggerIssue,
    ) -> BoxFuture<'a, Result<(), DispatchError>> {
        async move {
            tracing::warn!(
                flow_id = %issue.flow_id,
                trigger = %issue.trigger_name,
                consecutive_failures = issue.consecutive_failures,
                last_failure = %issue.last_failure,
                "trigger is failing"
            );
            Ok(())
        }
        .boxed()
    }
}
