//! In-process isolation strategy.
//!
//! Each call runs on its own tokio task so a panicking connector unwinds only
//! that task. Timeouts are cooperative: on expiry the task is aborted, which
//! takes effect at the connector's next `.await`. A connector that spins
//! without yielding keeps its worker thread busy until it returns. Forced
//! termination needs the subprocess sandbox; this mode is for deployments
//! that trust every installed piece.

use std::any::Any;
use std::sync::Arc;
use std::time::{Duration, Instant};

use piecework_types::engine::{EngineCall, EngineResult, FailureReason};

use super::invoke::invoke_connector;
use super::strategy::IsolationStrategy;
use crate::connector::ConnectorRegistry;

pub struct ThreadStrategy {
    registry: Arc<ConnectorRegistry>,
}

impl ThreadStrategy {
    pub fn new(registry: Arc<ConnectorRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<ConnectorRegistry> {
        &self.registry
    }
}

impl IsolationStrategy for ThreadStrategy {
    fn name(&self) -> &'static str {
        "thread"
    }

    async fn execute(&self, call: EngineCall, timeout: Duration) -> EngineResult {
        let started = Instant::now();
        let piece = call.piece().to_string();
        let kind = call.kind_name();
        let registry = Arc::clone(&self.registry);

        let mut handle = tokio::spawn(async move { invoke_connector(&registry, call).await });
        let outcome = tokio::time::timeout(timeout, &mut handle).await;
        let elapsed = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(Ok(result)) => EngineResult::from_result(result, elapsed),
            Ok(Err(join_err)) if join_err.is_panic() => {
                let message = panic_message(join_err.into_panic());
                tracing::error!(piece = %piece, call = kind, %message, "connector panicked");
                EngineResult::failed(
                    FailureReason::connector(format!("connector panicked: {message}")),
                    elapsed,
                )
            }
            Ok(Err(join_err)) => EngineResult::failed(
                FailureReason::connector(format!("connector task cancelled: {join_err}")),
                elapsed,
            ),
            Err(_) => {
                handle.abort();
                tracing::warn!(
                    piece = %piece,
                    call = kind,
                    timeout_ms = timeout.as_millis() as u64,
                    "connector call timed out, task aborted"
                );
                EngineResult::failed(FailureReason::timeout(timeout.as_millis() as u64), elapsed)
            }
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedConnector, hook_call};
    use piecework_types::trigger::HookType;
    use serde_json::json;

    fn strategy_with(connector: ScriptedConnector) -> ThreadStrategy {
        let registry = ConnectorRegistry::new();
        registry.register(connector);
        ThreadStrategy::new(Arc::new(registry))
    }

    #[tokio::test]
    async fn successful_call_returns_output() {
        let strategy = strategy_with(
            ScriptedConnector::new("demo", "1.0.0").on_hook(|_| Ok(json!([{"id": 1}]))),
        );
        let result = strategy
            .execute(hook_call("demo", HookType::Run), Duration::from_secs(5))
            .await;
        assert!(result.is_success());
        assert_eq!(result.output(), Some(&json!([{"id": 1}])));
    }

    #[tokio::test]
    async fn panic_becomes_connector_failure() {
        let strategy = strategy_with(
            ScriptedConnector::new("demo", "1.0.0").on_hook(|_| panic!("boom")),
        );
        let result = strategy
            .execute(hook_call("demo", HookType::Run), Duration::from_secs(5))
            .await;
        assert!(!result.is_success());
        match result.failure_reason() {
            Some(FailureReason::ConnectorFailure { message }) => assert!(message.contains("boom")),
            other => panic!("unexpected reason {other:?}"),
        }
    }

    #[tokio::test]
    async fn slow_call_times_out() {
        let strategy = strategy_with(
            ScriptedConnector::new("demo", "1.0.0").with_delay(Duration::from_secs(30)),
        );
        let result = strategy
            .execute(hook_call("demo", HookType::Run), Duration::from_millis(50))
            .await;
        assert_eq!(result.failure_reason(), Some(&FailureReason::timeout(50)));
    }

    #[tokio::test]
    async fn panic_does_not_affect_concurrent_calls() {
        let registry = ConnectorRegistry::new();
        registry.register(ScriptedConnector::new("bad", "1.0.0").on_hook(|_| panic!("bad piece")));
        registry.register(ScriptedConnector::new("good", "1.0.0").on_hook(|_| Ok(json!([]))));
        let strategy = ThreadStrategy::new(Arc::new(registry));

        let (bad, good) = tokio::join!(
            strategy.execute(hook_call("bad", HookType::Run), Duration::from_secs(5)),
            strategy.execute(hook_call("good", HookType::Run), Duration::from_secs(5)),
        );
        assert!(!bad.is_success());
        assert!(good.is_success());
    }
}
