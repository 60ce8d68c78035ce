//! IsolationStrategy trait definition.

use std::time::Duration;

use piecework_types::engine::{EngineCall, EngineResult};

/// Executes one connector call inside an execution boundary.
///
/// Implementations must never propagate a connector panic or error to the
/// caller: every call yields exactly one [`EngineResult`], and a call that
/// outlives `timeout` yields `FailureReason::ExecutionTimeout`.
///
/// The in-process implementation is [`ThreadStrategy`](super::thread::ThreadStrategy);
/// the subprocess sandbox lives in piecework-infra.
pub trait IsolationStrategy: Send + Sync {
    /// Short strategy name for logs and health output.
    fn name(&self) -> &'static str;

    fn execute(
        &self,
        call: EngineCall,
        timeout: Duration,
    ) -> impl std::future::Future<Output = EngineResult> + Send;
}
