//! Engine runner: the one place sandboxing policy is decided.
//!
//! [`EngineRunner::select`] is called once at worker start with the resolved
//! [`ExecutionMode`]; the returned runner is then passed explicitly to the
//! dispatcher and the trigger engine for the lifetime of the process.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use piecework_core::connector::ConnectorRegistry;
use piecework_core::engine::{IsolationStrategy, ThreadStrategy};
use piecework_types::config::WorkerConfig;
use piecework_types::engine::{EngineCall, EngineResult, ExecutionMode};

use crate::sandbox::{SandboxError, SubprocessStrategy};

pub enum EngineRunner {
    /// Every call in-process.
    Thread(ThreadStrategy),
    /// Every call in a sandbox child.
    Sandboxed(SubprocessStrategy),
    /// Code pieces sandboxed, everything else in-process.
    SandboxCodeOnly {
        thread: ThreadStrategy,
        sandbox: SubprocessStrategy,
        code_pieces: HashSet<String>,
    },
}

impl EngineRunner {
    /// Build the runner for `mode`. Sandboxed modes re-execute the current binary.
    pub fn select(
        mode: ExecutionMode,
        config: &WorkerConfig,
        registry: Arc<ConnectorRegistry>,
        data_dir: &Path,
    ) -> Result<Self, SandboxError> {
        let sandbox = || SubprocessStrategy::for_current_exe(config.sandbox.clone(), data_dir);
        Self::assemble(mode, config, registry, sandbox)
    }

    fn assemble<F>(
        mode: ExecutionMode,
        config: &WorkerConfig,
        registry: Arc<ConnectorRegistry>,
        sandbox: F,
    ) -> Result<Self, SandboxError>
    where
        F: FnOnce() -> Result<SubprocessStrategy, SandboxError>,
    {
        let runner = match mode {
            ExecutionMode::Unsandboxed => EngineRunner::Thread(ThreadStrategy::new(registry)),
            ExecutionMode::Sandboxed => EngineRunner::Sandboxed(sandbox()?),
            ExecutionMode::SandboxCodeOnly => EngineRunner::SandboxCodeOnly {
                thread: ThreadStrategy::new(registry),
                sandbox: sandbox()?,
                code_pieces: config.code_pieces.iter().cloned().collect(),
            },
        };
        tracing::info!(mode = %mode, strategy = runner.name(), "engine runner selected");
        Ok(runner)
    }

    pub fn mode(&self) -> ExecutionMode {
        match self {
            EngineRunner::Thread(_) => ExecutionMode::Unsandboxed,
            EngineRunner::Sandboxed(_) => ExecutionMode::Sandboxed,
            EngineRunner::SandboxCodeOnly { .. } => ExecutionMode::SandboxCodeOnly,
        }
    }
}

impl IsolationStrategy for EngineRunner {
    fn name(&self) -> &'static str {
        match self {
            EngineRunner::Thread(thread) => thread.name(),
            EngineRunner::Sandboxed(sandbox) => sandbox.name(),
            EngineRunner::SandboxCodeOnly { .. } => "sandbox-code-only",
        }
    }

    async fn execute(&self, call: EngineCall, timeout: Duration) -> EngineResult {
        match self {
            EngineRunner::Thread(thread) => thread.execute(call, timeout).await,
            EngineRunner::Sandboxed(sandbox) => sandbox.execute(call, timeout).await,
            EngineRunner::SandboxCodeOnly {
                thread,
                sandbox,
                code_pieces,
            } => {
                if code_pieces.contains(&call.piece().name) {
                    sandbox.execute(call, timeout).await
                } else {
                    thread.execute(call, timeout).await
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pieces::builtin_registry;
    use piecework_types::config::SandboxSettings;
    use piecework_types::job::PieceRef;

    fn fake_sandbox() -> Result<SubprocessStrategy, SandboxError> {
        // Answers every call with a fixed marker so routing is observable.
        Ok(SubprocessStrategy::new(
            "/bin/sh",
            vec![
                "-c".to_string(),
                r#"cat > /dev/null; printf '{"success":true,"output":"sandboxed"}'"#.to_string(),
            ],
            SandboxSettings::default(),
        ))
    }

    fn metadata_call(piece: &str) -> EngineCall {
        EngineCall::ExtractPieceMetadata {
            piece: PieceRef::new(piece, "*"),
        }
    }

    #[test]
    fn each_mode_selects_its_strategy() {
        let config = WorkerConfig::default();
        let registry = Arc::new(builtin_registry());

        let runner = EngineRunner::assemble(
            ExecutionMode::Unsandboxed,
            &config,
            Arc::clone(&registry),
            fake_sandbox,
        )
        .unwrap();
        assert_eq!(runner.mode(), ExecutionMode::Unsandboxed);
        assert_eq!(runner.name(), "thread");

        let runner =
            EngineRunner::assemble(ExecutionMode::Sandboxed, &config, Arc::clone(&registry), fake_sandbox)
                .unwrap();
        assert_eq!(runner.name(), "subprocess");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn code_only_mode_routes_by_piece_name() {
        let config = WorkerConfig {
            code_pieces: vec!["code".to_string()],
            ..WorkerConfig::default()
        };
        let runner = EngineRunner::assemble(
            ExecutionMode::SandboxCodeOnly,
            &config,
            Arc::new(builtin_registry()),
            fake_sandbox,
        )
        .unwrap();

        let in_process = runner
            .execute(metadata_call("catch-webhook"), Duration::from_secs(5))
            .await;
        assert_eq!(in_process.output().unwrap()["name"], "catch-webhook");

        let sandboxed = runner
            .execute(metadata_call("code"), Duration::from_secs(5))
            .await;
        assert_eq!(sandboxed.output(), Some(&serde_json::json!("sandboxed")));
    }
}
