//! Sandbox child entry point (`pwork --engine-sandbox-exec`).
//!
//! Reads one `SandboxRequest` from stdin, applies the sandbox policy, runs the
//! call against the built-in connector registry and writes one `EngineResult`
//! to stdout. Stdout carries nothing else.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use piecework_core::connector::ConnectorRegistry;
use piecework_core::engine::{IsolationStrategy, ThreadStrategy};
use piecework_types::engine::{EngineResult, FailureReason};

use super::{SandboxPolicy, SandboxRequest};

/// Run one sandboxed call. Returns an error only when stdin/stdout fail.
pub async fn run_sandbox_child(registry: Arc<ConnectorRegistry>) -> anyhow::Result<()> {
    let mut input = String::new();
    tokio::io::stdin()
        .read_to_string(&mut input)
        .await
        .context("failed to read sandbox request from stdin")?;

    let result = match serde_json::from_str::<SandboxRequest>(&input) {
        Ok(request) => execute_request(registry, request).await,
        Err(e) => EngineResult::failed(
            FailureReason::host(format!("invalid sandbox request: {e}")),
            0,
        ),
    };

    let output = serde_json::to_vec(&result).context("failed to serialize sandbox result")?;
    let mut stdout = tokio::io::stdout();
    stdout
        .write_all(&output)
        .await
        .context("failed to write sandbox result")?;
    stdout.flush().await.context("failed to flush sandbox result")?;
    Ok(())
}

async fn execute_request(registry: Arc<ConnectorRegistry>, request: SandboxRequest) -> EngineResult {
    if let Err(e) = restrict(&request.policy) {
        tracing::error!(error = %e, "failed to apply sandbox policy");
        return EngineResult::failed(
            FailureReason::host(format!("sandbox setup failed: {e:#}")),
            0,
        );
    }

    // Panics stay inside the task; the parent enforces the hard deadline.
    ThreadStrategy::new(registry)
        .execute(request.call, Duration::from_millis(request.timeout_ms))
        .await
}

#[cfg(target_os = "linux")]
fn restrict(policy: &SandboxPolicy) -> anyhow::Result<()> {
    super::linux::apply_landlock(policy)?;
    super::linux::apply_memory_limit(policy)
}

#[cfg(not(target_os = "linux"))]
fn restrict(policy: &SandboxPolicy) -> anyhow::Result<()> {
    tracing::warn!(
        temp_dir = %policy.temp_dir.display(),
        max_memory_bytes = policy.max_memory_bytes,
        "no OS-level sandbox on this platform, relying on process isolation and the output cap only"
    );
    Ok(())
}
