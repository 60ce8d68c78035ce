//! Sandboxed isolation strategy: one child process per connector call.
//!
//! Each call gets a fresh child with a cleared environment, its own scratch
//! directory and `kill_on_drop`. On timeout the child is killed and reaped
//! before the result is returned, so no call ever leaves an orphan behind.
//! A semaphore bounds how many children run at once. Stdout is capped at
//! `max_output_bytes` and only the tail of stderr is kept, so a flooding
//! child costs the host a bounded amount of memory.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::sync::Semaphore;
use uuid::Uuid;

use piecework_core::engine::IsolationStrategy;
use piecework_types::config::SandboxSettings;
use piecework_types::engine::{EngineCall, EngineResult, FailureReason};

use super::{SANDBOX_EXEC_FLAG, SandboxError, SandboxPolicy, SandboxRequest};

/// Environment variables the child inherits. Everything else is cleared.
const PASSTHROUGH_ENV: [&str; 2] = ["PATH", "RUST_LOG"];

/// Maximum stderr bytes quoted in an error message.
const STDERR_TAIL: usize = 2_000;

pub struct SubprocessStrategy {
    program: PathBuf,
    args: Vec<String>,
    env: Vec<(String, String)>,
    settings: SandboxSettings,
    permits: Arc<Semaphore>,
}

impl SubprocessStrategy {
    /// Run `program args...` as the sandbox child.
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>, settings: SandboxSettings) -> Self {
        let env = PASSTHROUGH_ENV
            .iter()
            .filter_map(|name| std::env::var(name).ok().map(|value| (name.to_string(), value)))
            .collect();
        let permits = Arc::new(Semaphore::new(settings.max_concurrent.max(1)));
        Self {
            program: program.into(),
            args,
            env,
            settings,
            permits,
        }
    }

    /// Re-execute the running worker binary in sandbox-child mode.
    pub fn for_current_exe(settings: SandboxSettings, data_dir: &Path) -> Result<Self, SandboxError> {
        let program = std::env::current_exe().map_err(SandboxError::CurrentExe)?;
        let mut strategy = Self::new(program, vec![SANDBOX_EXEC_FLAG.to_string()], settings);
        strategy
            .env
            .push(("PIECEWORK_DATA_DIR".to_string(), data_dir.display().to_string()));
        Ok(strategy)
    }

    pub fn settings(&self) -> &SandboxSettings {
        &self.settings
    }

    async fn run(&self, call: EngineCall, timeout: Duration) -> Result<EngineResult, SandboxError> {
        let workspace = std::env::temp_dir().join(format!("piecework-sandbox-{}", Uuid::now_v7()));
        tokio::fs::create_dir_all(&workspace)
            .await
            .map_err(SandboxError::Workspace)?;

        let outcome = self.exchange(&workspace, call, timeout).await;

        if let Err(e) = tokio::fs::remove_dir_all(&workspace).await {
            tracing::debug!(path = %workspace.display(), error = %e, "failed to remove sandbox directory");
        }
        outcome
    }

    async fn exchange(
        &self,
        workspace: &Path,
        call: EngineCall,
        timeout: Duration,
    ) -> Result<EngineResult, SandboxError> {
        let timeout_ms = timeout.as_millis() as u64;
        let request = SandboxRequest {
            call,
            policy: SandboxPolicy {
                readable_paths: self.settings.readable_paths.clone(),
                temp_dir: workspace.to_path_buf(),
                allow_network: self.settings.allow_network,
                max_memory_bytes: self.settings.max_memory_bytes,
            },
            timeout_ms,
        };
        let payload = serde_json::to_vec(&request).map_err(|e| SandboxError::Io(e.into()))?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .env_clear()
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .current_dir(workspace)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(SandboxError::Spawn)?;
        let pid = child.id();

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        // Drained concurrently so a chatty child never blocks on a full stderr pipe.
        let mut stderr_tail = tokio::spawn(read_tail(child.stderr.take(), STDERR_TAIL));
        let output_limit = self.settings.max_output_bytes;

        let io = async {
            if let Some(mut stdin) = stdin {
                // A child that exits without reading its request closes the pipe early.
                if let Err(e) = stdin.write_all(&payload).await {
                    tracing::debug!(pid, error = %e, "sandbox child closed stdin");
                }
            }
            let out = read_capped(stdout, output_limit).await?;
            let status = child.wait().await.map_err(SandboxError::Io)?;
            let err = match (&mut stderr_tail).await {
                Ok(tail) => tail?,
                Err(e) => {
                    tracing::debug!(pid, error = %e, "sandbox stderr reader stopped");
                    Vec::new()
                }
            };
            Ok::<_, SandboxError>((out, err, status))
        };
        let outcome = tokio::time::timeout(timeout, io).await;

        let (stdout, stderr, status) = match outcome {
            Ok(Ok(exchanged)) => exchanged,
            Ok(Err(e)) => {
                stderr_tail.abort();
                kill_and_reap(&mut child, pid).await;
                if let SandboxError::OutputLimit { limit } = &e {
                    tracing::warn!(pid, limit, "sandbox output limit exceeded, child killed");
                }
                return Err(e);
            }
            Err(_) => {
                stderr_tail.abort();
                kill_and_reap(&mut child, pid).await;
                tracing::warn!(pid, timeout_ms, "sandbox timed out, child killed");
                return Ok(EngineResult::failed(FailureReason::timeout(timeout_ms), timeout_ms));
            }
        };

        let stderr = String::from_utf8_lossy(&stderr);
        if !stderr.trim().is_empty() {
            tracing::debug!(pid, stderr = %stderr.trim(), "sandbox child log");
        }
        if !status.success() {
            return Err(SandboxError::Exited {
                status: status.to_string(),
                stderr: tail(stderr.trim(), STDERR_TAIL),
            });
        }

        serde_json::from_slice::<EngineResult>(&stdout).map_err(|e| {
            let raw = String::from_utf8_lossy(&stdout);
            SandboxError::InvalidResponse(format!(
                "{e} (raw: {})",
                raw.chars().take(200).collect::<String>()
            ))
        })
    }
}

impl IsolationStrategy for SubprocessStrategy {
    fn name(&self) -> &'static str {
        "subprocess"
    }

    async fn execute(&self, call: EngineCall, timeout: Duration) -> EngineResult {
        let piece = call.piece().to_string();
        let kind = call.kind_name();

        let Ok(_permit) = Arc::clone(&self.permits).acquire_owned().await else {
            return EngineResult::failed(FailureReason::host("sandbox limiter closed"), 0);
        };

        let started = Instant::now();
        match self.run(call, timeout).await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(piece = %piece, call = kind, error = %e, "sandboxed call failed");
                EngineResult::failed(e.into(), started.elapsed().as_millis() as u64)
            }
        }
    }
}

async fn kill_and_reap(child: &mut Child, pid: Option<u32>) {
    if let Err(e) = child.start_kill() {
        tracing::warn!(pid, error = %e, "failed to kill sandbox child");
    }
    if let Err(e) = child.wait().await {
        tracing::warn!(pid, error = %e, "failed to reap sandbox child");
    }
}

/// Read the whole stream, failing once it exceeds `limit` bytes.
async fn read_capped<R: AsyncRead + Unpin>(
    stream: Option<R>,
    limit: usize,
) -> Result<Vec<u8>, SandboxError> {
    let mut buf = Vec::new();
    if let Some(stream) = stream {
        let mut limited = stream.take((limit as u64).saturating_add(1));
        limited.read_to_end(&mut buf).await.map_err(SandboxError::Io)?;
    }
    if buf.len() > limit {
        return Err(SandboxError::OutputLimit { limit });
    }
    Ok(buf)
}

/// Read the stream to the end, keeping only its last `max` bytes.
async fn read_tail<R: AsyncRead + Unpin>(
    stream: Option<R>,
    max: usize,
) -> Result<Vec<u8>, SandboxError> {
    let mut kept = Vec::with_capacity(max);
    let Some(mut stream) = stream else {
        return Ok(kept);
    };
    let mut chunk = [0u8; 8 * 1024];
    loop {
        let n = stream.read(&mut chunk).await.map_err(SandboxError::Io)?;
        if n == 0 {
            break;
        }
        kept.extend_from_slice(&chunk[..n]);
        if kept.len() > max {
            let excess = kept.len() - max;
            kept.drain(..excess);
        }
    }
    Ok(kept)
}

fn tail(s: &str, max: usize) -> String {
    let start = s.len().saturating_sub(max);
    let start = (start..=s.len()).find(|i| s.is_char_boundary(*i)).unwrap_or(s.len());
    s[start..].to_string()
}
