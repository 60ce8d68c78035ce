//! Subprocess sandbox for connector code.
//!
//! The worker binary re-executes itself as `pwork --engine-sandbox-exec`.
//! The parent writes one [`SandboxRequest`] to the child's stdin and reads one
//! `EngineResult` from its stdout; logs go to stderr. The child restricts
//! itself (Landlock on Linux) before any connector code runs, so the host
//! process is never restricted.
//!
//! - `subprocess` -- parent side, the `SubprocessStrategy`
//! - `child` -- child entry point
//! - `linux` -- Landlock rules (Linux only)

pub mod child;
#[cfg(target_os = "linux")]
pub mod linux;
pub mod subprocess;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use piecework_types::engine::{EngineCall, FailureReason};

pub use child::run_sandbox_child;
pub use subprocess::SubprocessStrategy;

/// Flag that switches the worker binary into sandbox-child mode.
pub const SANDBOX_EXEC_FLAG: &str = "--engine-sandbox-exec";

/// Filesystem and network policy the child applies to itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxPolicy {
    pub readable_paths: Vec<PathBuf>,
    /// Scratch directory, readable and writable.
    pub temp_dir: PathBuf,
    pub allow_network: bool,
    /// Address-space limit in bytes, 0 for none.
    #[serde(default)]
    pub max_memory_bytes: u64,
}

/// JSON protocol for subprocess communication via stdin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxRequest {
    pub call: EngineCall,
    pub policy: SandboxPolicy,
    /// Budget for the in-child call. The parent enforces the hard limit.
    pub timeout_ms: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("failed to locate worker executable: {0}")]
    CurrentExe(std::io::Error),

    #[error("failed to prepare sandbox directory: {0}")]
    Workspace(std::io::Error),

    #[error("failed to spawn sandbox process: {0}")]
    Spawn(std::io::Error),

    #[error("sandbox process I/O failed: {0}")]
    Io(std::io::Error),

    #[error("sandbox exited with {status}: {stderr}")]
    Exited { status: String, stderr: String },

    #[error("invalid sandbox response: {0}")]
    InvalidResponse(String),

    #[error("sandbox output limit exceeded ({limit} bytes)")]
    OutputLimit { limit: usize },
}

impl From<SandboxError> for FailureReason {
    fn from(err: SandboxError) -> Self {
        match err {
            // The child ran connector code and died or spoke garbage.
            SandboxError::Exited { .. }
            | SandboxError::InvalidResponse(_)
            | SandboxError::OutputLimit { .. } => {
                FailureReason::connector(err.to_string())
            }
            SandboxError::CurrentExe(_)
            | SandboxError::Workspace(_)
            | SandboxError::Spawn(_)
            | SandboxError::Io(_) => FailureReason::host(err.to_string()),
        }
    }
}
