//! Worker configuration types.
//!
//! `WorkerConfig` represents `worker.toml` in the data directory. Every field
//! has a default except that an explicitly configured `execution_mode` must
//! name a known mode.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::engine::ExecutionMode;

/// Top-level configuration for one worker process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Isolation policy. Resolved once at startup.
    #[serde(default = "default_execution_mode")]
    pub execution_mode: ExecutionMode,

    /// Identity used to address result reports back to this worker.
    #[serde(default = "default_worker_server_id")]
    pub worker_server_id: String,

    /// Externally reachable base URL used to build webhook URLs.
    #[serde(default = "default_public_url")]
    pub public_url: String,

    /// Base URL of the platform API. Reports are only logged when unset.
    #[serde(default)]
    pub api_url: Option<String>,

    /// Maximum number of jobs executing at once.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Wall-clock budget for one connector call when the job does not override it.
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,

    #[serde(default)]
    pub sandbox: SandboxSettings,

    /// Pieces that run sandboxed under `SANDBOX_CODE_ONLY`.
    #[serde(default = "default_code_pieces")]
    pub code_pieces: Vec<String>,

    /// Consecutive failures before a trigger issue is raised.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Number of items returned by `Test` on polling triggers.
    #[serde(default = "default_test_sample_size")]
    pub test_sample_size: usize,

    /// SQLite URL for the cursor store. In-memory store when unset.
    #[serde(default)]
    pub database_url: Option<String>,
}

/// Limits applied to sandboxed executions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxSettings {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Extra paths the sandbox child may read.
    #[serde(default)]
    pub readable_paths: Vec<PathBuf>,
    #[serde(default = "default_allow_network")]
    pub allow_network: bool,
    /// Bytes a child may write to stdout before it is killed.
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
    /// Address-space limit applied inside the child. 0 leaves it unlimited.
    #[serde(default = "default_max_memory_bytes")]
    pub max_memory_bytes: u64,
}

fn default_execution_mode() -> ExecutionMode {
    ExecutionMode::Sandboxed
}

fn default_worker_server_id() -> String {
    "worker-local".to_string()
}

fn default_public_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_concurrency() -> usize {
    8
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_code_pieces() -> Vec<String> {
    vec!["code".to_string()]
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_test_sample_size() -> usize {
    5
}

fn default_max_concurrent() -> usize {
    4
}

fn default_allow_network() -> bool {
    true
}

fn default_max_output_bytes() -> usize {
    16 * 1024 * 1024
}

fn default_max_memory_bytes() -> u64 {
    1024 * 1024 * 1024
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            execution_mode: default_execution_mode(),
            worker_server_id: default_worker_server_id(),
            public_url: default_public_url(),
            api_url: None,
            concurrency: default_concurrency(),
            default_timeout_secs: default_timeout_secs(),
            sandbox: SandboxSettings::default(),
            code_pieces: default_code_pieces(),
            failure_threshold: default_failure_threshold(),
            test_sample_size: default_test_sample_size(),
            database_url: None,
        }
    }
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            readable_paths: Vec::new(),
            allow_network: default_allow_network(),
            max_output_bytes: default_max_output_bytes(),
            max_memory_bytes: default_max_memory_bytes(),
        }
    }
}
