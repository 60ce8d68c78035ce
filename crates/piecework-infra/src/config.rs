//! Worker configuration loader.
//!
//! Reads `worker.toml` from the data directory (`~/.piecework/` by default)
//! into [`WorkerConfig`], then applies `PIECEWORK_*` environment overrides.
//! A missing or malformed file falls back to defaults with a warning, keeping
//! an explicitly configured `execution_mode`. An unrecognized
//! `execution_mode` is a fatal [`ConfigError`]: the worker never guesses an
//! isolation policy.

use std::path::{Path, PathBuf};

use piecework_types::config::WorkerConfig;
use piecework_types::engine::ExecutionMode;
use piecework_types::error::ConfigError;

pub const CONFIG_FILE: &str = "worker.toml";

/// `PIECEWORK_DATA_DIR`, falling back to `~/.piecework`.
pub fn data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("PIECEWORK_DATA_DIR") {
        return PathBuf::from(dir);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".piecework")
}

/// Load `{data_dir}/worker.toml`.
pub async fn load_worker_config(data_dir: &Path) -> Result<WorkerConfig, ConfigError> {
    let config_path = data_dir.join(CONFIG_FILE);

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No {CONFIG_FILE} found at {}, using defaults", config_path.display());
            return Ok(WorkerConfig::default());
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", config_path.display());
            return Ok(WorkerConfig::default());
        }
    };

    parse_worker_config(&content, &config_path)
}

fn parse_worker_config(content: &str, origin: &Path) -> Result<WorkerConfig, ConfigError> {
    match toml::from_str::<WorkerConfig>(content) {
        Ok(config) => Ok(config),
        Err(err) => {
            // An explicit execution mode survives the fallback; a bad one is fatal.
            let mut config = WorkerConfig::default();
            if let Ok(table) = toml::from_str::<toml::Table>(content)
                && let Some(mode) = table.get("execution_mode")
            {
                let raw = mode.as_str().map(str::to_string).unwrap_or_else(|| mode.to_string());
                config.execution_mode = raw.parse::<ExecutionMode>()?;
            }
            tracing::warn!(
                execution_mode = %config.execution_mode,
                "Failed to parse {}: {err}, using defaults",
                origin.display()
            );
            Ok(config)
        }
    }
}

/// Apply `PIECEWORK_*` overrides. `lookup` is `std::env::var` outside tests.
pub fn apply_env_overrides<F>(config: &mut WorkerConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(mode) = lookup("PIECEWORK_EXECUTION_MODE") {
        config.execution_mode = mode.parse()?;
    }
    if let Some(url) = lookup("PIECEWORK_PUBLIC_URL") {
        config.public_url = url;
    }
    if let Some(url) = lookup("PIECEWORK_API_URL") {
        config.api_url = (!url.trim().is_empty()).then_some(url);
    }
    if let Some(id) = lookup("PIECEWORK_WORKER_ID") {
        config.worker_server_id = id;
    }
    if let Some(raw) = lookup("PIECEWORK_CONCURRENCY") {
        config.concurrency = match raw.trim().parse::<usize>() {
            Ok(n) if n > 0 => n,
            _ => {
                return Err(ConfigError::InvalidValue {
                    field: "PIECEWORK_CONCURRENCY".to_string(),
                    message: format!("expected a positive integer, got '{raw}'"),
                });
            }
        };
    }
    Ok(())
}

/// File, then environment.
pub async fn resolve_worker_config(data_dir: &Path) -> Result<WorkerConfig, ConfigError> {
    let mut config = load_worker_config(data_dir).await?;
    apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;
    Ok(config)
}
