//! Worker state wiring all services together.
//!
//! `WorkerState` pins the generic core services to concrete infra
//! implementations: the [`EngineRunner`] chosen from the execution mode and a
//! cursor backend picked from `database_url`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;

use piecework_core::job::{JobDispatcher, PoolSettings, ResultReporter, WorkerPool};
use piecework_core::repository::{CursorStore, InMemoryCursorStore};
use piecework_core::trigger::{
    TriggerCollaborators, TriggerEngineSettings, TriggerHookService, WebhookUrlResolver,
};
use piecework_infra::api_client::{ApiClient, LogOnly};
use piecework_infra::pieces::builtin_registry;
use piecework_infra::runner::EngineRunner;
use piecework_infra::sqlite::{DatabasePool, SqliteCursorStore};
use piecework_types::config::WorkerConfig;
use piecework_types::error::RepositoryError;
use piecework_types::poll::{DedupCursor, VersionedCursor};

pub type ConcreteTriggerService = TriggerHookService<EngineRunner, CursorBackend>;
pub type ConcreteDispatcher = JobDispatcher<EngineRunner, CursorBackend>;

// ---------------------------------------------------------------------------
// CursorBackend
// ---------------------------------------------------------------------------

/// Cursor store selected at startup.
pub enum CursorBackend {
    Sqlite(SqliteCursorStore),
    Memory(InMemoryCursorStore),
}

impl CursorBackend {
    pub fn name(&self) -> &'static str {
        match self {
            CursorBackend::Sqlite(_) => "sqlite",
            CursorBackend::Memory(_) => "memory",
        }
    }
}

impl CursorStore for CursorBackend {
    async fn get(&self, key: &str) -> Result<Option<VersionedCursor>, RepositoryError> {
        match self {
            CursorBackend::Sqlite(store) => store.get(key).await,
            CursorBackend::Memory(store) => store.get(key).await,
        }
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected_version: Option<u64>,
        cursor: &DedupCursor,
    ) -> Result<u64, RepositoryError> {
        match self {
            CursorBackend::Sqlite(store) => store.compare_and_swap(key, expected_version, cursor).await,
            CursorBackend::Memory(store) => store.compare_and_swap(key, expected_version, cursor).await,
        }
    }

    async fn delete(&self, key: &str) -> Result<(), RepositoryError> {
        match self {
            CursorBackend::Sqlite(store) => store.delete(key).await,
            CursorBackend::Memory(store) => store.delete(key).await,
        }
    }
}

// ---------------------------------------------------------------------------
// WorkerState
// ---------------------------------------------------------------------------

/// Shared state for CLI commands and HTTP handlers.
#[derive(Clone)]
pub struct WorkerState {
    pub config: Arc<WorkerConfig>,
    pub runner: Arc<EngineRunner>,
    pub triggers: Arc<ConcreteTriggerService>,
    pub dispatcher: Arc<ConcreteDispatcher>,
    pub pool: Arc<WorkerPool>,
    pub cursor_backend: &'static str,
    pub started_at: Instant,
}

impl WorkerState {
    /// Wire services for `config`. Must be called inside a tokio runtime.
    pub async fn init(config: WorkerConfig, data_dir: PathBuf) -> anyhow::Result<Self> {
        tokio::fs::create_dir_all(&data_dir)
            .await
            .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;

        let registry = Arc::new(builtin_registry());
        let runner = Arc::new(
            EngineRunner::select(config.execution_mode, &config, registry, &data_dir)
                .context("failed to set up the engine runner")?,
        );

        let store = match &config.database_url {
            Some(url) => {
                let pool = DatabasePool::new(url)
                    .await
                    .with_context(|| format!("failed to open cursor database {url}"))?;
                CursorBackend::Sqlite(SqliteCursorStore::new(pool))
            }
            None => {
                tracing::warn!("no database_url configured, dedup cursors are kept in memory");
                CursorBackend::Memory(InMemoryCursorStore::new())
            }
        };
        let cursor_backend = store.name();

        let (reporter, collaborators) = match &config.api_url {
            Some(url) => {
                let client = Arc::new(ApiClient::new(url.clone(), config.worker_server_id.clone()));
                let reporter: Arc<dyn ResultReporter> = client.clone();
                let collaborators = TriggerCollaborators {
                    flow_runs: client.clone(),
                    issues: client,
                };
                (reporter, collaborators)
            }
            None => {
                tracing::warn!("no api_url configured, reports and flow runs are only logged");
                let sink = Arc::new(LogOnly);
                let reporter: Arc<dyn ResultReporter> = sink.clone();
                let collaborators = TriggerCollaborators {
                    flow_runs: sink.clone(),
                    issues: sink,
                };
                (reporter, collaborators)
            }
        };

        let triggers = Arc::new(TriggerHookService::new(
            Arc::clone(&runner),
            Arc::new(store),
            collaborators,
            WebhookUrlResolver::new(config.public_url.clone()),
            TriggerEngineSettings {
                test_sample_size: config.test_sample_size,
                failure_threshold: config.failure_threshold,
            },
        ));

        let dispatcher = Arc::new(JobDispatcher::new(
            Arc::clone(&runner),
            Arc::clone(&triggers),
            reporter,
            Duration::from_secs(config.default_timeout_secs),
        ));

        let pool = Arc::new(WorkerPool::start(
            Arc::clone(&dispatcher),
            PoolSettings::new(config.concurrency),
        ));

        tracing::info!(
            worker_server_id = %config.worker_server_id,
            execution_mode = %runner.mode(),
            cursor_backend,
            "worker state initialized"
        );

        Ok(Self {
            config: Arc::new(config),
            runner,
            triggers,
            dispatcher,
            pool,
            cursor_backend,
            started_at: Instant::now(),
        })
    }

    /// Call budget for webhook deliveries.
    pub fn webhook_timeout(&self) -> Duration {
        Duration::from_secs(self.config.default_timeout_secs)
    }
}
