//! piecework worker entry point.
//!
//! Binary name: `pwork`
//!
//! Resolves the configuration, selects the engine runner once for the whole
//! process, then serves the HTTP surface or runs a single job. When started
//! with `--engine-sandbox-exec` it acts as a sandbox child instead.

mod cli;
mod http;
mod state;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{CommandFactory, Parser};
use tokio::io::AsyncReadExt;

use piecework_infra::config::resolve_worker_config;
use piecework_infra::pieces::builtin_registry;
use piecework_infra::sandbox::run_sandbox_child;
use piecework_observe::{LogFormat, init_tracing, shutdown_tracing};
use piecework_types::config::WorkerConfig;
use piecework_types::job::JobEnvelope;

use cli::{Cli, Commands};
use state::WorkerState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.engine_sandbox_exec {
        // stdout belongs to the result; keep child logs terse and on stderr.
        init_tracing(LogFormat::Json, "warn", false)
            .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;
        return run_sandbox_child(Arc::new(builtin_registry())).await;
    }

    let Some(command) = cli.command.as_ref() else {
        Cli::command().print_help()?;
        return Ok(());
    };

    init_tracing(cli.log_format, cli.log_directive(), cli.otel)
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    let data_dir = cli
        .data_dir
        .clone()
        .unwrap_or_else(piecework_infra::config::data_dir);
    let mut config = resolve_worker_config(&data_dir)
        .await
        .context("invalid worker configuration")?;
    if let Some(mode) = cli.execution_mode {
        config.execution_mode = mode;
    }

    let outcome = match command {
        Commands::Serve {
            port,
            host,
            concurrency,
        } => {
            if let Some(concurrency) = concurrency {
                config.concurrency = (*concurrency).max(1);
            }
            serve(config, data_dir, host, *port).await
        }
        Commands::Dispatch { file } => dispatch(config, data_dir, file).await,
        Commands::Config => print_config(&config),
    };

    shutdown_tracing();
    outcome
}

async fn serve(config: WorkerConfig, data_dir: PathBuf, host: &str, port: u16) -> anyhow::Result<()> {
    let state = WorkerState::init(config, data_dir).await?;

    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(
        addr = %addr,
        worker_server_id = %state.config.worker_server_id,
        "worker listening"
    );

    let router = http::router::build_router(state.clone());
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("draining job queue");
    state.pool.shutdown().await;
    Ok(())
}

async fn dispatch(config: WorkerConfig, data_dir: PathBuf, file: &Path) -> anyhow::Result<()> {
    let raw = if file.as_os_str() == "-" {
        let mut raw = String::new();
        tokio::io::stdin()
            .read_to_string(&mut raw)
            .await
            .context("failed to read job envelope from stdin")?;
        raw
    } else {
        tokio::fs::read_to_string(file)
            .await
            .with_context(|| format!("failed to read {}", file.display()))?
    };
    let envelope: JobEnvelope =
        serde_json::from_str(&raw).context("file is not a valid job envelope")?;

    let state = WorkerState::init(config, data_dir).await?;
    let report = state.dispatcher.dispatch(envelope).await;
    state.pool.shutdown().await;

    println!("{}", serde_json::to_string_pretty(&report)?);
    if let Some(reason) = report.result.failure_reason() {
        anyhow::bail!("job {} failed: {reason}", report.request_id);
    }
    Ok(())
}

fn print_config(config: &WorkerConfig) -> anyhow::Result<()> {
    let rendered = toml::to_string_pretty(config).context("failed to render configuration")?;
    print!("{rendered}");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
