//! CLI definitions for the `pwork` binary.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use piecework_observe::LogFormat;
use piecework_types::engine::ExecutionMode;

/// Run connector code for flow triggers and actions.
#[derive(Parser)]
#[command(name = "pwork", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Data directory (defaults to PIECEWORK_DATA_DIR or ~/.piecework).
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Override the configured execution mode.
    #[arg(long, global = true, value_parser = parse_mode)]
    pub execution_mode: Option<ExecutionMode>,

    /// Log output format: pretty or json.
    #[arg(long, global = true, default_value = "pretty", value_parser = parse_format)]
    pub log_format: LogFormat,

    /// Export tracing spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true)]
    pub otel: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Run as a sandbox child: one request on stdin, one result on stdout.
    #[arg(long = "engine-sandbox-exec", hide = true)]
    pub engine_sandbox_exec: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the worker: job intake, webhook receiver and health endpoint.
    Serve {
        /// Port to listen on.
        #[arg(long, default_value = "3000")]
        port: u16,

        /// Host to bind to.
        #[arg(long, default_value = "0.0.0.0")]
        host: String,

        /// Override the configured job concurrency.
        #[arg(long)]
        concurrency: Option<usize>,
    },

    /// Execute one job envelope from a JSON file and print its report.
    Dispatch {
        /// Path to the JobEnvelope JSON file (`-` for stdin).
        file: PathBuf,
    },

    /// Print the resolved configuration.
    Config,
}

impl Cli {
    /// Default tracing directive when RUST_LOG is unset.
    pub fn log_directive(&self) -> &'static str {
        match self.verbose {
            0 if self.quiet => "error",
            0 => "info",
            1 => "info,piecework=debug",
            _ => "trace",
        }
    }
}

fn parse_mode(raw: &str) -> Result<ExecutionMode, String> {
    raw.parse().map_err(|e: piecework_types::error::ConfigError| e.to_string())
}

fn parse_format(raw: &str) -> Result<LogFormat, String> {
    raw.parse()
}

#[cfg(test)]
mod tests {
    use super::*;
    use piecework_infra::sandbox::SANDBOX_EXEC_FLAG;

    #[test]
    fn sandbox_flag_parses_without_subcommand() {
        let cli = Cli::try_parse_from(["pwork", SANDBOX_EXEC_FLAG]).unwrap();
        assert!(cli.engine_sandbox_exec);
        assert!(cli.command.is_none());
    }

    #[test]
    fn serve_with_overrides() {
        let cli = Cli::try_parse_from([
            "pwork",
            "serve",
            "--port",
            "8080",
            "--execution-mode",
            "unsandboxed",
            "-v",
        ])
        .unwrap();
        assert_eq!(cli.execution_mode, Some(ExecutionMode::Unsandboxed));
        assert_eq!(cli.log_directive(), "info,piecework=debug");
        assert!(matches!(cli.command, Some(Commands::Serve { port: 8080, .. })));
    }

    #[test]
    fn unknown_mode_is_rejected() {
        assert!(Cli::try_parse_from(["pwork", "config", "--execution-mode", "docker"]).is_err());
    }
}
