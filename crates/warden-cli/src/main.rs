//! # warden CLI entry point
//!
//! Parses command-line arguments, loads configuration, initialises tracing,
//! and dispatches to subcommand handlers.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use warden_cli::config::WardenConfig;
use warden_cli::describe::{run_describe, DescribeArgs};
use warden_cli::prune::{run_prune, PruneArgs};
use warden_cli::run::{run_policies, RunArgs};
use warden_cli::shutdown_token;
use warden_cli::snapshot::{run_snapshot, SnapshotArgs};

/// Compliance policies as SQL over your cloud inventory.
///
/// Loads policy trees from local files or the policy hub directory,
/// executes their checks against a Postgres inventory, and reports
/// violations.
#[derive(Parser, Debug)]
#[command(name = "warden", version, about, long_about = None)]
struct Cli {
    /// Enable verbose output. Repeat for more verbosity (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    /// Path to configuration file. Defaults to `warden.yml` if present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output directory for execution results.
    #[arg(long, global = true)]
    output_dir: Option<PathBuf>,

    /// Database connection string. Overrides config and environment.
    #[arg(long, global = true)]
    dsn: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Execute policies and report violations.
    Run(RunArgs),

    /// List the selectable paths of a policy.
    Describe(DescribeArgs),

    /// Capture the tables a check reads as regression fixtures.
    Snapshot(SnapshotArgs),

    /// Delete old policy execution audit records.
    Prune(PruneArgs),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    tracing::debug!("warden CLI v{} starting", env!("CARGO_PKG_VERSION"));

    let mut config = match WardenConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("{e:#}");
            return ExitCode::from(1);
        }
    };
    if let Some(dir) = cli.output_dir {
        config.output_dir = Some(dir);
    }
    if let Some(dsn) = cli.dsn {
        config.dsn = Some(dsn);
    }
    tracing::debug!(?config, "resolved configuration");

    let cancel = shutdown_token();
    let result = match &cli.command {
        Commands::Run(args) => run_policies(args, &config, cancel).await,
        Commands::Describe(args) => run_describe(args, &config, cancel).await,
        Commands::Snapshot(args) => run_snapshot(args, &config, cancel).await,
        Commands::Prune(args) => run_prune(args, &config).await,
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::from(1)
        }
    }
}

/// Verbosity flags pick the level unless `RUST_LOG` is set.
fn init_tracing(verbose: u8, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| match verbose {
        0 => EnvFilter::new("warn"),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    });

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
