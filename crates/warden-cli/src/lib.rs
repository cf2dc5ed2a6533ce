//! # warden-cli — Command-Line Interface for warden
//!
//! Provides the `warden` binary. Each subcommand lives in its own module
//! with a clap `Args` struct and an async handler returning the process
//! exit code.
//!
//! ## Subcommands
//!
//! - `warden run`: Load, filter, and execute policies against the database.
//! - `warden describe`: List the selectable paths of a policy tree.
//! - `warden snapshot`: Capture the tables a check reads as test fixtures.
//! - `warden prune`: Delete old audit records.
//!
//! ```bash
//! warden run aws//cis_v1.2.0 --output-dir results
//! warden describe ./policies/aws.yml
//! warden snapshot aws//cis_v1.2.0/1.1 fixtures
//! warden prune --retention-days 90
//! ```
//!
//! ## Exit Codes
//!
//! `0` when every policy passed, `1` when a check reported violations or an
//! operational error aborted the run.
//!
//! ## Crate Policy
//!
//! - Library crates report through `Diagnostics`; this crate converts them
//!   to `anyhow` errors at the handler boundary.
//! - Tracing is initialised only in `main`.

pub mod config;
pub mod describe;
pub mod prune;
pub mod run;
pub mod snapshot;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use warden_core::{Diagnostics, Policies, Severity};
use warden_engine::{parse_and_detect, LocalFetcher, PolicyLoader};

use crate::config::WardenConfig;

/// Policies named on the command line, or the configured ones when none are.
pub fn resolve_policies(args: &[String], config: &WardenConfig) -> Result<Policies, Diagnostics> {
    if args.is_empty() {
        return Ok(config.configured_policies());
    }
    let mut policies = Vec::with_capacity(args.len());
    let mut diags = Diagnostics::new();
    for arg in args {
        match parse_and_detect(arg) {
            Ok(policy) => policies.push(policy),
            Err(diag) => diags.push(diag),
        }
    }
    if diags.has_errors() {
        return Err(diags);
    }
    Ok(policies)
}

/// A loader reading definitions from the local filesystem.
pub fn local_loader() -> PolicyLoader {
    PolicyLoader::new(Arc::new(LocalFetcher::new()))
}

/// A token cancelled on the first Ctrl-C.
pub fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling");
            trigger.cancel();
        }
    });
    token
}

/// Log non-error diagnostics. Errors are returned to `main` instead.
pub fn log_diagnostics(diags: &Diagnostics) {
    for diag in diags {
        match diag.severity {
            Severity::Error => {}
            Severity::Warning => tracing::warn!(kind = %diag.kind, "{diag}"),
            Severity::Info => tracing::info!(kind = %diag.kind, "{diag}"),
        }
    }
}
