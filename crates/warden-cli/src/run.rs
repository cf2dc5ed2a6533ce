//! # Run — Execute policies against the inventory database.
//!
//! ```bash
//! warden run aws//cis_v1.2.0 gcp --output-dir results --persist
//! ```
//!
//! Policies are taken from the arguments, or from the config file when no
//! argument is given. A progress line is logged after every check.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use tokio_util::sync::CancellationToken;
use warden_core::{CheckType, ExecutionResult, Update};
use warden_engine::{
    LocalFetcher, PgStorage, PolicyRunner, RunRequest, SqlExecutor, UpdateCallback,
};
use warden_state::{InMemoryStateClient, PgStateClient, StateClient};

use crate::config::WardenConfig;
use crate::{log_diagnostics, resolve_policies};

/// Arguments for `warden run`.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Policy sources with optional selectors, e.g. `aws//cis_v1.2.0`.
    pub policies: Vec<String>,

    /// Record an audit entry for every policy run.
    #[arg(long)]
    pub persist: bool,

    /// Stop a policy at its first failing check.
    #[arg(long)]
    pub stop_on_failure: bool,

    /// Directory bare policy names are resolved in.
    #[arg(long)]
    pub policy_dir: Option<PathBuf>,
}

/// Execute the run subcommand.
pub async fn run_policies(
    args: &RunArgs,
    config: &WardenConfig,
    cancel: CancellationToken,
) -> Result<u8> {
    let policies = resolve_policies(&args.policies, config)?;
    if policies.is_empty() {
        anyhow::bail!("no policies to run: pass policy sources or list them under `policies` in the config file");
    }
    let dsn = config.require_dsn()?;

    let state: Box<dyn StateClient> = if args.persist || config.persist {
        Box::new(
            PgStateClient::connect(dsn)
                .await
                .context("failed to connect to the state database")?,
        )
    } else {
        Box::new(InMemoryStateClient::new())
    };
    let storage = PgStorage::new(dsn);

    let request = RunRequest {
        policies,
        directory: args
            .policy_dir
            .clone()
            .unwrap_or_else(|| config.policy_directory.clone()),
        output_dir: config.output_dir.clone(),
        run_callback: Some(progress_logger()),
        db_persistence: args.persist || config.persist,
        stop_on_failure: args.stop_on_failure,
    };
    tracing::debug!(?request, "starting policy run");

    let runner = PolicyRunner::new(Arc::new(LocalFetcher::new()), Arc::new(SqlExecutor::new()));
    let outcome = runner.run(&cancel, state.as_ref(), &storage, request).await;

    print!("{}", render_summary(&outcome.response.executions));
    log_diagnostics(&outcome.diagnostics);
    if outcome.has_errors() {
        return Err(outcome.diagnostics.into());
    }
    Ok(if outcome.passed() { 0 } else { 1 })
}

fn progress_logger() -> UpdateCallback {
    Arc::new(|update: Update| match &update.error {
        Some(error) => tracing::warn!(
            policy = %update.policy_name,
            version = %update.version,
            error = %error,
            "policy run failed"
        ),
        None => tracing::info!(
            policy = %update.policy_name,
            finished = update.finished_queries,
            total = update.queries_count,
            "progress"
        ),
    })
}

/// Human-readable summary of executed policies.
pub fn render_summary(executions: &[ExecutionResult]) -> String {
    let mut out = String::new();
    for execution in executions {
        let verdict = if execution.passed { "PASSED" } else { "FAILED" };
        out.push_str(&format!("{}: {verdict}\n", execution.policy_name));
        for result in &execution.results {
            let line = match result.check_type {
                CheckType::Manual => format!("  [MANUAL] {}\n", result.name),
                CheckType::Automatic if result.passed => format!("  [PASS]   {}\n", result.name),
                CheckType::Automatic => format!(
                    "  [FAIL]   {} ({} violation{})\n",
                    result.name,
                    result.rows.len(),
                    if result.rows.len() == 1 { "" } else { "s" }
                ),
            };
            out.push_str(&line);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use warden_core::{Check, QueryResult, Row};

    #[test]
    fn summary_marks_each_check() {
        let mut execution = ExecutionResult::new("aws//cis");
        let columns = vec!["id".to_string()];
        let row = |id: &str| Row::from_record(&columns, &[json!(id)], &columns);

        execution.push(QueryResult::manual(&Check::manual("review", "Review IAM")));
        execution.push(QueryResult::automatic(
            &Check::automatic("mfa", "MFA enabled", "SELECT 1"),
            columns.clone(),
            Vec::new(),
        ));
        execution.push(QueryResult::automatic(
            &Check::automatic("public_buckets", "No public buckets", "SELECT 1"),
            columns.clone(),
            vec![row("b-2"), row("b-1")],
        ));

        let summary = render_summary(&[execution]);
        assert_eq!(
            summary,
            "aws//cis: FAILED\n  [MANUAL] review\n  [PASS]   mfa\n  [FAIL]   public_buckets (2 violations)\n"
        );
    }

    #[test]
    fn empty_run_renders_nothing() {
        assert_eq!(render_summary(&[]), "");
    }
}
