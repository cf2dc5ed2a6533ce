//! # Run Orchestration
//!
//! [`PolicyRunner::run`] executes a batch of policies strictly in request
//! order. For each policy it:
//!
//! 1. Loads the policy tree.
//! 2. Records an audit entry, when persistence is enabled.
//! 3. Filters the tree by the policy's selector.
//! 4. Emits an initial progress update with the number of automatic checks.
//! 5. Opens a session and hands the subset to the executor.
//! 6. Collects the result.
//! 7. Writes the result file, when an output directory is set.
//!
//! Any error-severity diagnostic aborts the rest of the batch. The outcome
//! always carries the policies loaded and the results collected before the
//! abort, next to the aggregated diagnostics.

use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use warden_core::{
    filter, Diagnostic, DiagnosticKind, Diagnostics, ExecutionResult, Policies, PolicyExecution,
    Timestamp,
};
use warden_state::StateClient;

use crate::executor::{ExecuteRequest, PolicyExecutor};
use crate::fetch::SourceFetcher;
use crate::loader::PolicyLoader;
use crate::output::write_execution_result;
use crate::progress::{ProgressTracker, UpdateCallback};
use crate::session::Storage;

/// A batch of policies to run.
#[derive(Clone, Default)]
pub struct RunRequest {
    pub policies: Policies,
    /// Hub directory bare policy names resolve in.
    pub directory: PathBuf,
    /// Write one JSON result file per policy here, if set.
    pub output_dir: Option<PathBuf>,
    pub run_callback: Option<UpdateCallback>,
    /// Record an audit entry per policy before it runs.
    pub db_persistence: bool,
    pub stop_on_failure: bool,
}

impl std::fmt::Debug for RunRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunRequest")
            .field("policies", &self.policies.len())
            .field("directory", &self.directory)
            .field("output_dir", &self.output_dir)
            .field("db_persistence", &self.db_persistence)
            .field("stop_on_failure", &self.stop_on_failure)
            .finish_non_exhaustive()
    }
}

/// What completed, in request order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunResponse {
    /// Loaded policy trees.
    pub policies: Policies,
    pub executions: Vec<ExecutionResult>,
}

/// A response paired with the diagnostics gathered while producing it.
#[derive(Debug, Clone, Default)]
pub struct RunOutcome {
    pub response: RunResponse,
    pub diagnostics: Diagnostics,
}

impl RunOutcome {
    pub fn has_errors(&self) -> bool {
        self.diagnostics.has_errors()
    }

    /// Whether every executed policy passed and nothing went wrong.
    pub fn passed(&self) -> bool {
        !self.has_errors() && self.response.executions.iter().all(|e| e.passed)
    }
}

/// Loads, filters, and executes policies.
#[derive(Clone)]
pub struct PolicyRunner {
    loader: PolicyLoader,
    executor: Arc<dyn PolicyExecutor>,
}

impl std::fmt::Debug for PolicyRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyRunner").finish_non_exhaustive()
    }
}

impl PolicyRunner {
    pub fn new(fetcher: Arc<dyn SourceFetcher>, executor: Arc<dyn PolicyExecutor>) -> Self {
        Self {
            loader: PolicyLoader::new(fetcher),
            executor,
        }
    }

    pub fn loader(&self) -> &PolicyLoader {
        &self.loader
    }

    /// Run every policy of `request` in order.
    pub async fn run(
        &self,
        cancel: &CancellationToken,
        state: &dyn StateClient,
        storage: &dyn Storage,
        request: RunRequest,
    ) -> RunOutcome {
        let mut outcome = RunOutcome::default();

        for policy in &request.policies {
            if cancel.is_cancelled() {
                outcome.diagnostics.push(Diagnostic::error(
                    DiagnosticKind::Internal,
                    "policy run cancelled",
                ));
                break;
            }
            if !self.run_one(cancel, state, storage, &request, policy.clone(), &mut outcome).await {
                break;
            }
        }

        tracing::info!(
            executed = outcome.response.executions.len(),
            requested = request.policies.len(),
            errors = outcome.diagnostics.errors().count(),
            "policy run finished"
        );
        outcome
    }

    // Returns false when the batch must stop.
    async fn run_one(
        &self,
        cancel: &CancellationToken,
        state: &dyn StateClient,
        storage: &dyn Storage,
        request: &RunRequest,
        policy: warden_core::Policy,
        outcome: &mut RunOutcome,
    ) -> bool {
        let requested_name = policy.name.clone();
        tracing::info!(policy = %requested_name, selector = %policy.sub_policy(), "loading policy");

        let loaded = match self.loader.load(cancel, &request.directory, policy).await {
            Ok(p) => p,
            Err(diags) => {
                tracing::error!(policy = %requested_name, "failed to load policy");
                outcome.diagnostics.append(diags);
                return false;
            }
        };
        outcome.response.policies.push(loaded.clone());

        let selector = loaded.sub_policy();
        let version = loaded.version();
        let source = loaded.source.clone().unwrap_or_default();

        if request.db_persistence {
            let record = PolicyExecution::for_policy(&loaded, &selector);
            if let Err(e) = state.create_policy_execution(record).await {
                tracing::error!(policy = %loaded.name, error = %e, "failed to record policy execution");
                outcome.diagnostics.push(
                    Diagnostic::from_error(DiagnosticKind::Database, &e)
                        .with_context(format!("failed to record execution of {}", loaded.name)),
                );
                return false;
            }
        }

        let subset = filter(&loaded, &selector);
        if let Err(diag) = subset.ensure_checks() {
            tracing::error!(
                policy = %loaded.name,
                selector = %selector,
                available = ?subset.available(),
                "policy or query not found"
            );
            outcome.diagnostics.push(diag);
            return false;
        }

        let total = subset.total_queries();
        let name = subset.qualified_name();
        tracing::info!(policy = %name, version = %version, selector = %selector, checks = total, "running policy");

        let progress = ProgressTracker::new(
            name.clone(),
            source,
            version.clone(),
            total,
            request.run_callback.clone(),
        );
        progress.start();

        let mut session = match storage.connect().await {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(policy = %name, error = %e, "failed to open database session");
                progress.fail(e.to_string());
                outcome.diagnostics.push(
                    Diagnostic::from_error(DiagnosticKind::Database, &e)
                        .with_context("failed to open database session"),
                );
                return false;
            }
        };

        let exec_request = ExecuteRequest {
            policy_name: name.clone(),
            stop_on_failure: request.stop_on_failure,
        };
        let (result, diags) = self
            .executor
            .execute(cancel, session.as_mut(), &exec_request, &subset, &progress)
            .await;

        if let Err(e) = session.close().await {
            tracing::warn!(policy = %name, error = %e, "failed to close database session");
            outcome.diagnostics.push(
                Diagnostic::warning(DiagnosticKind::Database, e.to_string())
                    .with_context("failed to close database session"),
            );
        }

        let failed = diags.has_errors();
        outcome.diagnostics.append(diags);
        if failed {
            tracing::error!(policy = %name, version = %version, "policy execution failed");
            return false;
        }

        tracing::info!(
            policy = %name,
            passed = result.passed,
            failed_checks = result.failed_checks(),
            "policy executed"
        );

        if let Some(dir) = &request.output_dir {
            if let Err(e) = write_execution_result(&result, dir).await {
                tracing::error!(policy = %name, error = %e, "failed to write execution result");
                outcome.response.executions.push(result);
                outcome.diagnostics.push(
                    Diagnostic::from_error(DiagnosticKind::Internal, &e)
                        .with_context(format!("failed to write result of {name}")),
                );
                return false;
            }
        }

        outcome.response.executions.push(result);
        true
    }

    /// Delete audit records older than `cutoff`.
    pub async fn prune(&self, state: &dyn StateClient, cutoff: Timestamp) -> Result<u64, Diagnostics> {
        prune(state, cutoff).await
    }
}

/// Delete audit records with a timestamp strictly before `cutoff`.
pub async fn prune(state: &dyn StateClient, cutoff: Timestamp) -> Result<u64, Diagnostics> {
    match state.prune_policy_executions(cutoff).await {
        Ok(removed) => {
            tracing::info!(cutoff = %cutoff, removed, "pruned policy executions");
            Ok(removed)
        }
        Err(e) => {
            tracing::error!(cutoff = %cutoff, error = %e, "failed to prune policy executions");
            Err(Diagnostic::from_error(DiagnosticKind::Database, &e)
                .with_context("failed to prune policy executions")
                .into())
        }
    }
}
