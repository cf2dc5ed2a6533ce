//! # Check Execution
//!
//! A [`PolicyExecutor`] runs the checks of a filtered policy inside one
//! session and reports an [`ExecutionResult`] together with any
//! [`Diagnostics`].
//!
//! [`SqlExecutor`] is the shipped implementation:
//!
//! 1. Creates the views carried by the subset as temporary views.
//! 2. Walks the matched branch depth-first, own checks before sub-policies.
//! 3. Records manual checks without running them.
//! 4. Runs each automatic check, racing it against cancellation, and turns
//!    the returned records into sorted [`Row`]s.
//! 5. Advances the progress tracker by one per automatic check.
//!
//! A failing query stops the walk: the result carries the error, and a
//! database diagnostic is returned. Rows returned by a query are violations,
//! not errors.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use warden_core::{
    Check, Diagnostic, DiagnosticKind, Diagnostics, ExecutionResult, Policy, PolicySubset,
    QueryResult, Row, View,
};

use crate::progress::ProgressTracker;
use crate::session::{Session, SessionError};

/// Identifier column used when a policy declares none.
pub const DEFAULT_IDENTIFIER: &str = "id";

/// Per-run execution options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecuteRequest {
    pub policy_name: String,
    /// Stop after the first automatic check that reports violations.
    pub stop_on_failure: bool,
}

#[async_trait]
pub trait PolicyExecutor: Send + Sync {
    async fn execute(
        &self,
        cancel: &CancellationToken,
        session: &mut dyn Session,
        request: &ExecuteRequest,
        subset: &PolicySubset,
        progress: &ProgressTracker,
    ) -> (ExecutionResult, Diagnostics);
}

/// Create (or replace) `views` as temporary views in `session`.
pub async fn create_views(session: &mut dyn Session, views: &[View]) -> Result<(), SessionError> {
    for view in views {
        tracing::debug!(view = %view.name, "creating view");
        let query = view.query.trim().trim_end_matches(';');
        session
            .execute(&format!(
                "CREATE OR REPLACE TEMPORARY VIEW {} AS {}",
                view.name, query
            ))
            .await?;
    }
    Ok(())
}

/// Runs checks as SQL through a [`Session`].
#[derive(Debug, Clone, Default)]
pub struct SqlExecutor;

impl SqlExecutor {
    pub fn new() -> Self {
        Self
    }
}

struct PlannedCheck<'a> {
    check: &'a Check,
    /// Name qualified by its path below the matched node.
    name: String,
    identifiers: &'a [String],
}

fn plan<'a>(policy: &'a Policy, prefix: &str, identifiers: &'a [String], out: &mut Vec<PlannedCheck<'a>>) {
    let identifiers: &'a [String] = if policy.identifiers.is_empty() {
        identifiers
    } else {
        &policy.identifiers
    };
    for check in &policy.checks {
        let name = if prefix.is_empty() {
            check.name.clone()
        } else {
            format!("{prefix}/{}", check.name)
        };
        out.push(PlannedCheck {
            check,
            name,
            identifiers,
        });
    }
    for child in &policy.policies {
        let child_prefix = if prefix.is_empty() {
            child.name.clone()
        } else {
            format!("{prefix}/{}", child.name)
        };
        plan(child, &child_prefix, identifiers, out);
    }
}

fn identifiers_for(declared: &[String], columns: &[String]) -> Vec<String> {
    if !declared.is_empty() {
        declared.to_vec()
    } else if columns.iter().any(|c| c == DEFAULT_IDENTIFIER) {
        vec![DEFAULT_IDENTIFIER.to_string()]
    } else {
        Vec::new()
    }
}

fn cancelled(
    result: &mut ExecutionResult,
    diags: &mut Diagnostics,
    request: &ExecuteRequest,
    progress: &ProgressTracker,
) {
    let message = format!("execution of {} cancelled", request.policy_name);
    result.fail("execution cancelled");
    progress.fail(message.clone());
    diags.push(Diagnostic::error(DiagnosticKind::Internal, message));
}

#[async_trait]
impl PolicyExecutor for SqlExecutor {
    async fn execute(
        &self,
        cancel: &CancellationToken,
        session: &mut dyn Session,
        request: &ExecuteRequest,
        subset: &PolicySubset,
        progress: &ProgressTracker,
    ) -> (ExecutionResult, Diagnostics) {
        let mut result = ExecutionResult::new(request.policy_name.clone());
        let mut diags = Diagnostics::new();

        let policy = match subset.ensure_checks() {
            Ok(policy) => policy,
            Err(diag) => {
                result.fail(diag.summary.clone());
                diags.push(diag);
                return (result, diags);
            }
        };

        if let Err(e) = create_views(session, &policy.views).await {
            result.fail(e.to_string());
            diags.push(
                Diagnostic::from_error(DiagnosticKind::Database, &e)
                    .with_context(format!("failed to create views for {}", request.policy_name)),
            );
            progress.fail(e.to_string());
            return (result, diags);
        }

        let mut planned = Vec::new();
        plan(policy, "", &[], &mut planned);

        let mut remaining = planned.iter().filter(|p| p.check.is_automatic()).count();
        for item in planned {
            if cancel.is_cancelled() {
                cancelled(&mut result, &mut diags, request, progress);
                return (result, diags);
            }

            let mut check = item.check.clone();
            check.name = item.name;

            if !check.is_automatic() {
                result.push(QueryResult::manual(&check));
                continue;
            }

            tracing::debug!(policy = %request.policy_name, check = %check.name, "running check");
            let outcome = tokio::select! {
                _ = cancel.cancelled() => None,
                r = session.query(&check.query) => Some(r),
            };

            let rows = match outcome {
                None => {
                    cancelled(&mut result, &mut diags, request, progress);
                    return (result, diags);
                }
                Some(Err(e)) => {
                    let message = format!("{}: {e}", check.name);
                    tracing::error!(policy = %request.policy_name, check = %check.name, error = %e, "check failed");
                    result.fail(message.clone());
                    diags.push(
                        Diagnostic::from_error(DiagnosticKind::Database, &e)
                            .with_context(format!("failed to run check {}", check.name)),
                    );
                    progress.fail(message);
                    return (result, diags);
                }
                Some(Ok(rows)) => rows,
            };

            let identifiers = identifiers_for(item.identifiers, &rows.columns);
            let violations = rows
                .rows
                .iter()
                .map(|record| Row::from_record(&rows.columns, record, &identifiers))
                .collect();
            let query_result = QueryResult::automatic(&check, rows.columns, violations);
            let passed = query_result.passed;
            result.push(query_result);
            remaining -= 1;

            if request.stop_on_failure && !passed {
                tracing::info!(
                    policy = %request.policy_name,
                    check = %check.name,
                    skipped = remaining,
                    "stopping on first failure"
                );
                // Skipped checks count as finished so the run reaches its total.
                progress.advance(1 + remaining);
                break;
            }
            progress.advance(1);
        }

        (result, diags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{MemoryStorage, QueryRows, Storage};
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::Arc;
    use warden_core::{filter, Update};

    fn request(name: &str) -> ExecuteRequest {
        ExecuteRequest {
            policy_name: name.to_string(),
            stop_on_failure: false,
        }
    }

    fn tracker(total: usize) -> ProgressTracker {
        ProgressTracker::new("p", "", "", total, None)
    }

    fn recording(total: usize) -> (ProgressTracker, Arc<Mutex<Vec<Update>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback: crate::progress::UpdateCallback = Arc::new(move |u| sink.lock().push(u));
        (ProgressTracker::new("p", "", "", total, Some(callback)), seen)
    }

    async fn run(storage: &MemoryStorage, policy: &Policy, req: &ExecuteRequest) -> (ExecutionResult, Diagnostics) {
        let subset = filter(policy, "");
        let progress = tracker(subset.total_queries());
        let mut session = storage.connect().await.unwrap();
        let out = SqlExecutor::new()
            .execute(&CancellationToken::new(), session.as_mut(), req, &subset, &progress)
            .await;
        session.close().await.unwrap();
        out
    }

    #[tokio::test]
    async fn zero_rows_pass() {
        let storage = MemoryStorage::new();
        let policy = Policy::new("p").with_check(Check::automatic("c", "", "SELECT 1 WHERE false"));
        let (result, diags) = run(&storage, &policy, &request("p")).await;
        assert!(diags.is_empty());
        assert!(result.passed);
        assert_eq!(result.results.len(), 1);
        assert!(result.results[0].passed);
    }

    #[tokio::test]
    async fn violations_are_data_not_errors() {
        let storage = MemoryStorage::new().with_query(
            "SELECT id, reason FROM bad",
            QueryRows::new(["id", "reason"])
                .with_row(vec![json!("b"), json!("second")])
                .with_row(vec![json!("a"), json!("first")]),
        );
        let policy = Policy::new("p").with_check(Check::automatic("c", "", "SELECT id, reason FROM bad"));
        let (result, diags) = run(&storage, &policy, &request("p")).await;
        assert!(diags.is_empty());
        assert!(!result.passed);
        assert!(result.error.is_none());
        let rows = &result.results[0].rows;
        assert_eq!(rows[0].identifiers, ["a"]);
        assert_eq!(rows[1].reason, "second");
    }

    #[tokio::test]
    async fn query_failure_is_database_error() {
        let storage = MemoryStorage::new().with_query_error("SELECT nope", "relation \"nope\" does not exist");
        let policy = Policy::new("p")
            .with_check(Check::automatic("broken", "", "SELECT nope"))
            .with_check(Check::automatic("never", "", "SELECT 1"));
        let (result, diags) = run(&storage, &policy, &request("p")).await;
        assert!(diags.has_error_kind(DiagnosticKind::Database));
        assert!(!result.passed);
        assert!(result.error.as_deref().unwrap().contains("broken"));
        assert!(!storage.statements().contains(&"SELECT 1".to_string()));
    }

    #[tokio::test]
    async fn views_are_created_first() {
        let storage = MemoryStorage::new();
        let policy = Policy::new("p")
            .with_view("v", "SELECT 1;")
            .with_check(Check::automatic("c", "", "SELECT * FROM v"));
        run(&storage, &policy, &request("p")).await;
        assert_eq!(
            storage.statements(),
            ["CREATE OR REPLACE TEMPORARY VIEW v AS SELECT 1", "SELECT * FROM v"]
        );
    }

    #[tokio::test]
    async fn manual_checks_are_listed_not_run() {
        let storage = MemoryStorage::new();
        let policy = Policy::new("p").with_check(Check::manual("m", "look at it"));
        let (result, _) = run(&storage, &policy, &request("p")).await;
        assert!(result.passed);
        assert_eq!(result.results[0].check_type, warden_core::CheckType::Manual);
        assert!(storage.statements().is_empty());
    }

    #[tokio::test]
    async fn nested_checks_are_qualified_and_inherit_identifiers() {
        let storage = MemoryStorage::new().with_query(
            "SELECT arn, region FROM buckets",
            QueryRows::new(["arn", "region"]).with_row(vec![json!("arn:1"), json!("eu")]),
        );
        let policy = Policy::new("aws").with_identifiers(["arn"]).with_policy(
            Policy::new("s3").with_check(Check::automatic("public", "", "SELECT arn, region FROM buckets")),
        );
        let (result, _) = run(&storage, &policy, &request("aws")).await;
        assert_eq!(result.results[0].name, "s3/public");
        assert_eq!(result.results[0].rows[0].identifiers, ["arn:1"]);
    }

    #[tokio::test]
    async fn stop_on_failure_skips_remaining_checks() {
        let storage = MemoryStorage::new().with_query(
            "SELECT id FROM first",
            QueryRows::new(["id"]).with_row(vec![json!(1)]),
        );
        let policy = Policy::new("p")
            .with_check(Check::automatic("first", "", "SELECT id FROM first"))
            .with_check(Check::automatic("second", "", "SELECT id FROM second"))
            .with_check(Check::automatic("third", "", "SELECT id FROM third"));
        let req = ExecuteRequest {
            policy_name: "p".into(),
            stop_on_failure: true,
        };
        let subset = filter(&policy, "");
        let (progress, seen) = recording(subset.total_queries());
        let mut session = storage.connect().await.unwrap();
        let (result, diags) = SqlExecutor::new()
            .execute(&CancellationToken::new(), session.as_mut(), &req, &subset, &progress)
            .await;

        assert!(diags.is_empty());
        assert_eq!(result.results.len(), 1);
        assert!(!storage.statements().iter().any(|s| s.contains("second")));
        let seen = seen.lock();
        let last = seen.last().unwrap();
        assert_eq!((last.finished_queries, last.queries_count), (3, 3));
        assert!(last.error.is_none());
        assert!(last.is_done());
    }

    #[tokio::test]
    async fn progress_reaches_total() {
        let storage = MemoryStorage::new();
        let policy = Policy::new("p")
            .with_check(Check::automatic("a", "", "SELECT 1"))
            .with_check(Check::manual("m", ""))
            .with_check(Check::automatic("b", "", "SELECT 2"));
        let subset = filter(&policy, "");
        let progress = tracker(subset.total_queries());
        let mut session = storage.connect().await.unwrap();
        SqlExecutor::new()
            .execute(&CancellationToken::new(), session.as_mut(), &request("p"), &subset, &progress)
            .await;
        assert_eq!(progress.finished(), 2);
        assert_eq!(progress.total(), 2);
    }

    #[tokio::test]
    async fn cancelled_before_first_check() {
        let storage = MemoryStorage::new();
        let policy = Policy::new("p").with_check(Check::automatic("a", "", "SELECT 1"));
        let subset = filter(&policy, "");
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut session = storage.connect().await.unwrap();
        let (progress, seen) = recording(1);
        let (result, diags) = SqlExecutor::new()
            .execute(&cancel, session.as_mut(), &request("p"), &subset, &progress)
            .await;
        assert!(diags.has_error_kind(DiagnosticKind::Internal));
        assert!(!result.passed);
        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].error.as_deref().unwrap().contains("cancelled"));
    }
}
