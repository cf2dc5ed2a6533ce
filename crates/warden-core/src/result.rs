//! # Execution Results
//!
//! What a policy run produces. A [`Row`] is one violation returned by a
//! check's query; a [`QueryResult`] is the outcome of one check; an
//! [`ExecutionResult`] aggregates a policy. [`Update`] is the progress
//! message emitted while a policy runs.
//!
//! Rows are always sorted, so the same data yields the same output no matter
//! which order the database returned it in.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::policy::{Check, CheckType};

/// Status recorded when a row does not carry a `status` column.
pub const DEFAULT_ROW_STATUS: &str = "fail";

/// A single violation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub status: String,
    pub identifiers: Vec<String>,
    pub reason: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub additional_data: BTreeMap<String, Value>,
}

impl Row {
    /// Build a row from one query record.
    ///
    /// `status` and `reason` columns are lifted out, the columns named in
    /// `identifiers` become the identifier list (in that order), and
    /// everything else goes to `additional_data`.
    pub fn from_record(columns: &[String], values: &[Value], identifiers: &[String]) -> Self {
        let mut status = None;
        let mut reason = String::new();
        let mut idents: Vec<Option<String>> = vec![None; identifiers.len()];
        let mut additional_data = BTreeMap::new();

        for (column, value) in columns.iter().zip(values) {
            if column == "status" {
                status = Some(stringify(value));
            } else if column == "reason" {
                reason = stringify(value);
            } else if let Some(pos) = identifiers.iter().position(|i| i == column) {
                idents[pos] = Some(stringify(value));
            } else {
                additional_data.insert(column.clone(), value.clone());
            }
        }

        Self {
            status: status
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| DEFAULT_ROW_STATUS.to_string()),
            identifiers: idents.into_iter().flatten().collect(),
            reason,
            additional_data,
        }
    }

    fn sort_key(&self) -> (&[String], &str, &str) {
        (&self.identifiers, &self.reason, &self.status)
    }
}

fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Sort rows by identifiers, then reason, then status.
pub fn sort_rows(rows: &mut [Row]) {
    rows.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
}

/// The outcome of one check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub name: String,
    pub description: String,
    #[serde(rename = "type")]
    pub check_type: CheckType,
    /// Meaningful for automatic checks only. Manual checks are never
    /// evaluated and always report `false`.
    pub passed: bool,
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

impl QueryResult {
    pub fn manual(check: &Check) -> Self {
        Self {
            name: check.name.clone(),
            description: check.description.clone(),
            check_type: CheckType::Manual,
            passed: false,
            columns: Vec::new(),
            rows: Vec::new(),
        }
    }

    /// An evaluated check. Passes when no violation rows came back.
    pub fn automatic(check: &Check, columns: Vec<String>, mut rows: Vec<Row>) -> Self {
        sort_rows(&mut rows);
        Self {
            name: check.name.clone(),
            description: check.description.clone(),
            check_type: CheckType::Automatic,
            passed: rows.is_empty(),
            columns,
            rows,
        }
    }
}

/// The aggregated outcome of running one policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub policy_name: String,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub results: Vec<QueryResult>,
}

impl ExecutionResult {
    pub fn new(policy_name: impl Into<String>) -> Self {
        Self {
            policy_name: policy_name.into(),
            passed: true,
            error: None,
            results: Vec::new(),
        }
    }

    /// Append a check outcome. A failed automatic check fails the policy;
    /// manual checks never affect it.
    pub fn push(&mut self, result: QueryResult) {
        if result.check_type == CheckType::Automatic && !result.passed {
            self.passed = false;
        }
        self.results.push(result);
    }

    /// Record an execution error. The policy cannot pass afterwards.
    pub fn fail(&mut self, error: impl Into<String>) {
        self.error = Some(error.into());
        self.passed = false;
    }

    /// Number of automatic checks that returned violations.
    pub fn failed_checks(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.check_type == CheckType::Automatic && !r.passed)
            .count()
    }
}

/// A progress snapshot for one policy run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Update {
    pub policy_name: String,
    pub source: String,
    pub version: String,
    pub finished_queries: usize,
    pub queries_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Update {
    pub fn is_done(&self) -> bool {
        self.finished_queries >= self.queries_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn row_lifts_status_reason_and_identifiers() {
        let row = Row::from_record(
            &cols(&["arn", "reason", "region", "status"]),
            &[json!("arn:1"), json!("public bucket"), json!("us-east-1"), json!("warn")],
            &cols(&["arn"]),
        );
        assert_eq!(row.identifiers, ["arn:1"]);
        assert_eq!(row.reason, "public bucket");
        assert_eq!(row.status, "warn");
        assert_eq!(row.additional_data.get("region"), Some(&json!("us-east-1")));
        assert!(!row.additional_data.contains_key("arn"));
    }

    #[test]
    fn row_defaults() {
        let row = Row::from_record(&cols(&["count"]), &[json!(3)], &[]);
        assert_eq!(row.status, DEFAULT_ROW_STATUS);
        assert_eq!(row.reason, "");
        assert!(row.identifiers.is_empty());
        assert_eq!(row.additional_data.get("count"), Some(&json!(3)));
    }

    #[test]
    fn identifiers_follow_declared_order() {
        let row = Row::from_record(
            &cols(&["b", "a"]),
            &[json!("B"), json!(1)],
            &cols(&["a", "b"]),
        );
        assert_eq!(row.identifiers, ["1", "B"]);
    }

    #[test]
    fn rows_are_sorted_regardless_of_input_order() {
        let check = Check::automatic("c", "", "SELECT 1");
        let mk = |id: &str| Row::from_record(&cols(&["id"]), &[json!(id)], &cols(&["id"]));
        let a = QueryResult::automatic(&check, cols(&["id"]), vec![mk("z"), mk("a"), mk("m")]);
        let b = QueryResult::automatic(&check, cols(&["id"]), vec![mk("m"), mk("z"), mk("a")]);
        assert_eq!(a, b);
        assert_eq!(a.rows[0].identifiers, ["a"]);
        assert!(!a.passed);
    }

    #[test]
    fn empty_rows_pass() {
        let check = Check::automatic("c", "", "SELECT 1");
        assert!(QueryResult::automatic(&check, vec![], vec![]).passed);
    }

    #[test]
    fn manual_checks_do_not_fail_the_policy() {
        let mut result = ExecutionResult::new("aws");
        result.push(QueryResult::manual(&Check::manual("m", "")));
        result.push(QueryResult::automatic(&Check::automatic("a", "", "q"), vec![], vec![]));
        assert!(result.passed);
        assert_eq!(result.failed_checks(), 0);
    }

    #[test]
    fn violation_fails_the_policy() {
        let mut result = ExecutionResult::new("aws");
        let row = Row::from_record(&cols(&["id"]), &[json!(1)], &cols(&["id"]));
        result.push(QueryResult::automatic(&Check::automatic("a", "", "q"), vec![], vec![row]));
        assert!(!result.passed);
        assert!(result.error.is_none());
        assert_eq!(result.failed_checks(), 1);
    }

    #[test]
    fn error_fails_the_policy() {
        let mut result = ExecutionResult::new("aws");
        result.fail("relation does not exist");
        assert!(!result.passed);
        assert_eq!(result.error.as_deref(), Some("relation does not exist"));
    }

    #[test]
    fn update_done() {
        let u = Update {
            policy_name: "aws".into(),
            source: "aws".into(),
            version: "latest".into(),
            finished_queries: 2,
            queries_count: 2,
            error: None,
        };
        assert!(u.is_done());
    }
}
