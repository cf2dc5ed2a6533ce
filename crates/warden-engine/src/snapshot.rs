//! # Snapshots
//!
//! A snapshot captures the tables a check reads plus the check's output, so
//! the check can later be replayed as a regression test against fixed data.
//!
//! ## Layout
//!
//! ```text
//! <output>/<subpath>/tests/<uuid>/
//!     table_<name>.csv      one per table the query reads
//!     query_output.csv      the check's output at snapshot time
//! ```
//!
//! Tables are discovered from the query plan (`EXPLAIN (VERBOSE, FORMAT
//! JSON)`), and only the **first** check of the policy is inspected. Later
//! checks may read other tables; those are not captured.
//!
//! Tables are copied by schema-qualified, quoted name. A table outside the
//! `public` schema is written as `table_<schema>.<name>.csv`. The subpath
//! always stays below the output root: leading separators are dropped and
//! `..` is rejected.

use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};

use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use warden_core::Policy;

use crate::executor::create_views;
use crate::session::{Session, SessionError, Storage};

/// Name of the file holding the check's output.
pub const QUERY_OUTPUT_FILE: &str = "query_output.csv";

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("policy {0} has no checks to snapshot")]
    NoChecks(String),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("failed to write {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not read query plan: {0}")]
    Plan(String),

    #[error("snapshot cancelled")]
    Cancelled,

    #[error("snapshot subpath {0:?} must not leave the output directory")]
    InvalidSubpath(String),
}

/// A table read by a query, as reported by the planner.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct TableRef {
    pub schema: Option<String>,
    pub name: String,
}

impl TableRef {
    /// Quoted, schema-qualified name usable in SQL.
    pub fn qualified(&self) -> String {
        match &self.schema {
            Some(schema) => format!("{}.{}", quote_ident(schema), quote_ident(&self.name)),
            None => quote_ident(&self.name),
        }
    }

    /// CSV file name for the table's contents.
    pub fn file_name(&self) -> String {
        let stem = match self.schema.as_deref() {
            None | Some("public") => self.name.clone(),
            Some(schema) => format!("{schema}.{}", self.name),
        };
        let stem: String = stem
            .chars()
            .map(|c| match c {
                'a'..='z' | 'A'..='Z' | '0'..='9' | '_' | '-' | '.' => c,
                _ => '_',
            })
            .collect();
        format!("table_{stem}.csv")
    }
}

impl std::fmt::Display for TableRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{schema}.{}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// Double-quote a Postgres identifier.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// `subpath` as a relative path with no `..` components.
fn contained_subpath(subpath: &str) -> Result<PathBuf, SnapshotError> {
    let mut out = PathBuf::new();
    for component in Path::new(subpath).components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
            Component::ParentDir => return Err(SnapshotError::InvalidSubpath(subpath.to_string())),
        }
    }
    Ok(out)
}

/// Snapshot the first check of `policy` into a fresh directory under
/// `<output_path>/<subpath>/tests/`. Returns the created directory.
pub async fn snapshot(
    cancel: &CancellationToken,
    storage: &dyn Storage,
    policy: &Policy,
    output_path: &Path,
    subpath: &str,
) -> Result<PathBuf, SnapshotError> {
    let check = policy
        .checks
        .first()
        .ok_or_else(|| SnapshotError::NoChecks(policy.name.clone()))?;
    let subpath = contained_subpath(subpath)?;
    if cancel.is_cancelled() {
        return Err(SnapshotError::Cancelled);
    }

    let mut session = storage.connect().await?;
    let outcome = capture(cancel, session.as_mut(), policy, &check.query, output_path, &subpath).await;
    if let Err(e) = session.close().await {
        tracing::warn!(error = %e, "failed to close snapshot session");
    }
    outcome
}

async fn capture(
    cancel: &CancellationToken,
    session: &mut dyn Session,
    policy: &Policy,
    query: &str,
    output_path: &Path,
    subpath: &Path,
) -> Result<PathBuf, SnapshotError> {
    create_views(session, &policy.views).await?;

    let query = query.trim().trim_end_matches(';');
    let tables = extract_tables(session, query).await?;
    tracing::debug!(policy = %policy.name, tables = ?tables, "tables referenced by first check");

    let dir = output_path
        .join(subpath)
        .join("tests")
        .join(Uuid::new_v4().to_string());
    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(|source| SnapshotError::Io {
            path: dir.clone(),
            source,
        })?;

    for table in &tables {
        if cancel.is_cancelled() {
            return Err(SnapshotError::Cancelled);
        }
        let data = session
            .copy_out(&format!(
                "COPY {} TO STDOUT WITH (FORMAT csv, HEADER true)",
                table.qualified()
            ))
            .await?;
        write_file(&dir.join(table.file_name()), &data).await?;
    }

    let data = session
        .copy_out(&format!(
            "COPY ({query}) TO STDOUT WITH (FORMAT csv, HEADER true)"
        ))
        .await?;
    write_file(&dir.join(QUERY_OUTPUT_FILE), &data).await?;

    tracing::info!(policy = %policy.name, path = %dir.display(), tables = tables.len(), "snapshot written");
    Ok(dir)
}

async fn write_file(path: &Path, data: &[u8]) -> Result<(), SnapshotError> {
    tokio::fs::write(path, data)
        .await
        .map_err(|source| SnapshotError::Io {
            path: path.to_path_buf(),
            source,
        })
}

/// Tables read by `query`, sorted and de-duplicated.
pub async fn extract_tables(
    session: &mut dyn Session,
    query: &str,
) -> Result<BTreeSet<TableRef>, SnapshotError> {
    let plan = session
        .query(&format!("EXPLAIN (VERBOSE, FORMAT JSON) {query}"))
        .await?;
    let mut tables = BTreeSet::new();
    for row in &plan.rows {
        for value in row {
            match value {
                Value::String(text) => {
                    let parsed: Value = serde_json::from_str(text)
                        .map_err(|e| SnapshotError::Plan(e.to_string()))?;
                    collect_relations(&parsed, &mut tables);
                }
                other => collect_relations(other, &mut tables),
            }
        }
    }
    Ok(tables)
}

fn collect_relations(value: &Value, out: &mut BTreeSet<TableRef>) {
    match value {
        Value::Object(map) => {
            if let Some(Value::String(name)) = map.get("Relation Name") {
                out.insert(TableRef {
                    schema: map.get("Schema").and_then(Value::as_str).map(str::to_string),
                    name: name.clone(),
                });
            }
            map.values().for_each(|v| collect_relations(v, out));
        }
        Value::Array(items) => items.iter().for_each(|v| collect_relations(v, out)),
        _ => {}
    }
}
