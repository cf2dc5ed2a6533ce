//! # Database Sessions
//!
//! A [`Storage`] opens one [`Session`] per policy run. A session is a single
//! connection, so temporary views created at the start of a run are visible
//! to every check of that run and disappear when it closes.
//!
//! The session surface is deliberately small: run a query and get rows
//! back, execute a statement, and copy rows out as CSV bytes.
//!
//! ## Implementations
//!
//! - [`PgStorage`]: Postgres via `sqlx`. Row-returning queries are wrapped
//!   as `SELECT to_json(ROW(q.*))::text FROM (<query>) AS q`, so Postgres
//!   renders every column type (`numeric`, `inet`, arrays, ...) as JSON and
//!   column positions are kept. Other statements, such as `EXPLAIN`, are
//!   decoded by type name; a column that cannot be decoded is an error,
//!   never a silent null.
//! - [`MemoryStorage`]: scripted responses keyed by SQL text. Records every
//!   statement it receives so tests can assert on them.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::TryStreamExt;
use parking_lot::Mutex;
use serde_json::Value;
use sqlx::postgres::{PgConnection, PgRow};
use sqlx::{Column, Connection, Executor, Row, Statement, TypeInfo, ValueRef};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("failed to connect to database: {0}")]
    Connect(#[source] sqlx::Error),

    #[error("query failed: {source}")]
    Query {
        query: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("cannot decode column {column} ({column_type}) of query: {query}")]
    Decode {
        query: String,
        column: String,
        column_type: String,
    },

    /// A non-driver failure, such as a scripted error.
    #[error("{0}")]
    Rejected(String),
}

/// Column names and rows of a query result.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryRows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl QueryRows {
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    pub fn with_row(mut self, row: Vec<Value>) -> Self {
        self.rows.push(row);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// An open database connection.
#[async_trait]
pub trait Session: Send {
    async fn query(&mut self, sql: &str) -> Result<QueryRows, SessionError>;

    /// Run a statement, returning the number of affected rows.
    async fn execute(&mut self, sql: &str) -> Result<u64, SessionError>;

    /// Run a `COPY ... TO STDOUT` statement and collect its output.
    async fn copy_out(&mut self, sql: &str) -> Result<Vec<u8>, SessionError>;

    async fn close(self: Box<Self>) -> Result<(), SessionError>;
}

/// A database that sessions can be opened against.
#[async_trait]
pub trait Storage: Send + Sync {
    fn dsn(&self) -> &str;

    async fn connect(&self) -> Result<Box<dyn Session>, SessionError>;
}

// ---------------------------------------------------------------------------
// Postgres
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct PgStorage {
    dsn: String,
}

impl std::fmt::Debug for PgStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgStorage")
            .field("dsn", &"[REDACTED]")
            .finish()
    }
}

impl PgStorage {
    pub fn new(dsn: impl Into<String>) -> Self {
        Self { dsn: dsn.into() }
    }
}

#[async_trait]
impl Storage for PgStorage {
    fn dsn(&self) -> &str {
        &self.dsn
    }

    async fn connect(&self) -> Result<Box<dyn Session>, SessionError> {
        let conn = PgConnection::connect(&self.dsn)
            .await
            .map_err(SessionError::Connect)?;
        tracing::debug!("database session opened");
        Ok(Box::new(PgSession { conn }))
    }
}

pub struct PgSession {
    conn: PgConnection,
}

fn query_error(sql: &str, source: sqlx::Error) -> SessionError {
    SessionError::Query {
        query: sql.to_string(),
        source,
    }
}

#[async_trait]
impl Session for PgSession {
    async fn query(&mut self, sql: &str) -> Result<QueryRows, SessionError> {
        let statement = (&mut self.conn)
            .prepare(sql)
            .await
            .map_err(|e| query_error(sql, e))?;
        let columns: Vec<String> = statement
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect();

        let Some(wrapped) = json_rows_query(sql) else {
            let rows = statement
                .query()
                .fetch_all(&mut self.conn)
                .await
                .map_err(|e| query_error(sql, e))?;
            let rows = rows
                .iter()
                .map(|row| decode_row(sql, row))
                .collect::<Result<_, _>>()?;
            return Ok(QueryRows { columns, rows });
        };

        let encoded: Vec<String> = sqlx::query_scalar::<_, String>(&wrapped)
            .fetch_all(&mut self.conn)
            .await
            .map_err(|e| query_error(sql, e))?;
        let rows = encoded
            .iter()
            .map(|text| split_json_row(sql, &columns, text))
            .collect::<Result<_, _>>()?;
        Ok(QueryRows { columns, rows })
    }

    async fn execute(&mut self, sql: &str) -> Result<u64, SessionError> {
        let result = sqlx::query(sql)
            .execute(&mut self.conn)
            .await
            .map_err(|e| query_error(sql, e))?;
        Ok(result.rows_affected())
    }

    async fn copy_out(&mut self, sql: &str) -> Result<Vec<u8>, SessionError> {
        let mut stream = self
            .conn
            .copy_out_raw(sql)
            .await
            .map_err(|e| query_error(sql, e))?;
        let mut out = Vec::new();
        while let Some(chunk) = stream.try_next().await.map_err(|e| query_error(sql, e))? {
            out.extend_from_slice(&chunk);
        }
        Ok(out)
    }

    async fn close(self: Box<Self>) -> Result<(), SessionError> {
        self.conn
            .close()
            .await
            .map_err(|e| SessionError::Rejected(format!("failed to close session: {e}")))
    }
}

/// The JSON-rendering wrapper for a row-returning `sql`, or `None` for
/// statements that cannot be used as a subquery.
pub fn json_rows_query(sql: &str) -> Option<String> {
    let body = sql.trim().trim_end_matches(';').trim_end();
    let keyword: String = body
        .trim_start_matches(|c: char| c == '(' || c.is_whitespace())
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect::<String>()
        .to_ascii_lowercase();
    match keyword.as_str() {
        "select" | "with" | "values" | "table" => {
            Some(format!("SELECT to_json(ROW(q.*))::text FROM ({body}) AS q"))
        }
        _ => None,
    }
}

/// Split one `to_json(ROW(..))` object (`{"f1": .., "f2": ..}`) back into
/// values in column order.
pub fn split_json_row(sql: &str, columns: &[String], text: &str) -> Result<Vec<Value>, SessionError> {
    let decode_error = |column: &str| SessionError::Decode {
        query: sql.to_string(),
        column: column.to_string(),
        column_type: "json".to_string(),
    };
    let Value::Object(mut fields) = serde_json::from_str::<Value>(text).map_err(|_| decode_error("*"))? else {
        return Err(decode_error("*"));
    };
    columns
        .iter()
        .enumerate()
        .map(|(i, column)| {
            fields
                .remove(&format!("f{}", i + 1))
                .ok_or_else(|| decode_error(column))
        })
        .collect()
}

fn decode_row(sql: &str, row: &PgRow) -> Result<Vec<Value>, SessionError> {
    (0..row.columns().len())
        .map(|i| decode_value(sql, row, i))
        .collect()
}

fn decode_value(sql: &str, row: &PgRow, index: usize) -> Result<Value, SessionError> {
    if row.try_get_raw(index).map(|raw| raw.is_null()).unwrap_or(false) {
        return Ok(Value::Null);
    }

    let column = row.column(index);
    let type_name = column.type_info().name().to_ascii_uppercase();
    let decoded = match type_name.as_str() {
        "BOOL" => row.try_get::<bool, _>(index).map(Value::from),
        "INT2" => row.try_get::<i16, _>(index).map(Value::from),
        "INT4" => row.try_get::<i32, _>(index).map(Value::from),
        "INT8" => row.try_get::<i64, _>(index).map(Value::from),
        "FLOAT4" => row.try_get::<f32, _>(index).map(Value::from),
        "FLOAT8" => row.try_get::<f64, _>(index).map(Value::from),
        "UUID" => row
            .try_get::<uuid::Uuid, _>(index)
            .map(|u| Value::String(u.to_string())),
        "TIMESTAMPTZ" => row
            .try_get::<chrono::DateTime<chrono::Utc>, _>(index)
            .map(|t| Value::String(t.to_rfc3339())),
        "TIMESTAMP" => row
            .try_get::<chrono::NaiveDateTime, _>(index)
            .map(|t| Value::String(t.to_string())),
        "DATE" => row
            .try_get::<chrono::NaiveDate, _>(index)
            .map(|d| Value::String(d.to_string())),
        "JSON" | "JSONB" => row.try_get::<Value, _>(index),
        "TEXT[]" | "VARCHAR[]" => row.try_get::<Vec<String>, _>(index).map(Value::from),
        _ => row.try_get::<String, _>(index).map(Value::String),
    };

    decoded.map_err(|e| {
        tracing::warn!(column = %column.name(), column_type = %type_name, error = %e, "column not decodable");
        SessionError::Decode {
            query: sql.to_string(),
            column: column.name().to_string(),
            column_type: type_name.clone(),
        }
    })
}

// ---------------------------------------------------------------------------
// Scripted in-memory storage
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Script {
    queries: HashMap<String, Result<QueryRows, String>>,
    copies: HashMap<String, Vec<u8>>,
    connect_error: Option<String>,
    statements: Vec<String>,
    opened: usize,
    closed: usize,
}

/// Scripted [`Storage`]. Clones share the script and the statement log.
///
/// Unscripted queries return no rows, unscripted statements affect no
/// rows, and unscripted copies return no bytes.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    script: Arc<Mutex<Script>>,
}

fn normalize(sql: &str) -> String {
    sql.split_whitespace().collect::<Vec<_>>().join(" ")
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `sql` with `rows`.
    pub fn with_query(self, sql: &str, rows: QueryRows) -> Self {
        self.script.lock().queries.insert(normalize(sql), Ok(rows));
        self
    }

    /// Fail `sql` (as a query or statement) with `message`.
    pub fn with_query_error(self, sql: &str, message: impl Into<String>) -> Self {
        self.script
            .lock()
            .queries
            .insert(normalize(sql), Err(message.into()));
        self
    }

    /// Answer the `COPY` statement `sql` with `data`.
    pub fn with_copy(self, sql: &str, data: impl Into<Vec<u8>>) -> Self {
        self.script.lock().copies.insert(normalize(sql), data.into());
        self
    }

    /// Make `connect` fail.
    pub fn with_connect_error(self, message: impl Into<String>) -> Self {
        self.script.lock().connect_error = Some(message.into());
        self
    }

    /// Every statement received, whitespace-normalised, in order.
    pub fn statements(&self) -> Vec<String> {
        self.script.lock().statements.clone()
    }

    pub fn sessions_opened(&self) -> usize {
        self.script.lock().opened
    }

    pub fn sessions_closed(&self) -> usize {
        self.script.lock().closed
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    fn dsn(&self) -> &str {
        "memory://"
    }

    async fn connect(&self) -> Result<Box<dyn Session>, SessionError> {
        let mut script = self.script.lock();
        if let Some(message) = &script.connect_error {
            return Err(SessionError::Rejected(message.clone()));
        }
        script.opened += 1;
        Ok(Box::new(MemorySession {
            script: Arc::clone(&self.script),
        }))
    }
}

struct MemorySession {
    script: Arc<Mutex<Script>>,
}

impl MemorySession {
    fn respond(&self, sql: &str) -> Result<QueryRows, SessionError> {
        let key = normalize(sql);
        let mut script = self.script.lock();
        script.statements.push(key.clone());
        match script.queries.get(&key) {
            Some(Ok(rows)) => Ok(rows.clone()),
            Some(Err(message)) => Err(SessionError::Rejected(message.clone())),
            None => Ok(QueryRows::default()),
        }
    }
}

#[async_trait]
impl Session for MemorySession {
    async fn query(&mut self, sql: &str) -> Result<QueryRows, SessionError> {
        self.respond(sql)
    }

    async fn execute(&mut self, sql: &str) -> Result<u64, SessionError> {
        self.respond(sql).map(|rows| rows.rows.len() as u64)
    }

    async fn copy_out(&mut self, sql: &str) -> Result<Vec<u8>, SessionError> {
        let key = normalize(sql);
        let mut script = self.script.lock();
        script.statements.push(key.clone());
        if let Some(Err(message)) = script.queries.get(&key) {
            return Err(SessionError::Rejected(message.clone()));
        }
        Ok(script.copies.get(&key).cloned().unwrap_or_default())
    }

    async fn close(self: Box<Self>) -> Result<(), SessionError> {
        self.script.lock().closed += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn row_returning_queries_are_rendered_as_json() {
        assert_eq!(
            json_rows_query("SELECT id FROM t;").as_deref(),
            Some("SELECT to_json(ROW(q.*))::text FROM (SELECT id FROM t) AS q")
        );
        assert!(json_rows_query("  with x as (select 1) select * from x").is_some());
        assert!(json_rows_query("(SELECT 1) UNION (SELECT 2)").is_some());
        assert!(json_rows_query("VALUES (1)").is_some());
        assert!(json_rows_query("EXPLAIN (FORMAT JSON) SELECT 1").is_none());
        assert!(json_rows_query("CREATE TEMPORARY VIEW v AS SELECT 1").is_none());
    }

    #[test]
    fn json_rows_keep_values_postgres_rendered() {
        // What Postgres returns for
        // SELECT '10.0.0.1'::inet AS id, 12.5::numeric AS cost, 'x'::text AS reason
        let text = r#"{"f1":"10.0.0.1","f2":12.5,"f3":"x"}"#;
        let row = split_json_row("q", &cols(&["id", "cost", "reason"]), text).unwrap();
        assert_eq!(row, vec![json!("10.0.0.1"), json!(12.5), json!("x")]);
    }

    #[test]
    fn duplicate_column_names_keep_their_positions() {
        let text = r#"{"f1":"a","f2":"b","f3":null}"#;
        let row = split_json_row("q", &cols(&["id", "id", "note"]), text).unwrap();
        assert_eq!(row, vec![json!("a"), json!("b"), Value::Null]);
    }

    #[test]
    fn malformed_json_row_is_a_decode_error() {
        let err = split_json_row("q", &cols(&["id"]), "[1]").unwrap_err();
        assert!(matches!(err, SessionError::Decode { .. }));

        let err = split_json_row("q", &cols(&["id", "cost"]), r#"{"f1":1}"#).unwrap_err();
        assert!(matches!(err, SessionError::Decode { ref column, .. } if column == "cost"));
    }

    #[tokio::test]
    async fn scripted_query_round_trip() {
        let storage = MemoryStorage::new().with_query(
            "SELECT id FROM t",
            QueryRows::new(["id"]).with_row(vec![json!(1)]),
        );
        let mut session = storage.connect().await.unwrap();
        let rows = session.query("SELECT  id\n FROM t").await.unwrap();
        assert_eq!(rows.columns, ["id"]);
        assert_eq!(rows.rows, vec![vec![json!(1)]]);
        session.close().await.unwrap();
        assert_eq!(storage.sessions_opened(), 1);
        assert_eq!(storage.sessions_closed(), 1);
    }

    #[tokio::test]
    async fn unscripted_query_is_empty() {
        let storage = MemoryStorage::new();
        let mut session = storage.connect().await.unwrap();
        assert!(session.query("SELECT 1").await.unwrap().is_empty());
        assert_eq!(storage.statements(), ["SELECT 1"]);
    }

    #[tokio::test]
    async fn scripted_errors() {
        let storage = MemoryStorage::new().with_query_error("SELECT broken", "syntax error");
        let mut session = storage.connect().await.unwrap();
        let err = session.query("SELECT broken").await.unwrap_err();
        assert_eq!(err.to_string(), "syntax error");

        let refused = MemoryStorage::new().with_connect_error("connection refused");
        assert!(refused.connect().await.is_err());
        assert_eq!(refused.sessions_opened(), 0);
    }

    #[tokio::test]
    async fn copy_out_returns_scripted_bytes() {
        let storage = MemoryStorage::new().with_copy("COPY t TO STDOUT", "a,b\n1,2\n");
        let mut session = storage.connect().await.unwrap();
        assert_eq!(session.copy_out("COPY t TO STDOUT").await.unwrap(), b"a,b\n1,2\n");
        assert!(session.copy_out("COPY other TO STDOUT").await.unwrap().is_empty());
    }
}
