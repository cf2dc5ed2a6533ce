//! Behaviour that only a real Postgres exercises: column rendering and
//! identifier quoting.
//!
//! These tests need a scratch database and are skipped when `DATABASE_URL`
//! is not set:
//!   DATABASE_URL=postgres://... cargo test -p warden-engine --test postgres

use serde_json::json;
use sqlx::{Connection, Executor, PgConnection};
use tokio_util::sync::CancellationToken;
use warden_core::{filter, Check, Policy};
use warden_engine::{
    snapshot, ExecuteRequest, PgStorage, PolicyExecutor, ProgressTracker, SqlExecutor, Storage,
};

fn database_url() -> Option<String> {
    let url = std::env::var("DATABASE_URL").ok().filter(|u| !u.is_empty());
    if url.is_none() {
        eprintln!("DATABASE_URL not set, skipping");
    }
    url
}

#[tokio::test]
async fn non_text_columns_are_decoded() {
    let Some(url) = database_url() else { return };
    let storage = PgStorage::new(url);
    let mut session = storage.connect().await.unwrap();

    let rows = session
        .query("SELECT '10.0.0.1'::inet AS id, 12.5::numeric AS cost, 'x'::text AS reason")
        .await
        .unwrap();

    assert_eq!(rows.columns, ["id", "cost", "reason"]);
    assert_eq!(rows.rows, vec![vec![json!("10.0.0.1"), json!(12.5), json!("x")]]);
    session.close().await.unwrap();
}

#[tokio::test]
async fn inet_identifiers_stay_distinct() {
    let Some(url) = database_url() else { return };
    let storage = PgStorage::new(url);
    let policy = Policy::new("net").with_check(Check::automatic(
        "open_hosts",
        "",
        "SELECT v::inet AS id FROM (VALUES ('10.0.0.2'), ('10.0.0.1')) AS t(v)",
    ));
    let subset = filter(&policy, "");
    let progress = ProgressTracker::new("net", "", "", subset.total_queries(), None);
    let request = ExecuteRequest {
        policy_name: "net".into(),
        stop_on_failure: false,
    };

    let mut session = storage.connect().await.unwrap();
    let (result, diags) = SqlExecutor::new()
        .execute(&CancellationToken::new(), session.as_mut(), &request, &subset, &progress)
        .await;
    session.close().await.unwrap();

    assert!(diags.is_empty(), "{diags}");
    let rows = &result.results[0].rows;
    assert_eq!(rows[0].identifiers, ["10.0.0.1"]);
    assert_eq!(rows[1].identifiers, ["10.0.0.2"]);
}

#[tokio::test]
async fn mixed_case_table_is_snapshotted() {
    let Some(url) = database_url() else { return };
    let table = format!("Snap_{}", uuid::Uuid::new_v4().simple());
    let mut admin = PgConnection::connect(&url).await.unwrap();
    admin
        .execute(format!(r#"CREATE TABLE "{table}" (id int); INSERT INTO "{table}" VALUES (7)"#).as_str())
        .await
        .unwrap();

    let out = tempfile::tempdir().unwrap();
    let policy = Policy::new("p").with_check(Check::automatic(
        "c",
        "",
        format!(r#"SELECT id FROM "{table}""#),
    ));
    let result = snapshot(
        &CancellationToken::new(),
        &PgStorage::new(url.as_str()),
        &policy,
        out.path(),
        "p",
    )
    .await;

    admin
        .execute(format!(r#"DROP TABLE "{table}""#).as_str())
        .await
        .unwrap();

    let dir = result.unwrap();
    let csv = std::fs::read_to_string(dir.join(format!("table_{table}.csv"))).unwrap();
    assert_eq!(csv, "id\n7\n");
}
