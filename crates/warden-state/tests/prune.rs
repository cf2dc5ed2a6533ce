//! Prune semantics of the in-memory audit store.

use chrono::{TimeZone, Utc};
use warden_core::{Policy, PolicyExecution, Timestamp};
use warden_state::{InMemoryStateClient, StateClient};

fn at(secs: u32) -> Timestamp {
    Timestamp::from_utc(Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, secs).unwrap())
}

fn record(name: &str, ts: Timestamp) -> PolicyExecution {
    PolicyExecution::for_policy(&Policy::new(name), "").with_timestamp(ts)
}

#[tokio::test]
async fn prune_removes_only_strictly_older_records() {
    let client = InMemoryStateClient::new();
    for (name, secs) in [("old", 0), ("boundary", 10), ("new", 20)] {
        client.create_policy_execution(record(name, at(secs))).await.unwrap();
    }

    let removed = client.prune_policy_executions(at(10)).await.unwrap();
    assert_eq!(removed, 1);

    let names: Vec<_> = client
        .list_policy_executions()
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.policy_name)
        .collect();
    assert_eq!(names, ["boundary", "new"]);
}

#[tokio::test]
async fn prune_on_empty_store_is_a_noop() {
    let client = InMemoryStateClient::new();
    assert_eq!(client.prune_policy_executions(Timestamp::now()).await.unwrap(), 0);
}

#[tokio::test]
async fn list_is_ordered_by_timestamp() {
    let client = InMemoryStateClient::new();
    client.create_policy_execution(record("late", at(30))).await.unwrap();
    client.create_policy_execution(record("early", at(5))).await.unwrap();

    let listed = client.list_policy_executions().await.unwrap();
    assert_eq!(listed[0].policy_name, "early");
    assert_eq!(listed[1].policy_name, "late");
}
