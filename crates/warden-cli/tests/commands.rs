//! Subcommand handlers exercised against policies on disk. None of these
//! paths reach the database.

use std::path::Path;

use tokio_util::sync::CancellationToken;
use warden_cli::config::WardenConfig;
use warden_cli::describe::{run_describe, DescribeArgs};
use warden_cli::run::{run_policies, RunArgs};
use warden_cli::snapshot::{run_snapshot, SnapshotArgs};

fn hub(root: &Path) {
    let aws = root.join("aws");
    std::fs::create_dir_all(&aws).unwrap();
    std::fs::write(
        aws.join("policy.yml"),
        "name: aws\ntitle: AWS\npolicies:\n  - name: cis\n    title: CIS\n    checks:\n      - name: '1.1'\n        query: SELECT 1\n  - name: empty\n",
    )
    .unwrap();
}

fn config(root: &Path) -> WardenConfig {
    WardenConfig {
        policy_directory: root.to_path_buf(),
        ..WardenConfig::default()
    }
}

#[tokio::test]
async fn describe_loads_from_the_hub_directory() {
    let dir = tempfile::tempdir().unwrap();
    hub(dir.path());

    let args = DescribeArgs {
        policy: "aws//cis".into(),
        policy_dir: None,
    };
    let code = run_describe(&args, &config(dir.path()), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(code, 0);
}

#[tokio::test]
async fn describe_of_missing_policy_fails() {
    let dir = tempfile::tempdir().unwrap();
    let args = DescribeArgs {
        policy: "nowhere".into(),
        policy_dir: Some(dir.path().to_path_buf()),
    };
    assert!(run_describe(&args, &WardenConfig::default(), CancellationToken::new())
        .await
        .is_err());
}

#[tokio::test]
async fn run_without_policies_is_an_error() {
    let args = RunArgs {
        policies: Vec::new(),
        persist: false,
        stop_on_failure: false,
        policy_dir: None,
    };
    let err = run_policies(&args, &WardenConfig::default(), CancellationToken::new())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("no policies to run"));
}

#[tokio::test]
async fn run_without_dsn_is_an_error() {
    let args = RunArgs {
        policies: vec!["aws".into()],
        persist: false,
        stop_on_failure: false,
        policy_dir: None,
    };
    let err = run_policies(&args, &WardenConfig::default(), CancellationToken::new())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("no database configured"));
}

#[tokio::test]
async fn snapshot_of_a_policy_without_checks_fails_before_connecting() {
    let dir = tempfile::tempdir().unwrap();
    hub(dir.path());

    let args = SnapshotArgs {
        policy: "aws//empty".into(),
        output: dir.path().join("out"),
        subpath: None,
        policy_dir: None,
    };
    let err = run_snapshot(&args, &config(dir.path()), CancellationToken::new())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("not found"));
    assert!(!dir.path().join("out").exists());
}
