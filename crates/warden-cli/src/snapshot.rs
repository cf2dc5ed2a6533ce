//! # Snapshot — Capture test fixtures for a check.
//!
//! ```bash
//! warden snapshot aws//cis_v1.2.0/1.1 fixtures
//! ```
//!
//! Writes `fixtures/<subpath>/tests/<uuid>/` holding one CSV per table the
//! selected policy's first check reads, plus that check's current output.
//! The subpath defaults to the selector.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use tokio_util::sync::CancellationToken;
use warden_core::filter;
use warden_engine::{parse_and_detect, snapshot, PgStorage};

use crate::config::WardenConfig;
use crate::local_loader;

/// Arguments for `warden snapshot`.
#[derive(Args, Debug)]
pub struct SnapshotArgs {
    /// Policy source with a selector narrowing it to the check's policy.
    pub policy: String,

    /// Root directory for snapshots.
    pub output: PathBuf,

    /// Directory below `output` to write into. Defaults to the selector.
    #[arg(long)]
    pub subpath: Option<String>,

    /// Directory bare policy names are resolved in.
    #[arg(long)]
    pub policy_dir: Option<PathBuf>,
}

impl SnapshotArgs {
    fn subpath_for(&self, selector: &str) -> String {
        self.subpath
            .clone()
            .unwrap_or_else(|| selector.trim_matches('/').to_string())
    }
}

/// Execute the snapshot subcommand.
pub async fn run_snapshot(
    args: &SnapshotArgs,
    config: &WardenConfig,
    cancel: CancellationToken,
) -> Result<u8> {
    let policy = parse_and_detect(&args.policy)?;
    let directory = args
        .policy_dir
        .clone()
        .unwrap_or_else(|| config.policy_directory.clone());
    let loaded = local_loader().load(&cancel, &directory, policy).await?;

    let selector = loaded.sub_policy();
    let subset = filter(&loaded, &selector);
    let target = subset.ensure_checks()?;

    let storage = PgStorage::new(config.require_dsn()?);
    let dir = snapshot(
        &cancel,
        &storage,
        target,
        &args.output,
        &args.subpath_for(&selector),
    )
    .await
    .with_context(|| format!("failed to snapshot {}", subset.qualified_name()))?;

    println!("Snapshot written to {}", dir.display());
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(subpath: Option<&str>) -> SnapshotArgs {
        SnapshotArgs {
            policy: "aws//cis/1.1".into(),
            output: PathBuf::from("fixtures"),
            subpath: subpath.map(str::to_string),
            policy_dir: None,
        }
    }

    #[test]
    fn subpath_defaults_to_selector() {
        assert_eq!(args(None).subpath_for("cis/1.1"), "cis/1.1");
        assert_eq!(args(None).subpath_for("/cis/"), "cis");
        assert_eq!(args(Some("custom")).subpath_for("cis/1.1"), "custom");
    }
}
