//! # Prune — Delete old audit records.
//!
//! ```bash
//! warden prune --retention-days 90
//! warden prune --before 2024-01-01T00:00:00Z
//! ```

use anyhow::{Context, Result};
use clap::Args;
use warden_core::Timestamp;
use warden_engine::orchestrator::prune;
use warden_state::PgStateClient;

use crate::config::WardenConfig;

/// Arguments for `warden prune`.
#[derive(Args, Debug)]
pub struct PruneArgs {
    /// Keep records from the last N days.
    #[arg(long, default_value_t = 30, conflicts_with = "before")]
    pub retention_days: u32,

    /// Delete records strictly older than this RFC 3339 instant.
    #[arg(long)]
    pub before: Option<String>,
}

impl PruneArgs {
    pub fn cutoff(&self) -> Result<Timestamp> {
        match &self.before {
            Some(before) => Ok(Timestamp::parse(before)?),
            None => Ok(Timestamp::days_ago(self.retention_days)),
        }
    }
}

/// Execute the prune subcommand.
pub async fn run_prune(args: &PruneArgs, config: &WardenConfig) -> Result<u8> {
    let cutoff = args.cutoff()?;
    let state = PgStateClient::connect(config.require_dsn()?)
        .await
        .context("failed to connect to the state database")?;

    let removed = prune(&state, cutoff).await?;
    println!("Removed {removed} policy execution record(s) older than {cutoff}");
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_cutoff_is_parsed() {
        let args = PruneArgs {
            retention_days: 30,
            before: Some("2024-03-01T12:00:00+02:00".into()),
        };
        assert_eq!(args.cutoff().unwrap().to_iso8601(), "2024-03-01T10:00:00Z");
    }

    #[test]
    fn retention_window_is_in_the_past() {
        let args = PruneArgs {
            retention_days: 7,
            before: None,
        };
        assert!(args.cutoff().unwrap() < Timestamp::now());
    }

    #[test]
    fn malformed_cutoff_is_rejected() {
        let args = PruneArgs {
            retention_days: 30,
            before: Some("last tuesday".into()),
        };
        assert!(args.cutoff().is_err());
    }
}
