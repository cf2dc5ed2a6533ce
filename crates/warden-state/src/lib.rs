//! # warden-state — Audit Trail for Policy Runs
//!
//! Every policy run may leave a [`PolicyExecution`] record behind: which
//! source was run, at which content hash and version, with which selector,
//! and when. This crate defines the [`StateClient`] seam the engine writes
//! through and ships two implementations:
//!
//! - [`PgStateClient`]: Postgres via `sqlx`, schema managed by an embedded
//!   migration.
//! - [`InMemoryStateClient`]: a `parking_lot`-guarded vector, used by tests
//!   and by runs without a database.
//!
//! Records are immutable once written. The only mutation is pruning by age,
//! which removes records whose timestamp is strictly before the cutoff.

pub mod memory;
pub mod pg;

use async_trait::async_trait;
use thiserror::Error;
use warden_core::{PolicyExecution, Timestamp};

pub use memory::InMemoryStateClient;
pub use pg::PgStateClient;

/// Errors from the audit store.
#[derive(Error, Debug)]
pub enum StateError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// The store refused the operation without a driver error.
    #[error("state store unavailable: {0}")]
    Unavailable(String),
}

/// Audit persistence for policy executions.
#[async_trait]
pub trait StateClient: Send + Sync {
    /// Store a new record and return it as stored.
    async fn create_policy_execution(
        &self,
        execution: PolicyExecution,
    ) -> Result<PolicyExecution, StateError>;

    /// Delete every record with a timestamp strictly before `before`.
    /// Returns the number of records removed.
    async fn prune_policy_executions(&self, before: Timestamp) -> Result<u64, StateError>;

    /// All records, oldest first.
    async fn list_policy_executions(&self) -> Result<Vec<PolicyExecution>, StateError>;
}
