//! Postgres audit store.
//!
//! All queries operate on the `policy_executions` table created by the
//! embedded migration in `./migrations`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use uuid::Uuid;
use warden_core::{PolicyExecution, Timestamp};

use crate::{StateClient, StateError};

/// [`StateClient`] backed by a Postgres pool.
#[derive(Debug, Clone)]
pub struct PgStateClient {
    pool: PgPool,
}

impl PgStateClient {
    /// Connect to `dsn` and apply pending migrations.
    pub async fn connect(dsn: &str) -> Result<Self, StateError> {
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .acquire_timeout(std::time::Duration::from_secs(5))
            .connect(dsn)
            .await?;
        tracing::info!("Connected to state database");

        let client = Self { pool };
        client.migrate().await?;
        Ok(client)
    }

    /// Wrap an existing pool. Migrations are not run.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<(), StateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        tracing::info!("State migrations applied");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl StateClient for PgStateClient {
    async fn create_policy_execution(
        &self,
        execution: PolicyExecution,
    ) -> Result<PolicyExecution, StateError> {
        sqlx::query(
            "INSERT INTO policy_executions (id, \"timestamp\", scheme, location,
             policy_name, selector, sha256_hash, version)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(execution.id)
        .bind(*execution.timestamp.as_datetime())
        .bind(&execution.scheme)
        .bind(&execution.location)
        .bind(&execution.policy_name)
        .bind(&execution.selector)
        .bind(&execution.sha256_hash)
        .bind(&execution.version)
        .execute(&self.pool)
        .await?;

        tracing::debug!(id = %execution.id, policy = %execution.policy_name, "policy execution recorded");
        Ok(execution)
    }

    async fn prune_policy_executions(&self, before: Timestamp) -> Result<u64, StateError> {
        let result = sqlx::query("DELETE FROM policy_executions WHERE \"timestamp\" < $1")
            .bind(*before.as_datetime())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn list_policy_executions(&self) -> Result<Vec<PolicyExecution>, StateError> {
        let rows = sqlx::query_as::<_, PolicyExecutionRow>(
            "SELECT id, \"timestamp\", scheme, location, policy_name, selector,
             sha256_hash, version
             FROM policy_executions ORDER BY \"timestamp\", id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(PolicyExecutionRow::into_record).collect())
    }
}

/// Internal row type for SQLx mapping.
#[derive(sqlx::FromRow)]
struct PolicyExecutionRow {
    id: Uuid,
    timestamp: DateTime<Utc>,
    scheme: String,
    location: String,
    policy_name: String,
    selector: String,
    sha256_hash: String,
    version: String,
}

impl PolicyExecutionRow {
    fn into_record(self) -> PolicyExecution {
        PolicyExecution {
            id: self.id,
            timestamp: Timestamp::from_utc(self.timestamp),
            scheme: self.scheme,
            location: self.location,
            policy_name: self.policy_name,
            selector: self.selector,
            sha256_hash: self.sha256_hash,
            version: self.version,
        }
    }
}
