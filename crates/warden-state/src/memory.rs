//! In-process audit store.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use warden_core::{PolicyExecution, Timestamp};

use crate::{StateClient, StateError};

/// Thread-safe, cloneable [`StateClient`] that keeps records in memory.
///
/// Clones share storage. The lock is never held across an `.await`.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStateClient {
    records: Arc<RwLock<Vec<PolicyExecution>>>,
    failure: Arc<RwLock<Option<String>>>,
}

impl InMemoryStateClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent operation fail with `reason`.
    pub fn fail_with(&self, reason: impl Into<String>) {
        *self.failure.write() = Some(reason.into());
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    fn check_available(&self) -> Result<(), StateError> {
        match self.failure.read().as_ref() {
            Some(reason) => Err(StateError::Unavailable(reason.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl StateClient for InMemoryStateClient {
    async fn create_policy_execution(
        &self,
        execution: PolicyExecution,
    ) -> Result<PolicyExecution, StateError> {
        self.check_available()?;
        self.records.write().push(execution.clone());
        Ok(execution)
    }

    async fn prune_policy_executions(&self, before: Timestamp) -> Result<u64, StateError> {
        self.check_available()?;
        let mut records = self.records.write();
        let initial = records.len();
        records.retain(|r| r.timestamp >= before);
        Ok((initial - records.len()) as u64)
    }

    async fn list_policy_executions(&self) -> Result<Vec<PolicyExecution>, StateError> {
        self.check_available()?;
        let mut records = self.records.read().clone();
        records.sort_by_key(|r| (r.timestamp, r.id));
        Ok(records)
    }
}
