//! # Audit Records
//!
//! A [`PolicyExecution`] records that a policy was run: which source, which
//! selector, which content hash, which version, and when. It is created
//! once before a run and never updated.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::policy::Policy;
use crate::temporal::Timestamp;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyExecution {
    pub id: Uuid,
    pub timestamp: Timestamp,
    /// Source scheme (`local`, `hub`, `github`, or an explicit one).
    pub scheme: String,
    pub location: String,
    /// `name//selector`.
    pub policy_name: String,
    pub selector: String,
    pub sha256_hash: String,
    pub version: String,
}

impl PolicyExecution {
    /// A fresh record for running `policy` with `selector`.
    pub fn for_policy(policy: &Policy, selector: &str) -> Self {
        let selector = selector.trim_matches('/').to_string();
        let policy_name = if selector.is_empty() {
            policy.name.clone()
        } else {
            format!("{}//{}", policy.name, selector)
        };
        let location = policy
            .source_ref()
            .map(|s| s.location().to_string())
            .unwrap_or_default();

        Self {
            id: Uuid::new_v4(),
            timestamp: Timestamp::now(),
            scheme: policy.source_type(),
            location,
            policy_name,
            selector,
            sha256_hash: policy.sha256_hash(),
            version: policy.version(),
        }
    }

    pub fn with_timestamp(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = timestamp;
        self
    }
}
