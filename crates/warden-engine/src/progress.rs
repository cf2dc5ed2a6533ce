//! # Progress Tracking
//!
//! [`ProgressTracker`] accumulates "N more checks finished" notifications for
//! one policy run and forwards a cumulative [`Update`] to the caller's
//! callback.
//!
//! The increment and the callback happen under one lock, so callers observe
//! a non-decreasing `finished_queries` sequence even when checks complete
//! concurrently. The count is clamped to the total.

use std::sync::Arc;

use parking_lot::Mutex;
use warden_core::Update;

/// Receives progress updates.
pub type UpdateCallback = Arc<dyn Fn(Update) + Send + Sync>;

pub struct ProgressTracker {
    policy_name: String,
    source: String,
    version: String,
    total: usize,
    finished: Mutex<usize>,
    callback: Option<UpdateCallback>,
}

impl std::fmt::Debug for ProgressTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressTracker")
            .field("policy_name", &self.policy_name)
            .field("total", &self.total)
            .field("finished", &*self.finished.lock())
            .finish_non_exhaustive()
    }
}

impl ProgressTracker {
    pub fn new(
        policy_name: impl Into<String>,
        source: impl Into<String>,
        version: impl Into<String>,
        total: usize,
        callback: Option<UpdateCallback>,
    ) -> Self {
        Self {
            policy_name: policy_name.into(),
            source: source.into(),
            version: version.into(),
            total,
            finished: Mutex::new(0),
            callback,
        }
    }

    /// Emit the initial zero-progress update.
    pub fn start(&self) -> Update {
        let finished = self.finished.lock();
        self.notify(*finished, None)
    }

    /// Add `delta` finished checks and emit the new cumulative update.
    pub fn advance(&self, delta: usize) -> Update {
        let mut finished = self.finished.lock();
        *finished = finished.saturating_add(delta).min(self.total);
        self.notify(*finished, None)
    }

    /// Emit an update carrying `error` without changing the count.
    pub fn fail(&self, error: impl Into<String>) -> Update {
        let finished = self.finished.lock();
        self.notify(*finished, Some(error.into()))
    }

    pub fn finished(&self) -> usize {
        *self.finished.lock()
    }

    pub fn total(&self) -> usize {
        self.total
    }

    // Called with the lock held.
    fn notify(&self, finished: usize, error: Option<String>) -> Update {
        let update = Update {
            policy_name: self.policy_name.clone(),
            source: self.source.clone(),
            version: self.version.clone(),
            finished_queries: finished,
            queries_count: self.total,
            error,
        };
        if let Some(callback) = &self.callback {
            callback(update.clone());
        }
        update
    }
}
