//! # Error Types
//!
//! Errors raised by the pure model layer. All errors use `thiserror`; the
//! engine converts them into [`Diagnostic`](crate::Diagnostic)s at the
//! orchestration boundary.

use thiserror::Error;

/// Errors produced by the model layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// A selector did not address any sub-policy or check.
    ///
    /// `path` is the fully qualified `policy//selector` string.
    #[error("{path}: policy or query not found")]
    PolicyOrQueryNotFound { path: String },

    /// A policy argument or source string could not be parsed.
    #[error("invalid policy source {0:?}: {1}")]
    InvalidSource(String, String),

    /// A timestamp could not be parsed.
    #[error("invalid timestamp {0:?}: {1}")]
    InvalidTimestamp(String, String),
}
