//! # warden-core — Foundational Types for warden
//!
//! This crate is the leaf of the warden workspace. It defines the policy
//! tree, selectors and filtering, source references, execution results,
//! audit records, and the diagnostics collection that every other crate
//! reports through. It performs no I/O.
//!
//! ## Key Design Principles
//!
//! 1. **Violations are data.** A failing check produces a `QueryResult` with
//!    `passed == false`. Only operational failures (bad query, broken
//!    connection, unresolvable source) become [`Diagnostic`]s.
//!
//! 2. **Diagnostics accumulate.** [`Diagnostics`] is a severity-tagged list
//!    that composes by concatenation. `has_errors()` is the single gate that
//!    decides whether a batch continues.
//!
//! 3. **Deterministic output.** Rows are sorted on construction, selectors
//!    are normalised to lower case, and content hashes are lowercase hex.
//!
//! ## Crate Policy
//!
//! - No dependencies on other `warden-*` crates.
//! - No `unsafe` code.
//! - No `panic!()` or `.unwrap()` outside tests.

pub mod diag;
pub mod digest;
pub mod error;
pub mod execution;
pub mod filter;
pub mod policy;
pub mod result;
pub mod selector;
pub mod source;
pub mod temporal;

pub use diag::{Diagnostic, DiagnosticKind, Diagnostics, Severity};
pub use digest::sha256_hex;
pub use error::CoreError;
pub use execution::PolicyExecution;
pub use filter::{filter, PolicySubset};
pub use policy::{Check, CheckType, Policies, Policy, PolicyMeta, View};
pub use result::{sort_rows, ExecutionResult, QueryResult, Row, Update};
pub use selector::Selector;
pub use source::{SourceRef, SourceScheme};
pub use temporal::Timestamp;
