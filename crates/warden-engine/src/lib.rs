//! # warden-engine — Policy Resolution and Execution
//!
//! Turns policy references into executed, aggregated results.
//!
//! ## Pipeline
//!
//! ```text
//! RunRequest ─▶ PolicyLoader ─▶ StateClient (optional audit record)
//!                    │
//!                    ▼
//!              filter(selector) ─▶ PolicyExecutor ─▶ ExecutionResult ─▶ output file
//!                                      │
//!                                      └─▶ ProgressTracker ─▶ UpdateCallback
//! ```
//!
//! ## Seams
//!
//! Every external dependency is a trait so it can be replaced in tests:
//!
//! - [`SourceFetcher`](fetch::SourceFetcher) reads policy definitions.
//! - [`Storage`](session::Storage) opens a [`Session`](session::Session)
//!   per policy run.
//! - [`PolicyExecutor`](executor::PolicyExecutor) runs the checks of a
//!   filtered policy.
//! - [`StateClient`](warden_state::StateClient) records audit entries.
//!
//! ## Crate Policy
//!
//! - Operational failures are reported as [`Diagnostics`](warden_core::Diagnostics);
//!   check violations are data in [`ExecutionResult`](warden_core::ExecutionResult).
//! - Every long-running call takes a `CancellationToken`.
//! - No `.unwrap()` outside tests.

pub mod describe;
pub mod detect;
pub mod executor;
pub mod fetch;
pub mod loader;
pub mod orchestrator;
pub mod output;
pub mod parse;
pub mod progress;
pub mod session;
pub mod snapshot;

pub use describe::{describe_paths, nested_example};
pub use detect::parse_and_detect;
pub use executor::{create_views, ExecuteRequest, PolicyExecutor, SqlExecutor};
pub use fetch::{FetchError, Fetched, LocalFetcher, SourceFetcher};
pub use loader::PolicyLoader;
pub use orchestrator::{PolicyRunner, RunOutcome, RunRequest, RunResponse};
pub use output::{write_execution_result, OutputError};
pub use parse::{parse_definition, ParseError};
pub use progress::{ProgressTracker, UpdateCallback};
pub use session::{MemoryStorage, PgStorage, QueryRows, Session, SessionError, Storage};
pub use snapshot::{snapshot, SnapshotError};
