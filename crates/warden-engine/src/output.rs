//! Output artifacts: one pretty-printed JSON file per executed policy.

use std::path::{Path, PathBuf};

use thiserror::Error;
use warden_core::ExecutionResult;

#[derive(Error, Debug)]
pub enum OutputError {
    #[error("failed to write {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize execution result: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// File name for a policy's result. Path separators in the name become `-`.
pub fn output_file_name(policy_name: &str) -> String {
    let stem: String = policy_name
        .chars()
        .map(|c| if c == '/' || c == '\\' { '-' } else { c })
        .collect();
    format!("{stem}.json")
}

/// Write `result` into `output_dir`, creating the directory if needed.
pub async fn write_execution_result(
    result: &ExecutionResult,
    output_dir: &Path,
) -> Result<PathBuf, OutputError> {
    tokio::fs::create_dir_all(output_dir)
        .await
        .map_err(|source| OutputError::Io {
            path: output_dir.to_path_buf(),
            source,
        })?;

    let path = output_dir.join(output_file_name(&result.policy_name));
    let body = serde_json::to_vec_pretty(result)?;
    tokio::fs::write(&path, body)
        .await
        .map_err(|source| OutputError::Io {
            path: path.clone(),
            source,
        })?;

    tracing::info!(policy = %result.policy_name, path = %path.display(), "wrote execution result");
    Ok(path)
}
