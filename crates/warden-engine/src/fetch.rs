//! # Policy Source Fetching
//!
//! A [`SourceFetcher`] turns a [`SourceRef`] into the raw bytes of a policy
//! definition plus the directory it came from. The loader hashes and parses
//! the bytes; the directory anchors relative sources of nested policies.
//!
//! [`LocalFetcher`] handles filesystem paths (`./aws.yml`, `/abs/dir`,
//! `~/policies`, `file://...`) and hub names (`aws`), which resolve to
//! `<hub directory>/<name>/policy.yml`. Remote schemes are rejected; a
//! networked fetcher can be plugged in through the trait.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use warden_core::{SourceRef, SourceScheme};

/// File names tried, in order, when a source points at a directory.
pub const DEFINITION_FILE_NAMES: [&str; 2] = ["policy.yml", "policy.yaml"];

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("policy source {source_ref} not found (looked in {})", .path.display())]
    NotFound { source_ref: String, path: PathBuf },

    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unsupported source scheme {scheme:?} in {source_ref}")]
    UnsupportedScheme { scheme: String, source_ref: String },
}

/// A fetched definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fetched {
    pub data: Vec<u8>,
    /// The file the definition was read from.
    pub path: PathBuf,
    /// Directory that relative nested sources resolve against.
    pub directory: PathBuf,
}

#[async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Fetch `source`. Relative paths resolve against `base`; hub names
    /// resolve inside `hub_directory`.
    async fn fetch(
        &self,
        source: &SourceRef,
        base: &Path,
        hub_directory: &Path,
    ) -> Result<Fetched, FetchError>;
}

/// Filesystem and hub-cache fetcher.
#[derive(Debug, Clone, Default)]
pub struct LocalFetcher;

impl LocalFetcher {
    pub fn new() -> Self {
        Self
    }

    fn resolve(source: &SourceRef, base: &Path, hub_directory: &Path) -> Result<PathBuf, FetchError> {
        let raw = source.path();
        match source.scheme() {
            SourceScheme::Hub => Ok(hub_directory.join(raw)),
            SourceScheme::Local => Ok(expand_local(raw, base)),
            SourceScheme::Explicit(scheme) if scheme == "file" => {
                let path = raw.trim_start_matches("file://");
                Ok(expand_local(path, base))
            }
            other => Err(FetchError::UnsupportedScheme {
                scheme: other.to_string(),
                source_ref: source.to_string(),
            }),
        }
    }
}

fn expand_local(raw: &str, base: &Path) -> PathBuf {
    if let Some(rest) = raw.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    let path = Path::new(raw);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

#[async_trait]
impl SourceFetcher for LocalFetcher {
    async fn fetch(
        &self,
        source: &SourceRef,
        base: &Path,
        hub_directory: &Path,
    ) -> Result<Fetched, FetchError> {
        let target = Self::resolve(source, base, hub_directory)?;

        let file = if tokio::fs::metadata(&target).await.is_ok_and(|m| m.is_dir()) {
            let mut found = None;
            for name in DEFINITION_FILE_NAMES {
                let candidate = target.join(name);
                if tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
                    found = Some(candidate);
                    break;
                }
            }
            found.ok_or_else(|| FetchError::NotFound {
                source_ref: source.to_string(),
                path: target.clone(),
            })?
        } else {
            target
        };

        let data = tokio::fs::read(&file).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => FetchError::NotFound {
                source_ref: source.to_string(),
                path: file.clone(),
            },
            _ => FetchError::Io {
                path: file.clone(),
                source: e,
            },
        })?;

        let path = tokio::fs::canonicalize(&file).await.unwrap_or(file);
        let directory = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();

        tracing::debug!(source = %source, path = %path.display(), bytes = data.len(), "fetched policy source");
        Ok(Fetched {
            data,
            path,
            directory,
        })
    }
}
