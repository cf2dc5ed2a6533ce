//! # Policy Loading
//!
//! Resolves a policy's `source` into a parsed tree and recurses into nested
//! sub-policies until no unresolved source remains.
//!
//! ## Error classes
//!
//! - Parse failures and source cycles are user errors.
//! - Fetch failures, failures of nested resolution, and cancellation are
//!   internal errors.
//!
//! Loading is fail-fast: the first error stops the walk.
//!
//! ## Cycles
//!
//! The set of `(file, selector)` pairs currently being resolved is threaded
//! through the recursion. Meeting a pair again means the source graph
//! loops back on itself.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use warden_core::{sha256_hex, Diagnostic, DiagnosticKind, Diagnostics, Policy, PolicyMeta};

use crate::fetch::SourceFetcher;
use crate::parse::parse_definition;

type Ancestry = HashSet<(PathBuf, String)>;

/// Loads policy trees through a [`SourceFetcher`].
#[derive(Clone)]
pub struct PolicyLoader {
    fetcher: Arc<dyn SourceFetcher>,
}

impl std::fmt::Debug for PolicyLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyLoader").finish_non_exhaustive()
    }
}

impl PolicyLoader {
    pub fn new(fetcher: Arc<dyn SourceFetcher>) -> Self {
        Self { fetcher }
    }

    /// Resolve `policy` and all of its nested sources.
    ///
    /// `directory` is the hub directory bare names resolve in. Top-level
    /// relative paths resolve against the working directory.
    pub async fn load(
        &self,
        cancel: &CancellationToken,
        directory: &Path,
        policy: Policy,
    ) -> Result<Policy, Diagnostics> {
        self.load_inner(cancel, directory, PathBuf::new(), policy, Ancestry::new())
            .await
    }

    fn load_inner<'a>(
        &'a self,
        cancel: &'a CancellationToken,
        directory: &'a Path,
        base: PathBuf,
        policy: Policy,
        mut ancestry: Ancestry,
    ) -> BoxFuture<'a, Result<Policy, Diagnostics>> {
        Box::pin(async move {
            if cancel.is_cancelled() {
                return Err(Diagnostic::error(
                    DiagnosticKind::Internal,
                    format!("loading of policy {} cancelled", policy.name),
                )
                .into());
            }

            let mut policy = policy;
            let mut base = base;

            if let Some(raw_source) = policy.source.clone() {
                let source = warden_core::SourceRef::parse(&raw_source);
                let selector = match &policy.selector {
                    Some(s) => s.trim_matches('/').to_string(),
                    None => source.sub_policy().to_string(),
                };

                let fetched = self
                    .fetcher
                    .fetch(&source, &base, directory)
                    .await
                    .map_err(|e| {
                        Diagnostics::from(
                            Diagnostic::from_error(DiagnosticKind::Internal, &e)
                                .with_context(format!("failed to fetch policy {}", policy.name)),
                        )
                    })?;

                if !ancestry.insert((fetched.path.clone(), selector.clone())) {
                    tracing::error!(source = %raw_source, selector = %selector, "policy source cycle detected");
                    return Err(Diagnostic::error(
                        DiagnosticKind::User,
                        format!(
                            "policy source cycle detected: {} ({}) is already being loaded",
                            raw_source,
                            fetched.path.display()
                        ),
                    )
                    .with_details("remove the nested policy that points back at one of its ancestors")
                    .into());
                }

                let mut parsed = parse_definition(&fetched.data).map_err(|e| {
                    Diagnostics::from(
                        Diagnostic::from_error(DiagnosticKind::User, &e)
                            .with_context(format!("failed to parse policy {}", raw_source)),
                    )
                })?;

                tracing::debug!(
                    policy = %parsed.name,
                    source = %raw_source,
                    version = %source.version(),
                    selector = %selector,
                    "loaded policy definition"
                );

                parsed.meta = Some(PolicyMeta {
                    directory: fetched.directory.clone(),
                    sub_policy: selector,
                    version: source.version(),
                    sha256_hash: sha256_hex(&fetched.data),
                });
                parsed.source = Some(raw_source);
                parsed.selector = policy.selector.take();
                if parsed.identifiers.is_empty() {
                    parsed.identifiers = std::mem::take(&mut policy.identifiers);
                }

                base = fetched.directory;
                policy = parsed;
            }

            let children = std::mem::take(&mut policy.policies);
            let mut resolved = Vec::with_capacity(children.len());
            for child in children {
                let name = child.name.clone();
                match self
                    .load_inner(cancel, directory, base.clone(), child, ancestry.clone())
                    .await
                {
                    Ok(p) => resolved.push(p),
                    Err(mut diags) => {
                        diags.push(Diagnostic::error(
                            DiagnosticKind::Internal,
                            format!("failed to load nested policy {}//{}", policy.name, name),
                        ));
                        return Err(diags);
                    }
                }
            }
            policy.policies = resolved;

            Ok(policy)
        })
    }
}
