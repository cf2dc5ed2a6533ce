//! # Policy Tree
//!
//! A [`Policy`] is a named, versioned, hierarchical collection of checks.
//! Policies nest: each may contain sub-policies, and any node may point at
//! an external definition through `source` instead of listing its content
//! inline.
//!
//! ## Lifecycle
//!
//! - Created by deserializing a definition (YAML in the engine) or by the
//!   CLI from a command-line argument.
//! - Mutated only by the loader, which replaces sourced nodes with their
//!   fetched definitions and attaches [`PolicyMeta`].
//! - Treated as immutable once the loader returns it.
//!
//! A policy with `source == None` is already fully resolved; the loader
//! only recurses into its children.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::source::SourceRef;

/// Whether a check is evaluated or only informational.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckType {
    /// Listed in results but never executed.
    Manual,
    /// Executed; every returned row is a violation.
    #[default]
    Automatic,
}

impl CheckType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Automatic => "automatic",
        }
    }
}

impl std::fmt::Display for CheckType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single named query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Check {
    pub name: String,
    #[serde(default, alias = "title")]
    pub description: String,
    #[serde(default, rename = "type")]
    pub check_type: CheckType,
    #[serde(default)]
    pub query: String,
}

impl Check {
    /// An automatic check with the given query.
    pub fn automatic(name: impl Into<String>, description: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            check_type: CheckType::Automatic,
            query: query.into(),
        }
    }

    /// A manual (informational) check.
    pub fn manual(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            check_type: CheckType::Manual,
            query: String::new(),
        }
    }

    pub fn is_automatic(&self) -> bool {
        self.check_type == CheckType::Automatic
    }
}

/// A view created in the session before checks run, so checks can
/// reference a shared shape by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct View {
    pub name: String,
    pub query: String,
}

/// Resolution metadata attached by the loader.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyMeta {
    /// Directory the definition was read from. Relative sources of nested
    /// policies resolve against it.
    pub directory: PathBuf,
    /// Effective selector after applying the caller's override.
    pub sub_policy: String,
    pub version: String,
    /// Lowercase hex SHA-256 of the fetched definition.
    pub sha256_hash: String,
}

/// A named, hierarchical collection of checks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    pub name: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Explicit selector; takes precedence over one embedded in `source`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    /// Columns that identify the violating resource in a check's rows.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub identifiers: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub views: Vec<View>,
    #[serde(default)]
    pub checks: Vec<Check>,
    #[serde(default)]
    pub policies: Vec<Policy>,
    #[serde(skip)]
    pub meta: Option<PolicyMeta>,
}

impl Policy {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// A policy that resolves through `source` when loaded.
    pub fn from_source(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: Some(source.into()),
            ..Self::default()
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_check(mut self, check: Check) -> Self {
        self.checks.push(check);
        self
    }

    pub fn with_policy(mut self, policy: Policy) -> Self {
        self.policies.push(policy);
        self
    }

    pub fn with_view(mut self, name: impl Into<String>, query: impl Into<String>) -> Self {
        self.views.push(View {
            name: name.into(),
            query: query.into(),
        });
        self
    }

    pub fn with_selector(mut self, selector: impl Into<String>) -> Self {
        self.selector = Some(selector.into());
        self
    }

    pub fn with_identifiers<I, S>(mut self, identifiers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.identifiers = identifiers.into_iter().map(Into::into).collect();
        self
    }

    /// The parsed `source`, if any.
    pub fn source_ref(&self) -> Option<SourceRef> {
        self.source.as_deref().map(SourceRef::parse)
    }

    /// The effective selector.
    ///
    /// Loader metadata wins; otherwise the explicit selector; otherwise the
    /// part of `source` after `//`.
    pub fn sub_policy(&self) -> String {
        if let Some(meta) = &self.meta {
            return meta.sub_policy.clone();
        }
        if let Some(selector) = &self.selector {
            return selector.trim_matches('/').to_string();
        }
        self.source_ref()
            .map(|s| s.sub_policy().to_string())
            .unwrap_or_default()
    }

    /// The resolved version, the version encoded in `source`, or the empty
    /// string for inline policies.
    pub fn version(&self) -> String {
        if let Some(meta) = &self.meta {
            return meta.version.clone();
        }
        self.source_ref().map(|s| s.version()).unwrap_or_default()
    }

    /// Scheme of the source, or `"inline"` for policies without one.
    pub fn source_type(&self) -> String {
        self.source_ref()
            .map(|s| s.scheme().to_string())
            .unwrap_or_else(|| "inline".to_string())
    }

    /// Content hash of the fetched definition, or the empty string.
    pub fn sha256_hash(&self) -> String {
        self.meta
            .as_ref()
            .map(|m| m.sha256_hash.clone())
            .unwrap_or_default()
    }

    /// `name//selector`, or just `name` when no selector applies.
    pub fn qualified_name(&self) -> String {
        let sub = self.sub_policy();
        if sub.is_empty() {
            self.name.clone()
        } else {
            format!("{}//{}", self.name, sub)
        }
    }

    /// Whether this node or any descendant has a check of either kind.
    pub fn has_checks(&self) -> bool {
        !self.checks.is_empty() || self.policies.iter().any(Policy::has_checks)
    }

    /// Number of automatic checks in this node and all descendants.
    pub fn total_queries(&self) -> usize {
        self.checks.iter().filter(|c| c.is_automatic()).count()
            + self.policies.iter().map(Policy::total_queries).sum::<usize>()
    }

    /// Names of the direct sub-policies.
    pub fn policy_names(&self) -> Vec<String> {
        self.policies.iter().map(|p| p.name.clone()).collect()
    }

    /// Find a direct sub-policy by name, case-insensitively.
    pub fn find_policy(&self, name: &str) -> Option<&Policy> {
        let wanted = name.to_lowercase();
        self.policies.iter().find(|p| p.name.to_lowercase() == wanted)
    }

    /// Find a check of this node by name, case-insensitively.
    pub fn find_check(&self, name: &str) -> Option<&Check> {
        let wanted = name.to_lowercase();
        self.checks.iter().find(|c| c.name.to_lowercase() == wanted)
    }
}

impl std::fmt::Display for Policy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.qualified_name())
    }
}

/// An ordered list of policies, as requested by a caller.
pub type Policies = Vec<Policy>;
