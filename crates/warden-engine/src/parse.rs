//! # Definition Parsing
//!
//! Policy definitions are YAML documents:
//!
//! ```yaml
//! name: aws
//! title: AWS policies
//! identifiers: [arn]
//! views:
//!   - name: aws_public_buckets
//!     query: SELECT * FROM aws_s3_buckets WHERE public
//! checks:
//!   - name: no-public-buckets
//!     title: Buckets must not be public
//!     query: SELECT arn, 'public' AS reason FROM aws_public_buckets
//! policies:
//!   - name: cis
//!     source: ./cis.yml
//! ```
//!
//! Parsing is followed by structural validation: names are non-empty,
//! sibling names are unique, and automatic checks carry a query.

use std::collections::HashSet;

use thiserror::Error;
use warden_core::{CheckType, Policy};

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("invalid policy definition: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid policy definition: {path}: {reason}")]
    Invalid { path: String, reason: String },
}

impl ParseError {
    fn invalid(path: &str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            path: path.to_string(),
            reason: reason.into(),
        }
    }
}

/// Parse and validate a definition.
pub fn parse_definition(data: &[u8]) -> Result<Policy, ParseError> {
    let policy: Policy = serde_yaml::from_slice(data)?;
    validate(&policy, "")?;
    Ok(policy)
}

fn validate(policy: &Policy, parent: &str) -> Result<(), ParseError> {
    let path = if parent.is_empty() {
        policy.name.clone()
    } else {
        format!("{parent}/{}", policy.name)
    };
    if policy.name.trim().is_empty() {
        return Err(ParseError::invalid(parent_or_root(parent), "policy name is empty"));
    }

    let mut seen = HashSet::new();
    for view in &policy.views {
        if view.name.trim().is_empty() || view.query.trim().is_empty() {
            return Err(ParseError::invalid(&path, "views need a name and a query"));
        }
        if !seen.insert(view.name.to_lowercase()) {
            return Err(ParseError::invalid(&path, format!("duplicate view {:?}", view.name)));
        }
    }

    let mut seen = HashSet::new();
    for check in &policy.checks {
        if check.name.trim().is_empty() {
            return Err(ParseError::invalid(&path, "check name is empty"));
        }
        if !seen.insert(check.name.to_lowercase()) {
            return Err(ParseError::invalid(&path, format!("duplicate check {:?}", check.name)));
        }
        if check.check_type == CheckType::Automatic && check.query.trim().is_empty() {
            return Err(ParseError::invalid(
                &path,
                format!("automatic check {:?} has no query", check.name),
            ));
        }
    }

    let mut seen = HashSet::new();
    for child in &policy.policies {
        if !seen.insert(child.name.to_lowercase()) {
            return Err(ParseError::invalid(&path, format!("duplicate policy {:?}", child.name)));
        }
        validate(child, &path)?;
    }
    Ok(())
}

fn parent_or_root(parent: &str) -> &str {
    if parent.is_empty() {
        "<root>"
    } else {
        parent
    }
}
