//! # Policy Filtering
//!
//! Narrows a loaded policy tree to the branch addressed by a [`Selector`].
//!
//! ## Matching
//!
//! Selector segments are matched against sub-policy names one level at a
//! time, case-insensitively. If the last segment does not name a
//! sub-policy but does name a check of the node reached so far, that single
//! check is selected. Any other miss leaves the subset empty and records
//! the sub-policies that were available at the point of failure.
//!
//! Views and identifiers declared along the matched path are carried into
//! the subset, so the matched branch can be executed on its own.

use crate::diag::{Diagnostic, DiagnosticKind};
use crate::error::CoreError;
use crate::policy::{Policy, View};
use crate::selector::Selector;

/// The part of a policy tree addressed by a selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicySubset {
    root_name: String,
    selector: Selector,
    matched: Option<Policy>,
    available: Vec<String>,
}

impl PolicySubset {
    /// `root//selector`, or `root` for the whole tree.
    pub fn qualified_name(&self) -> String {
        if self.selector.is_root() {
            self.root_name.clone()
        } else {
            format!("{}//{}", self.root_name, self.selector)
        }
    }

    pub fn root_name(&self) -> &str {
        &self.root_name
    }

    pub fn selector(&self) -> &Selector {
        &self.selector
    }

    /// The matched branch, or `None` if the selector missed.
    pub fn policy(&self) -> Option<&Policy> {
        self.matched.as_ref()
    }

    /// Sub-policy names available where matching stopped.
    pub fn available(&self) -> &[String] {
        &self.available
    }

    pub fn has_checks(&self) -> bool {
        self.matched.as_ref().is_some_and(Policy::has_checks)
    }

    pub fn total_queries(&self) -> usize {
        self.matched.as_ref().map_or(0, Policy::total_queries)
    }

    /// The matched branch, or a user diagnostic naming the policy and the
    /// selector with a hint pointing at `warden describe`.
    pub fn ensure_checks(&self) -> Result<&Policy, Diagnostic> {
        match &self.matched {
            Some(policy) if policy.has_checks() => Ok(policy),
            _ => {
                let path = self.qualified_name();
                let err = CoreError::PolicyOrQueryNotFound { path: path.clone() };
                Err(Diagnostic::from_error(DiagnosticKind::User, &err).with_details(format!(
                    "{path} not found, run `warden describe {}` to find all available policies",
                    self.root_name
                )))
            }
        }
    }
}

/// Narrow `policy` to the branch addressed by `selector`.
pub fn filter(policy: &Policy, selector: &str) -> PolicySubset {
    let selector = Selector::parse(selector);
    let segments = selector.segments().to_vec();

    let mut node = policy;
    let mut views: Vec<View> = policy.views.clone();
    let mut identifiers = policy.identifiers.clone();
    let mut single_check = None;

    for (i, segment) in segments.iter().enumerate() {
        if let Some(child) = node.find_policy(segment) {
            node = child;
            views.extend(child.views.iter().cloned());
            if !child.identifiers.is_empty() {
                identifiers = child.identifiers.clone();
            }
            continue;
        }
        let is_last = i + 1 == segments.len();
        match node.find_check(segment) {
            Some(check) if is_last => single_check = Some(check.clone()),
            _ => {
                return PolicySubset {
                    root_name: policy.name.clone(),
                    available: node.policy_names(),
                    selector,
                    matched: None,
                };
            }
        }
    }

    let mut matched = node.clone();
    if let Some(check) = single_check {
        matched.checks = vec![check];
        matched.policies.clear();
    }
    matched.views = dedup_views(views);
    matched.identifiers = identifiers;
    matched.meta = policy.meta.clone();

    PolicySubset {
        root_name: policy.name.clone(),
        available: matched.policy_names(),
        selector,
        matched: Some(matched),
    }
}

// A later declaration of the same view name replaces an earlier one.
fn dedup_views(views: Vec<View>) -> Vec<View> {
    let mut out: Vec<View> = Vec::with_capacity(views.len());
    for view in views {
        match out.iter_mut().find(|v| v.name == view.name) {
            Some(existing) => *existing = view,
            None => out.push(view),
        }
    }
    out
}
