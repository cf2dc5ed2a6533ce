//! Listing the selectable paths of a loaded policy tree.
//!
//! Paths use the same shape a selector takes on the command line: the root
//! name, then `//`, then the `/`-separated names below it, all lower-cased.

use warden_core::Policy;

/// Every node of `policy` with its selector path and title, depth-first.
pub fn describe_paths(policy: &Policy) -> Vec<(String, String)> {
    let root = policy.name.to_lowercase();
    let mut out = vec![(root.clone(), policy.title.clone())];
    for child in &policy.policies {
        walk(child, &format!("{root}//"), &mut out);
    }
    out
}

fn walk(policy: &Policy, prefix: &str, out: &mut Vec<(String, String)>) {
    let path = format!("{prefix}{}", policy.name.to_lowercase());
    out.push((path.clone(), policy.title.clone()));
    for child in &policy.policies {
        walk(child, &format!("{path}/"), out);
    }
}

/// Path of the first leaf, following the first child at every level.
pub fn nested_example(policy: &Policy) -> String {
    let mut path = policy.name.to_lowercase();
    let mut node = policy;
    let mut separator = "//";
    while let Some(child) = node.policies.first() {
        path.push_str(separator);
        path.push_str(&child.name.to_lowercase());
        separator = "/";
        node = child;
    }
    path
}
