//! Turning a command-line policy argument into a [`Policy`] to load.
//!
//! The argument is a source with an optional selector:
//! `aws//cis_v1.2.0`, `./policies/aws.yml`, `github.com/acme/aws?ref=v1`.
//! The policy is named after the last path component of the location,
//! without a YAML extension.

use warden_core::{CoreError, Diagnostic, DiagnosticKind, Policy, SourceRef};

/// Build the policy addressed by `arg`.
pub fn parse_and_detect(arg: &str) -> Result<Policy, Diagnostic> {
    let arg = arg.trim();
    if arg.is_empty() {
        return Err(user_error(arg, "policy argument is empty"));
    }

    let source = SourceRef::parse(arg);
    let name = policy_name(&source);
    if name.is_empty() {
        return Err(user_error(arg, "could not derive a policy name"));
    }

    let mut policy = Policy::from_source(name, source.location());
    if !source.sub_policy().is_empty() {
        policy.selector = Some(source.sub_policy().to_string());
    }
    Ok(policy)
}

fn policy_name(source: &SourceRef) -> String {
    let mut path = source.path();
    if let Some((_, rest)) = path.split_once("::") {
        path = rest;
    }
    if let Some((_, rest)) = path.split_once("://") {
        path = rest;
    }
    let last = path
        .trim_end_matches(['/', '\\'])
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default();
    if last == "." || last == ".." {
        return String::new();
    }
    let last = last
        .strip_suffix(".yml")
        .or_else(|| last.strip_suffix(".yaml"))
        .unwrap_or(last);
    last.trim_end_matches(".git").to_string()
}

fn user_error(arg: &str, reason: &str) -> Diagnostic {
    let err = CoreError::InvalidSource(arg.to_string(), reason.to_string());
    Diagnostic::from_error(DiagnosticKind::User, &err)
}
