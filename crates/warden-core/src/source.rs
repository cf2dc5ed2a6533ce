//! # Source References
//!
//! A policy source is a location string, optionally followed by a
//! sub-policy selector after a `//` separator:
//!
//! ```text
//! ./policies/aws//cis_v1.2.0/section_1
//! github.com/acme/aws-policies?ref=v0.3.1//cis_v1.2.0
//! https://example.com/policies/aws.yml//cis_v1.2.0
//! aws
//! ```
//!
//! The `//` inside a URL scheme (`https://`) is never treated as the
//! separator. A `?ref=` query string that follows the selector stays with
//! the location, since it versions the location and not the selector.

use serde::{Deserialize, Serialize};

/// Where a policy definition comes from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceScheme {
    /// A filesystem path.
    Local,
    /// A bare name resolved through the hub cache directory.
    Hub,
    /// A `github.com/owner/repo` shorthand.
    Github,
    /// An explicit `scheme://` or forced `scheme::` prefix.
    Explicit(String),
}

impl SourceScheme {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Local => "local",
            Self::Hub => "hub",
            Self::Github => "github",
            Self::Explicit(s) => s,
        }
    }
}

impl std::fmt::Display for SourceScheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed source string: location plus optional sub-policy selector.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceRef {
    location: String,
    sub_policy: String,
}

impl SourceRef {
    /// Split `raw` into location and sub-policy.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        // Skip past a forced getter (`git::`) and a URL scheme (`https://`)
        // before looking for the selector separator.
        let mut search_from = prefix_marker(raw, "::").map(|i| i + 2).unwrap_or(0);
        if let Some(i) = prefix_marker(&raw[search_from..], "://") {
            search_from += i + 3;
        }

        let Some(idx) = raw[search_from..].find("//").map(|i| i + search_from) else {
            return Self {
                location: raw.to_string(),
                sub_policy: String::new(),
            };
        };

        let mut location = raw[..idx].to_string();
        let mut rest = &raw[idx + 2..];
        if let Some(q) = rest.find('?') {
            location.push_str(&rest[q..]);
            rest = &rest[..q];
        }

        Self {
            location,
            sub_policy: rest.trim_matches('/').to_string(),
        }
    }

    /// The location without the selector.
    pub fn location(&self) -> &str {
        &self.location
    }

    /// The selector following `//`, or the empty string.
    pub fn sub_policy(&self) -> &str {
        &self.sub_policy
    }

    /// The location without any `?query` suffix.
    pub fn path(&self) -> &str {
        self.location
            .split_once('?')
            .map(|(p, _)| p)
            .unwrap_or(&self.location)
    }

    /// Classify the location.
    pub fn scheme(&self) -> SourceScheme {
        let loc = self.location.as_str();
        if let Some(i) = prefix_marker(loc, "::") {
            return SourceScheme::Explicit(loc[..i].to_string());
        }
        if let Some(i) = prefix_marker(loc, "://") {
            return SourceScheme::Explicit(loc[..i].to_string());
        }
        if loc.starts_with("github.com/") {
            return SourceScheme::Github;
        }
        let path = self.path();
        if path.starts_with('.') || path.starts_with('/') || path.starts_with('~') {
            return SourceScheme::Local;
        }
        if !path.contains('/') && !path.contains('\\') {
            return SourceScheme::Hub;
        }
        SourceScheme::Local
    }

    /// The `ref` query parameter, or `"latest"`.
    pub fn version(&self) -> String {
        let Some((_, query)) = self.location.split_once('?') else {
            return "latest".to_string();
        };
        query
            .split('&')
            .find_map(|kv| kv.strip_prefix("ref="))
            .filter(|v| !v.is_empty())
            .unwrap_or("latest")
            .to_string()
    }
}

/// Position of `marker` when it appears before the first `/`, as a forced
/// getter (`git::`) or URL scheme (`https://`) does.
fn prefix_marker(raw: &str, marker: &str) -> Option<usize> {
    raw.find(marker)
        .filter(|&i| i > 0 && !raw[..i].contains('/'))
}

impl std::fmt::Display for SourceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.sub_policy.is_empty() {
            f.write_str(&self.location)
        } else {
            write!(f, "{}//{}", self.location, self.sub_policy)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_path_without_selector() {
        let s = SourceRef::parse("./policies/aws");
        assert_eq!(s.location(), "./policies/aws");
        assert_eq!(s.sub_policy(), "");
        assert_eq!(s.scheme(), SourceScheme::Local);
    }

    #[test]
    fn local_path_with_selector() {
        let s = SourceRef::parse("./policies/aws//cis_v1.2.0/section_1");
        assert_eq!(s.location(), "./policies/aws");
        assert_eq!(s.sub_policy(), "cis_v1.2.0/section_1");
    }

    #[test]
    fn url_scheme_is_not_a_separator() {
        let s = SourceRef::parse("https://example.com/aws.yml");
        assert_eq!(s.location(), "https://example.com/aws.yml");
        assert_eq!(s.sub_policy(), "");
        assert_eq!(s.scheme(), SourceScheme::Explicit("https".into()));

        let s = SourceRef::parse("https://example.com/aws.yml//cis");
        assert_eq!(s.location(), "https://example.com/aws.yml");
        assert_eq!(s.sub_policy(), "cis");
    }

    #[test]
    fn forced_getter_prefix() {
        let s = SourceRef::parse("git::https://example.com/repo.git//aws");
        assert_eq!(s.location(), "git::https://example.com/repo.git");
        assert_eq!(s.sub_policy(), "aws");
        assert_eq!(s.scheme(), SourceScheme::Explicit("git".into()));
    }

    #[test]
    fn ref_query_stays_with_location() {
        let s = SourceRef::parse("github.com/acme/aws//cis?ref=v0.3.1");
        assert_eq!(s.location(), "github.com/acme/aws?ref=v0.3.1");
        assert_eq!(s.sub_policy(), "cis");
        assert_eq!(s.path(), "github.com/acme/aws");
        assert_eq!(s.version(), "v0.3.1");
        assert_eq!(s.scheme(), SourceScheme::Github);
    }

    #[test]
    fn version_defaults_to_latest() {
        assert_eq!(SourceRef::parse("aws").version(), "latest");
        assert_eq!(SourceRef::parse("aws?depth=1").version(), "latest");
    }

    #[test]
    fn bare_name_is_hub() {
        assert_eq!(SourceRef::parse("aws").scheme(), SourceScheme::Hub);
        assert_eq!(SourceRef::parse("aws//cis").scheme(), SourceScheme::Hub);
    }

    #[test]
    fn double_colon_in_selector_is_not_a_getter() {
        let s = SourceRef::parse("./a//x::y");
        assert_eq!(s.location(), "./a");
        assert_eq!(s.sub_policy(), "x::y");
        assert_eq!(s.scheme(), SourceScheme::Local);

        let s = SourceRef::parse("aws//cis://odd");
        assert_eq!(s.location(), "aws");
        assert_eq!(s.sub_policy(), "cis://odd");
        assert_eq!(s.scheme(), SourceScheme::Hub);
    }

    #[test]
    fn display_round_trips_selector() {
        let s = SourceRef::parse("./aws//cis/1");
        assert_eq!(s.to_string(), "./aws//cis/1");
    }
}
