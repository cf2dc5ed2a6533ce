//! # Selectors
//!
//! A selector is a path that navigates a policy tree by name:
//! `cis_v1.2.0/section_1/1.1`. Segments are compared case-insensitively,
//! so they are stored lower-cased. Empty segments (from `//` or leading and
//! trailing slashes) are dropped. The empty selector addresses the whole
//! tree.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Selector(Vec<String>);

impl Selector {
    pub fn parse(raw: &str) -> Self {
        Self(
            raw.split('/')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_lowercase)
                .collect(),
        )
    }

    /// The selector that addresses the whole tree.
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }
}

impl std::fmt::Display for Selector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0.join("/"))
    }
}

impl From<&str> for Selector {
    fn from(raw: &str) -> Self {
        Self::parse(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn empty_is_root() {
        assert!(Selector::parse("").is_root());
        assert!(Selector::parse("//").is_root());
    }

    #[test]
    fn double_slash_is_collapsed() {
        let s = Selector::parse("sub//missing");
        assert_eq!(s.segments(), &["sub".to_string(), "missing".to_string()]);
        assert_eq!(s.to_string(), "sub/missing");
    }

    #[test]
    fn segments_are_lowercased() {
        assert_eq!(Selector::parse("CIS/Section_1").to_string(), "cis/section_1");
    }

    proptest! {
        #[test]
        fn parse_is_idempotent(raw in "[A-Za-z0-9_/]{0,24}") {
            let once = Selector::parse(&raw);
            let twice = Selector::parse(&once.to_string());
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn no_segment_is_empty(raw in "[a-z/]{0,24}") {
            let s = Selector::parse(&raw);
            prop_assert!(s.segments().iter().all(|seg| !seg.is_empty()));
        }
    }
}
