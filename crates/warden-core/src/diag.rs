//! # Diagnostics — Accumulating, Severity-Tagged Issues
//!
//! Loading and execution report problems as values rather than by
//! unwinding. Each [`Diagnostic`] carries a [`Severity`], a
//! [`DiagnosticKind`] that says which layer failed, a summary, and optional
//! details (usually a remediation hint).
//!
//! [`Diagnostics`] composes by concatenation: results from several
//! operations are appended into one collection and reported together.
//! `has_errors()` is the gate that decides whether a batch keeps going;
//! `Info` and `Warning` entries are recorded without aborting anything.

use serde::{Deserialize, Serialize};

/// How serious a diagnostic is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Informational; never affects control flow.
    Info,
    /// Something unexpected that did not stop the operation.
    Warning,
    /// The operation failed. A batch stops on the first error.
    Error,
}

impl Severity {
    /// Return the string value for serialization and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which layer a diagnostic originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    /// Bad input: unparsable definition, unknown selector, source cycle.
    User,
    /// Unexpected internal failure: fetcher errors, recursive resolution
    /// failures, cancellation.
    Internal,
    /// Connection, query, persistence, or pruning failure.
    Database,
}

impl DiagnosticKind {
    /// Return the string value for serialization and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Internal => "internal",
            Self::Database => "database",
        }
    }
}

impl std::fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single issue encountered while loading or executing policies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub kind: DiagnosticKind,
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl Diagnostic {
    /// Create a diagnostic with the given severity.
    pub fn new(severity: Severity, kind: DiagnosticKind, summary: impl Into<String>) -> Self {
        Self {
            severity,
            kind,
            summary: summary.into(),
            details: None,
        }
    }

    /// Create an `Error`-severity diagnostic.
    pub fn error(kind: DiagnosticKind, summary: impl Into<String>) -> Self {
        Self::new(Severity::Error, kind, summary)
    }

    /// Create a `Warning`-severity diagnostic.
    pub fn warning(kind: DiagnosticKind, summary: impl Into<String>) -> Self {
        Self::new(Severity::Warning, kind, summary)
    }

    /// Create an `Info`-severity diagnostic.
    pub fn info(kind: DiagnosticKind, summary: impl Into<String>) -> Self {
        Self::new(Severity::Info, kind, summary)
    }

    /// Wrap an error as an `Error`-severity diagnostic. The summary is the
    /// error's `Display` output.
    pub fn from_error(kind: DiagnosticKind, err: &dyn std::error::Error) -> Self {
        Self::error(kind, err.to_string())
    }

    /// Attach details (typically a remediation hint).
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Prefix the summary with more context, keeping the original text.
    pub fn with_context(mut self, context: impl AsRef<str>) -> Self {
        self.summary = format!("{}: {}", context.as_ref(), self.summary);
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}: {}", self.kind, self.severity, self.summary)?;
        if let Some(details) = &self.details {
            write!(f, " ({details})")?;
        }
        Ok(())
    }
}

impl std::error::Error for Diagnostic {}

/// An ordered collection of diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Diagnostics(Vec<Diagnostic>);

impl Diagnostics {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Record one diagnostic.
    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.0.push(diagnostic);
    }

    /// Append every diagnostic from `other`, preserving order.
    pub fn append(&mut self, other: Diagnostics) {
        self.0.extend(other.0);
    }

    /// Builder form of [`Diagnostics::push`].
    pub fn with(mut self, diagnostic: Diagnostic) -> Self {
        self.push(diagnostic);
        self
    }

    /// Whether any diagnostic has `Error` severity.
    pub fn has_errors(&self) -> bool {
        self.0.iter().any(Diagnostic::is_error)
    }

    /// Whether any diagnostic at all has been recorded.
    pub fn has_diags(&self) -> bool {
        !self.0.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Diagnostic> {
        self.0.iter()
    }

    /// Iterate over the `Error`-severity entries only.
    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.0.iter().filter(|d| d.is_error())
    }

    /// Whether any error of the given kind was recorded.
    pub fn has_error_kind(&self, kind: DiagnosticKind) -> bool {
        self.errors().any(|d| d.kind == kind)
    }
}

impl From<Diagnostic> for Diagnostics {
    fn from(diagnostic: Diagnostic) -> Self {
        Self(vec![diagnostic])
    }
}

impl FromIterator<Diagnostic> for Diagnostics {
    fn from_iter<I: IntoIterator<Item = Diagnostic>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for Diagnostics {
    type Item = Diagnostic;
    type IntoIter = std::vec::IntoIter<Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Diagnostics {
    type Item = &'a Diagnostic;
    type IntoIter = std::slice::Iter<'a, Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl std::fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, d) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("\n")?;
            }
            write!(f, "{d}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Diagnostics {}
