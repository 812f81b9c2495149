//! Domain types shared by the parser, the document store and the handlers.
//!
//! Line numbers are 1-based here, exactly as the backend reports them. The
//! conversion to the protocol's 0-based lines happens at the boundary
//! ([`Diagnostic::protocol_line`]).

use std::fmt;

use serde::Serialize;

/// Severity tag attached to a diagnostic by the backend.
///
/// The set is closed: anything that is not `advisory` or `mandatory`
/// collapses to [`SeverityTag::Unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SeverityTag {
    Advisory,
    Mandatory,
    #[default]
    Unknown,
}

impl SeverityTag {
    /// Total mapping from the backend's free-form tag.
    #[must_use]
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "advisory" => Self::Advisory,
            "mandatory" => Self::Mandatory,
            _ => Self::Unknown,
        }
    }

    /// Protocol severity: advisory → Warning, mandatory → Error, else Hint.
    #[must_use]
    pub fn to_lsp(self) -> lsp_types::DiagnosticSeverity {
        match self {
            Self::Advisory => lsp_types::DiagnosticSeverity::WARNING,
            Self::Mandatory => lsp_types::DiagnosticSeverity::ERROR,
            Self::Unknown => lsp_types::DiagnosticSeverity::HINT,
        }
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Advisory => "advisory",
            Self::Mandatory => "mandatory",
            Self::Unknown => "unknown",
        }
    }
}

/// A single diagnostic produced by analysing a document.
///
/// Immutable once constructed; fields are read through accessors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    /// 1-indexed line number.
    line_number: u32,
    severity: SeverityTag,
    source: String,
    rule: String,
    description: String,
}

impl Diagnostic {
    #[must_use]
    pub fn new(
        line_number: u32,
        severity: SeverityTag,
        source: impl Into<String>,
        rule: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            line_number,
            severity,
            source: source.into(),
            rule: rule.into(),
            description: description.into(),
        }
    }

    /// 1-indexed line number.
    #[must_use]
    pub fn line_number(&self) -> u32 {
        self.line_number
    }

    /// 0-indexed line number for the protocol boundary.
    #[must_use]
    pub fn protocol_line(&self) -> u32 {
        self.line_number.saturating_sub(1)
    }

    #[must_use]
    pub fn severity(&self) -> SeverityTag {
        self.severity
    }

    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    #[must_use]
    pub fn rule(&self) -> &str {
        &self.rule
    }

    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Protocol diagnostic code: `"<source> <rule>"`.
    #[must_use]
    pub fn code(&self) -> String {
        format!("{} {}", self.source, self.rule)
    }

    /// One-line human summary, e.g. `line 2: [mandatory] lint undecl: foo is undeclared`.
    #[must_use]
    pub fn pretty_text(&self) -> String {
        format!(
            "line {}: [{}] {}: {}",
            self.line_number,
            self.severity.label(),
            self.code(),
            self.description
        )
    }
}

/// Monotonic per-document counter bumped on every accepted text change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DocumentVersion(u64);

impl DocumentVersion {
    pub(crate) const FIRST: Self = Self(1);

    pub(crate) fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for DocumentVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Consistent read of one document.
///
/// `analysis` is always the raw text `diagnostics` were parsed from; a
/// failed attempt recorded afterwards is reported separately in
/// `latest_attempt`.
#[derive(Debug, Clone)]
pub struct DocumentSnapshot {
    pub uri: String,
    pub version: DocumentVersion,
    pub text: String,
    pub analysis: Option<String>,
    pub latest_attempt: Option<String>,
    pub diagnostics: Vec<Diagnostic>,
}
