//! Backend output → [`Diagnostic`]s, and [`Diagnostic`]s → protocol shapes.
//!
//! The backend is asked for a JSON array of
//! `{"line_number", "severity", "source", "rule", "description"}` objects.
//! Parsing is all-or-nothing: one bad entry rejects the whole payload.

use lsp_types::{
    CodeDescription, DiagnosticRelatedInformation, Location, NumberOrString, Position, Range, Url,
};
use serde::Deserialize;
use serde_json::Value;

use crate::types::{Diagnostic, SeverityTag};

/// Width of the highlighted span for a line-addressed diagnostic.
pub const DIAGNOSTIC_SPAN_CHARS: u32 = 5;

const SEARCH_URL: &str = "https://www.bing.com/search";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed analysis for {uri}: {reason}")]
pub struct MalformedAnalysis {
    uri: String,
    reason: String,
}

impl MalformedAnalysis {
    fn new(uri: &str, reason: impl Into<String>) -> Self {
        Self {
            uri: uri.to_string(),
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn reason(&self) -> &str {
        &self.reason
    }
}

#[derive(Debug, Deserialize)]
struct RawDiagnostic {
    #[serde(alias = "lineNumber")]
    line_number: u32,
    #[serde(default)]
    severity: Option<String>,
    #[serde(default)]
    source: Option<String>,
    rule: String,
    #[serde(alias = "message")]
    description: String,
}

/// Parse raw backend text into diagnostics, preserving source order.
pub fn parse_diagnostics(uri: &str, raw: &str) -> Result<Vec<Diagnostic>, MalformedAnalysis> {
    let body = strip_code_fence(raw);
    if body.is_empty() {
        return Err(MalformedAnalysis::new(uri, "empty analysis"));
    }

    let value: Value = serde_json::from_str(body)
        .map_err(|e| MalformedAnalysis::new(uri, format!("not JSON: {e}")))?;

    let entries = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("diagnostics") {
            Some(Value::Array(items)) => items,
            _ => {
                return Err(MalformedAnalysis::new(
                    uri,
                    "expected an array of diagnostics",
                ));
            }
        },
        _ => {
            return Err(MalformedAnalysis::new(
                uri,
                "expected an array of diagnostics",
            ));
        }
    };

    entries
        .into_iter()
        .enumerate()
        .map(|(index, entry)| {
            let raw: RawDiagnostic = serde_json::from_value(entry)
                .map_err(|e| MalformedAnalysis::new(uri, format!("entry {index}: {e}")))?;
            if raw.line_number == 0 {
                return Err(MalformedAnalysis::new(
                    uri,
                    format!("entry {index}: line_number must be 1-based"),
                ));
            }
            Ok(Diagnostic::new(
                raw.line_number,
                SeverityTag::from_tag(raw.severity.as_deref().unwrap_or_default()),
                raw.source.unwrap_or_default(),
                raw.rule,
                raw.description,
            ))
        })
        .collect()
}

/// Drop a surrounding Markdown code fence (```` ```json ... ``` ````), if any.
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Skip the info string ("json") on the opening fence line.
    let rest = rest.split_once('\n').map_or("", |(_, body)| body);
    rest.trim_end()
        .strip_suffix("```")
        .unwrap_or(rest)
        .trim()
}

/// Fixed-width range at column 0 of the diagnostic's (0-based) line.
#[must_use]
pub fn diagnostic_range(diag: &Diagnostic) -> Range {
    let line = diag.protocol_line();
    Range::new(
        Position::new(line, 0),
        Position::new(line, DIAGNOSTIC_SPAN_CHARS),
    )
}

/// Web-search link for a diagnostic source.
#[must_use]
pub fn search_link(source: &str) -> Option<Url> {
    Url::parse_with_params(SEARCH_URL, &[("q", format!("\"{source}\""))]).ok()
}

/// Map an internal diagnostic onto the protocol's diagnostic shape.
#[must_use]
pub fn to_lsp_diagnostic(diag: &Diagnostic, uri: &Url, server_name: &str) -> lsp_types::Diagnostic {
    let range = diagnostic_range(diag);
    let related = DiagnosticRelatedInformation {
        location: Location::new(uri.clone(), range),
        message: diag.pretty_text(),
    };

    lsp_types::Diagnostic {
        range,
        severity: Some(diag.severity().to_lsp()),
        code: Some(NumberOrString::String(diag.code())),
        code_description: search_link(diag.source()).map(|href| CodeDescription { href }),
        source: Some(server_name.to_string()),
        message: diag.description().to_string(),
        related_information: Some(vec![related]),
        tags: None,
        data: None,
    }
}

/// Markdown rendering used for hover content.
#[must_use]
pub fn hover_markup(diag: &Diagnostic) -> String {
    let mut out = format!(
        "**{}** `{}` (line {})\n\n{}",
        diag.severity().label(),
        diag.code(),
        diag.line_number(),
        diag.description()
    );
    match serde_json::to_string_pretty(diag) {
        Ok(json) => {
            out.push_str("\n\n```json\n");
            out.push_str(&json);
            out.push_str("\n```");
        }
        Err(e) => tracing::debug!("Skipping JSON block in hover: {e}"),
    }
    out
}
