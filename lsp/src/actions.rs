//! Code actions offered on lines that carry diagnostics.
//!
//! Listing attaches a [`CodeActionData`] payload to each action; the client
//! hands it back untouched on `codeAction/resolve`, where it is validated
//! before anything is sent to the backend.

use std::collections::HashMap;

use lsp_types::{CodeAction, CodeActionKind, Position, Range, TextEdit, Url, WorkspaceEdit};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::completion::{OutOfRange, split_lines, utf16_len};

pub const REFACTOR_TITLE: &str = "Ask LLM for Fix [FuzzLSP]";
pub const EXPLAIN_TITLE: &str = "Explain issue [FuzzLSP]";

/// Round-trip payload identifying the document, the range and the action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum CodeActionData {
    Refactor { uri: Url, range: Range },
    Explain { uri: Url, range: Range },
}

#[derive(Debug, thiserror::Error)]
pub enum ActionDataError {
    #[error("code action carries no data")]
    Missing,
    #[error("unrecognised code action data: {0}")]
    Invalid(#[from] serde_json::Error),
}

impl CodeActionData {
    pub fn from_value(data: Option<&Value>) -> Result<Self, ActionDataError> {
        let data = data.ok_or(ActionDataError::Missing)?;
        Ok(Self::deserialize(data)?)
    }

    #[must_use]
    pub fn uri(&self) -> &Url {
        match self {
            Self::Refactor { uri, .. } | Self::Explain { uri, .. } => uri,
        }
    }

    #[must_use]
    pub fn range(&self) -> Range {
        match self {
            Self::Refactor { range, .. } | Self::Explain { range, .. } => *range,
        }
    }

    fn title(&self) -> &'static str {
        match self {
            Self::Refactor { .. } => REFACTOR_TITLE,
            Self::Explain { .. } => EXPLAIN_TITLE,
        }
    }

    fn kind(&self) -> CodeActionKind {
        match self {
            Self::Refactor { .. } => CodeActionKind::REFACTOR_REWRITE,
            Self::Explain { .. } => CodeActionKind::QUICKFIX,
        }
    }

    fn into_action(self) -> Result<CodeAction, serde_json::Error> {
        Ok(CodeAction {
            title: self.title().to_string(),
            kind: Some(self.kind()),
            data: Some(serde_json::to_value(&self)?),
            ..CodeAction::default()
        })
    }
}

/// The refactor and explain actions for `range`, in that order.
pub fn offered_actions(uri: &Url, range: Range) -> Result<Vec<CodeAction>, serde_json::Error> {
    [
        CodeActionData::Refactor {
            uri: uri.clone(),
            range,
        },
        CodeActionData::Explain {
            uri: uri.clone(),
            range,
        },
    ]
    .into_iter()
    .map(CodeActionData::into_action)
    .collect()
}

/// The text of the line the range starts on.
pub fn target_line(text: &str, range: Range) -> Result<&str, OutOfRange> {
    let lines = split_lines(text);
    let line = range.start.line;
    lines
        .get(line as usize)
        .copied()
        .ok_or(OutOfRange::Line {
            line,
            lines: lines.len(),
        })
}

/// Comment-wrapped explanation placed above the original line.
#[must_use]
pub fn explained_line(explanation: &str, line: &str) -> String {
    format!("/* {} */\n{line}", explanation.trim())
}

/// A workspace edit replacing the whole of line `line` with `new_text`.
#[must_use]
pub fn line_edit(uri: &Url, line: u32, original: &str, new_text: String) -> WorkspaceEdit {
    let edit = TextEdit {
        range: Range::new(Position::new(line, 0), Position::new(line, utf16_len(original))),
        new_text,
    };
    WorkspaceEdit {
        changes: Some(HashMap::from([(uri.clone(), vec![edit])])),
        ..WorkspaceEdit::default()
    }
}
