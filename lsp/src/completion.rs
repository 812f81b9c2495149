//! Cursor context for completion and generation requests.

use lsp_types::{CompletionItem, CompletionItemKind, Documentation, InsertTextFormat};

/// Lines of context taken on each side of the cursor line.
pub const CONTEXT_LINES: usize = 3;

pub const DEFAULT_COMPLETION_PROMPT: &str = "You are a coding assistant. Provide the best possible code completions based on the given context.";

pub const GENERATED_DOCUMENTATION: &str = "Generated suggestion";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OutOfRange {
    #[error("line {line} is past the end of the document ({lines} lines)")]
    Line { line: u32, lines: usize },
    #[error("character {character} is past the end of line {line}")]
    Character { line: u32, character: u32 },
}

/// Text before and after the cursor, bounded to [`CONTEXT_LINES`] lines
/// on either side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorContext {
    pub prefix: String,
    pub suffix: String,
}

impl CursorContext {
    /// `character` is a UTF-16 offset into the cursor line.
    pub fn extract(text: &str, line: u32, character: u32) -> Result<Self, OutOfRange> {
        let lines = split_lines(text);
        let index = line as usize;
        let Some(current) = lines.get(index) else {
            return Err(OutOfRange::Line {
                line,
                lines: lines.len(),
            });
        };
        let split = utf16_to_byte_offset(current, character)
            .ok_or(OutOfRange::Character { line, character })?;
        let (head, tail) = current.split_at(split);

        let start = index.saturating_sub(CONTEXT_LINES);
        let mut prefix_lines: Vec<&str> = lines[start..index].to_vec();
        if !head.is_empty() {
            prefix_lines.push(head);
        }

        let end = (index + 1 + CONTEXT_LINES).min(lines.len());
        let mut suffix_lines = Vec::with_capacity(CONTEXT_LINES + 1);
        if !tail.is_empty() {
            suffix_lines.push(tail);
        }
        suffix_lines.extend_from_slice(&lines[index + 1..end]);

        Ok(Self {
            prefix: prefix_lines.join("\n"),
            suffix: suffix_lines.join("\n"),
        })
    }
}

/// Split on `\n`, dropping a trailing `\r` from each line.
#[must_use]
pub fn split_lines(text: &str) -> Vec<&str> {
    text.split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .collect()
}

/// Byte offset of a UTF-16 column, or `None` when the column is past the end
/// of the line. A column inside a surrogate pair rounds down.
#[must_use]
pub fn utf16_to_byte_offset(line: &str, character: u32) -> Option<usize> {
    let target = character as usize;
    let mut units = 0;
    for (byte, ch) in line.char_indices() {
        if units >= target {
            return Some(byte);
        }
        units += ch.len_utf16();
        if units > target {
            return Some(byte);
        }
    }
    (units >= target).then_some(line.len())
}

#[must_use]
pub fn utf16_len(line: &str) -> u32 {
    u32::try_from(line.encode_utf16().count()).unwrap_or(u32::MAX)
}

/// Escape generated code for the `window/showGeneratedCode` payload.
#[must_use]
pub fn escape_generated(code: &str) -> String {
    let mut out = String::with_capacity(code.len());
    for ch in code.chars() {
        match ch {
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '"' => out.push_str("\\\""),
            c if c.is_control() => out.push_str(&format!("\\u{:04x}", u32::from(c))),
            other => out.push(other),
        }
    }
    out
}

fn plain_item(text: &str) -> CompletionItem {
    CompletionItem {
        label: text.to_string(),
        kind: Some(CompletionItemKind::TEXT),
        insert_text: Some(text.to_string()),
        insert_text_format: Some(InsertTextFormat::PLAIN_TEXT),
        ..CompletionItem::default()
    }
}

/// Candidate completions followed by the generated suggestion.
#[must_use]
pub fn completion_items(candidates: &[String], generated: &str) -> Vec<CompletionItem> {
    let mut items: Vec<CompletionItem> = candidates.iter().map(|c| plain_item(c)).collect();
    items.push(CompletionItem {
        documentation: Some(Documentation::String(GENERATED_DOCUMENTATION.to_string())),
        ..plain_item(generated)
    });
    items
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEXT: &str = "l0\nl1\nl2\nl3\nint value = compute();\nl5\nl6\nl7\nl8";

    #[test]
    fn test_window_is_bounded_to_three_lines() {
        let ctx = CursorContext::extract(TEXT, 4, 12).unwrap();
        assert_eq!(ctx.prefix, "l1\nl2\nl3\nint value = ");
        assert_eq!(ctx.suffix, "compute();\nl5\nl6\nl7");
    }

    #[test]
    fn test_window_at_document_edges() {
        let ctx = CursorContext::extract("only line", 0, 4).unwrap();
        assert_eq!(ctx.prefix, "only");
        assert_eq!(ctx.suffix, " line");

        let ctx = CursorContext::extract("a\nb", 1, 0).unwrap();
        assert_eq!(ctx.prefix, "a");
        assert_eq!(ctx.suffix, "b");
    }

    #[test]
    fn test_cursor_at_end_of_line() {
        let ctx = CursorContext::extract("foo.\nbar", 0, 4).unwrap();
        assert_eq!(ctx.prefix, "foo.");
        assert_eq!(ctx.suffix, "bar");
    }

    #[test]
    fn test_out_of_range_cursor() {
        assert_eq!(
            CursorContext::extract("a\nb", 2, 0),
            Err(OutOfRange::Line { line: 2, lines: 2 })
        );
        assert_eq!(
            CursorContext::extract("abc", 0, 4),
            Err(OutOfRange::Character {
                line: 0,
                character: 4
            })
        );
    }

    #[test]
    fn test_utf16_columns() {
        // "é" is one UTF-16 unit and two bytes; "😀" is two units and four bytes.
        assert_eq!(utf16_to_byte_offset("é=1", 1), Some(2));
        assert_eq!(utf16_to_byte_offset("😀x", 2), Some(4));
        assert_eq!(utf16_to_byte_offset("😀x", 3), Some(5));
        assert_eq!(utf16_to_byte_offset("😀x", 4), None);
        assert_eq!(utf16_len("😀x"), 3);
    }

    #[test]
    fn test_crlf_lines() {
        assert_eq!(split_lines("a\r\nb\r\n"), vec!["a", "b", ""]);
    }

    #[test]
    fn test_escape_generated() {
        assert_eq!(
            escape_generated("if (x) {\n\tputs(\"hi\");\r\n}"),
            "if (x) {\\n\\tputs(\\\"hi\\\");\\r\\n}"
        );
    }

    #[test]
    fn test_escape_generated_other_control_characters() {
        assert_eq!(escape_generated("a\x1b[0mb\x07"), "a\\u001b[0mb\\u0007");
        assert_eq!(escape_generated("\u{7f}é"), "\\u007fé");
    }

    #[test]
    fn test_generated_item_is_last_and_documented() {
        let items = completion_items(&["foo()".into(), "bar()".into()], "baz();");
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].label, "foo()");
        assert_eq!(items[0].kind, Some(CompletionItemKind::TEXT));
        assert!(items[0].documentation.is_none());
        assert_eq!(items[2].insert_text.as_deref(), Some("baz();"));
        assert_eq!(
            items[2].documentation,
            Some(Documentation::String("Generated suggestion".into()))
        );
    }
}
