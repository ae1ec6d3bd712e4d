//! Utility functions for the LSP backend

use ropey::Rope;
use tower_lsp::lsp_types::{Position as LspPosition, TextDocumentContentChangeEvent};

/// Char index in `rope` for an LSP position, clamped to the document.
///
/// `position.character` counts UTF-16 code units, the LSP default encoding.
pub(super) fn position_to_char(rope: &Rope, position: LspPosition) -> usize {
    let line = position.line as usize;
    if line >= rope.len_lines() {
        return rope.len_chars();
    }
    let slice = rope.line(line);
    let utf16_col = (position.character as usize).min(slice.len_utf16_cu());
    rope.line_to_char(line) + slice.utf16_cu_to_char(utf16_col)
}

/// Applies content changes in order, returning the updated text.
///
/// A change without a range replaces the whole document.
pub(super) fn apply_changes(text: &Rope, changes: Vec<TextDocumentContentChangeEvent>) -> Rope {
    let mut rope = text.clone();
    for change in changes {
        match change.range {
            Some(range) => {
                let start = position_to_char(&rope, range.start);
                let end = position_to_char(&rope, range.end);
                if start <= end {
                    rope.remove(start..end);
                    rope.insert(start, &change.text);
                }
            }
            None => rope = Rope::from_str(&change.text),
        }
    }
    rope
}
