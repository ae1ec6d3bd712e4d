//! Token extraction at a cursor position.
//!
//! The token keeps everything that changes what the symbol refers to: a
//! leading sigil (`$ @ % &`), `::` package separators and `->` method
//! arrows, together with the invocant before the arrow.

use ropey::Rope;
use tower_lsp::lsp_types::Position as LspPosition;

fn is_ident(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn is_sigil(c: char) -> bool {
    matches!(c, '$' | '@' | '%' | '&')
}

/// Returns the symbol text at `position`, or an empty string when the cursor
/// is not on an identifier.
///
/// `position.character` counts UTF-16 code units, the LSP default encoding.
pub fn symbol_at(text: &Rope, position: LspPosition) -> String {
    let line_idx = position.line as usize;
    if line_idx >= text.len_lines() {
        return String::new();
    }
    let line = text.line(line_idx);
    let character = line.utf16_cu_to_char((position.character as usize).min(line.len_utf16_cu()));
    let chars: Vec<char> = line
        .chars()
        .take_while(|c| *c != '\n' && *c != '\r')
        .collect();
    symbol_in_line(&chars, character)
}

fn symbol_in_line(chars: &[char], character: usize) -> String {
    let len = chars.len();
    let mut col = character.min(len);

    // Cursor on a sigil or on the arrow itself: look at what follows.
    if col < len && is_sigil(chars[col]) && col + 1 < len && is_ident(chars[col + 1]) {
        col += 1;
    } else if col + 1 < len && chars[col] == '-' && chars[col + 1] == '>' {
        col += 2;
    } else if col > 0 && col < len && chars[col - 1] == '-' && chars[col] == '>' {
        col += 1;
    }

    let touches_ident = (col < len && is_ident(chars[col])) || (col > 0 && is_ident(chars[col - 1]));
    if !touches_ident {
        return String::new();
    }

    let mut start = col;
    loop {
        if start > 0 && is_ident(chars[start - 1]) {
            start -= 1;
        } else if start >= 3
            && chars[start - 1] == ':'
            && chars[start - 2] == ':'
            && is_ident(chars[start - 3])
        {
            start -= 2;
        } else if start >= 3
            && chars[start - 1] == '>'
            && chars[start - 2] == '-'
            && is_ident(chars[start - 3])
        {
            start -= 2;
        } else {
            break;
        }
    }
    if start > 0 && is_sigil(chars[start - 1]) {
        start -= 1;
    }

    let mut end = col;
    loop {
        if end < len && is_ident(chars[end]) {
            end += 1;
        } else if end + 2 < len && chars[end] == ':' && chars[end + 1] == ':' && is_ident(chars[end + 2]) {
            end += 2;
        } else {
            break;
        }
    }

    chars[start..end].iter().collect()
}
