//! Template normalizer.
//!
//! Rewrites template tokens into literal SQL so a conventional parser accepts
//! the text. Structural keywords (`FROM`, `JOIN`, `WHERE`, ...) are never
//! added or removed except for the explicit `build("WHERE")` filler.

use std::iter::Peekable;

use crate::cursor::{self, TokenKind, Tokens};
use crate::declaration::{Declaration, Declarations};

/// Selectors that are service calls and survive normalization untouched.
const RESERVED_SELECTORS: &[&str] = &["$sql.Insert", "$sql.Update", "$Nop"];

/// `${..}` bodies naming one of these services are erased.
const RESERVED_SERVICES: &[&str] = &[
    "sql.Insert",
    "sql.Update",
    "Nop",
    "logger.",
    "http.",
    "messageBus.",
    "sequencer.",
];

const CONTROL_WITH_GROUP: &[&str] = &["set", "if", "elseif", "foreach"];
const CONTROL_BARE: &[&str] = &["else", "end"];

/// Normalize template tokens. Idempotent.
pub fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut tokens = Tokens::new(text).peekable();

    while let Some(tok) = tokens.next() {
        let piece = tok.text(text);
        match tok.kind {
            TokenKind::Template => out.push_str(&rewrite_block(piece)),
            TokenKind::Selector => {
                if RESERVED_SELECTORS.iter().any(|r| is_selector_head(piece, r)) {
                    out.push_str(piece);
                } else {
                    // `$criteria.AppendBinding(..)` and plain selectors alike
                    out.push('1');
                }
            }
            TokenKind::Directive => {
                let name = piece[1..].to_ascii_lowercase();
                if CONTROL_WITH_GROUP.contains(&name.as_str()) {
                    blank(&mut out, piece);
                    let mut gap = String::new();
                    let mut consumed_group = false;
                    while let Some(next) = tokens.peek().copied() {
                        match next.kind {
                            TokenKind::Space => gap.push_str(next.text(text)),
                            TokenKind::Group => {
                                blank(&mut gap, next.text(text));
                                consumed_group = true;
                            }
                            _ => break,
                        }
                        tokens.next();
                        if consumed_group {
                            break;
                        }
                    }
                    out.push_str(&gap);
                } else if CONTROL_BARE.contains(&name.as_str()) {
                    blank(&mut out, piece);
                } else {
                    out.push_str(piece);
                }
            }
            TokenKind::Word if piece.eq_ignore_ascii_case("private") => {
                match next_group(&mut tokens, text) {
                    Some(group) => {
                        let body = &group[1..group.len() - 1];
                        let first = cursor::split_top_level(body, b',').into_iter().next().unwrap_or("");
                        out.push_str(&normalize(first));
                    }
                    None => out.push_str(piece),
                }
            }
            TokenKind::Group => {
                out.push('(');
                out.push_str(&normalize(&piece[1..piece.len() - 1]));
                out.push(')');
            }
            _ => out.push_str(piece),
        }
    }
    out
}

fn is_selector_head(selector: &str, head: &str) -> bool {
    selector.starts_with(head)
        && selector[head.len()..]
            .bytes()
            .next()
            .is_none_or(|b| !cursor::is_ident_byte(b))
}

/// Consume the group immediately following a word, if any (whitespace allowed).
fn next_group<'a>(tokens: &mut Peekable<Tokens<'a>>, text: &'a str) -> Option<&'a str> {
    let mut probe = tokens.clone();
    while let Some(tok) = probe.next() {
        match tok.kind {
            TokenKind::Space => continue,
            TokenKind::Group => {
                *tokens = probe;
                return Some(tok.text(text));
            }
            _ => return None,
        }
    }
    None
}

fn rewrite_block(block: &str) -> String {
    let body = block[2..block.len() - 1].trim();
    if RESERVED_SERVICES.iter().any(|s| body.starts_with(s)) {
        return " ".repeat(block.len());
    }
    let lower = body.to_ascii_lowercase();
    let compact: String = lower.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.contains("build(\"where\")") || compact.contains("build('where')") {
        " WHERE 1 ".to_string()
    } else if compact.contains("build(\"and\")") || compact.contains("build('and')") {
        " AND 1 ".to_string()
    } else {
        "1".to_string()
    }
}

/// Append `piece` as whitespace, keeping newlines so line numbers survive.
fn blank(out: &mut String, piece: &str) {
    out.extend(piece.chars().map(|c| if c == '\n' { '\n' } else { ' ' }));
}

/// Blank out annotation declarations, together with one adjacent comma, so a
/// projection such as `SELECT o.*, set_limit(o, 10) FROM` stays valid SQL.
/// Offsets are preserved: only bytes are replaced.
pub fn erase_declarations(text: &str, declarations: &Declarations) -> String {
    let mut bytes = text.as_bytes().to_vec();
    for decl in declarations.annotations() {
        erase_one(&mut bytes, decl);
    }
    // only ASCII spaces replaced whole tokens, so the buffer stays valid UTF-8
    String::from_utf8(bytes).unwrap_or_else(|_| text.to_string())
}

fn erase_one(bytes: &mut [u8], decl: &Declaration) {
    let (mut start, mut end) = (decl.offset, decl.end().min(bytes.len()));
    if start >= end {
        return;
    }
    let mut back = start;
    while back > 0 && bytes[back - 1].is_ascii_whitespace() {
        back -= 1;
    }
    if back > 0 && bytes[back - 1] == b',' {
        start = back - 1;
    } else {
        let mut fwd = end;
        while fwd < bytes.len() && bytes[fwd].is_ascii_whitespace() {
            fwd += 1;
        }
        if fwd < bytes.len() && bytes[fwd] == b',' {
            end = fwd + 1;
        }
    }
    for b in &mut bytes[start..end] {
        if *b != b'\n' {
            *b = b' ';
        }
    }
}

/// Erase annotations, then normalize template tokens.
pub fn prepare(text: &str, declarations: &Declarations) -> String {
    normalize(&erase_declarations(text, declarations))
}

/// True when the text carries template syntax that a plain SQL parser may
/// legitimately reject.
pub fn has_template_signals(text: &str) -> bool {
    Tokens::new(text).any(|t| {
        matches!(
            t.kind,
            TokenKind::Template | TokenKind::Selector | TokenKind::Directive
        ) || (t.kind == TokenKind::Group && has_template_signals(&text[t.start + 1..t.end - 1]))
    })
}
