//! Byte-level matchers and the token cursor shared by every scanner.
//!
//! Each matcher inspects `bytes` at `at` and returns how many bytes it would
//! consume, `0` meaning no match. They never allocate and never look at more
//! than the construct they recognise, so they compose freely:
//!
//! ```text
//! whitespace | comment | quoted | group | ${..} | $selector | #directive | word | punct
//! ```

/// Classification of one token produced by [`Tokens`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Space,
    Comment,
    /// `'..'`, `".."` or `` `..` `` including the quotes.
    Quoted,
    /// A balanced `( .. )` block including the parentheses.
    Group,
    /// A `${ .. }` block.
    Template,
    /// A `$name.chain(..)` selector expression.
    Selector,
    /// A `#name` template control word (the following group is separate).
    Directive,
    Word,
    Punct,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub start: usize,
    pub end: usize,
}

impl Token {
    pub fn text<'a>(&self, src: &'a str) -> &'a str {
        &src[self.start..self.end]
    }

    /// Whitespace and comments carry no meaning for any scanner.
    pub fn is_trivia(&self) -> bool {
        matches!(self.kind, TokenKind::Space | TokenKind::Comment)
    }
}

pub fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

pub fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}

pub fn whitespace(bytes: &[u8], at: usize) -> usize {
    bytes[at.min(bytes.len())..]
        .iter()
        .take_while(|b| b.is_ascii_whitespace())
        .count()
}

/// `-- ...` up to (not including) the newline.
pub fn line_comment(bytes: &[u8], at: usize) -> usize {
    if !bytes[at..].starts_with(b"--") {
        return 0;
    }
    bytes[at..].iter().take_while(|&&b| b != b'\n').count()
}

/// `/* ... */`; an unterminated comment runs to the end of input.
pub fn block_comment(bytes: &[u8], at: usize) -> usize {
    if !bytes[at..].starts_with(b"/*") {
        return 0;
    }
    let mut i = at + 2;
    while i + 1 < bytes.len() {
        if bytes[i] == b'*' && bytes[i + 1] == b'/' {
            return i + 2 - at;
        }
        i += 1;
    }
    bytes.len() - at
}

pub fn comment(bytes: &[u8], at: usize) -> usize {
    match line_comment(bytes, at) {
        0 => block_comment(bytes, at),
        n => n,
    }
}

/// A quoted literal with backslash escapes and doubled-quote escapes.
/// An unterminated literal runs to the end of input.
pub fn quoted(bytes: &[u8], at: usize) -> usize {
    let Some(&quote) = bytes.get(at) else {
        return 0;
    };
    if !matches!(quote, b'\'' | b'"' | b'`') {
        return 0;
    }
    let mut i = at + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b if b == quote => {
                if bytes.get(i + 1) == Some(&quote) {
                    i += 2;
                } else {
                    return i + 1 - at;
                }
            }
            _ => i += 1,
        }
    }
    bytes.len() - at
}

/// A balanced `open .. close` block. Quotes inside are skipped atomically.
/// Returns 0 when the block never closes.
pub fn balanced(bytes: &[u8], at: usize, open: u8, close: u8) -> usize {
    if bytes.get(at) != Some(&open) {
        return 0;
    }
    let mut depth = 0usize;
    let mut i = at;
    while i < bytes.len() {
        let b = bytes[i];
        if b == b'\\' {
            i += 2;
            continue;
        }
        let q = quoted(bytes, i);
        if q > 0 {
            i += q;
            continue;
        }
        if b == open {
            depth += 1;
        } else if b == close {
            depth -= 1;
            if depth == 0 {
                return i + 1 - at;
            }
        }
        i += 1;
    }
    0
}

pub fn group(bytes: &[u8], at: usize) -> usize {
    balanced(bytes, at, b'(', b')')
}

pub fn identifier(bytes: &[u8], at: usize) -> usize {
    match bytes.get(at) {
        Some(&b) if is_ident_start(b) => bytes[at..].iter().take_while(|&&b| is_ident_byte(b)).count(),
        _ => 0,
    }
}

/// `${ ... }` with nested braces.
pub fn template_block(bytes: &[u8], at: usize) -> usize {
    if !bytes[at..].starts_with(b"${") {
        return 0;
    }
    match balanced(bytes, at + 1, b'{', b'}') {
        0 => 0,
        n => n + 1,
    }
}

/// `$head(.member | (args))*`, e.g. `$sql.Insert($rec, "T")` or `$1`.
pub fn selector(bytes: &[u8], at: usize) -> usize {
    if bytes.get(at) != Some(&b'$') {
        return 0;
    }
    let head = bytes[at + 1..].iter().take_while(|&&b| is_ident_byte(b)).count();
    if head == 0 {
        return 0;
    }
    let mut i = at + 1 + head;
    loop {
        if bytes.get(i) == Some(&b'.') && identifier(bytes, i + 1) > 0 {
            i += 1 + identifier(bytes, i + 1);
            continue;
        }
        let g = group(bytes, i);
        if g > 0 {
            i += g;
            continue;
        }
        return i - at;
    }
}

/// `#name` template directive word.
pub fn directive(bytes: &[u8], at: usize) -> usize {
    if bytes.get(at) != Some(&b'#') {
        return 0;
    }
    match identifier(bytes, at + 1) {
        0 => 0,
        n => n + 1,
    }
}

/// Case-insensitive `kw` at `at`, on a word boundary and followed by whitespace.
pub fn keyword(bytes: &[u8], at: usize, kw: &str) -> bool {
    let end = at + kw.len();
    end < bytes.len()
        && bytes[at..end].eq_ignore_ascii_case(kw.as_bytes())
        && bytes[end].is_ascii_whitespace()
        && (at == 0 || !is_ident_byte(bytes[at - 1]))
}

/// Iterator over the tokens of a source text; top-level groups are atomic.
#[derive(Debug, Clone)]
pub struct Tokens<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Tokens<'a> {
    pub fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    pub fn at(src: &'a str, pos: usize) -> Self {
        Self { src, pos }
    }

    pub fn position(&self) -> usize {
        self.pos
    }
}

impl Iterator for Tokens<'_> {
    type Item = Token;

    fn next(&mut self) -> Option<Token> {
        let bytes = self.src.as_bytes();
        let at = self.pos;
        if at >= bytes.len() {
            return None;
        }
        let (kind, len) = [
            (TokenKind::Space, whitespace(bytes, at)),
            (TokenKind::Comment, comment(bytes, at)),
            (TokenKind::Quoted, quoted(bytes, at)),
            (TokenKind::Group, group(bytes, at)),
            (TokenKind::Template, template_block(bytes, at)),
            (TokenKind::Selector, selector(bytes, at)),
            (TokenKind::Directive, directive(bytes, at)),
            (
                TokenKind::Word,
                bytes[at..].iter().take_while(|&&b| is_ident_byte(b)).count(),
            ),
        ]
        .into_iter()
        .find(|(_, len)| *len > 0)
        .unwrap_or_else(|| {
            let width = self.src[at..].chars().next().map(char::len_utf8).unwrap_or(1);
            (TokenKind::Punct, width)
        });
        let end = (at + len).min(bytes.len());
        self.pos = end;
        Some(Token { kind, start: at, end })
    }
}

/// Split `text` on top-level `sep` bytes, ignoring separators nested in
/// groups or quotes. Pieces are trimmed; an empty input yields no pieces.
pub fn split_top_level(text: &str, sep: u8) -> Vec<&str> {
    if text.trim().is_empty() {
        return Vec::new();
    }
    let mut parts = Vec::new();
    let mut start = 0;
    for tok in Tokens::new(text) {
        if tok.kind == TokenKind::Punct && text.as_bytes()[tok.start] == sep {
            parts.push(text[start..tok.start].trim());
            start = tok.end;
        }
    }
    parts.push(text[start..].trim());
    parts
}

/// Strip one layer of matching quotes.
pub fn unquote(text: &str) -> &str {
    let t = text.trim();
    let b = t.as_bytes();
    if b.len() >= 2 && matches!(b[0], b'\'' | b'"' | b'`') && b[b.len() - 1] == b[0] {
        &t[1..t.len() - 1]
    } else {
        t
    }
}

pub fn is_quoted(text: &str) -> bool {
    unquote(text).len() != text.trim().len()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<(TokenKind, &str)> {
        Tokens::new(src)
            .filter(|t| !t.is_trivia())
            .map(|t| (t.kind, t.text(src)))
            .collect()
    }

    #[test]
    fn test_quoted_escapes() {
        assert_eq!(quoted(br"'a\'b' x", 0), 6);
        assert_eq!(quoted(b"'it''s' x", 0), 7);
        assert_eq!(quoted(b"'open", 0), 5);
        assert_eq!(quoted(b"x", 0), 0);
    }

    #[test]
    fn test_balanced_ignores_quoted_parens() {
        let src = b"(a, ')', (b)) tail";
        assert_eq!(group(src, 0), 13);
        assert_eq!(group(b"(never", 0), 0);
    }

    #[test]
    fn test_selector_chain() {
        let src = b"$sql.Insert($rec, \"T\") rest";
        assert_eq!(selector(src, 0), 22);
        assert_eq!(selector(b"$1 ", 0), 2);
        assert_eq!(selector(b"$ x", 0), 0);
    }

    #[test]
    fn test_template_block() {
        assert_eq!(template_block(b"${a{b}} x", 0), 7);
        assert_eq!(template_block(b"$a", 0), 0);
    }

    #[test]
    fn test_tokens() {
        let src = "SELECT /* c */ f(a, 'x)') -- tail\n${v} $x.y #if";
        assert_eq!(
            kinds(src),
            vec![
                (TokenKind::Word, "SELECT"),
                (TokenKind::Word, "f"),
                (TokenKind::Group, "(a, 'x)')"),
                (TokenKind::Template, "${v}"),
                (TokenKind::Selector, "$x.y"),
                (TokenKind::Directive, "#if"),
            ]
        );
    }

    #[test]
    fn test_split_top_level() {
        assert_eq!(split_top_level("a, f(b, c), 'd,e'", b','), vec!["a", "f(b, c)", "'d,e'"]);
        assert!(split_top_level("  ", b',').is_empty());
    }

    #[test]
    fn test_keyword_boundaries() {
        assert!(keyword(b"select 1", 0, "select"));
        assert!(!keyword(b"selected 1", 0, "select"));
        assert!(!keyword(b"xselect 1", 1, "select"));
        assert!(!keyword(b"select", 0, "select"));
    }

    #[test]
    fn test_unquote() {
        assert_eq!(unquote("'Order'"), "Order");
        assert_eq!(unquote("\"x\""), "x");
        assert_eq!(unquote("plain"), "plain");
        assert!(is_quoted(" 'a' "));
    }
}
