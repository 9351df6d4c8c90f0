//! Source positions and compiler diagnostics.
//!
//! Positions are always derived from a byte offset plus the source text they
//! index into. Lines and chars are 1-based; chars count Unicode scalar values.

use serde::Serialize;
use std::fmt;

pub const CODE_REL_MISSING_ON: &str = "RelMissingON";
pub const CODE_REL_UNSUPPORTED: &str = "RelUnsupported";
pub const CODE_REL_AMBIGUOUS: &str = "RelAmbiguous";
pub const CODE_REL_NO_LINKS: &str = "RelNoLinks";
pub const CODE_DML_SERVICE_ARG: &str = "DMLServiceArg";
pub const CODE_DML_INSERT: &str = "DMLInsert";
pub const CODE_DML_UPDATE: &str = "DMLUpdate";
pub const CODE_DML_DELETE: &str = "DMLDelete";
pub const CODE_PARSE_SYNTAX: &str = "ParseSyntax";
pub const CODE_INTERNAL: &str = "Internal";

/// A location inside one version of a source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Position {
    pub offset: usize,
    pub line: usize,
    pub char: usize,
}

impl Position {
    /// Compute the position of `offset` in `text`, clamping to the end.
    pub fn at(text: &str, offset: usize) -> Self {
        let mut offset = offset.min(text.len());
        while !text.is_char_boundary(offset) {
            offset -= 1;
        }
        let before = &text[..offset];
        let line = before.matches('\n').count() + 1;
        let line_start = before.rfind('\n').map(|i| i + 1).unwrap_or(0);
        let char = before[line_start..].chars().count() + 1;
        Self { offset, line, char }
    }

    /// Position for a 1-based line/column pair reported by the SQL parser.
    pub fn from_line_column(text: &str, line: usize, column: usize) -> Self {
        let mut offset = 0;
        for (idx, l) in text.split_inclusive('\n').enumerate() {
            if idx + 1 == line {
                let col_bytes: usize = l
                    .chars()
                    .take(column.saturating_sub(1))
                    .map(char::len_utf8)
                    .sum();
                return Self::at(text, offset + col_bytes);
            }
            offset += l.len();
        }
        Self::at(text, text.len())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Span {
    pub start: Position,
    pub end: Position,
}

impl Span {
    pub fn from_offsets(text: &str, start: usize, end: usize) -> Self {
        Self {
            start: Position::at(text, start),
            end: Position::at(text, end.max(start)),
        }
    }

    /// Locate `needle` in `text` and span it; falls back to the start of `text`.
    pub fn locate(text: &str, needle: &str) -> Self {
        match text.find(needle) {
            Some(idx) if !needle.is_empty() => Self::from_offsets(text, idx, idx + needle.len()),
            _ => Self::from_offsets(text, 0, 0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Severity {
    Error,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
        }
    }
}

/// A compiler finding. Diagnostics never abort compilation by themselves.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Diagnostic {
    pub code: &'static str,
    pub severity: Severity,
    pub message: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub hint: String,
    pub span: Span,
}

impl Diagnostic {
    pub fn error(code: &'static str, message: impl Into<String>, span: Span) -> Self {
        Self {
            code,
            severity: Severity::Error,
            message: message.into(),
            hint: String::new(),
            span,
        }
    }

    pub fn warning(code: &'static str, message: impl Into<String>, span: Span) -> Self {
        Self {
            code,
            severity: Severity::Warning,
            message: message.into(),
            hint: String::new(),
            span,
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = hint.into();
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} {}[{}] {}",
            self.span.start.line, self.span.start.char, self.severity, self.code, self.message
        )?;
        if !self.hint.is_empty() {
            write!(f, " ({})", self.hint)?;
        }
        Ok(())
    }
}

/// Append-only diagnostic collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Diagnostics(Vec<Diagnostic>);

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        tracing::debug!(code = diagnostic.code, "{}", diagnostic.message);
        self.0.push(diagnostic);
    }

    pub fn extend(&mut self, other: impl IntoIterator<Item = Diagnostic>) {
        for d in other {
            self.push(d);
        }
    }

    pub fn has_errors(&self) -> bool {
        self.0.iter().any(Diagnostic::is_error)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Diagnostic> {
        self.0.iter()
    }

    pub fn codes(&self) -> Vec<&'static str> {
        self.0.iter().map(|d| d.code).collect()
    }

    pub fn into_vec(self) -> Vec<Diagnostic> {
        self.0
    }
}

impl std::ops::Index<usize> for Diagnostics {
    type Output = Diagnostic;

    fn index(&self, index: usize) -> &Self::Output {
        &self.0[index]
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
