//! Statement lexer and classifier.
//!
//! Splits DQL text into ordered statements and tags each one as a read, an
//! exec, or a service call (`$sql.Insert(..)` / `$sql.Update(..)`).
//! Comments, quoted literals and parenthesised groups are skipped as opaque
//! units, so keywords inside them never open a statement.

use serde::Serialize;

use crate::cursor::{self, TokenKind, Tokens};
use crate::diagnostic::{
    CODE_DML_DELETE, CODE_DML_INSERT, CODE_DML_SERVICE_ARG, CODE_DML_UPDATE, Diagnostic,
    Diagnostics, Span,
};
use crate::sql::{self, DmlKind};
use crate::template;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StatementKind {
    Read,
    Exec,
    Service,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Statement {
    pub start: usize,
    pub end: usize,
    /// `None` when the text could not be classified at all.
    pub kind: Option<StatementKind>,
    pub is_exec: bool,
    /// Method name of a service call, e.g. `Insert`.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub selector_method: String,
    /// Target table, filled by [`Statements::dml_tables`].
    #[serde(skip_serializing_if = "String::is_empty")]
    pub table: String,
}

impl Statement {
    fn new(start: usize, kind: Option<StatementKind>) -> Self {
        Self {
            start,
            end: start,
            kind,
            is_exec: matches!(kind, Some(StatementKind::Exec | StatementKind::Service)),
            selector_method: String::new(),
            table: String::new(),
        }
    }

    pub fn text<'a>(&self, src: &'a str) -> &'a str {
        &src[self.start..self.end]
    }
}

const READ_KEYWORDS: &[&str] = &["select"];
const EXEC_KEYWORDS: &[&str] = &["insert", "update", "delete", "call", "begin"];
/// Words that make a following `UPDATE` part of an open insert.
const UPSERT_LEADS: &[&str] = &["key", "do"];
const CONTROL_DIRECTIVES: &[&str] = &["set", "foreach", "if"];
const SERVICE_METHODS: &[&str] = &["Insert", "Update"];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Statements(Vec<Statement>);

impl Statements {
    pub fn iter(&self) -> std::slice::Iter<'_, Statement> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True when any statement executes (DML or service call).
    pub fn is_exec(&self) -> bool {
        self.0.iter().any(|s| s.is_exec)
    }

    /// Extract target tables of exec and service statements, deduplicated in
    /// first-seen order. Also records each table on its statement.
    pub fn dml_tables(&mut self, text: &str) -> (Vec<String>, Diagnostics) {
        let mut tables: Vec<String> = Vec::new();
        let mut diagnostics = Diagnostics::new();

        for stmt in self.0.iter_mut() {
            let span = Span::from_offsets(text, stmt.start, stmt.end);
            let table = match stmt.kind {
                Some(StatementKind::Service) => {
                    let table = service_table(stmt.text(text));
                    if table.is_none() {
                        diagnostics.push(
                            Diagnostic::error(
                                CODE_DML_SERVICE_ARG,
                                format!(
                                    "$sql.{} call has no quoted table argument",
                                    stmt.selector_method
                                ),
                                span,
                            )
                            .with_hint(format!(
                                "pass the table name, e.g. $sql.{}($rec, \"TABLE\")",
                                stmt.selector_method
                            )),
                        );
                    }
                    table
                }
                Some(StatementKind::Exec) => {
                    let normalized = template::normalize(stmt.text(text));
                    let Some(kind) = DmlKind::detect(&normalized) else {
                        continue;
                    };
                    match sql::dml_target(&normalized, kind) {
                        Ok(table) => Some(table),
                        Err(err) => {
                            let code = match kind {
                                DmlKind::Insert => CODE_DML_INSERT,
                                DmlKind::Update => CODE_DML_UPDATE,
                                DmlKind::Delete => CODE_DML_DELETE,
                            };
                            diagnostics.push(
                                Diagnostic::warning(
                                    code,
                                    format!("unable to extract {} target: {}", kind, err),
                                    span,
                                )
                                .with_hint("check the statement syntax"),
                            );
                            None
                        }
                    }
                }
                _ => None,
            };

            if let Some(table) = table {
                if !tables.contains(&table) {
                    tables.push(table.clone());
                }
                stmt.table = table;
            }
        }

        (tables, diagnostics)
    }
}

impl std::ops::Index<usize> for Statements {
    type Output = Statement;

    fn index(&self, index: usize) -> &Self::Output {
        &self.0[index]
    }
}

impl<'a> IntoIterator for &'a Statements {
    type Item = &'a Statement;
    type IntoIter = std::slice::Iter<'a, Statement>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// First quoted argument of a service call, e.g. `"ORDERS"` in
/// `$sql.Insert($rec, "ORDERS")`.
fn service_table(stmt: &str) -> Option<String> {
    let call = &stmt[..cursor::selector(stmt.as_bytes(), 0)];
    let open = call.find('(')?;
    let args = &call[open + 1..call.rfind(')').unwrap_or(call.len())];
    cursor::split_top_level(args, b',')
        .into_iter()
        .find(|arg| cursor::is_quoted(arg))
        .map(|arg| cursor::unquote(arg).to_string())
        .filter(|t| !t.is_empty())
}

/// Classify `text` into statements.
pub fn classify(text: &str) -> Statements {
    let bytes = text.as_bytes();
    let mut stmts: Vec<Statement> = Vec::new();
    // `INSERT .. SELECT` keeps the select inside the insert.
    let mut open_insert = false;
    let mut previous = String::new();

    for tok in Tokens::new(text) {
        match tok.kind {
            TokenKind::Word => {
                let word = tok.text(text);
                let lower = word.to_ascii_lowercase();
                let before = std::mem::replace(&mut previous, lower.clone());
                if !cursor::keyword(bytes, tok.start, word) {
                    continue;
                }
                if READ_KEYWORDS.contains(&lower.as_str()) {
                    if open_insert {
                        continue;
                    }
                    stmts.push(Statement::new(tok.start, Some(StatementKind::Read)));
                } else if open_insert && lower == "update" && UPSERT_LEADS.contains(&before.as_str()) {
                    // `ON DUPLICATE KEY UPDATE` and `ON CONFLICT .. DO UPDATE`
                    continue;
                } else if EXEC_KEYWORDS.contains(&lower.as_str()) {
                    open_insert = lower == "insert";
                    stmts.push(Statement::new(tok.start, Some(StatementKind::Exec)));
                }
            }
            TokenKind::Selector => {
                let sel = tok.text(text);
                if sel.starts_with("$Nop(") {
                    open_insert = false;
                    stmts.push(Statement::new(tok.start, Some(StatementKind::Exec)));
                } else if let Some(method) = service_method(sel) {
                    open_insert = false;
                    let mut stmt = Statement::new(tok.start, Some(StatementKind::Service));
                    stmt.selector_method = method.to_string();
                    stmts.push(stmt);
                }
            }
            TokenKind::Directive => {
                // `#set(..)`, `#foreach(..)`, `#if(..)`: the group that follows is
                // an atomic token, so nothing inside it is reinterpreted.
                let name = &tok.text(text)[1..];
                if CONTROL_DIRECTIVES.contains(&name.to_ascii_lowercase().as_str()) {
                    open_insert = false;
                }
            }
            TokenKind::Punct if bytes[tok.start] == b';' => open_insert = false,
            _ => {}
        }
    }

    if stmts.is_empty() {
        return fallback(text);
    }

    let count = stmts.len();
    for i in 0..count {
        stmts[i].end = if i + 1 < count { stmts[i + 1].start } else { text.len() };
    }
    tracing::debug!(statements = count, "classified DQL source");
    Statements(stmts)
}

fn service_method(selector: &str) -> Option<&'static str> {
    let rest = selector.strip_prefix("$sql.")?;
    SERVICE_METHODS
        .iter()
        .find(|m| rest.starts_with(*m) && rest[m.len()..].starts_with('('))
        .copied()
}

/// Classify by the leading keyword only.
fn fallback(text: &str) -> Statements {
    let bytes = text.as_bytes();
    let mut start = 0;
    loop {
        let skipped = cursor::whitespace(bytes, start) + cursor::comment(bytes, start);
        if skipped == 0 || start >= bytes.len() {
            break;
        }
        start += skipped;
    }
    if start >= bytes.len() {
        return Statements::default();
    }

    let rest = &text[start..];
    let lead: String = rest
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect::<String>()
        .to_ascii_lowercase();
    let kind = if rest.starts_with("$Nop(") {
        Some(StatementKind::Exec)
    } else if READ_KEYWORDS.contains(&lead.as_str()) {
        Some(StatementKind::Read)
    } else if EXEC_KEYWORDS.contains(&lead.as_str()) {
        Some(StatementKind::Exec)
    } else {
        None
    };

    let mut stmt = Statement::new(start, kind);
    stmt.end = text.len();
    Statements(vec![stmt])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostic::Severity;

    fn kinds(stmts: &Statements) -> Vec<Option<StatementKind>> {
        stmts.iter().map(|s| s.kind).collect()
    }

    #[test]
    fn test_single_select() {
        let stmts = classify("SELECT id FROM orders");
        assert_eq!(stmts.len(), 1);
        assert_eq!(stmts[0].kind, Some(StatementKind::Read));
        assert!(!stmts[0].is_exec);
    }

    #[test]
    fn test_service_insert() {
        let stmts = classify(r#"$sql.Insert("ORDERS", $rec)"#);
        assert_eq!(stmts.len(), 1);
        assert_eq!(stmts[0].kind, Some(StatementKind::Service));
        assert_eq!(stmts[0].selector_method, "Insert");
        assert!(stmts[0].is_exec);
    }

    #[test]
    fn test_keywords_in_comments_and_quotes_are_ignored() {
        let src = "-- delete this\n/* update x */ SELECT 'insert ' AS s, \"delete \" FROM t";
        let stmts = classify(src);
        assert_eq!(kinds(&stmts), vec![Some(StatementKind::Read)]);
        assert_eq!(stmts[0].start, src.find("SELECT").unwrap());
    }

    #[test]
    fn test_groups_are_atomic() {
        let stmts = classify("SELECT * FROM (SELECT id FROM orders) o");
        assert_eq!(stmts.len(), 1);
    }

    #[test]
    fn test_multiple_exec_statements() {
        let src = "#foreach($rec in $Records)\nINSERT INTO a VALUES (1);\nUPDATE b SET x = 1;\n#end\n$Nop($x)";
        let stmts = classify(src);
        assert_eq!(
            kinds(&stmts),
            vec![
                Some(StatementKind::Exec),
                Some(StatementKind::Exec),
                Some(StatementKind::Exec)
            ]
        );
        // spans tile the input from the first statement onwards
        assert_eq!(stmts[0].end, stmts[1].start);
        assert_eq!(stmts[1].end, stmts[2].start);
        assert_eq!(stmts[2].end, src.len());
    }

    #[test]
    fn test_insert_select_stays_one_statement() {
        let stmts = classify("INSERT INTO a SELECT * FROM b");
        assert_eq!(kinds(&stmts), vec![Some(StatementKind::Exec)]);
    }

    #[test]
    fn test_bare_selectors_do_not_open_statements() {
        let stmts = classify("$criteria.AppendBinding($x) ${expr}");
        assert_eq!(stmts.len(), 1);
        assert_eq!(stmts[0].kind, None);
        assert!(!stmts[0].is_exec);
    }

    #[test]
    fn test_fallback_and_empty() {
        assert!(classify("   ").is_empty());
        let stmts = classify("SELECT*FROM t");
        assert_eq!(stmts[0].kind, Some(StatementKind::Read));
    }

    #[test]
    fn test_classify_is_stable() {
        let src = "SELECT 1; $sql.Update($rec, 'T')";
        assert_eq!(classify(src), classify(src));
    }

    #[test]
    fn test_dml_tables() {
        let src = "INSERT INTO orders (id) VALUES (1);\n$sql.Update($rec, \"ITEMS\")\nDELETE FROM orders WHERE id = 2";
        let mut stmts = classify(src);
        let (tables, diags) = stmts.dml_tables(src);
        assert!(diags.is_empty(), "{diags:?}");
        assert_eq!(tables, vec!["orders", "ITEMS"]);
        assert_eq!(stmts[1].table, "ITEMS");
    }

    #[test]
    fn test_dml_service_without_table() {
        let src = "$sql.Insert($rec)";
        let mut stmts = classify(src);
        let (tables, diags) = stmts.dml_tables(src);
        assert!(tables.is_empty());
        assert_eq!(diags[0].code, CODE_DML_SERVICE_ARG);
    }

    #[test]
    fn test_upsert_stays_one_statement() {
        let src = "INSERT INTO t (id) VALUES (1) ON DUPLICATE KEY UPDATE id = 2";
        let mut stmts = classify(src);
        assert_eq!(kinds(&stmts), vec![Some(StatementKind::Exec)]);
        let (tables, diags) = stmts.dml_tables(src);
        assert!(diags.is_empty(), "{diags:?}");
        assert_eq!(tables, vec!["t"]);

        let src = "INSERT INTO t (id) VALUES (1) ON CONFLICT (id) DO UPDATE SET id = 2;\nUPDATE u SET x = 1";
        let stmts = classify(src);
        assert_eq!(stmts.len(), 2);
        assert!(stmts[1].text(src).starts_with("UPDATE u"));
    }

    #[test]
    fn test_unparseable_dml_warns() {
        let src = "INSERT INTO orders VALUES ;\nUPDATE orders SET ;\nDELETE FROM orders WHERE ;";
        let mut stmts = classify(src);
        assert_eq!(stmts.len(), 3);
        let (tables, diags) = stmts.dml_tables(src);
        assert!(tables.is_empty());
        assert_eq!(diags.codes(), vec![CODE_DML_INSERT, CODE_DML_UPDATE, CODE_DML_DELETE]);
        assert!(diags.iter().all(|d| d.severity == Severity::Warning));
    }
}
