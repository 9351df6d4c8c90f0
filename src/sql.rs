//! Adapter over `sqlparser`.
//!
//! Keeps parser details out of the compiler: callers see a small query AST
//! (root FROM, joins with their ON predicate tree, projection) and a DML
//! target extractor. Input must already be normalized template text.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlparser::ast::{
    BinaryOperator, Expr, JoinConstraint, JoinOperator, Query, SelectItem, SetExpr, Statement,
    TableFactor,
};
use sqlparser::dialect::{Dialect, GenericDialect, MySqlDialect, PostgreSqlDialect};
use sqlparser::parser::Parser;
use thiserror::Error;

use crate::cursor;

static LOCATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Line: (\d+), Column: (\d+)").expect("static regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SqlDialect {
    #[default]
    Generic,
    Mysql,
    Postgres,
}

impl SqlDialect {
    fn dialect(&self) -> Box<dyn Dialect> {
        match self {
            SqlDialect::Generic => Box::new(GenericDialect {}),
            SqlDialect::Mysql => Box::new(MySqlDialect {}),
            SqlDialect::Postgres => Box::new(PostgreSqlDialect {}),
        }
    }
}

/// Parser failure with the approximate location it reported (1-based).
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{message}")]
pub struct SqlError {
    pub message: String,
    pub line: Option<usize>,
    pub column: Option<usize>,
}

impl SqlError {
    fn new(message: impl Into<String>) -> Self {
        let message = message.into();
        let (line, column) = match LOCATION.captures(&message) {
            Some(caps) => (
                caps.get(1).and_then(|m| m.as_str().parse().ok()),
                caps.get(2).and_then(|m| m.as_str().parse().ok()),
            ),
            None => (None, None),
        };
        Self {
            message,
            line,
            column,
        }
    }
}

/// A FROM / JOIN target.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TableRef {
    /// Table name, or the innermost table of a derived subquery.
    pub table: String,
    pub alias: String,
    /// Rendered subquery text when the target is `( SELECT .. )`.
    pub subquery: Option<String>,
}

impl TableRef {
    /// The name other clauses use to refer to this target.
    pub fn namespace(&self) -> &str {
        if self.alias.is_empty() { &self.table } else { &self.alias }
    }
}

/// One side of an ON equality.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Selector { namespace: String, column: String },
    Other(String),
}

/// ON predicate tree, parenthesis-transparent.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    And(Box<Predicate>, Box<Predicate>),
    Or(Box<Predicate>, Box<Predicate>),
    Eq(Operand, Operand),
    Other(String),
}

impl Predicate {
    /// `1 = 1` marks a to-one relation in DQL.
    pub fn has_one_marker(&self) -> bool {
        match self {
            Predicate::And(l, r) | Predicate::Or(l, r) => l.has_one_marker() || r.has_one_marker(),
            Predicate::Eq(Operand::Other(l), Operand::Other(r)) => l == "1" && r == "1",
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct JoinAst {
    pub kind: String,
    pub target: TableRef,
    pub on: Option<Predicate>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProjectionItem {
    pub name: String,
    pub namespace: String,
    pub expression: String,
    pub wildcard: bool,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct QueryAst {
    pub from: TableRef,
    pub joins: Vec<JoinAst>,
    pub projection: Vec<ProjectionItem>,
}

impl QueryAst {
    /// Aliases (or bare table names) visible in the query.
    pub fn aliases(&self) -> Vec<String> {
        std::iter::once(&self.from)
            .chain(self.joins.iter().map(|j| &j.target))
            .map(|t| t.namespace().to_string())
            .filter(|n| !n.is_empty())
            .collect()
    }

    pub fn is_wildcard(&self) -> bool {
        self.projection.is_empty() || self.projection.iter().any(|p| p.wildcard)
    }
}

/// Parse a single SELECT.
pub fn parse_query(sql: &str, dialect: SqlDialect) -> Result<QueryAst, SqlError> {
    let statements =
        Parser::parse_sql(dialect.dialect().as_ref(), sql).map_err(|e| SqlError::new(e.to_string()))?;
    let statement = statements
        .into_iter()
        .next()
        .ok_or_else(|| SqlError::new("empty SQL"))?;
    let Statement::Query(query) = statement else {
        return Err(SqlError::new("expected a SELECT statement"));
    };
    query_ast(&query)
}

fn query_ast(query: &Query) -> Result<QueryAst, SqlError> {
    let SetExpr::Select(select) = query.body.as_ref() else {
        return Err(SqlError::new("expected a plain SELECT"));
    };
    let first = select
        .from
        .first()
        .ok_or_else(|| SqlError::new("no FROM clause found"))?;

    let joins = first
        .joins
        .iter()
        .map(|join| {
            let (kind, constraint) = join_parts(&join.join_operator);
            JoinAst {
                kind: kind.to_string(),
                target: table_ref(&join.relation),
                on: match constraint {
                    Some(JoinConstraint::On(expr)) => Some(predicate(expr)),
                    _ => None,
                },
            }
        })
        .collect();

    let projection = select
        .projection
        .iter()
        .map(|item| match item {
            SelectItem::UnnamedExpr(expr) => {
                let (namespace, name) = expr_name(expr);
                ProjectionItem {
                    name,
                    namespace,
                    expression: expr.to_string(),
                    wildcard: false,
                }
            }
            SelectItem::ExprWithAlias { expr, alias } => ProjectionItem {
                name: alias.value.clone(),
                namespace: expr_name(expr).0,
                expression: expr.to_string(),
                wildcard: false,
            },
            SelectItem::QualifiedWildcard(kind, _) => ProjectionItem {
                name: "*".to_string(),
                namespace: kind.to_string(),
                expression: format!("{}.*", kind),
                wildcard: true,
            },
            SelectItem::Wildcard(_) => ProjectionItem {
                name: "*".to_string(),
                expression: "*".to_string(),
                wildcard: true,
                ..Default::default()
            },
        })
        .collect();

    Ok(QueryAst {
        from: table_ref(&first.relation),
        joins,
        projection,
    })
}

fn join_parts(op: &JoinOperator) -> (&'static str, Option<&JoinConstraint>) {
    match op {
        JoinOperator::Join(c) => ("JOIN", Some(c)),
        JoinOperator::Inner(c) => ("INNER", Some(c)),
        JoinOperator::Left(c) => ("LEFT", Some(c)),
        JoinOperator::LeftOuter(c) => ("LEFT OUTER", Some(c)),
        JoinOperator::Right(c) => ("RIGHT", Some(c)),
        JoinOperator::RightOuter(c) => ("RIGHT OUTER", Some(c)),
        JoinOperator::FullOuter(c) => ("FULL OUTER", Some(c)),
        _ => ("OTHER", None),
    }
}

fn table_ref(factor: &TableFactor) -> TableRef {
    match factor {
        TableFactor::Table { name, alias, .. } => TableRef {
            table: name.to_string(),
            alias: alias.as_ref().map(|a| a.name.value.clone()).unwrap_or_default(),
            subquery: None,
        },
        TableFactor::Derived {
            subquery, alias, ..
        } => TableRef {
            table: inner_table(subquery),
            alias: alias.as_ref().map(|a| a.name.value.clone()).unwrap_or_default(),
            subquery: Some(subquery.to_string()),
        },
        other => TableRef {
            table: other.to_string(),
            ..Default::default()
        },
    }
}

fn inner_table(query: &Query) -> String {
    match query.body.as_ref() {
        SetExpr::Select(select) => select
            .from
            .first()
            .map(|f| table_ref(&f.relation).table)
            .unwrap_or_default(),
        _ => String::new(),
    }
}

fn expr_name(expr: &Expr) -> (String, String) {
    match expr {
        Expr::Identifier(ident) => (String::new(), ident.value.clone()),
        Expr::CompoundIdentifier(parts) if parts.len() >= 2 => (
            parts[parts.len() - 2].value.clone(),
            parts[parts.len() - 1].value.clone(),
        ),
        Expr::Nested(inner) => expr_name(inner),
        other => (String::new(), other.to_string()),
    }
}

fn predicate(expr: &Expr) -> Predicate {
    match expr {
        Expr::Nested(inner) => predicate(inner),
        Expr::BinaryOp { left, op, right } => match op {
            BinaryOperator::And => Predicate::And(Box::new(predicate(left)), Box::new(predicate(right))),
            BinaryOperator::Or => Predicate::Or(Box::new(predicate(left)), Box::new(predicate(right))),
            BinaryOperator::Eq => Predicate::Eq(operand(left), operand(right)),
            _ => Predicate::Other(expr.to_string()),
        },
        other => Predicate::Other(other.to_string()),
    }
}

fn operand(expr: &Expr) -> Operand {
    match expr {
        Expr::Identifier(ident) => Operand::Selector {
            namespace: String::new(),
            column: ident.value.clone(),
        },
        Expr::CompoundIdentifier(parts) if parts.len() >= 2 => {
            let (namespace, column) = expr_name(expr);
            Operand::Selector { namespace, column }
        }
        Expr::Nested(inner) => operand(inner),
        other => Operand::Other(other.to_string()),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmlKind {
    Insert,
    Update,
    Delete,
}

impl DmlKind {
    /// Detect the DML kind from the leading keyword.
    pub fn detect(sql: &str) -> Option<Self> {
        let bytes = sql.as_bytes();
        let mut at = 0;
        loop {
            let n = cursor::whitespace(bytes, at) + cursor::comment(bytes, at.min(bytes.len()));
            if n == 0 || at >= bytes.len() {
                break;
            }
            at += n;
        }
        let word = &sql[at.min(sql.len())..];
        let lead: String = word
            .chars()
            .take_while(|c| c.is_ascii_alphabetic())
            .collect::<String>()
            .to_ascii_lowercase();
        match lead.as_str() {
            "insert" => Some(Self::Insert),
            "update" => Some(Self::Update),
            "delete" => Some(Self::Delete),
            _ => None,
        }
    }

    fn prefixes(&self) -> &'static [&'static str] {
        match self {
            DmlKind::Insert => &["INSERT INTO ", "INSERT "],
            DmlKind::Update => &["UPDATE "],
            DmlKind::Delete => &["DELETE FROM ", "DELETE "],
        }
    }
}

impl fmt::Display for DmlKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DmlKind::Insert => write!(f, "insert"),
            DmlKind::Update => write!(f, "update"),
            DmlKind::Delete => write!(f, "delete"),
        }
    }
}

/// Target table of a single DML statement.
pub fn dml_target(sql: &str, kind: DmlKind) -> Result<String, SqlError> {
    dml_target_with(sql, kind, SqlDialect::default())
}

pub fn dml_target_with(sql: &str, kind: DmlKind, dialect: SqlDialect) -> Result<String, SqlError> {
    let statements =
        Parser::parse_sql(dialect.dialect().as_ref(), sql).map_err(|e| SqlError::new(e.to_string()))?;
    let statement = statements
        .first()
        .ok_or_else(|| SqlError::new("empty statement"))?;
    // The canonical rendering is stable across parser versions; the target
    // is the first identifier after the leading keywords.
    let rendered = statement.to_string();
    let rest = kind
        .prefixes()
        .iter()
        .find_map(|p| rendered.strip_prefix(p))
        .ok_or_else(|| SqlError::new(format!("expected {} statement", kind)))?;
    let target: String = rest
        .chars()
        .take_while(|c| !c.is_whitespace() && *c != '(')
        .collect();
    let target = cursor::unquote(&target).to_string();
    if target.is_empty() {
        return Err(SqlError::new(format!("{} statement has no target table", kind)));
    }
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_join() {
        let ast = parse_query(
            "SELECT o.id, i.qty AS quantity FROM orders o JOIN order_items i ON o.id = i.order_id",
            SqlDialect::Generic,
        )
        .unwrap();
        assert_eq!(ast.from.table, "orders");
        assert_eq!(ast.from.alias, "o");
        assert_eq!(ast.joins.len(), 1);
        assert_eq!(ast.joins[0].target.alias, "i");
        assert_eq!(
            ast.joins[0].on,
            Some(Predicate::Eq(
                Operand::Selector { namespace: "o".into(), column: "id".into() },
                Operand::Selector { namespace: "i".into(), column: "order_id".into() },
            ))
        );
        assert_eq!(ast.projection[1].name, "quantity");
        assert_eq!(ast.projection[1].namespace, "i");
        assert!(!ast.is_wildcard());
        assert_eq!(ast.aliases(), vec!["o", "i"]);
    }

    #[test]
    fn test_parse_derived_tables() {
        let ast = parse_query(
            "SELECT o.* FROM (SELECT * FROM ORDERS) o LEFT JOIN (SELECT * FROM ITEMS WHERE 1 = 1) i ON (o.ID = i.ORDER_ID)",
            SqlDialect::Generic,
        )
        .unwrap();
        assert_eq!(ast.from.table, "ORDERS");
        assert!(ast.from.subquery.is_some());
        assert_eq!(ast.joins[0].target.table, "ITEMS");
        assert_eq!(ast.joins[0].kind, "LEFT");
        assert!(matches!(ast.joins[0].on, Some(Predicate::Eq(..))));
        assert!(ast.is_wildcard());
    }

    #[test]
    fn test_non_equality_is_other() {
        let ast = parse_query("SELECT * FROM a JOIN b ON a.x > b.y", SqlDialect::Generic).unwrap();
        assert!(matches!(ast.joins[0].on, Some(Predicate::Other(_))));
    }

    #[test]
    fn test_parse_error_location() {
        let err = parse_query("SELECT ((( FROM", SqlDialect::Generic).unwrap_err();
        assert!(!err.message.is_empty());
    }

    #[test]
    fn test_dml_targets() {
        assert_eq!(dml_target("INSERT INTO orders (id) VALUES (1)", DmlKind::Insert).unwrap(), "orders");
        assert_eq!(dml_target("UPDATE orders SET x = 1 WHERE id = 2", DmlKind::Update).unwrap(), "orders");
        assert_eq!(dml_target("DELETE FROM items WHERE id = 1", DmlKind::Delete).unwrap(), "items");
        assert!(dml_target("UPDATE SET", DmlKind::Update).is_err());
    }

    #[test]
    fn test_detect() {
        assert_eq!(DmlKind::detect("  -- c\n insert into x"), Some(DmlKind::Insert));
        assert_eq!(DmlKind::detect("CALL p()"), None);
    }

    #[test]
    fn test_one_marker() {
        let ast = parse_query("SELECT * FROM a JOIN b ON a.id = b.aid AND 1 = 1", SqlDialect::Generic).unwrap();
        assert!(ast.joins[0].on.as_ref().unwrap().has_one_marker());
    }
}
