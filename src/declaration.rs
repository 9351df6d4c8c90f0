//! Embedded declaration calls.
//!
//! DQL carries shape hints as function-call annotations placed anywhere in
//! the text, e.g. `cast(o.TOTAL as 'float64')` or `set_limit(items, 25)`.
//! Declarations are opportunistic: any `name(args)` becomes one, unknown
//! names keep their lowercase text as kind, and nothing here ever fails.

use serde::Serialize;
use std::fmt;

use crate::cursor::{self, Token, TokenKind, Tokens};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum DeclarationKind {
    Cast,
    Tag,
    SetLimit,
    AllowNulls,
    SetPartitioner,
    UseConnector,
    MatchStrategy,
    CompressAboveSize,
    BatchSize,
    RelationalConcurrency,
    PublishParent,
    Cardinality,
    Package,
    Import,
    Other(String),
}

impl DeclarationKind {
    pub fn from_name(name: &str) -> Self {
        let lower = name.to_ascii_lowercase();
        match lower.as_str() {
            "cast" => Self::Cast,
            "tag" => Self::Tag,
            "set_limit" => Self::SetLimit,
            "allow_nulls" => Self::AllowNulls,
            "set_partitioner" => Self::SetPartitioner,
            "use_connector" => Self::UseConnector,
            "match_strategy" => Self::MatchStrategy,
            "compress_above_size" => Self::CompressAboveSize,
            "batch_size" => Self::BatchSize,
            "relational_concurrency" => Self::RelationalConcurrency,
            "publish_parent" => Self::PublishParent,
            "cardinality" => Self::Cardinality,
            "package" => Self::Package,
            "import" => Self::Import,
            _ => Self::Other(lower),
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Other(_))
    }
}

impl Default for DeclarationKind {
    fn default() -> Self {
        Self::Other(String::new())
    }
}

impl fmt::Display for DeclarationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Cast => "cast",
            Self::Tag => "tag",
            Self::SetLimit => "set_limit",
            Self::AllowNulls => "allow_nulls",
            Self::SetPartitioner => "set_partitioner",
            Self::UseConnector => "use_connector",
            Self::MatchStrategy => "match_strategy",
            Self::CompressAboveSize => "compress_above_size",
            Self::BatchSize => "batch_size",
            Self::RelationalConcurrency => "relational_concurrency",
            Self::PublishParent => "publish_parent",
            Self::Cardinality => "cardinality",
            Self::Package => "package",
            Self::Import => "import",
            Self::Other(name) => name,
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Declaration {
    pub kind: DeclarationKind,
    pub raw: String,
    pub offset: usize,
    pub args: Vec<String>,
    pub target: String,
    pub data_type: String,
    pub tag: String,
    pub limit: Option<u64>,
    pub connector: String,
    pub strategy: String,
    pub partition: String,
    pub size: Option<u64>,
    pub value: String,
    pub package: String,
    pub alias: String,
    /// A shape annotation rather than an SQL call that happens to share the
    /// name (`CAST(x AS INT)` is SQL, `cast(x as 'int')` is an annotation).
    pub annotation: bool,
}

impl Declaration {
    pub fn kind(&self) -> &DeclarationKind {
        &self.kind
    }

    pub fn is(&self, kind: &DeclarationKind) -> bool {
        &self.kind == kind
    }

    /// Byte offset one past the raw call text.
    pub fn end(&self) -> usize {
        self.offset + self.raw.len()
    }

    fn new(name: &str, raw: &str, offset: usize, body: &str) -> Self {
        let kind = DeclarationKind::from_name(name);
        let args: Vec<String> = cursor::split_top_level(body, b',')
            .into_iter()
            .map(str::to_string)
            .collect();
        let mut decl = Declaration {
            annotation: kind.is_known(),
            kind,
            raw: raw.to_string(),
            offset,
            args,
            ..Default::default()
        };
        decl.normalize();
        decl
    }

    fn arg(&self, idx: usize) -> &str {
        self.args.get(idx).map(String::as_str).unwrap_or("")
    }

    fn normalize(&mut self) {
        let kind = self.kind.clone();
        let first = self.arg(0).to_string();
        let second = cursor::unquote(self.arg(1)).to_string();
        match kind {
            DeclarationKind::Cast => {
                if self.args.len() >= 2 {
                    self.target = first;
                    self.data_type = second;
                } else if let Some((expr, ty)) = split_as(&first) {
                    self.annotation = cursor::is_quoted(ty);
                    self.target = expr.to_string();
                    self.data_type = cursor::unquote(ty).to_string();
                } else {
                    self.annotation = false;
                    self.target = first;
                }
            }
            DeclarationKind::Tag => {
                self.target = first;
                self.tag = second;
            }
            DeclarationKind::SetLimit => {
                self.target = first;
                self.limit = second.parse().ok();
            }
            DeclarationKind::AllowNulls | DeclarationKind::PublishParent => self.target = first,
            DeclarationKind::SetPartitioner => {
                self.target = first;
                self.partition = second;
                self.value = cursor::unquote(self.arg(2)).to_string();
            }
            DeclarationKind::UseConnector => {
                self.target = first;
                self.connector = second;
            }
            DeclarationKind::MatchStrategy => {
                self.target = first;
                self.strategy = second;
            }
            DeclarationKind::CompressAboveSize => {
                self.size = cursor::unquote(&first).parse().ok();
            }
            DeclarationKind::BatchSize => {
                self.target = first;
                self.size = second.parse().ok();
            }
            DeclarationKind::RelationalConcurrency | DeclarationKind::Cardinality => {
                self.target = first;
                self.value = second;
            }
            DeclarationKind::Package => self.package = cursor::unquote(&first).to_string(),
            DeclarationKind::Import => {
                let (path, alias) = match split_as(&first) {
                    Some((path, alias)) => (path, cursor::unquote(alias).to_string()),
                    None => (first.as_str(), second),
                };
                self.package = cursor::unquote(path).to_string();
                self.alias = if alias.is_empty() {
                    self.package.rsplit('/').next().unwrap_or_default().to_string()
                } else {
                    alias
                };
            }
            DeclarationKind::Other(_) => {}
        }
    }
}

/// Split `expr as type` on the first un-nested ` as `, case-insensitively.
fn split_as(text: &str) -> Option<(&str, &str)> {
    let bytes = text.as_bytes();
    Tokens::new(text)
        .find(|t| {
            t.kind == TokenKind::Word
                && t.text(text).eq_ignore_ascii_case("as")
                && t.start > 0
                && bytes[t.start - 1].is_ascii_whitespace()
                && bytes.get(t.end).is_some_and(|b| b.is_ascii_whitespace())
        })
        .map(|t| (text[..t.start].trim(), text[t.end..].trim()))
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Declarations(Vec<Declaration>);

impl Declarations {
    pub fn iter(&self) -> std::slice::Iter<'_, Declaration> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn of_kind<'a>(&'a self, kind: &'a DeclarationKind) -> impl Iterator<Item = &'a Declaration> {
        self.0.iter().filter(move |d| d.is(kind))
    }

    /// Known-kind annotations, in source order.
    pub fn annotations(&self) -> impl Iterator<Item = &Declaration> {
        self.0.iter().filter(|d| d.annotation)
    }
}

impl std::ops::Index<usize> for Declarations {
    type Output = Declaration;

    fn index(&self, index: usize) -> &Self::Output {
        &self.0[index]
    }
}

impl<'a> IntoIterator for &'a Declarations {
    type Item = &'a Declaration;
    type IntoIter = std::slice::Iter<'a, Declaration>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Extract every declaration in `text`.
pub fn parse(text: &str) -> Declarations {
    let mut out = Vec::new();
    scan(text, 0, &mut out);
    out.sort_by_key(|d| d.offset);
    tracing::debug!(declarations = out.len(), "parsed declarations");
    Declarations(out)
}

fn scan(text: &str, base: usize, out: &mut Vec<Declaration>) {
    let tokens: Vec<Token> = Tokens::new(text).filter(|t| !t.is_trivia()).collect();
    let mut i = 0;
    while i < tokens.len() {
        let tok = tokens[i];
        let next = tokens.get(i + 1).filter(|t| t.kind == TokenKind::Group);
        match (tok.kind, next) {
            (TokenKind::Word | TokenKind::Directive, Some(group)) => {
                let name = tok.text(text).trim_start_matches('#');
                if !name.as_bytes().first().copied().is_some_and(cursor::is_ident_start) {
                    i += 1;
                    continue;
                }
                let body = inner(group.text(text));
                let body_base = base + group.start + 1;
                if name.eq_ignore_ascii_case("set") {
                    if let Some(decl) = unwrap_embedded(body, body_base) {
                        out.push(decl);
                        i += 2;
                        continue;
                    }
                }
                let raw = &text[tok.start..group.end];
                let decl = Declaration::new(name, raw, base + tok.start, body);
                let descend = !decl.kind().is_known();
                out.push(decl);
                if descend {
                    scan(body, body_base, out);
                }
                i += 2;
            }
            (TokenKind::Group, _) => {
                scan(inner(tok.text(text)), base + tok.start + 1, out);
                i += 1;
            }
            (TokenKind::Selector, _) => {
                if let Some(decl) = embedded_call(tok.text(text), base + tok.start) {
                    out.push(decl);
                }
                i += 1;
            }
            _ => i += 1,
        }
    }
}

fn inner(group: &str) -> &str {
    &group[1..group.len() - 1]
}

/// `$_ = $package('x')` inside a `set(..)`.
fn unwrap_embedded(body: &str, base: usize) -> Option<Declaration> {
    ["$package(", "$import("].iter().find_map(|needle| {
        let idx = body.find(needle)?;
        embedded_call(&body[idx..], base + idx)
    })
}

fn embedded_call(selector: &str, offset: usize) -> Option<Declaration> {
    let name = ["package", "import"]
        .into_iter()
        .find(|n| selector[1..].starts_with(n) && selector[1 + n.len()..].starts_with('('))?;
    let open = 1 + name.len();
    let len = cursor::group(selector.as_bytes(), open);
    if len == 0 {
        return None;
    }
    let raw = &selector[..open + len];
    Some(Declaration::new(name, raw, offset, inner(&raw[open..])))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn known(text: &str) -> Vec<Declaration> {
        parse(text).iter().filter(|d| d.kind().is_known()).cloned().collect()
    }

    #[test]
    fn test_cast_forms() {
        let decls = known("SELECT cast(o.ID as 'int'), cast(o.TOTAL, 'float64') FROM t");
        assert_eq!(decls.len(), 2);
        assert_eq!(decls[0].target, "o.ID");
        assert_eq!(decls[0].data_type, "int");
        assert!(decls[0].annotation);
        assert_eq!(decls[1].target, "o.TOTAL");
        assert_eq!(decls[1].data_type, "float64");
    }

    #[test]
    fn test_sql_cast_is_not_an_annotation() {
        let decls = parse("SELECT CAST(x AS INTEGER) FROM t");
        let cast = decls.of_kind(&DeclarationKind::Cast).next().unwrap();
        assert!(!cast.annotation);
        assert_eq!(cast.data_type, "INTEGER");
    }

    #[test]
    fn test_cast_as_is_case_insensitive_and_unnested() {
        let decls = known("cast(coalesce(a, 'x as y') AS 'Order')");
        assert_eq!(decls[0].target, "coalesce(a, 'x as y')");
        assert_eq!(decls[0].data_type, "Order");
    }

    #[test]
    fn test_kind_specific_fields() {
        let src = "SELECT o.*, set_limit(o, 25), use_connector(o, 'dev'), tag(o.ID, 'json:\"id\"'), \
                   match_strategy(i, 'read_all'), batch_size(i, 100), compress_above_size(1024) FROM t";
        let decls = known(src);
        let kinds: Vec<String> = decls.iter().map(|d| d.kind().to_string()).collect();
        assert_eq!(
            kinds,
            vec!["set_limit", "use_connector", "tag", "match_strategy", "batch_size", "compress_above_size"]
        );
        assert_eq!(decls[0].limit, Some(25));
        assert_eq!(decls[1].connector, "dev");
        assert_eq!(decls[2].tag, "json:\"id\"");
        assert_eq!(decls[3].strategy, "read_all");
        assert_eq!(decls[4].size, Some(100));
        assert_eq!(decls[5].size, Some(1024));
    }

    #[test]
    fn test_unknown_names_pass_through() {
        let decls = parse("SELECT COUNT(*) FROM t");
        assert_eq!(decls[0].kind, DeclarationKind::Other("count".into()));
        assert_eq!(decls[0].args, vec!["*"]);
    }

    #[test]
    fn test_nested_in_subquery() {
        let src = "SELECT * FROM (SELECT * FROM ORDERS WHERE set_limit(x, 5)) o";
        let decls = known(src);
        assert_eq!(decls.len(), 1);
        assert_eq!(&src[decls[0].offset..decls[0].end()], "set_limit(x, 5)");
    }

    #[test]
    fn test_quoted_and_commented_calls_are_skipped() {
        assert!(known("SELECT 'set_limit(o, 1)' -- cast(a as 'b')\n/* tag(x,'y') */").is_empty());
    }

    #[test]
    fn test_set_package_unwrapping() {
        let src = "#set($_ = $package('acme/orders'))\n#set($_ = $import('github.com/acme/shape/order' as 'ord'))";
        let decls = known(src);
        assert_eq!(decls.len(), 2);
        assert_eq!(decls[0].kind, DeclarationKind::Package);
        assert_eq!(decls[0].package, "acme/orders");
        assert_eq!(decls[1].kind, DeclarationKind::Import);
        assert_eq!(decls[1].package, "github.com/acme/shape/order");
        assert_eq!(decls[1].alias, "ord");
        assert_eq!(&src[decls[1].offset..decls[1].end()], "$import('github.com/acme/shape/order' as 'ord')");
    }

    #[test]
    fn test_import_default_alias() {
        let decls = known("import('github.com/acme/shape/order')");
        assert_eq!(decls[0].alias, "order");
    }
}
