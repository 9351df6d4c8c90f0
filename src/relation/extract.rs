//! Join relation extraction and link orientation.

use tracing::debug;

use super::scan::{self, RawJoin, RawQuery};
use crate::cursor::{self, TokenKind, Tokens};
use crate::diagnostic::{
    CODE_INTERNAL, CODE_REL_AMBIGUOUS, CODE_REL_MISSING_ON, CODE_REL_NO_LINKS,
    CODE_REL_UNSUPPORTED, Diagnostic, Diagnostics, Span,
};
use crate::shape::{Cardinality, Relation, RelationLink, pascal_case};
use crate::sql::{Operand, Predicate, QueryAst};

/// `namespace.column`; an empty namespace means the column was unqualified.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Side {
    namespace: String,
    column: String,
}

impl Side {
    fn render(&self) -> String {
        if self.namespace.is_empty() {
            self.column.clone()
        } else {
            format!("{}.{}", self.namespace, self.column)
        }
    }
}

type Pair = (Side, Side);

/// Outcome of orienting one equality pair.
#[derive(Debug, PartialEq)]
enum Orientation {
    Linked(RelationLink),
    /// Linked, but the direction was assumed.
    Inferred(RelationLink),
    Unresolved,
}

/// Derive relations from the joins of `ast`. `source` is the original text
/// the AST was parsed from (before normalization), used for spans and the
/// raw-text fallback.
pub fn extract(source: &str, ast: &QueryAst) -> (Vec<Relation>, Diagnostics) {
    let mut diagnostics = Diagnostics::new();
    let raw = scan::scan(source);
    let raw_joins: Option<&[RawJoin]> = if raw.joins.len() == ast.joins.len() {
        Some(&raw.joins)
    } else {
        diagnostics.push(Diagnostic::warning(
            CODE_INTERNAL,
            format!(
                "source has {} join fragments but the parsed query has {}",
                raw.joins.len(),
                ast.joins.len()
            ),
            Span::from_offsets(source, 0, 0),
        ));
        None
    };

    let root = ast.from.namespace().to_string();
    let mut relations = Vec::with_capacity(ast.joins.len());

    for (idx, join) in ast.joins.iter().enumerate() {
        let raw_join = raw_joins.map(|j| &j[idx]);
        let ref_alias = join.target.namespace().to_string();
        let fragment = raw_join
            .map(|j| source[j.start..j.end].to_string())
            .unwrap_or_else(|| format!("{} JOIN {}", join.kind, join.target.namespace()));
        let on_text = raw_join
            .and_then(|j| j.on)
            .map(|range| RawQuery::text(source, range).to_string());
        let span = match (raw_join, raw_join.and_then(|j| j.on)) {
            (Some(_), Some((s, e))) => Span::from_offsets(source, s, e),
            (Some(j), None) => Span::from_offsets(source, j.start, j.end),
            _ => Span::locate(source, &ref_alias),
        };

        let mut relation = Relation {
            name: ref_alias.clone(),
            holder: pascal_case(&ref_alias),
            reference: ref_alias.clone(),
            table: join.target.table.clone(),
            kind: join.kind.clone(),
            raw: fragment,
            span,
            ..Default::default()
        };

        let Some(on) = &join.on else {
            diagnostics.push(
                Diagnostic::warning(
                    CODE_REL_MISSING_ON,
                    format!("join {} has no ON clause", ref_alias),
                    span,
                )
                .with_hint(format!("add ON {}.<column> = {}.<column>", root, ref_alias)),
            );
            relations.push(relation);
            continue;
        };
        if on.has_one_marker() {
            relation.cardinality = Cardinality::One;
        }

        let mut pairs = Vec::new();
        collect_pairs(on, &mut pairs);
        if pairs.is_empty() {
            if let Some(text) = on_text.as_deref().filter(|t| is_simple_conjunction(t)) {
                pairs = raw_pairs(text);
            }
        }
        if pairs.is_empty() {
            diagnostics.push(
                Diagnostic::warning(
                    CODE_REL_UNSUPPORTED,
                    format!(
                        "join {} ON predicate has no namespace.column equality",
                        ref_alias
                    ),
                    span,
                )
                .with_hint("use equality between columns, e.g. a.id = b.a_id"),
            );
            relations.push(relation);
            continue;
        }

        for (left, right) in &pairs {
            match orient(left, right, &root, &ref_alias) {
                Orientation::Linked(link) => relation.on.push(link),
                Orientation::Inferred(link) => {
                    let message = format!(
                        "orientation of {} inferred as {}.{} -> {}.{}",
                        link.expression,
                        link.parent_namespace,
                        link.parent_column,
                        link.ref_namespace,
                        link.ref_column
                    );
                    diagnostics.push(
                        Diagnostic::warning(CODE_REL_AMBIGUOUS, message.clone(), span)
                            .with_hint(format!("qualify the columns with {} and {}", root, ref_alias)),
                    );
                    relation.warnings.push(message);
                    relation.on.push(link);
                }
                Orientation::Unresolved => {
                    let message = format!(
                        "cannot orient {} = {}: expected namespaces {} or {}",
                        left.render(),
                        right.render(),
                        root,
                        ref_alias
                    );
                    diagnostics.push(
                        Diagnostic::warning(CODE_REL_AMBIGUOUS, message.clone(), span)
                            .with_hint(format!("reference {} on one side of the equality", ref_alias)),
                    );
                    relation.warnings.push(message);
                }
            }
        }

        if relation.on.is_empty() {
            diagnostics.push(Diagnostic::error(
                CODE_REL_NO_LINKS,
                format!("join {} produced no relation links", ref_alias),
                span,
            ));
        }
        relations.push(relation);
    }

    debug!(
        relations = relations.len(),
        diagnostics = diagnostics.len(),
        "extracted join relations"
    );
    (relations, diagnostics)
}

fn collect_pairs(predicate: &Predicate, out: &mut Vec<Pair>) {
    match predicate {
        Predicate::And(l, r) | Predicate::Or(l, r) => {
            collect_pairs(l, out);
            collect_pairs(r, out);
        }
        Predicate::Eq(
            Operand::Selector {
                namespace: ln,
                column: lc,
            },
            Operand::Selector {
                namespace: rn,
                column: rc,
            },
        ) => out.push((
            Side {
                namespace: ln.clone(),
                column: lc.clone(),
            },
            Side {
                namespace: rn.clone(),
                column: rc.clone(),
            },
        )),
        _ => {}
    }
}

/// Conservative allow-list for the raw fallback: no quotes, groups,
/// template tokens or calls; only words, dots, `=` and whitespace.
fn is_simple_conjunction(text: &str) -> bool {
    !text.is_empty()
        && Tokens::new(text).all(|t| match t.kind {
            TokenKind::Space | TokenKind::Word => true,
            TokenKind::Punct => matches!(t.text(text), "." | "="),
            _ => false,
        })
}

fn raw_pairs(text: &str) -> Vec<Pair> {
    let mut pairs = Vec::new();
    let mut start = 0;
    let mut pieces = Vec::new();
    for tok in Tokens::new(text) {
        let word = tok.text(text);
        if tok.kind == TokenKind::Word
            && (word.eq_ignore_ascii_case("and") || word.eq_ignore_ascii_case("or"))
        {
            pieces.push(&text[start..tok.start]);
            start = tok.end;
        }
    }
    pieces.push(&text[start..]);

    for piece in pieces {
        let sides: Vec<&str> = piece.split('=').map(str::trim).collect();
        if let [l, r] = sides.as_slice() {
            if let (Some(l), Some(r)) = (raw_side(l), raw_side(r)) {
                pairs.push((l, r));
            }
        }
    }
    pairs
}

fn raw_side(text: &str) -> Option<Side> {
    let parts: Vec<&str> = text.split('.').collect();
    let valid = |p: &str| cursor::identifier(p.as_bytes(), 0) == p.len() && !p.is_empty();
    match parts.as_slice() {
        [column] if valid(column) => Some(Side {
            namespace: String::new(),
            column: column.to_string(),
        }),
        [namespace, column] if valid(namespace) && valid(column) => Some(Side {
            namespace: namespace.to_string(),
            column: column.to_string(),
        }),
        _ => None,
    }
}

fn same(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

fn link(parent: &Side, reference: &Side, root: &str, ref_alias: &str, left: &Side, right: &Side) -> RelationLink {
    let or = |ns: &str, fallback: &str| {
        if ns.is_empty() { fallback.to_string() } else { ns.to_string() }
    };
    RelationLink {
        parent_namespace: or(&parent.namespace, root),
        parent_column: parent.column.clone(),
        ref_namespace: or(&reference.namespace, ref_alias),
        ref_column: reference.column.clone(),
        expression: format!("{} = {}", left.render(), right.render()),
    }
}

/// Orientation precedence; the order matters for multi-hop chains where the
/// parent is a previous join rather than the root.
fn orient(left: &Side, right: &Side, root: &str, ref_alias: &str) -> Orientation {
    let (ln, rn) = (left.namespace.as_str(), right.namespace.as_str());
    let mk = |parent: &Side, reference: &Side| link(parent, reference, root, ref_alias, left, right);

    if same(ln, root) && (same(rn, ref_alias) || rn.is_empty()) {
        return Orientation::Linked(mk(left, right));
    }
    if same(rn, root) && (same(ln, ref_alias) || ln.is_empty()) {
        return Orientation::Linked(mk(right, left));
    }
    if ln.is_empty() && rn.is_empty() {
        return Orientation::Inferred(mk(left, right));
    }
    if same(rn, ref_alias) && !same(ln, ref_alias) {
        return Orientation::Linked(mk(left, right));
    }
    if same(ln, ref_alias) && !same(rn, ref_alias) {
        return Orientation::Linked(mk(right, left));
    }
    Orientation::Unresolved
}
