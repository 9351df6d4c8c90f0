//! Raw FROM / JOIN scanner over the original source text.
//!
//! Template tokens are opaque here, so offsets point into the text the
//! author wrote. The scanner only looks at the top level of the first
//! SELECT; groups (subqueries, calls) are atomic.

use crate::cursor::{TokenKind, Tokens};

const JOIN_PREFIXES: &[&str] = &["left", "right", "inner", "outer", "full", "cross", "natural"];
const CLAUSE_ENDS: &[&str] = &["where", "group", "order", "limit", "having", "union", "offset"];
const NOT_ALIAS: &[&str] = &[
    "on", "join", "left", "right", "inner", "outer", "full", "cross", "natural", "where", "group",
    "order", "limit", "having", "union", "offset", "using",
];

/// A FROM or JOIN target as written.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawTarget {
    pub start: usize,
    pub end: usize,
    pub alias: String,
    /// Byte range of the subquery body (inside the parentheses).
    pub subquery: Option<(usize, usize)>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawJoin {
    /// Whole fragment, from the join keywords to the next clause.
    pub start: usize,
    pub end: usize,
    pub target: RawTarget,
    /// Byte range of the ON predicate.
    pub on: Option<(usize, usize)>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawQuery {
    pub from: Option<RawTarget>,
    pub joins: Vec<RawJoin>,
}

impl RawQuery {
    pub fn text<'a>(src: &'a str, range: (usize, usize)) -> &'a str {
        src[range.0..range.1].trim()
    }
}

#[derive(Debug, Clone, Copy)]
struct Word {
    start: usize,
    end: usize,
    group: bool,
}

/// Scan the top-level FROM target and its JOIN fragments.
pub fn scan(src: &str) -> RawQuery {
    let words: Vec<Word> = Tokens::new(src)
        .filter(|t| !t.is_trivia())
        .filter(|t| t.kind != TokenKind::Directive)
        .map(|t| Word {
            start: t.start,
            end: t.end,
            group: t.kind == TokenKind::Group,
        })
        .collect();
    let is = |w: &Word, kw: &str| !w.group && src[w.start..w.end].eq_ignore_ascii_case(kw);
    let is_any = |w: &Word, kws: &[&str]| kws.iter().any(|kw| is(w, kw));

    let Some(from_at) = words.iter().position(|w| is(w, "from")) else {
        return RawQuery::default();
    };

    let mut query = RawQuery::default();
    let mut i = from_at + 1;
    let (from, next) = target(src, &words, i);
    query.from = from;
    i = next;

    while i < words.len() {
        let w = &words[i];
        if is_any(w, CLAUSE_ENDS) {
            break;
        }
        if !(is(w, "join") || is_any(w, JOIN_PREFIXES)) {
            i += 1;
            continue;
        }
        let start = w.start;
        while i < words.len() && !is(&words[i], "join") {
            i += 1;
        }
        if i >= words.len() {
            break;
        }
        let (target, after) = target(src, &words, i + 1);
        let mut j = after;
        let mut on = None;
        if j < words.len() && is(&words[j], "on") {
            let on_start = words[j].end;
            j += 1;
            while j < words.len()
                && !is(&words[j], "join")
                && !is_any(&words[j], JOIN_PREFIXES)
                && !is_any(&words[j], CLAUSE_ENDS)
            {
                j += 1;
            }
            let on_end = if j < words.len() { words[j].start } else { src.len() };
            on = Some((on_start, on_end));
        } else {
            while j < words.len()
                && !is(&words[j], "join")
                && !is_any(&words[j], JOIN_PREFIXES)
                && !is_any(&words[j], CLAUSE_ENDS)
            {
                j += 1;
            }
        }
        let end = if j < words.len() { words[j].start } else { src.len() };
        query.joins.push(RawJoin {
            start,
            end: trim_end(src, start, end),
            target: target.unwrap_or_default(),
            on: on.map(|(s, e)| (s, trim_end(src, s, e))),
        });
        i = j;
    }
    query
}

fn trim_end(src: &str, start: usize, end: usize) -> usize {
    start + src[start..end].trim_end().len()
}

/// Target at `words[i]`: a group or a dotted name, then an optional alias.
fn target(src: &str, words: &[Word], mut i: usize) -> (Option<RawTarget>, usize) {
    let Some(first) = words.get(i) else {
        return (None, i);
    };
    let mut t = RawTarget {
        start: first.start,
        end: first.end,
        ..Default::default()
    };
    if first.group {
        t.subquery = Some((first.start + 1, first.end - 1));
        i += 1;
    } else {
        i += 1;
        // schema.table
        while i + 1 < words.len() && &src[words[i].start..words[i].end] == "." {
            t.end = words[i + 1].end;
            i += 2;
        }
    }
    if let Some(w) = words.get(i) {
        let text = &src[w.start..w.end];
        if text.eq_ignore_ascii_case("as") {
            if let Some(alias) = words.get(i + 1) {
                t.alias = src[alias.start..alias.end].to_string();
                i += 2;
            }
        } else if !w.group
            && text.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
            && !NOT_ALIAS.iter().any(|kw| text.eq_ignore_ascii_case(kw))
        {
            t.alias = text.to_string();
            i += 1;
        }
    }
    (Some(t), i)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_plain_join() {
        let src = "SELECT o.id FROM orders o JOIN order_items i ON o.id = i.order_id WHERE o.x = 1";
        let q = scan(src);
        let from = q.from.unwrap();
        assert_eq!(&src[from.start..from.end], "orders");
        assert_eq!(from.alias, "o");
        assert_eq!(q.joins.len(), 1);
        let join = &q.joins[0];
        assert_eq!(&src[join.start..join.end], "JOIN order_items i ON o.id = i.order_id");
        assert_eq!(RawQuery::text(src, join.on.unwrap()), "o.id = i.order_id");
    }

    #[test]
    fn test_scan_templated_subqueries() {
        let src = "SELECT o.*, i.* FROM (SELECT * FROM ORDERS ${predicate.Build(\"WHERE\")}) o \
                   LEFT JOIN (SELECT * FROM ITEMS) i ON o.ID = i.ORDER_ID AND 1 = 1 \
                   JOIN (SELECT * FROM PRODUCTS) p ON i.PRODUCT_ID = p.ID";
        let q = scan(src);
        let from = q.from.unwrap();
        assert_eq!(
            RawQuery::text(src, from.subquery.unwrap()),
            "SELECT * FROM ORDERS ${predicate.Build(\"WHERE\")}"
        );
        assert_eq!(q.joins.len(), 2);
        assert_eq!(q.joins[0].target.alias, "i");
        assert!(src[q.joins[0].start..].starts_with("LEFT JOIN"));
        assert_eq!(RawQuery::text(src, q.joins[0].on.unwrap()), "o.ID = i.ORDER_ID AND 1 = 1");
        assert_eq!(RawQuery::text(src, q.joins[1].on.unwrap()), "i.PRODUCT_ID = p.ID");
    }

    #[test]
    fn test_scan_join_without_on() {
        let src = "SELECT * FROM a AS x CROSS JOIN b y";
        let q = scan(src);
        assert_eq!(q.from.unwrap().alias, "x");
        assert_eq!(q.joins[0].target.alias, "y");
        assert!(q.joins[0].on.is_none());
    }

    #[test]
    fn test_scan_without_from() {
        assert_eq!(scan("SELECT 1"), RawQuery::default());
    }
}
