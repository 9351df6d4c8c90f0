//! Canonical form of a route document, used only for equivalence checks.
//!
//! The projection keeps an allow-listed field set per node kind, drops
//! synthesized parameters, sorts order-insensitive lists and rewrites
//! cosmetic template syntax, so two documents that mean the same thing
//! produce equal values.

mod diff;
mod tag;

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value as Json};

use crate::ir::{Node, Scalar, Value};

pub use diff::diff;
pub use tag::parse_tag;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{\s*([A-Za-z_][A-Za-z0-9_.]*)\s*\}").expect("static regex")
});

/// Synthetic substitution parameters carry this name prefix.
pub const SYNTHETIC_PREFIX: &str = "__";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct CanonicalDocument(pub Json);

impl CanonicalDocument {
    pub fn as_json(&self) -> &Json {
        &self.0
    }
}

impl fmt::Display for CanonicalDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string_pretty(&self.0) {
            Ok(s) => write!(f, "{}", s),
            Err(_) => write!(f, "{}", self.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Document,
    Resource,
    Route,
    Input,
    Output,
    Parameter,
    In,
    Schema,
    View,
    Selector,
    Template,
    With,
    Of,
    Link,
    RefOnly,
    Batch,
    Partitioned,
    Column,
    TypeDef,
}

impl Kind {
    fn fields(&self) -> &'static [&'static str] {
        match self {
            Kind::Document => &["Routes", "Resource"],
            Kind::Resource => &["Views", "Types", "Parameters"],
            Kind::Route => &["URI", "Method", "View", "Input", "Output"],
            Kind::Input => &["Parameters"],
            Kind::Output => &["Cardinality", "CaseFormat", "Style", "Field", "CompressAboveSize"],
            Kind::Parameter => &["Name", "In", "Required", "Schema", "Tag", "Cardinality"],
            Kind::In => &["Kind", "Name"],
            Kind::Schema => &["DataType", "Cardinality", "Name"],
            Kind::View => &[
                "Name",
                "Table",
                "Mode",
                "Connector",
                "Template",
                "Selector",
                "With",
                "Schema",
                "Batch",
                "AllowNulls",
                "PublishParent",
                "MatchStrategy",
                "Partitioned",
                "RelationalConcurrency",
                "Columns",
            ],
            Kind::Selector => &["Namespace", "Limit"],
            Kind::Template => &["Source", "Parameters"],
            Kind::With => &["Name", "Holder", "Cardinality", "IncludeColumn", "On", "Of"],
            Kind::Of => &["Ref", "On"],
            Kind::Link => &["Column", "Namespace", "Field"],
            Kind::RefOnly => &["Ref"],
            Kind::Batch => &["Size"],
            Kind::Partitioned => &["DataType"],
            Kind::Column => &["Name", "DataType", "Tag"],
            Kind::TypeDef => &["Name", "DataType", "Package"],
        }
    }

    fn child(&self, key: &str) -> Option<Kind> {
        let kind = match (self, key) {
            (Kind::Document, "Routes") => Kind::Route,
            (Kind::Document, "Resource") => Kind::Resource,
            (Kind::Resource, "Views") => Kind::View,
            (Kind::Resource, "Types") => Kind::TypeDef,
            (Kind::Resource | Kind::Input | Kind::Template, "Parameters") => Kind::Parameter,
            (Kind::Route, "View") | (Kind::View, "Connector") => Kind::RefOnly,
            (Kind::Route, "Input") => Kind::Input,
            (Kind::Route, "Output") => Kind::Output,
            (Kind::Parameter, "In") => Kind::In,
            (Kind::Parameter | Kind::View, "Schema") => Kind::Schema,
            (Kind::View, "Selector") => Kind::Selector,
            (Kind::View, "Template") => Kind::Template,
            (Kind::View, "With") => Kind::With,
            (Kind::View, "Batch") => Kind::Batch,
            (Kind::View, "Partitioned") => Kind::Partitioned,
            (Kind::View, "Columns") => Kind::Column,
            (Kind::With, "On") | (Kind::Of, "On") => Kind::Link,
            (Kind::With, "Of") => Kind::Of,
            _ => return None,
        };
        Some(kind)
    }

    /// Fields a list of this kind sorts by; `None` keeps the authored order.
    fn sort_keys(&self) -> Option<&'static [&'static str]> {
        match self {
            Kind::Link => None,
            Kind::Route => Some(&["URI", "Method"]),
            Kind::With => Some(&["Name", "Holder"]),
            Kind::Parameter | Kind::View | Kind::Column | Kind::TypeDef => Some(&["Name"]),
            _ => Some(&[]),
        }
    }
}

pub fn canonicalize(document: &Node) -> CanonicalDocument {
    CanonicalDocument(node(document, Kind::Document, ""))
}

fn node(n: &Node, kind: Kind, key: &str) -> Json {
    match &n.value {
        Value::Map(entries) => map(entries, kind),
        Value::List(items) => list(items, kind, key),
        Value::Scalar(s) => scalar(s, key),
    }
}

fn map(entries: &[(String, Node)], kind: Kind) -> Json {
    let mut out = Map::new();
    for field in kind.fields() {
        let Some((_, value)) = entries.iter().find(|(k, _)| k.eq_ignore_ascii_case(field)) else {
            continue;
        };
        let child = kind.child(field).unwrap_or(kind);
        let v = node(value, child, field);
        if !v.is_null() {
            out.insert(field.to_string(), v);
        }
    }
    Json::Object(out)
}

fn list(items: &[Node], kind: Kind, key: &str) -> Json {
    let mut out: Vec<Json> = items
        .iter()
        .filter(|item| !(kind == Kind::Parameter && is_synthetic(item)))
        .map(|item| node(item, kind, key))
        .collect();
    if let Some(keys) = kind.sort_keys() {
        out.sort_by_cached_key(|v| sort_key(v, keys));
    }
    Json::Array(out)
}

fn sort_key(value: &Json, keys: &[&str]) -> (Vec<String>, String) {
    let fields = keys
        .iter()
        .map(|k| match value.get(*k) {
            Some(Json::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        })
        .collect();
    (fields, value.to_string())
}

/// Component wiring and `__`-prefixed substitution parameters.
fn is_synthetic(param: &Node) -> bool {
    let kind = param.text_at(&["In", "Kind"]);
    kind.eq_ignore_ascii_case("component") || param.text_at(&["Name"]).starts_with(SYNTHETIC_PREFIX)
}

fn scalar(s: &Scalar, key: &str) -> Json {
    match s {
        Scalar::Null => Json::Null,
        Scalar::Bool(b) => Json::Bool(*b),
        Scalar::Int(n) => Json::from(*n),
        Scalar::Float(f) => serde_json::Number::from_f64(*f)
            .map(Json::Number)
            .unwrap_or(Json::Null),
        Scalar::String(text) => string(text, key),
    }
}

fn string(text: &str, key: &str) -> Json {
    let text = PLACEHOLDER.replace_all(text, "$$$1");
    match key {
        "Source" => Json::String(text.split_whitespace().collect::<Vec<_>>().join(" ")),
        "Tag" => {
            let mut tag = Map::new();
            tag.insert("Raw".to_string(), Json::String(text.to_string()));
            if let Some(parsed) = parse_tag(&text) {
                tag.insert(
                    "Parsed".to_string(),
                    Json::Object(parsed.into_iter().map(|(k, v)| (k, Json::String(v))).collect()),
                );
            }
            Json::Object(tag)
        }
        _ => Json::String(text.into_owned()),
    }
}
