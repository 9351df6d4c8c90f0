//! Compiled shape: views, relations and column schema.

use serde::Serialize;
use std::fmt;

use crate::diagnostic::Span;
use crate::ir::Node;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum ViewMode {
    #[default]
    #[serde(rename = "SQLQuery")]
    SqlQuery,
    #[serde(rename = "SQLExec")]
    SqlExec,
}

impl fmt::Display for ViewMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ViewMode::SqlQuery => write!(f, "SQLQuery"),
            ViewMode::SqlExec => write!(f, "SQLExec"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Cardinality {
    One,
    #[default]
    Many,
}

impl Cardinality {
    pub fn parse(text: &str) -> Option<Self> {
        match text.trim().to_ascii_lowercase().as_str() {
            "one" => Some(Self::One),
            "many" => Some(Self::Many),
            _ => None,
        }
    }
}

impl fmt::Display for Cardinality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cardinality::One => write!(f, "One"),
            Cardinality::Many => write!(f, "Many"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    #[default]
    String,
    Int,
    Int64,
    Float32,
    Float64,
    Bool,
}

impl ColumnType {
    /// Map a cast target onto a column type. Unknown names yield `None`.
    pub fn from_name(name: &str) -> Option<Self> {
        let lower = name.trim().trim_start_matches('*').to_ascii_lowercase();
        let ty = match lower.as_str() {
            "string" | "text" | "varchar" | "char" | "time.time" | "time" => Self::String,
            "int" | "int32" | "integer" | "uint" | "uint32" | "smallint" => Self::Int,
            "int64" | "bigint" | "uint64" => Self::Int64,
            "float32" | "real" => Self::Float32,
            "float64" | "float" | "double" | "decimal" | "numeric" => Self::Float64,
            "bool" | "boolean" => Self::Bool,
            _ => return None,
        };
        Some(ty)
    }

    /// Type of a literal projection expression.
    pub fn of_literal(expr: &str) -> Option<Self> {
        let expr = expr.trim();
        if expr.eq_ignore_ascii_case("true") || expr.eq_ignore_ascii_case("false") {
            Some(Self::Bool)
        } else if expr.parse::<i64>().is_ok() {
            Some(Self::Int)
        } else if expr.parse::<f64>().is_ok() {
            Some(Self::Float64)
        } else if expr.starts_with('\'') {
            Some(Self::String)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::String => "string",
            ColumnType::Int => "int",
            ColumnType::Int64 => "int64",
            ColumnType::Float32 => "float32",
            ColumnType::Float64 => "float64",
            ColumnType::Bool => "bool",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Column {
    pub name: String,
    pub data_type: ColumnType,
    pub expression: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub tag: String,
}

/// One oriented equality pair from a JOIN .. ON predicate. `parent_*`
/// always refers to the enclosing side.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct RelationLink {
    pub parent_namespace: String,
    pub parent_column: String,
    pub ref_namespace: String,
    pub ref_column: String,
    pub expression: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Relation {
    pub name: String,
    pub holder: String,
    #[serde(rename = "Ref")]
    pub reference: String,
    pub table: String,
    pub kind: String,
    pub raw: String,
    pub on: Vec<RelationLink>,
    pub warnings: Vec<String>,
    pub cardinality: Cardinality,
    #[serde(skip)]
    pub span: Span,
}

impl Relation {
    /// Namespace of the view this relation hangs off.
    pub fn parent_namespace(&self) -> Option<&str> {
        self.on.first().map(|l| l.parent_namespace.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Partitioner {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct View {
    pub path: String,
    pub holder: String,
    pub name: String,
    /// Namespace the SQL refers to this view by.
    pub namespace: String,
    pub mode: ViewMode,
    pub table: String,
    #[serde(rename = "SQL")]
    pub sql: String,
    pub cardinality: Cardinality,
    pub schema: Vec<Column>,
    pub relations: Vec<Relation>,
    pub limit: Option<u64>,
    pub connector: String,
    pub allow_nulls: bool,
    pub partitioner: Option<Partitioner>,
    pub match_strategy: String,
    pub batch_size: Option<u64>,
    pub relational_concurrency: Option<u64>,
    pub publish_parent: bool,
}

impl View {
    pub fn query(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    fn answers_to(&self, namespace: &str) -> bool {
        self.namespace.eq_ignore_ascii_case(namespace) || self.name.eq_ignore_ascii_case(namespace)
    }

    fn to_ir(&self) -> Node {
        let mut entries = vec![
            ("Name", Node::string(&self.name)),
            ("Mode", Node::string(self.mode.to_string())),
        ];
        if !self.table.is_empty() {
            entries.push(("Table", Node::string(&self.table)));
        }
        if !self.connector.is_empty() {
            entries.push(("Connector", Node::map([("Ref", Node::string(&self.connector))])));
        }
        entries.push(("Template", Node::map([("Source", Node::string(&self.sql))])));

        let mut selector = vec![("Namespace", Node::string(&self.namespace))];
        if let Some(limit) = self.limit {
            selector.push(("Limit", Node::int(limit as i64)));
        }
        entries.push(("Selector", Node::map(selector)));
        entries.push((
            "Schema",
            Node::map([("Cardinality", Node::string(self.cardinality.to_string()))]),
        ));
        if self.allow_nulls {
            entries.push(("AllowNulls", Node::bool(true)));
        }
        if self.publish_parent {
            entries.push(("PublishParent", Node::bool(true)));
        }
        if !self.match_strategy.is_empty() {
            entries.push(("MatchStrategy", Node::string(&self.match_strategy)));
        }
        if let Some(size) = self.batch_size {
            entries.push(("Batch", Node::map([("Size", Node::int(size as i64))])));
        }
        if let Some(p) = &self.partitioner {
            entries.push(("Partitioned", Node::map([("DataType", Node::string(&p.name))])));
        }
        if let Some(n) = self.relational_concurrency {
            entries.push(("RelationalConcurrency", Node::int(n as i64)));
        }
        if !self.schema.is_empty() {
            entries.push(("Columns", Node::list(self.schema.iter().map(column_ir))));
        }
        if !self.relations.is_empty() {
            entries.push(("With", Node::list(self.relations.iter().map(relation_ir))));
        }
        Node::map(entries)
    }
}

fn column_ir(column: &Column) -> Node {
    let mut entries = vec![
        ("Name", Node::string(&column.name)),
        ("DataType", Node::string(column.data_type.as_str())),
    ];
    if !column.expression.is_empty() {
        entries.push(("Expression", Node::string(&column.expression)));
    }
    if !column.tag.is_empty() {
        entries.push(("Tag", Node::string(&column.tag)));
    }
    Node::map(entries)
}

fn relation_ir(rel: &Relation) -> Node {
    let side = |ns: &str, column: &str| {
        Node::map([("Column", Node::string(column)), ("Namespace", Node::string(ns))])
    };
    Node::map([
        ("Name", Node::string(&rel.name)),
        ("Holder", Node::string(&rel.holder)),
        ("Cardinality", Node::string(rel.cardinality.to_string())),
        ("IncludeColumn", Node::bool(true)),
        (
            "On",
            Node::list(rel.on.iter().map(|l| side(&l.parent_namespace, &l.parent_column))),
        ),
        (
            "Of",
            Node::map([
                ("Ref", Node::string(&rel.reference)),
                (
                    "On",
                    Node::list(rel.on.iter().map(|l| side(&l.ref_namespace, &l.ref_column))),
                ),
            ]),
        ),
    ])
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Import {
    pub package: String,
    pub alias: String,
}

/// Resource-declared type carried into the route document.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct TypeDef {
    pub name: String,
    pub data_type: String,
    pub package: String,
    #[serde(rename = "SourceURL")]
    pub source_url: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Plan {
    pub name: String,
    /// Root view first, then children in join order.
    pub views: Vec<View>,
    pub compress_above_size: Option<u64>,
    pub package: String,
    pub imports: Vec<Import>,
    pub types: Vec<TypeDef>,
}

impl Plan {
    pub fn root(&self) -> Option<&View> {
        self.views.first()
    }

    pub fn view(&self, namespace: &str) -> Option<&View> {
        self.views.iter().find(|v| v.answers_to(namespace))
    }

    pub fn view_mut(&mut self, namespace: &str) -> Option<&mut View> {
        self.views.iter_mut().find(|v| v.answers_to(namespace))
    }

    pub fn relations(&self) -> impl Iterator<Item = &Relation> {
        self.views.iter().flat_map(|v| v.relations.iter())
    }

    pub fn is_exec(&self) -> bool {
        self.root().is_some_and(|v| v.mode == ViewMode::SqlExec)
    }

    /// Render as a route document in the vocabulary of hand-written route YAML.
    pub fn to_ir(&self) -> Node {
        let root = self.root();
        let method = if self.is_exec() { "POST" } else { "GET" };
        let mut output = vec![(
            "Cardinality",
            Node::string(root.map(|v| v.cardinality).unwrap_or_default().to_string()),
        )];
        if let Some(size) = self.compress_above_size {
            output.push(("CompressAboveSize", Node::int(size as i64)));
        }
        let route = Node::map([
            ("Name", Node::string(&self.name)),
            ("URI", Node::string(format!("/{}", self.name))),
            ("Method", Node::string(method)),
            (
                "View",
                Node::map([("Ref", Node::string(root.map(|v| v.name.as_str()).unwrap_or_default()))]),
            ),
            ("Output", Node::map(output)),
        ]);

        let mut resource = vec![("Views", Node::list(self.views.iter().map(View::to_ir)))];
        if !self.types.is_empty() {
            resource.push((
                "Types",
                Node::list(self.types.iter().map(|t| {
                    Node::map([
                        ("Name", Node::string(&t.name)),
                        ("DataType", Node::string(&t.data_type)),
                        ("Package", Node::string(&t.package)),
                        ("SourceURL", Node::string(&t.source_url)),
                    ])
                })),
            ));
        }

        Node::map([
            ("Routes", Node::list([route])),
            ("Resource", Node::map(resource)),
        ])
    }
}

/// `order_items` -> `OrderItems`.
pub fn pascal_case(name: &str) -> String {
    name.split(|c: char| c == '_' || c == '-' || c == '.')
        .filter(|p| !p.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pascal_case() {
        assert_eq!(pascal_case("order_items"), "OrderItems");
        assert_eq!(pascal_case("i"), "I");
        assert_eq!(pascal_case("Items"), "Items");
    }

    #[test]
    fn test_column_types() {
        assert_eq!(ColumnType::from_name("int"), Some(ColumnType::Int));
        assert_eq!(ColumnType::from_name("*float64"), Some(ColumnType::Float64));
        assert_eq!(ColumnType::from_name("Order"), None);
        assert_eq!(ColumnType::of_literal("42"), Some(ColumnType::Int));
        assert_eq!(ColumnType::of_literal("true"), Some(ColumnType::Bool));
        assert_eq!(ColumnType::of_literal("o.ID"), None);
    }

    #[test]
    fn test_plan_to_ir() {
        let mut root = View::query("o", "o");
        root.sql = "SELECT * FROM ORDERS".into();
        root.table = "ORDERS".into();
        root.relations.push(Relation {
            name: "i".into(),
            holder: "I".into(),
            reference: "i".into(),
            on: vec![RelationLink {
                parent_namespace: "o".into(),
                parent_column: "ID".into(),
                ref_namespace: "i".into(),
                ref_column: "ORDER_ID".into(),
                expression: "o.ID = i.ORDER_ID".into(),
            }],
            ..Default::default()
        });
        let plan = Plan {
            name: "orders".into(),
            views: vec![root, View::query("i", "i")],
            ..Default::default()
        };
        let doc = plan.to_ir();
        let views = doc.path(&["Resource", "Views"]).and_then(Node::as_list).unwrap();
        assert_eq!(views.len(), 2);
        let with = views[0].get("With").and_then(Node::as_list).unwrap();
        assert_eq!(with[0].path(&["Of", "Ref"]).and_then(Node::as_str), Some("i"));
        assert_eq!(
            doc.path(&["Routes"]).and_then(Node::as_list).unwrap()[0]
                .path(&["Method"])
                .and_then(Node::as_str),
            Some("GET")
        );
    }

    #[test]
    fn test_view_options_to_ir() {
        let mut root = View::query("o", "o");
        root.schema.push(Column {
            name: "TOTAL".into(),
            data_type: ColumnType::Float64,
            expression: "o.TOTAL".into(),
            tag: "json:\"total\"".into(),
        });
        root.relational_concurrency = Some(4);
        let node = root.to_ir();
        assert_eq!(node.text_at(&["RelationalConcurrency"]), "4");
        assert!(node.get("Partitioned").is_none());
        let columns = node.get("Columns").and_then(Node::as_list).unwrap();
        assert_eq!(columns[0].get("DataType").and_then(Node::as_str), Some("float64"));
        assert_eq!(columns[0].get("Tag").and_then(Node::as_str), Some("json:\"total\""));
    }
}
