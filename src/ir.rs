//! Loosely typed route/resource tree shared by YAML authoring and the
//! compiler. Every node remembers the source line it was read from.

use serde_json::Value as Json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IrError {
    #[error("YAML error: {0}")]
    Yaml(String),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("YAML render error: {0}")]
    Render(#[from] serde_yaml::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl Scalar {
    /// YAML core-schema typing of a plain scalar.
    pub fn infer(text: &str) -> Self {
        match text {
            "" | "~" | "null" | "Null" | "NULL" => return Scalar::Null,
            "true" | "True" | "TRUE" => return Scalar::Bool(true),
            "false" | "False" | "FALSE" => return Scalar::Bool(false),
            _ => {}
        }
        if let Ok(n) = text.parse::<i64>() {
            return Scalar::Int(n);
        }
        let looks_numeric = text
            .bytes()
            .all(|b| b.is_ascii_digit() || matches!(b, b'.' | b'-' | b'+' | b'e' | b'E'))
            && text.bytes().any(|b| b.is_ascii_digit());
        if looks_numeric {
            if let Ok(f) = text.parse::<f64>() {
                return Scalar::Float(f);
            }
        }
        Scalar::String(text.to_string())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Map(Vec<(String, Node)>),
    List(Vec<Node>),
    Scalar(Scalar),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub value: Value,
    /// 1-based source line, 0 when built programmatically.
    pub line: usize,
}

impl Node {
    fn new(value: Value) -> Self {
        Self { value, line: 0 }
    }

    pub fn map<K: Into<String>>(entries: impl IntoIterator<Item = (K, Node)>) -> Self {
        Self::new(Value::Map(entries.into_iter().map(|(k, v)| (k.into(), v)).collect()))
    }

    pub fn list(items: impl IntoIterator<Item = Node>) -> Self {
        Self::new(Value::List(items.into_iter().collect()))
    }

    pub fn string(s: impl Into<String>) -> Self {
        Self::new(Value::Scalar(Scalar::String(s.into())))
    }

    pub fn int(n: i64) -> Self {
        Self::new(Value::Scalar(Scalar::Int(n)))
    }

    pub fn bool(b: bool) -> Self {
        Self::new(Value::Scalar(Scalar::Bool(b)))
    }

    pub fn null() -> Self {
        Self::new(Value::Scalar(Scalar::Null))
    }

    pub fn at_line(mut self, line: usize) -> Self {
        self.line = line;
        self
    }

    pub fn get(&self, key: &str) -> Option<&Node> {
        match &self.value {
            Value::Map(entries) => entries.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    pub fn path(&self, keys: &[&str]) -> Option<&Node> {
        keys.iter().try_fold(self, |node, key| node.get(key))
    }

    pub fn as_map(&self) -> Option<&[(String, Node)]> {
        match &self.value {
            Value::Map(entries) => Some(entries),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Node]> {
        match &self.value {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match &self.value {
            Value::Scalar(Scalar::String(s)) => Some(s),
            _ => None,
        }
    }

    /// Scalar rendered as text; strings, numbers and bools alike.
    pub fn as_text(&self) -> Option<String> {
        match &self.value {
            Value::Scalar(Scalar::String(s)) => Some(s.clone()),
            Value::Scalar(Scalar::Int(n)) => Some(n.to_string()),
            Value::Scalar(Scalar::Float(f)) => Some(f.to_string()),
            Value::Scalar(Scalar::Bool(b)) => Some(b.to_string()),
            _ => None,
        }
    }

    /// Text at `keys`, or empty.
    pub fn text_at(&self, keys: &[&str]) -> String {
        self.path(keys).and_then(Node::as_text).unwrap_or_default()
    }

    /// List at `keys`, or empty.
    pub fn list_at(&self, keys: &[&str]) -> &[Node] {
        self.path(keys).and_then(Node::as_list).unwrap_or(&[])
    }

    pub fn to_json(&self) -> Json {
        match &self.value {
            Value::Map(entries) => Json::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            Value::List(items) => Json::Array(items.iter().map(Node::to_json).collect()),
            Value::Scalar(Scalar::Null) => Json::Null,
            Value::Scalar(Scalar::Bool(b)) => Json::Bool(*b),
            Value::Scalar(Scalar::Int(n)) => Json::from(*n),
            Value::Scalar(Scalar::Float(f)) => {
                serde_json::Number::from_f64(*f).map(Json::Number).unwrap_or(Json::Null)
            }
            Value::Scalar(Scalar::String(s)) => Json::String(s.clone()),
        }
    }

    pub fn to_yaml_string(&self) -> Result<String, IrError> {
        Ok(serde_yaml::to_string(&self.to_json())?)
    }
}

pub fn from_json(value: &Json) -> Node {
    match value {
        Json::Null => Node::null(),
        Json::Bool(b) => Node::bool(*b),
        Json::Number(n) => match n.as_i64() {
            Some(i) => Node::int(i),
            None => Node::new(Value::Scalar(Scalar::Float(n.as_f64().unwrap_or_default()))),
        },
        Json::String(s) => Node::string(s.clone()),
        Json::Array(items) => Node::list(items.iter().map(from_json)),
        Json::Object(map) => Node::map(map.iter().map(|(k, v)| (k.clone(), from_json(v)))),
    }
}

pub fn from_json_str(text: &str) -> Result<Node, IrError> {
    let value: Json = serde_json::from_str(text)?;
    Ok(from_json(&value))
}

/// Parse YAML keeping node lines. The document root must be a mapping.
pub fn from_yaml(text: &str) -> Result<Node, IrError> {
    let root = marked_yaml::parse_yaml(0, text).map_err(|e| IrError::Yaml(e.to_string()))?;
    Ok(convert(&root))
}

fn convert(node: &marked_yaml::Node) -> Node {
    let line = node.span().start().map(|m| m.line()).unwrap_or(0);
    let converted = match node {
        marked_yaml::Node::Scalar(s) => Node::new(Value::Scalar(Scalar::infer(s.as_str()))),
        marked_yaml::Node::Sequence(seq) => Node::list(seq.iter().map(convert)),
        marked_yaml::Node::Mapping(map) => {
            Node::map(map.iter().map(|(k, v)| (k.as_str().to_string(), convert(v))))
        }
    };
    converted.at_line(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const DOC: &str = "\
Routes:
  - URI: /orders
    Method: GET
Resource:
  Views:
    - Name: o
      Selector:
        Limit: 10
        Enabled: true
";

    #[test]
    fn test_yaml_lines_and_scalars() {
        let doc = from_yaml(DOC).unwrap();
        let view = &doc.list_at(&["Resource", "Views"])[0];
        assert_eq!(view.line, 6);
        assert_eq!(view.text_at(&["Name"]), "o");
        assert_eq!(view.path(&["Selector", "Limit"]).unwrap().value, Value::Scalar(Scalar::Int(10)));
        assert_eq!(
            view.path(&["Selector", "Enabled"]).unwrap().value,
            Value::Scalar(Scalar::Bool(true))
        );
    }

    #[test]
    fn test_json_round_trip() {
        let doc = from_yaml(DOC).unwrap();
        let back = from_json(&doc.to_json());
        assert_eq!(back.to_json(), doc.to_json());
        let yaml = doc.to_yaml_string().unwrap();
        assert_eq!(from_yaml(&yaml).unwrap().to_json(), doc.to_json());
    }

    #[test]
    fn test_scalar_inference() {
        assert_eq!(Scalar::infer("~"), Scalar::Null);
        assert_eq!(Scalar::infer("-3"), Scalar::Int(-3));
        assert_eq!(Scalar::infer("1.5"), Scalar::Float(1.5));
        assert_eq!(Scalar::infer("e"), Scalar::String("e".into()));
        assert_eq!(Scalar::infer("/orders"), Scalar::String("/orders".into()));
    }

    #[test]
    fn test_invalid_yaml() {
        assert!(matches!(from_yaml("a: [1"), Err(IrError::Yaml(_))));
    }
}
