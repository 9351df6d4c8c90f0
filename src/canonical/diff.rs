use serde_json::Value as Json;

use super::CanonicalDocument;

fn type_name(v: &Json) -> &'static str {
    match v {
        Json::Null => "null",
        Json::Bool(_) => "bool",
        Json::Number(_) => "number",
        Json::String(_) => "string",
        Json::Array(_) => "list",
        Json::Object(_) => "map",
    }
}

/// Path-qualified differences between two canonical documents, sorted.
pub fn diff(lhs: &CanonicalDocument, rhs: &CanonicalDocument) -> Vec<String> {
    let mut out = Vec::new();
    walk("$", &lhs.0, &rhs.0, &mut out);
    out.sort();
    out
}

fn walk(path: &str, lhs: &Json, rhs: &Json, out: &mut Vec<String>) {
    match (lhs, rhs) {
        (Json::Object(a), Json::Object(b)) => {
            for (key, av) in a {
                let child = format!("{}.{}", path, key);
                match b.get(key) {
                    Some(bv) => walk(&child, av, bv, out),
                    None => out.push(format!("{}: missing in rhs", child)),
                }
            }
            for key in b.keys().filter(|k| !a.contains_key(*k)) {
                out.push(format!("{}.{}: missing in lhs", path, key));
            }
        }
        (Json::Array(a), Json::Array(b)) => {
            if a.len() != b.len() {
                out.push(format!(
                    "{}: list length mismatch: lhs {} vs rhs {}",
                    path,
                    a.len(),
                    b.len()
                ));
            }
            for (i, (av, bv)) in a.iter().zip(b).enumerate() {
                walk(&format!("{}[{}]", path, i), av, bv, out);
            }
        }
        (a, b) if type_name(a) != type_name(b) => out.push(format!(
            "{}: type mismatch: lhs {} vs rhs {}",
            path,
            type_name(a),
            type_name(b)
        )),
        (a, b) if a != b => out.push(format!("{}: value mismatch: lhs {} vs rhs {}", path, a, b)),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn doc(v: Json) -> CanonicalDocument {
        CanonicalDocument(v)
    }

    fn swap(lines: Vec<String>) -> Vec<String> {
        let mut swapped: Vec<String> = lines
            .into_iter()
            .map(|l| {
                if let Some((head, tail)) = l.split_once(": lhs ") {
                    if let Some((a, b)) = tail.split_once(" vs rhs ") {
                        return format!("{}: lhs {} vs rhs {}", head, b, a);
                    }
                }
                match l.strip_suffix("missing in rhs") {
                    Some(head) => format!("{}missing in lhs", head),
                    None => l.replace("missing in lhs", "missing in rhs"),
                }
            })
            .collect();
        swapped.sort();
        swapped
    }

    #[test]
    fn test_reflexive() {
        let a = doc(json!({"Routes": [{"URI": "/a", "Input": {"Parameters": [{"Name": "x"}]}}]}));
        assert!(diff(&a, &a).is_empty());
    }

    #[test]
    fn test_kinds_of_difference() {
        let a = doc(json!({"Routes": [{"URI": "/a", "Method": "GET"}], "Only": 1, "T": "x"}));
        let b = doc(json!({"Routes": [{"URI": "/b"}, {"URI": "/c"}], "T": 2}));
        assert_eq!(
            diff(&a, &b),
            vec![
                "$.Only: missing in rhs".to_string(),
                "$.Routes: list length mismatch: lhs 1 vs rhs 2".to_string(),
                "$.Routes[0].Method: missing in rhs".to_string(),
                "$.Routes[0].URI: value mismatch: lhs \"/a\" vs rhs \"/b\"".to_string(),
                "$.T: type mismatch: lhs string vs rhs number".to_string(),
            ]
        );
    }

    #[test]
    fn test_symmetric() {
        let a = doc(json!({"A": [1, 2], "B": {"C": "x"}, "D": true}));
        let b = doc(json!({"A": [1, 3, 4], "B": {"E": "y"}}));
        assert_eq!(diff(&b, &a), swap(diff(&a, &b)));
    }
}
