use dql::ir;
use dql::prelude::*;
use pretty_assertions::assert_eq;

const ORDERS: &str = "\
SELECT o.*, i.*, set_limit(i, 25), cardinality(i, 'one')
FROM (SELECT * FROM ORDERS WHERE ID = $Id) o
JOIN (SELECT * FROM ORDER_ITEMS) i ON o.ID = i.ORDER_ID";

const HAND_WRITTEN: &str = r#"
Routes:
  - URI: /orders
    Method: GET
    Description: hand-written
    View: {Ref: o}
    Output: {Cardinality: Many}
Resource:
  Views:
    - Name: i
      Mode: SQLQuery
      Table: ORDER_ITEMS
      Template:
        Source: SELECT * FROM ORDER_ITEMS
      Selector: {Namespace: i, Limit: 25}
      Schema: {Cardinality: One}
    - Name: o
      Mode: SQLQuery
      Table: ORDERS
      Template:
        Source: |
          SELECT *
          FROM ORDERS
          WHERE ID = ${Id}
      Selector: {Namespace: o}
      Schema: {Cardinality: Many}
      With:
        - Name: i
          Holder: I
          Cardinality: One
          IncludeColumn: true
          On:
            - {Column: ID, Namespace: o}
          Of:
            Ref: i
            On:
              - {Column: ORDER_ID, Namespace: i}
"#;

fn compiled() -> Node {
    dql::compile("orders", ORDERS).expect("compile").plan.to_ir()
}

#[test]
fn test_yaml_round_trip() {
    let doc = compiled();
    let yaml = doc.to_yaml_string().expect("yaml");
    let reloaded = ir::from_yaml(&yaml).expect("reload");
    assert_eq!(canonicalize(&reloaded), canonicalize(&doc));

    let hand = ir::from_yaml(HAND_WRITTEN).expect("yaml");
    let again = ir::from_yaml(&hand.to_yaml_string().expect("yaml")).expect("reload");
    assert_eq!(canonicalize(&again), canonicalize(&hand));
}

#[test]
fn test_json_and_yaml_agree() {
    let hand = ir::from_yaml(HAND_WRITTEN).expect("yaml");
    let json = serde_json::to_string(&hand.to_json()).expect("json");
    let from_json = ir::from_json_str(&json).expect("json");
    assert!(diff(&canonicalize(&hand), &canonicalize(&from_json)).is_empty());
}

#[test]
fn test_compiled_matches_hand_written() {
    let lhs = canonicalize(&compiled());
    let rhs = canonicalize(&ir::from_yaml(HAND_WRITTEN).expect("yaml"));
    assert_eq!(diff(&lhs, &rhs), Vec::<String>::new());
}

#[test]
fn test_limit_difference_is_reported() {
    let changed = HAND_WRITTEN.replace("Limit: 25", "Limit: 10");
    let lhs = canonicalize(&compiled());
    let rhs = canonicalize(&ir::from_yaml(&changed).expect("yaml"));
    assert_eq!(
        diff(&lhs, &rhs),
        vec!["$.Resource.Views[0].Selector.Limit: value mismatch: lhs 25 vs rhs 10".to_string()]
    );
}

#[test]
fn test_missing_relation_is_reported() {
    let trimmed = HAND_WRITTEN.split("      With:").next().expect("split").to_string();
    let lhs = canonicalize(&compiled());
    let rhs = canonicalize(&ir::from_yaml(&trimmed).expect("yaml"));
    assert_eq!(diff(&lhs, &rhs), vec!["$.Resource.Views[1].With: missing in rhs".to_string()]);
}
