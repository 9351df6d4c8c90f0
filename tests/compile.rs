use dql::diagnostic::{CODE_DML_SERVICE_ARG, CODE_PARSE_SYNTAX, Severity};
use dql::lexer::{StatementKind, classify};
use dql::prelude::*;
use dql::shape::TypeDef;

const ORDERS: &str = "\
SELECT o.*, i.*, set_limit(i, 25)
FROM (SELECT * FROM ORDERS WHERE ID = $Id) o
JOIN (SELECT * FROM ORDER_ITEMS) i ON o.ID = i.ORDER_ID";

#[test]
fn test_classify_read() {
    let stmts = classify("SELECT id FROM orders");
    assert_eq!(stmts.len(), 1);
    assert_eq!(stmts[0].kind, Some(StatementKind::Read));
}

#[test]
fn test_classify_service_call() {
    let stmts = classify(r#"$sql.Insert("ORDERS", $rec)"#);
    assert_eq!(stmts.len(), 1);
    assert_eq!(stmts[0].kind, Some(StatementKind::Service));
    assert_eq!(stmts[0].selector_method, "Insert");
}

#[test]
fn test_service_call_needs_table() {
    let out = dql::compile("orders_exec", "$sql.Insert($rec)").expect("compile");
    assert_eq!(out.diagnostics[0].code, CODE_DML_SERVICE_ARG);
    assert_eq!(out.diagnostics[0].severity, Severity::Error);
    assert_eq!(out.plan.to_ir().list_at(&["Routes"])[0].text_at(&["Method"]), "POST");
}

#[test]
fn test_read_route_document() {
    let out = dql::compile("orders", ORDERS).expect("compile");
    assert!(out.diagnostics.is_empty(), "{:?}", out.diagnostics);

    let doc = out.plan.to_ir();
    let route = &doc.list_at(&["Routes"])[0];
    assert_eq!(route.text_at(&["URI"]), "/orders");
    assert_eq!(route.text_at(&["Method"]), "GET");
    assert_eq!(route.text_at(&["View", "Ref"]), "o");

    let views = doc.list_at(&["Resource", "Views"]);
    assert_eq!(views.len(), 2);
    let with = &views[0].list_at(&["With"])[0];
    assert_eq!(with.text_at(&["Holder"]), "I");
    assert_eq!(with.text_at(&["Of", "Ref"]), "i");
    assert_eq!(with.list_at(&["On"])[0].text_at(&["Column"]), "ID");
    assert_eq!(with.list_at(&["Of", "On"])[0].text_at(&["Column"]), "ORDER_ID");
    assert_eq!(views[1].path(&["Selector", "Limit"]).and_then(Node::as_text), Some("25".to_string()));
    assert_eq!(validate(&doc), Ok(()));
}

#[test]
fn test_projected_columns_are_validated() {
    let src = "SELECT o.* FROM ORDERS o JOIN (SELECT ID FROM ITEMS) i ON o.ID = i.ORDER_ID";
    let err = dql::compile("orders", src).unwrap_err();
    assert!(matches!(err, CompileError::Validation(_)));
    assert!(err.to_string().contains("ORDER_ID"));

    let lenient = Compiler::new(CompileOptions::builder().validate(false).build());
    assert!(lenient.compile("orders", src).is_ok());
}

#[test]
fn test_validation_suggestion() {
    let doc = dql::ir::from_yaml(
        r#"
Resource:
  Views:
    - Name: o
      Template: {Source: "SELECT ID, TOTAL FROM ORDERS o"}
      Selector: {Namespace: o}
      With:
        - Name: items
          Holder: Items
          On:
            - {Column: ID, Namespace: o}
          Of:
            Ref: i
            On:
              - {Column: ORDER_IDD, Namespace: i}
    - Name: i
      Template: {Source: "SELECT ID, ORDER_ID FROM ITEMS i"}
      Selector: {Namespace: i}
"#,
    )
    .expect("yaml");
    let report = validate(&doc).unwrap_err();
    assert_eq!(report.issues.len(), 1);
    assert_eq!(report.issues[0].suggestion.as_deref(), Some("ORDER_ID"));
    assert!(report.to_string().contains("Did you mean 'ORDER_ID'?"));
}

#[test]
fn test_template_parse_failure_is_warning() {
    let out = dql::compile("broken", "SELECT ((( FROM t WHERE x = ${x}").expect("compile");
    assert_eq!(out.diagnostics.codes(), vec![CODE_PARSE_SYNTAX]);
    assert!(!out.diagnostics.has_errors());
}

#[test]
fn test_strict_cast_outside_trusted_roots() {
    let root = tempfile::tempdir().expect("tempdir");
    let compiler = Compiler::new(
        CompileOptions::builder()
            .strict()
            .project_dir(root.path())
            .resource_type(TypeDef {
                name: "Order".into(),
                data_type: "*Order".into(),
                package: "app/model".into(),
                source_url: "/elsewhere/model/order.go".into(),
            })
            .build(),
    );
    let err = compiler
        .compile("orders", "SELECT r.ID, cast(r.ID as 'Order') FROM (SELECT * FROM R) r")
        .unwrap_err();
    assert!(matches!(err, CompileError::Provenance(_)));
    assert!(err.to_string().contains("provenance policy failed"));

    let lenient = Compiler::new(
        CompileOptions::builder()
            .project_dir(root.path())
            .resource_type(TypeDef {
                name: "Order".into(),
                source_url: "/elsewhere/model/order.go".into(),
                ..Default::default()
            })
            .build(),
    );
    let out = lenient
        .compile("orders", "SELECT r.ID, cast(r.ID as 'Order') FROM (SELECT * FROM R) r")
        .expect("compile");
    assert_eq!(out.resolutions.len(), 1);
    assert!(out.resolutions[0].provenance.kind.starts_with(dql::provenance::POLICY_WARN_PREFIX));
}
