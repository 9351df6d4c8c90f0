//! Relation validator over an assembled route document.
//!
//! Every `With` relation link is checked against the projected columns and
//! aliases of the view on its side. Problems are collected, never
//! short-circuited, and returned as one [`ValidationReport`].

use std::collections::HashSet;
use std::fmt;

use strsim::levenshtein;
use tracing::debug;

use crate::declaration;
use crate::ir::Node;
use crate::sql::{self, SqlDialect};
use crate::template;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Parent,
    Ref,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Parent => write!(f, "parent"),
            Side::Ref => write!(f, "ref"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Problem {
    ColumnNotProjected { columns: Vec<String> },
    AliasNotPresent { aliases: Vec<String> },
    MissingLink,
    UnknownView { view: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    pub line: usize,
    pub view: String,
    pub relation: String,
    pub holder: String,
    pub index: usize,
    pub side: Side,
    pub alias: String,
    pub column: String,
    pub problem: Problem,
    pub suggestion: Option<String>,
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "line {}: view {} relation {} (holder {}) link #{} {}: ",
            self.line, self.view, self.relation, self.holder, self.index, self.side
        )?;
        match &self.problem {
            Problem::ColumnNotProjected { columns } => write!(
                f,
                "column {:?} (alias {:?}) not projected; columns: {}",
                self.column,
                self.alias,
                columns.join(", ")
            )?,
            Problem::AliasNotPresent { aliases } => write!(
                f,
                "alias {:?} (column {:?}) not present in SQL/selector namespace; known: {}",
                self.alias,
                self.column,
                aliases.join(", ")
            )?,
            Problem::MissingLink => write!(f, "missing link entry")?,
            Problem::UnknownView { view } => write!(f, "referenced view {:?} not found", view)?,
        }
        if let Some(s) = &self.suggestion {
            write!(f, ". Did you mean '{}'?", s)?;
        }
        Ok(())
    }
}

/// Aggregated validator failure.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ValidationReport {
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn len(&self) -> usize {
        self.issues.len()
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "relation validation failed ({} issues)", self.issues.len())?;
        for issue in &self.issues {
            write!(f, "\n  • {}", issue)?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationReport {}

/// What a view's SQL exposes to relation links.
#[derive(Debug, Default)]
struct ViewIndex {
    /// `None` when the projection is `*` or the SQL did not parse.
    columns: Option<Vec<String>>,
    lookup: HashSet<String>,
    aliases: Vec<String>,
}

impl ViewIndex {
    fn build(view: &Node, dialect: SqlDialect) -> Self {
        let source = view.text_at(&["Template", "Source"]);
        let namespace = view.text_at(&["Selector", "Namespace"]);
        let mut index = ViewIndex::default();
        if !namespace.is_empty() {
            index.aliases.push(namespace);
        }
        if source.trim().is_empty() {
            return index;
        }
        let normalized = template::prepare(&source, &declaration::parse(&source));
        match sql::parse_query(&normalized, dialect) {
            Ok(ast) => {
                index.aliases.extend(ast.aliases());
                if !ast.is_wildcard() {
                    let mut columns = Vec::new();
                    for item in &ast.projection {
                        index.lookup.insert(item.name.to_ascii_lowercase());
                        if !item.namespace.is_empty() {
                            index.lookup.insert(
                                format!("{}.{}", item.namespace, item.name).to_ascii_lowercase(),
                            );
                        }
                        columns.push(item.name.clone());
                    }
                    index.columns = Some(columns);
                }
            }
            Err(err) => {
                debug!(error = %err, "view SQL not parsed, skipping column check");
            }
        }
        index
    }

    fn has_column(&self, column: &str) -> bool {
        self.columns.is_none() || self.lookup.contains(&column.to_ascii_lowercase())
    }

    fn has_alias(&self, alias: &str) -> bool {
        self.aliases.iter().any(|a| a.eq_ignore_ascii_case(alias))
    }
}

/// Find the best match with Levenshtein distance under a length-based threshold.
fn did_you_mean(input: &str, candidates: &[String]) -> Option<String> {
    let threshold = match input.len() {
        0..=2 => 0,
        3..=5 => 2,
        _ => 3,
    };
    candidates
        .iter()
        .map(|c| (levenshtein(&input.to_ascii_lowercase(), &c.to_ascii_lowercase()), c))
        .filter(|(d, _)| *d <= threshold)
        .min_by_key(|(d, _)| *d)
        .map(|(_, c)| c.clone())
}

pub fn validate(document: &Node) -> Result<(), ValidationReport> {
    validate_with(document, SqlDialect::default())
}

pub fn validate_with(document: &Node, dialect: SqlDialect) -> Result<(), ValidationReport> {
    let views = document.list_at(&["Resource", "Views"]);
    let find = |name: &str| {
        views
            .iter()
            .find(|v| v.text_at(&["Name"]).eq_ignore_ascii_case(name))
    };
    let mut report = ValidationReport::default();

    for view in views {
        let relations = view.list_at(&["With"]);
        if relations.is_empty() {
            continue;
        }
        let view_name = view.text_at(&["Name"]);
        let parent_index = ViewIndex::build(view, dialect);

        for rel in relations {
            let issue = |index: usize, side: Side, link: Option<&Node>, problem: Problem| ValidationIssue {
                line: link.map(|l| l.line).filter(|l| *l > 0).unwrap_or(rel.line),
                view: view_name.clone(),
                relation: rel.text_at(&["Name"]),
                holder: rel.text_at(&["Holder"]),
                index,
                side,
                alias: link.map(|l| l.text_at(&["Namespace"])).unwrap_or_default(),
                column: link.map(|l| l.text_at(&["Column"])).unwrap_or_default(),
                problem,
                suggestion: None,
            };

            let ref_name = rel.text_at(&["Of", "Ref"]);
            let ref_index = match find(&ref_name) {
                Some(v) => Some(ViewIndex::build(v, dialect)),
                None => {
                    report.issues.push(issue(
                        0,
                        Side::Ref,
                        None,
                        Problem::UnknownView { view: ref_name.clone() },
                    ));
                    None
                }
            };

            let parent_links = rel.list_at(&["On"]);
            let ref_links = rel.list_at(&["Of", "On"]);
            for idx in 0..parent_links.len().max(ref_links.len()) {
                let sides = [
                    (Side::Parent, parent_links.get(idx), Some(&parent_index)),
                    (Side::Ref, ref_links.get(idx), ref_index.as_ref()),
                ];
                for (side, link, index) in sides {
                    let Some(link) = link else {
                        report.issues.push(issue(idx, side, None, Problem::MissingLink));
                        continue;
                    };
                    let Some(index) = index else { continue };
                    let column = link.text_at(&["Column"]);
                    let alias = link.text_at(&["Namespace"]);

                    if !column.is_empty() && !index.has_column(&column) {
                        let columns = index.columns.clone().unwrap_or_default();
                        let mut found = issue(
                            idx,
                            side,
                            Some(link),
                            Problem::ColumnNotProjected {
                                columns: columns.clone(),
                            },
                        );
                        found.suggestion = did_you_mean(&column, &columns);
                        report.issues.push(found);
                    }
                    if !alias.is_empty() && !index.has_alias(&alias) {
                        let mut found = issue(
                            idx,
                            side,
                            Some(link),
                            Problem::AliasNotPresent {
                                aliases: index.aliases.clone(),
                            },
                        );
                        found.suggestion = did_you_mean(&alias, &index.aliases);
                        report.issues.push(found);
                    }
                }
            }
        }
    }

    debug!(issues = report.len(), "validated relations");
    if report.is_empty() { Ok(()) } else { Err(report) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir;

    const GOOD: &str = r#"
Resource:
  Views:
    - Name: o
      Selector:
        Namespace: o
      Template:
        Source: SELECT * FROM ORDERS
      With:
        - Name: items
          Holder: Items
          On:
            - Column: ID
              Namespace: o
          Of:
            Ref: i
            On:
              - Column: ORDER_ID
                Namespace: i
    - Name: i
      Selector:
        Namespace: i
      Template:
        Source: SELECT ID, ORDER_ID, QTY FROM ITEMS i
"#;

    #[test]
    fn test_valid_document() {
        assert_eq!(validate(&ir::from_yaml(GOOD).unwrap()), Ok(()));
    }

    #[test]
    fn test_column_not_projected_with_suggestion() {
        let doc = ir::from_yaml(&GOOD.replace("ORDER_ID\n", "ORDR_ID\n")).unwrap();
        let report = validate(&doc).unwrap_err();
        assert_eq!(report.len(), 1);
        let issue = &report.issues[0];
        assert_eq!(issue.side, Side::Ref);
        assert_eq!(issue.column, "ORDR_ID");
        assert_eq!(issue.relation, "items");
        assert_eq!(issue.holder, "Items");
        assert_eq!(issue.suggestion.as_deref(), Some("ORDER_ID"));
        assert_eq!(issue.line, 18);
        let text = report.to_string();
        assert!(text.contains("not projected"));
        assert!(text.contains("link #0 ref"));
    }

    #[test]
    fn test_alias_and_missing_entry_are_aggregated() {
        let doc = GOOD
            .replace("Namespace: o\n          Of:", "Namespace: x\n            - Column: CODE\n          Of:");
        let report = validate(&ir::from_yaml(&doc).unwrap()).unwrap_err();
        let problems: Vec<_> = report.issues.iter().map(|i| (&i.problem, i.side, i.index)).collect();
        assert_eq!(problems.len(), 2);
        assert!(matches!(problems[0], (Problem::AliasNotPresent { .. }, Side::Parent, 0)));
        assert!(matches!(problems[1], (Problem::MissingLink, Side::Ref, 1)));
        assert_eq!(report.to_string().matches('•').count(), 2);
    }

    #[test]
    fn test_unparsable_view_sql_skips_columns() {
        let doc = GOOD.replace("SELECT ID, ORDER_ID, QTY FROM ITEMS i", "SELECT ((( FROM");
        assert_eq!(validate(&ir::from_yaml(&doc).unwrap()), Ok(()));
    }

    #[test]
    fn test_did_you_mean() {
        let cands = vec!["ORDER_ID".to_string(), "QTY".to_string()];
        assert_eq!(did_you_mean("ordr_id", &cands), Some("ORDER_ID".into()));
        assert_eq!(did_you_mean("zz", &cands), None);
    }
}
