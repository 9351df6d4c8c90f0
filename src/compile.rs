//! Compiler driver: DQL source in, view/relation plan plus diagnostics out.
//!
//! Stages run strictly in order: classify, parse declarations, normalize,
//! parse SQL, extract relations, apply declarations, resolve casts,
//! validate. Only provenance rejections and validation failures abort;
//! everything else is reported as a diagnostic next to a best-effort plan.

use serde::Serialize;
use tracing::{debug, warn};

use crate::config::CompileOptions;
use crate::declaration::{self, Declaration, DeclarationKind, Declarations};
use crate::diagnostic::{
    CODE_INTERNAL, CODE_PARSE_SYNTAX, Diagnostic, Diagnostics, Position, Span,
};
use crate::error::CompileResult;
use crate::lexer;
use crate::provenance::{Resolution, Resolver};
use crate::relation::{self, RawTarget};
use crate::shape::{Cardinality, Column, ColumnType, Import, Partitioner, Plan, Relation, View, ViewMode};
use crate::sql::{self, QueryAst, TableRef};
use crate::template;
use crate::validate;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CompileOutput {
    pub plan: Plan,
    pub diagnostics: Diagnostics,
    pub declarations: Declarations,
    pub resolutions: Vec<Resolution>,
}

/// Broken internal invariant, reported as an `Internal` diagnostic.
#[derive(Debug)]
struct InternalError(String);

#[derive(Debug, Clone, Default)]
pub struct Compiler {
    options: CompileOptions,
}

impl Compiler {
    pub fn new(options: CompileOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &CompileOptions {
        &self.options
    }

    /// Compile `source` into a plan named `name`.
    pub fn compile(&self, name: &str, source: &str) -> CompileResult<CompileOutput> {
        let mut statements = lexer::classify(source);
        let declarations = declaration::parse(source);
        debug!(
            name,
            statements = statements.len(),
            declarations = declarations.len(),
            "compiling"
        );

        let mut diagnostics = Diagnostics::new();
        let mut plan = Plan {
            name: name.to_string(),
            types: self.options.types.clone(),
            ..Default::default()
        };

        let built = if statements.is_exec() {
            let (tables, found) = statements.dml_tables(source);
            diagnostics.extend(found);
            let mut view = View::query(name, name);
            view.mode = ViewMode::SqlExec;
            view.table = tables.into_iter().next().unwrap_or_default();
            view.sql = source.trim().to_string();
            plan.views.push(view);
            Ok(())
        } else {
            self.read_plan(name, source, &declarations, &mut plan, &mut diagnostics)
        };
        if let Err(InternalError(message)) = built {
            warn!(name, %message, "internal compiler error");
            diagnostics.push(Diagnostic::error(
                CODE_INTERNAL,
                message,
                Span::from_offsets(source, 0, source.len()),
            ));
        }

        let mut resolver = self.options.resolver();
        apply_declarations(&declarations, &mut plan, &mut resolver);
        let resolutions = resolve_casts(&declarations, &mut plan, &resolver)?;

        if self.options.validate && !plan.is_exec() && plan.relations().next().is_some() {
            validate::validate_with(&plan.to_ir(), self.options.dialect)?;
        }

        debug!(
            name,
            views = plan.views.len(),
            diagnostics = diagnostics.len(),
            resolutions = resolutions.len(),
            "compiled"
        );
        Ok(CompileOutput {
            plan,
            diagnostics,
            declarations,
            resolutions,
        })
    }

    fn read_plan(
        &self,
        name: &str,
        source: &str,
        declarations: &Declarations,
        plan: &mut Plan,
        diagnostics: &mut Diagnostics,
    ) -> Result<(), InternalError> {
        let prepared = template::prepare(source, declarations);
        let ast = match sql::parse_query(&prepared, self.options.dialect) {
            Ok(ast) => ast,
            Err(err) => {
                let position = match (err.line, err.column) {
                    (Some(line), Some(column)) => source_position(source, &prepared, line, column),
                    _ => Position::at(source, 0),
                };
                let span = Span {
                    start: position,
                    end: position,
                };
                let message = format!("unable to parse query: {}", err.message);
                let diagnostic = if template::has_template_signals(source) {
                    Diagnostic::warning(CODE_PARSE_SYNTAX, message, span)
                } else {
                    Diagnostic::error(CODE_PARSE_SYNTAX, message, span)
                };
                diagnostics.push(diagnostic.with_hint("check the SQL near the reported position"));
                let mut view = View::query(name, name);
                view.sql = source.trim().to_string();
                plan.views.push(view);
                return Ok(());
            }
        };

        let raw = relation::scan::scan(source);
        let mut root = target_view(source, &ast.from, raw.from.as_ref())?;
        root.schema = root_schema(&ast, declarations);
        plan.views.push(root);

        for (idx, join) in ast.joins.iter().enumerate() {
            let raw_target = raw
                .joins
                .get(idx)
                .filter(|_| raw.joins.len() == ast.joins.len())
                .map(|j| &j.target);
            plan.views.push(target_view(source, &join.target, raw_target)?);
        }

        let (relations, found) = relation::extract(source, &ast);
        diagnostics.extend(found);
        attach_relations(plan, relations)
    }
}

/// Map a parser line/column in `prepared` back onto `source`. Template
/// rewrites keep lines but not widths, so the token at the error is looked
/// up again on the same source line.
fn source_position(source: &str, prepared: &str, line: usize, column: usize) -> Position {
    let at = Position::from_line_column(prepared, line, column);
    let token = prepared
        .get(at.offset..)
        .and_then(|rest| rest.split_whitespace().next())
        .unwrap_or_default();
    let fallback = Position::from_line_column(source, line, column);
    if token.is_empty() {
        return fallback;
    }
    let line_start = Position::from_line_column(source, line, 1).offset;
    let line_end = source[line_start..]
        .find('\n')
        .map(|i| line_start + i)
        .unwrap_or(source.len());
    let Some(text) = source.get(line_start..line_end) else {
        return fallback;
    };
    // rewrites only shrink text, so the token sits at or after the parser column
    let from = (fallback.offset - line_start).min(text.len());
    let from = (0..=from).rev().find(|i| text.is_char_boundary(*i)).unwrap_or(0);
    match text[from..].find(token).map(|i| from + i).or_else(|| text.find(token)) {
        Some(i) => Position::at(source, line_start + i),
        None => fallback,
    }
}

/// View for a FROM / JOIN target. A derived table keeps its authored body
/// as the view SQL, template tokens included.
fn target_view(source: &str, target: &TableRef, raw: Option<&RawTarget>) -> Result<View, InternalError> {
    let namespace = target.namespace();
    let mut view = View::query(namespace, namespace);
    view.table = target.table.clone();
    view.sql = match (&target.subquery, raw.and_then(|r| r.subquery)) {
        (Some(_), Some((start, end))) => source
            .get(start..end)
            .map(|s| s.trim().to_string())
            .ok_or_else(|| InternalError(format!("subquery span {}..{} outside source", start, end)))?,
        (Some(rendered), None) => rendered.clone(),
        (None, _) => format!("SELECT * FROM {}", target.table),
    };
    Ok(view)
}

fn root_schema(ast: &QueryAst, declarations: &Declarations) -> Vec<Column> {
    ast.projection
        .iter()
        .filter(|p| !p.wildcard)
        .map(|p| {
            let cast = declarations
                .of_kind(&DeclarationKind::Cast)
                .find(|d| d.annotation && column_matches(&d.target, &p.namespace, &p.name));
            let data_type = cast
                .and_then(|d| ColumnType::from_name(&d.data_type))
                .or_else(|| ColumnType::of_literal(&p.expression))
                .unwrap_or_default();
            Column {
                name: p.name.clone(),
                data_type,
                expression: p.expression.clone(),
                tag: String::new(),
            }
        })
        .collect()
}

/// `o.ID` or `ID` against a projected column.
fn column_matches(target: &str, namespace: &str, name: &str) -> bool {
    match target.rsplit_once('.') {
        Some((ns, col)) => col.eq_ignore_ascii_case(name) && (namespace.is_empty() || ns.eq_ignore_ascii_case(namespace)),
        None => target.eq_ignore_ascii_case(name),
    }
}

/// Qualifier of a plain `ns.column` expression, else empty.
fn namespace_of(expression: &str) -> &str {
    match expression.trim().split_once('.') {
        Some((ns, col))
            if !ns.is_empty()
                && [ns, col]
                    .iter()
                    .all(|p| p.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')) =>
        {
            ns
        }
        _ => "",
    }
}

fn attach_relations(plan: &mut Plan, relations: Vec<Relation>) -> Result<(), InternalError> {
    let root = plan
        .root()
        .map(|v| v.namespace.clone())
        .ok_or_else(|| InternalError("plan has no root view".to_string()))?;

    for rel in relations {
        let parent_ns = rel.parent_namespace().unwrap_or(&root).to_string();
        let parent_path = plan
            .view(&parent_ns)
            .map(|v| v.path.clone())
            .unwrap_or_default();
        if let Some(child) = plan.view_mut(&rel.reference) {
            child.holder = rel.holder.clone();
            child.cardinality = rel.cardinality;
            child.path = if parent_path.is_empty() {
                rel.holder.clone()
            } else {
                format!("{}.{}", parent_path, rel.holder)
            };
        }
        let parent = match plan.view_mut(&parent_ns) {
            Some(view) => view,
            None => plan
                .views
                .first_mut()
                .ok_or_else(|| InternalError("plan has no root view".to_string()))?,
        };
        parent.relations.push(rel);
    }
    Ok(())
}

fn target_of(decl: &Declaration) -> &str {
    decl.target.trim()
}

fn apply_declarations(declarations: &Declarations, plan: &mut Plan, resolver: &mut Resolver) {
    for decl in declarations.annotations() {
        match decl.kind() {
            DeclarationKind::CompressAboveSize => plan.compress_above_size = decl.size,
            DeclarationKind::Package => {
                plan.package = decl.package.clone();
                resolver.set_package(decl.package.clone());
            }
            DeclarationKind::Import => {
                resolver.import(decl.package.clone(), decl.alias.clone());
                plan.imports.push(Import {
                    package: decl.package.clone(),
                    alias: decl.alias.clone(),
                });
            }
            DeclarationKind::Tag => apply_tag(plan, decl),
            DeclarationKind::Cast | DeclarationKind::Other(_) => {}
            DeclarationKind::Cardinality => {
                let Some(cardinality) = Cardinality::parse(&decl.value) else {
                    debug!(raw = %decl.raw, "unknown cardinality");
                    continue;
                };
                let target = target_of(decl);
                for view in &mut plan.views {
                    for rel in view.relations.iter_mut().filter(|r| r.reference.eq_ignore_ascii_case(target)) {
                        rel.cardinality = cardinality;
                    }
                }
                if let Some(view) = plan.view_mut(target) {
                    view.cardinality = cardinality;
                }
            }
            kind => {
                let Some(view) = plan.view_mut(target_of(decl)) else {
                    debug!(raw = %decl.raw, "declaration target not found");
                    continue;
                };
                match kind {
                    DeclarationKind::SetLimit => view.limit = decl.limit,
                    DeclarationKind::UseConnector => view.connector = decl.connector.clone(),
                    DeclarationKind::AllowNulls => view.allow_nulls = true,
                    DeclarationKind::PublishParent => view.publish_parent = true,
                    DeclarationKind::MatchStrategy => view.match_strategy = decl.strategy.clone(),
                    DeclarationKind::BatchSize => view.batch_size = decl.size,
                    DeclarationKind::SetPartitioner => {
                        view.partitioner = Some(Partitioner {
                            name: decl.partition.clone(),
                            value: decl.value.clone(),
                        })
                    }
                    DeclarationKind::RelationalConcurrency => {
                        view.relational_concurrency = decl.value.parse().ok()
                    }
                    _ => {}
                }
            }
        }
    }
}

fn apply_tag(plan: &mut Plan, decl: &Declaration) {
    let target = target_of(decl);
    let (namespace, column) = match target.rsplit_once('.') {
        Some((ns, col)) => (Some(ns), col),
        None => (None, target),
    };
    let view = match namespace.and_then(|ns| plan.view(ns)).map(|v| v.namespace.clone()) {
        Some(ns) => plan.view_mut(&ns),
        None => plan.views.first_mut(),
    };
    let Some(view) = view else {
        return;
    };
    match view.schema.iter_mut().find(|c| c.name.eq_ignore_ascii_case(column)) {
        Some(c) => c.tag = decl.tag.clone(),
        None => view.schema.push(Column {
            name: column.to_string(),
            expression: target.to_string(),
            tag: decl.tag.clone(),
            ..Default::default()
        }),
    }
}

fn resolve_casts(
    declarations: &Declarations,
    plan: &mut Plan,
    resolver: &Resolver,
) -> CompileResult<Vec<Resolution>> {
    let mut resolutions = Vec::new();
    for decl in declarations.of_kind(&DeclarationKind::Cast) {
        if !decl.annotation || decl.data_type.is_empty() {
            continue;
        }
        if let Some(resolution) = resolver.resolve(&decl.data_type)? {
            resolutions.push(resolution);
        }
        if let Some(ty) = ColumnType::from_name(&decl.data_type) {
            for view in &mut plan.views {
                for column in view
                    .schema
                    .iter_mut()
                    .filter(|c| column_matches(&decl.target, namespace_of(&c.expression), &c.name))
                {
                    column.data_type = ty;
                }
            }
        }
    }
    Ok(resolutions)
}
