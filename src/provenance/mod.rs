//! Type provenance: resolve `cast()` targets to registry entries and, where
//! the package can be located, to the Go source file declaring them.
//!
//! ```text
//! expression ─▶ registry (exact / qualified) ─▶ package dir ─▶ source file
//!                                                   │              │
//!                                              trusted roots ◀─────┘
//!                                                   │
//!                                            provenance policy
//! ```

mod module;
mod policy;
mod source;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::cursor;
use crate::ir::Node;
use crate::shape::TypeDef;

pub use module::{DEFAULT_LOOKUP_ORDER, GoMod, LookupStep, ModuleLayout, Replace, Require};
pub use policy::{
    DEFAULT_ALLOWED_KINDS, KIND_AST_TYPE, KIND_BUILTIN, KIND_RESOURCE_TYPE, POLICY_WARN_PREFIX,
    PolicyMode, ProvenancePolicy, TrustedRoots, clean,
};
pub use source::{GoFile, find_type, scan_file};

#[derive(Debug, Error)]
pub enum ProvenanceError {
    /// A resolution was rejected in strict mode.
    #[error("provenance policy failed for {expression:?} ({kind} from {origin}): {reason}")]
    PolicyFailed {
        expression: String,
        kind: String,
        origin: String,
        reason: String,
    },

    /// A source lookup landed outside every trusted root.
    #[error("untrusted path {}: not under any trusted root ({roots})", path.display())]
    UntrustedPath { path: PathBuf, roots: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchKind {
    Exact,
    Qualified,
    Source,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Provenance {
    pub package: String,
    pub file: String,
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Resolution {
    pub expression: String,
    pub resolved_key: String,
    pub match_kind: MatchKind,
    /// Concrete data type the expression stands for.
    pub target: String,
    pub provenance: Provenance,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeEntry {
    pub name: String,
    pub package: String,
    pub data_type: String,
    pub source_url: String,
    pub kind: &'static str,
}

impl TypeEntry {
    fn key(&self) -> String {
        if self.package.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.package, self.name)
        }
    }
}

const BUILTINS: &[(&str, &str)] = &[
    ("string", ""),
    ("int", ""),
    ("int8", ""),
    ("int16", ""),
    ("int32", ""),
    ("int64", ""),
    ("uint", ""),
    ("uint8", ""),
    ("uint16", ""),
    ("uint32", ""),
    ("uint64", ""),
    ("float32", ""),
    ("float64", ""),
    ("bool", ""),
    ("byte", ""),
    ("rune", ""),
    ("Time", "time"),
    ("Duration", "time"),
];

/// Known types: builtins plus resource-declared types.
#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    entries: Vec<TypeEntry>,
}

impl TypeRegistry {
    pub fn with_builtins() -> Self {
        let entries = BUILTINS
            .iter()
            .map(|(name, package)| TypeEntry {
                name: name.to_string(),
                package: package.to_string(),
                data_type: if package.is_empty() {
                    name.to_string()
                } else {
                    format!("{}.{}", package, name)
                },
                source_url: String::new(),
                kind: KIND_BUILTIN,
            })
            .collect();
        Self { entries }
    }

    pub fn register(&mut self, def: &TypeDef) {
        if def.name.is_empty() {
            return;
        }
        self.entries.retain(|e| !(e.name == def.name && e.package == def.package));
        self.entries.push(TypeEntry {
            name: def.name.clone(),
            package: def.package.clone(),
            data_type: if def.data_type.is_empty() {
                def.name.clone()
            } else {
                def.data_type.clone()
            },
            source_url: def.source_url.clone(),
            kind: KIND_RESOURCE_TYPE,
        });
    }

    /// Register `Resource.Types` entries of a route document.
    pub fn register_document(&mut self, document: &Node) {
        for t in document.list_at(&["Resource", "Types"]) {
            self.register(&TypeDef {
                name: t.text_at(&["Name"]),
                data_type: t.text_at(&["DataType"]),
                package: t.text_at(&["Package"]),
                source_url: t.text_at(&["SourceURL"]),
            });
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn exact(&self, name: &str) -> Option<&TypeEntry> {
        // resource types shadow builtins of the same name
        self.entries
            .iter()
            .rev()
            .find(|e| e.name == name && (e.package.is_empty() || e.kind == KIND_RESOURCE_TYPE))
    }

    fn qualified(&self, package: &str, name: &str) -> Option<&TypeEntry> {
        self.entries.iter().rev().find(|e| {
            e.name == name
                && (e.package == package || e.package.rsplit('/').next() == Some(package))
        })
    }
}

/// Per-compilation resolver. Holds the registry, module layout, import
/// aliases and policy; no state is shared between resolvers.
#[derive(Debug, Clone)]
pub struct Resolver {
    registry: TypeRegistry,
    layout: ModuleLayout,
    policy: ProvenancePolicy,
    imports: HashMap<String, String>,
    package: String,
}

impl Resolver {
    pub fn new(registry: TypeRegistry, layout: ModuleLayout, policy: ProvenancePolicy) -> Self {
        Self {
            registry,
            layout,
            policy,
            imports: HashMap::new(),
            package: String::new(),
        }
    }

    /// Builtins only, rooted at `project_dir`, lenient.
    pub fn for_project(project_dir: &Path) -> Self {
        Self::new(
            TypeRegistry::with_builtins(),
            ModuleLayout::load(project_dir),
            ProvenancePolicy::new(PolicyMode::Lenient, TrustedRoots::new(project_dir, [])),
        )
    }

    pub fn registry_mut(&mut self) -> &mut TypeRegistry {
        &mut self.registry
    }

    pub fn policy(&self) -> &ProvenancePolicy {
        &self.policy
    }

    /// Map `alias` to an import path for qualified type expressions.
    pub fn import(&mut self, package: impl Into<String>, alias: impl Into<String>) {
        self.imports.insert(alias.into(), package.into());
    }

    /// Package unqualified types are looked up in.
    pub fn set_package(&mut self, package: impl Into<String>) {
        self.package = package.into();
    }

    /// Resolve one type expression, then apply the provenance policy.
    ///
    /// Returns `Ok(None)` when nothing is known about the type. File-system
    /// failures degrade to no provenance; trusted-root violations and strict
    /// policy rejections are errors.
    pub fn resolve(&self, expression: &str) -> Result<Option<Resolution>, ProvenanceError> {
        let Some(resolution) = self.lookup(expression)? else {
            debug!(expression, "type not resolved");
            return Ok(None);
        };
        self.policy.evaluate(resolution).map(Some)
    }

    fn lookup(&self, expression: &str) -> Result<Option<Resolution>, ProvenanceError> {
        let expr = cursor::unquote(expression);
        let bare = expr.trim_start_matches(['*', '[', ']']);
        let (qualifier, name) = match bare.rsplit_once('.') {
            Some((q, n)) => (Some(q), n),
            None => (None, bare),
        };
        let package = match qualifier {
            Some(q) => self.imports.get(q).cloned().unwrap_or_else(|| q.to_string()),
            None => self.package.clone(),
        };

        let entry = match qualifier {
            None => self.registry.exact(name).map(|e| (e, MatchKind::Exact)),
            Some(_) => self
                .registry
                .qualified(&package, name)
                .map(|e| (e, MatchKind::Qualified)),
        };

        if let Some((entry, match_kind)) = entry {
            let mut provenance = Provenance {
                package: entry.package.clone(),
                file: entry.source_url.clone(),
                kind: entry.kind.to_string(),
            };
            if provenance.file.is_empty() && entry.kind == KIND_RESOURCE_TYPE && !entry.package.is_empty() {
                if let Some(file) = self.source_file(&entry.package, name)? {
                    provenance.file = file.display().to_string();
                }
            }
            return Ok(Some(Resolution {
                expression: expression.to_string(),
                resolved_key: entry.key(),
                match_kind,
                target: entry.data_type.clone(),
                provenance,
            }));
        }

        if package.is_empty() {
            return Ok(None);
        }
        let Some(file) = self.source_file(&package, name)? else {
            return Ok(None);
        };
        Ok(Some(Resolution {
            expression: expression.to_string(),
            resolved_key: format!("{}.{}", package, name),
            match_kind: MatchKind::Source,
            target: format!("{}.{}", package.rsplit('/').next().unwrap_or(&package), name),
            provenance: Provenance {
                package,
                file: file.display().to_string(),
                kind: KIND_AST_TYPE.to_string(),
            },
        }))
    }

    /// Declaring file of `package.name`, gated by the trusted roots.
    fn source_file(&self, package: &str, name: &str) -> Result<Option<PathBuf>, ProvenanceError> {
        for dir in self.layout.package_dirs(package) {
            match find_type(&dir, name) {
                Ok(Some(file)) => return self.policy.roots.check(&file).map(Some),
                Ok(None) => {}
                Err(err) => {
                    warn!(dir = %dir.display(), error = %err, "package directory unreadable");
                }
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn project() -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("go.mod"), "module example.com/shop\n").unwrap();
        std::fs::create_dir_all(dir.path().join("model")).unwrap();
        std::fs::write(
            dir.path().join("model/order.go"),
            "package model\n\ntype Order struct {\n    ID int\n}\n",
        )
        .unwrap();
        dir
    }

    fn resolver(dir: &Path, mode: PolicyMode) -> Resolver {
        let mut layout = ModuleLayout::load(dir);
        layout.mod_cache = None;
        layout.gopath = None;
        Resolver::new(
            TypeRegistry::with_builtins(),
            layout,
            ProvenancePolicy::new(mode, TrustedRoots::new(dir, [])),
        )
    }

    #[test]
    fn test_builtin() {
        let dir = project();
        let r = resolver(dir.path(), PolicyMode::Strict).resolve("'int'").unwrap().unwrap();
        assert_eq!(r.match_kind, MatchKind::Exact);
        assert_eq!(r.provenance.kind, KIND_BUILTIN);
        let t = resolver(dir.path(), PolicyMode::Strict).resolve("time.Time").unwrap().unwrap();
        assert_eq!(t.match_kind, MatchKind::Qualified);
        assert_eq!(t.target, "time.Time");
    }

    #[test]
    fn test_source_lookup_via_import_alias() {
        let dir = project();
        let mut r = resolver(dir.path(), PolicyMode::Strict);
        r.import("example.com/shop/model", "m");
        let res = r.resolve("*m.Order").unwrap().unwrap();
        assert_eq!(res.match_kind, MatchKind::Source);
        assert_eq!(res.provenance.kind, KIND_AST_TYPE);
        assert_eq!(res.resolved_key, "example.com/shop/model.Order");
        assert!(res.provenance.file.ends_with("order.go"));
    }

    #[test]
    fn test_unknown_type() {
        let dir = project();
        assert_eq!(resolver(dir.path(), PolicyMode::Strict).resolve("Mystery").unwrap(), None);
    }

    #[test]
    fn test_resource_type_outside_roots() {
        let dir = project();
        let mut strict = resolver(dir.path(), PolicyMode::Strict);
        strict.registry_mut().register(&TypeDef {
            name: "Order".into(),
            data_type: "*Order".into(),
            package: String::new(),
            source_url: "/outside/order.go".into(),
        });
        let err = strict.resolve("'Order'").unwrap_err();
        assert!(err.to_string().contains("provenance policy failed"));

        let mut lenient = resolver(dir.path(), PolicyMode::Lenient);
        lenient.registry_mut().register(&TypeDef {
            name: "Order".into(),
            source_url: "/outside/order.go".into(),
            ..Default::default()
        });
        let res = lenient.resolve("Order").unwrap().unwrap();
        assert_eq!(res.provenance.kind, "policy_warn:resource_type");
    }

    #[test]
    fn test_untrusted_source_is_hard_error() {
        let dir = project();
        let other = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(other.path().join("src/vendor.io/pkg")).unwrap();
        std::fs::write(other.path().join("src/vendor.io/pkg/t.go"), "package pkg\ntype T int\n").unwrap();
        let mut r = resolver(dir.path(), PolicyMode::Lenient);
        r.layout.gopath = Some(other.path().to_path_buf());
        assert!(matches!(
            r.resolve("vendor.io/pkg.T"),
            Err(ProvenanceError::UntrustedPath { .. })
        ));
    }
}
