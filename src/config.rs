//! Compiler configuration: `dql.toml` and the options builder.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CompileError, CompileResult};
use crate::provenance::{
    LookupStep, ModuleLayout, PolicyMode, ProvenancePolicy, Resolver, TrustedRoots, TypeRegistry,
};
use crate::shape::TypeDef;
use crate::sql::SqlDialect;

pub const CONFIG_FILE: &str = "dql.toml";

/// `[provenance]` section
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ProvenanceConfig {
    pub mode: PolicyMode,
    pub trusted_roots: Vec<PathBuf>,
    pub allowed_kinds: Vec<String>,
    pub lookup_order: Vec<LookupStep>,
    pub project_dir: Option<PathBuf>,
}

/// `[compile]` section
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CompileConfig {
    pub dialect: SqlDialect,
}

/// Contents of `dql.toml`
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub provenance: ProvenanceConfig,
    pub compile: CompileConfig,
}

impl Config {
    pub fn from_toml(text: &str) -> CompileResult<Self> {
        toml::from_str(text).map_err(|e| CompileError::config(e.to_string()))
    }

    /// Load `explicit`, else `./dql.toml`, else the user config file.
    /// No file at all yields defaults.
    pub fn load(explicit: Option<&Path>) -> CompileResult<Self> {
        if let Some(path) = explicit {
            return Self::from_toml(&std::fs::read_to_string(path)?);
        }
        let candidates = [
            Some(PathBuf::from(CONFIG_FILE)),
            dirs::config_dir().map(|d| d.join("dql").join("config.toml")),
        ];
        for path in candidates.into_iter().flatten() {
            if path.is_file() {
                debug!(path = %path.display(), "loading config");
                return Self::from_toml(&std::fs::read_to_string(&path)?);
            }
        }
        Ok(Self::default())
    }

    pub fn options(&self) -> CompileOptions {
        let p = &self.provenance;
        let mut builder = CompileOptions::builder()
            .dialect(self.compile.dialect)
            .mode(p.mode)
            .trusted_roots(p.trusted_roots.clone())
            .allowed_kinds(p.allowed_kinds.clone())
            .lookup_order(p.lookup_order.clone());
        if let Some(dir) = &p.project_dir {
            builder = builder.project_dir(dir);
        }
        builder.build()
    }
}

/// Options for one [`Compiler`](crate::compile::Compiler).
#[derive(Debug, Clone, PartialEq)]
pub struct CompileOptions {
    pub dialect: SqlDialect,
    pub mode: PolicyMode,
    pub project_dir: PathBuf,
    pub trusted_roots: Vec<PathBuf>,
    pub allowed_kinds: Vec<String>,
    pub lookup_order: Vec<LookupStep>,
    /// Resource-declared types available to `cast()`.
    pub types: Vec<TypeDef>,
    /// Run the relation validator on the compiled plan.
    pub validate: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            dialect: SqlDialect::default(),
            mode: PolicyMode::default(),
            project_dir: PathBuf::from("."),
            trusted_roots: Vec::new(),
            allowed_kinds: Vec::new(),
            lookup_order: Vec::new(),
            types: Vec::new(),
            validate: true,
        }
    }
}

impl CompileOptions {
    /// Create a new options builder
    pub fn builder() -> CompileOptionsBuilder {
        CompileOptionsBuilder::default()
    }

    /// Build the type resolver these options describe.
    pub fn resolver(&self) -> Resolver {
        let mut registry = TypeRegistry::with_builtins();
        for t in &self.types {
            registry.register(t);
        }
        let layout = ModuleLayout::load(&self.project_dir).with_order(self.lookup_order.clone());
        let roots = TrustedRoots::new(&self.project_dir, self.trusted_roots.iter().cloned());
        let policy = ProvenancePolicy::new(self.mode, roots).with_allowed_kinds(self.allowed_kinds.clone());
        Resolver::new(registry, layout, policy)
    }
}

/// Builder for CompileOptions
#[derive(Debug, Default)]
pub struct CompileOptionsBuilder {
    options: CompileOptions,
}

impl CompileOptionsBuilder {
    pub fn dialect(mut self, dialect: SqlDialect) -> Self {
        self.options.dialect = dialect;
        self
    }

    /// Strict or lenient provenance policy
    pub fn mode(mut self, mode: PolicyMode) -> Self {
        self.options.mode = mode;
        self
    }

    pub fn strict(self) -> Self {
        self.mode(PolicyMode::Strict)
    }

    pub fn project_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.options.project_dir = dir.into();
        self
    }

    pub fn trusted_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.options.trusted_roots.push(root.into());
        self
    }

    pub fn trusted_roots(mut self, roots: Vec<PathBuf>) -> Self {
        self.options.trusted_roots = roots;
        self
    }

    pub fn allowed_kinds(mut self, kinds: Vec<String>) -> Self {
        self.options.allowed_kinds = kinds;
        self
    }

    pub fn lookup_order(mut self, order: Vec<LookupStep>) -> Self {
        self.options.lookup_order = order;
        self
    }

    /// Declare a resource type
    pub fn resource_type(mut self, def: TypeDef) -> Self {
        self.options.types.push(def);
        self
    }

    pub fn validate(mut self, validate: bool) -> Self {
        self.options.validate = validate;
        self
    }

    /// Build the options
    pub fn build(self) -> CompileOptions {
        self.options
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_toml() {
        let config = Config::from_toml(
            r#"
[provenance]
mode = "strict"
trusted_roots = ["/opt/models"]
lookup_order = ["replace", "module"]

[compile]
dialect = "postgres"
"#,
        )
        .unwrap();
        assert_eq!(config.provenance.mode, PolicyMode::Strict);
        assert_eq!(config.provenance.lookup_order, vec![LookupStep::Replace, LookupStep::Module]);
        let options = config.options();
        assert_eq!(options.dialect, SqlDialect::Postgres);
        assert_eq!(options.trusted_roots, vec![PathBuf::from("/opt/models")]);
    }

    #[test]
    fn test_defaults() {
        assert_eq!(Config::from_toml("").unwrap(), Config::default());
        assert_eq!(Config::default().options().mode, PolicyMode::Lenient);
        assert!(matches!(Config::from_toml("[compile]\ndialect = 3"), Err(CompileError::Config(_))));
    }

    #[test]
    fn test_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(&path, "[compile]\ndialect = \"mysql\"\n").unwrap();
        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.compile.dialect, SqlDialect::Mysql);
        assert!(matches!(
            Config::load(Some(&dir.path().join("missing.toml"))),
            Err(CompileError::Io(_))
        ));
    }

    #[test]
    fn test_builder() {
        let options = CompileOptions::builder().strict().trusted_root("/a").validate(false).build();
        assert_eq!(options.mode, PolicyMode::Strict);
        assert_eq!(options.trusted_roots.len(), 1);
        assert!(!options.validate);
    }
}
