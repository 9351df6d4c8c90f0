//! Trusted roots and the provenance policy.

use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{ProvenanceError, Resolution};

pub const KIND_BUILTIN: &str = "builtin";
pub const KIND_RESOURCE_TYPE: &str = "resource_type";
pub const KIND_AST_TYPE: &str = "ast_type";
pub const POLICY_WARN_PREFIX: &str = "policy_warn:";

pub const DEFAULT_ALLOWED_KINDS: &[&str] = &[KIND_BUILTIN, KIND_RESOURCE_TYPE, KIND_AST_TYPE];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyMode {
    Strict,
    #[default]
    Lenient,
}

/// Lexically clean `path`, making it absolute against `base`.
pub fn clean(path: &Path, base: &Path) -> PathBuf {
    let joined = if path.is_absolute() { path.to_path_buf() } else { base.join(path) };
    let mut out = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Directories source files may be read from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrustedRoots {
    roots: Vec<PathBuf>,
    base: PathBuf,
}

impl TrustedRoots {
    /// The project directory plus explicit extra roots; relative roots are
    /// taken against the project directory.
    pub fn new(project_dir: &Path, extra: impl IntoIterator<Item = PathBuf>) -> Self {
        let base = std::env::current_dir().unwrap_or_default();
        let project = clean(project_dir, &base);
        let mut roots = vec![project.clone()];
        for root in extra {
            let root = clean(&root, &project);
            if !roots.contains(&root) {
                roots.push(root);
            }
        }
        Self { roots, base: project }
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    pub fn contains(&self, path: &Path) -> bool {
        let path = clean(path, &self.base);
        self.roots.iter().any(|root| path.starts_with(root))
    }

    /// Cleaned `path`, or an error when it lies outside every root.
    pub fn check(&self, path: &Path) -> Result<PathBuf, ProvenanceError> {
        if self.contains(path) {
            Ok(clean(path, &self.base))
        } else {
            Err(ProvenanceError::UntrustedPath {
                path: path.to_path_buf(),
                roots: self.describe(),
            })
        }
    }

    fn describe(&self) -> String {
        self.roots
            .iter()
            .map(|r| r.display().to_string())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[derive(Debug, Clone)]
pub struct ProvenancePolicy {
    pub mode: PolicyMode,
    pub allowed_kinds: Vec<String>,
    pub roots: TrustedRoots,
}

impl ProvenancePolicy {
    pub fn new(mode: PolicyMode, roots: TrustedRoots) -> Self {
        Self {
            mode,
            allowed_kinds: DEFAULT_ALLOWED_KINDS.iter().map(|k| k.to_string()).collect(),
            roots,
        }
    }

    pub fn with_allowed_kinds(mut self, kinds: Vec<String>) -> Self {
        if !kinds.is_empty() {
            self.allowed_kinds = kinds;
        }
        self
    }

    fn violation(&self, resolution: &Resolution) -> Option<String> {
        let p = &resolution.provenance;
        if !self.allowed_kinds.iter().any(|k| k == &p.kind) {
            return Some(format!("kind {:?} not allowed", p.kind));
        }
        let file = file_path(&p.file);
        if !p.file.is_empty() && !self.roots.contains(Path::new(file)) {
            return Some(format!("{} is outside trusted roots", p.file));
        }
        None
    }

    /// Strict mode rejects; lenient mode keeps the resolution with its kind
    /// prefixed by `policy_warn:`.
    pub fn evaluate(&self, mut resolution: Resolution) -> Result<Resolution, ProvenanceError> {
        let Some(reason) = self.violation(&resolution) else {
            return Ok(resolution);
        };
        let p = &resolution.provenance;
        let origin = if p.file.is_empty() { p.package.clone() } else { p.file.clone() };
        match self.mode {
            PolicyMode::Strict => Err(ProvenanceError::PolicyFailed {
                expression: resolution.expression.clone(),
                kind: p.kind.clone(),
                origin,
                reason,
            }),
            PolicyMode::Lenient => {
                warn!(expression = %resolution.expression, %origin, %reason, "degraded type provenance");
                let kind = format!("{}{}", POLICY_WARN_PREFIX, p.kind);
                resolution.provenance.kind = kind;
                Ok(resolution)
            }
        }
    }
}

/// `file://` URLs and plain paths alike.
fn file_path(url: &str) -> &str {
    url.strip_prefix("file://").unwrap_or(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provenance::{MatchKind, Provenance};

    fn resolution(kind: &str, file: &str) -> Resolution {
        Resolution {
            expression: "Order".into(),
            resolved_key: "Order".into(),
            match_kind: MatchKind::Exact,
            target: "Order".into(),
            provenance: Provenance {
                package: "app/model".into(),
                file: file.into(),
                kind: kind.into(),
            },
        }
    }

    #[test]
    fn test_clean() {
        assert_eq!(clean(Path::new("a/./b/../c"), Path::new("/p")), PathBuf::from("/p/a/c"));
        assert_eq!(clean(Path::new("/x/../y"), Path::new("/p")), PathBuf::from("/y"));
    }

    #[test]
    fn test_trusted_roots_prefix() {
        let roots = TrustedRoots::new(Path::new("/project"), [PathBuf::from("/opt/shared")]);
        assert!(roots.contains(Path::new("/project/model/order.go")));
        assert!(roots.contains(Path::new("/opt/shared/x.go")));
        assert!(!roots.contains(Path::new("/project/../etc/passwd")));
        assert!(!roots.contains(Path::new("/projector/x.go")));
        assert!(matches!(
            roots.check(Path::new("/tmp/x.go")),
            Err(ProvenanceError::UntrustedPath { .. })
        ));
    }

    #[test]
    fn test_strict_rejects_outside_file() {
        let policy = ProvenancePolicy::new(PolicyMode::Strict, TrustedRoots::new(Path::new("/project"), []));
        let err = policy
            .evaluate(resolution(KIND_RESOURCE_TYPE, "/elsewhere/order.go"))
            .unwrap_err();
        assert!(err.to_string().contains("provenance policy failed"));
        assert!(policy.evaluate(resolution(KIND_BUILTIN, "")).is_ok());
    }

    #[test]
    fn test_lenient_tags_kind() {
        let policy = ProvenancePolicy::new(PolicyMode::Lenient, TrustedRoots::new(Path::new("/project"), []));
        let out = policy.evaluate(resolution("remote", "")).unwrap();
        assert_eq!(out.provenance.kind, "policy_warn:remote");
        let ok = policy
            .evaluate(resolution(KIND_AST_TYPE, "file:///project/model/order.go"))
            .unwrap();
        assert_eq!(ok.provenance.kind, KIND_AST_TYPE);
    }
}
