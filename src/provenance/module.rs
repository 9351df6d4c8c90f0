//! `go.mod` parsing and package directory lookup.

use std::path::{Path, PathBuf};

use nom::{
    IResult,
    branch::alt,
    bytes::complete::{is_not, take_while1},
    character::complete::{char, space0},
    multi::many0,
    sequence::{delimited, preceded},
};
use serde::{Deserialize, Serialize};

use super::policy::clean;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Require {
    pub path: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Replace {
    pub old: String,
    pub old_version: Option<String>,
    pub new: String,
    pub new_version: Option<String>,
}

impl Replace {
    /// Local directory replacements start with `./`, `../` or `/`.
    pub fn is_local(&self) -> bool {
        self.new.starts_with("./") || self.new.starts_with("../") || self.new.starts_with('/')
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GoMod {
    pub module: String,
    pub requires: Vec<Require>,
    pub replaces: Vec<Replace>,
}

fn word(input: &str) -> IResult<&str, &str> {
    preceded(
        space0,
        alt((
            delimited(char('"'), is_not("\""), char('"')),
            take_while1(|c: char| !c.is_whitespace()),
        )),
    )(input)
}

fn words(input: &str) -> IResult<&str, Vec<&str>> {
    many0(word)(input)
}

fn strip_comment(line: &str) -> &str {
    match line.find("//") {
        Some(idx) => &line[..idx],
        None => line,
    }
}

impl GoMod {
    pub fn parse(text: &str) -> Self {
        let mut go_mod = GoMod::default();
        let mut block: Option<String> = None;

        for raw in text.lines() {
            let line = strip_comment(raw).trim();
            if line.is_empty() {
                continue;
            }
            if block.is_some() && line == ")" {
                block = None;
                continue;
            }
            let Ok((_, tokens)) = words(line) else {
                continue;
            };
            let (directive, args) = match &block {
                Some(d) => (d.as_str(), tokens.as_slice()),
                None => match tokens.split_first() {
                    Some((d, rest)) => (*d, rest),
                    None => continue,
                },
            };
            if block.is_none() && args == ["("] {
                block = Some(directive.to_string());
                continue;
            }
            go_mod.apply(directive, args);
        }
        go_mod
    }

    fn apply(&mut self, directive: &str, args: &[&str]) {
        match (directive, args) {
            ("module", [path, ..]) => self.module = path.to_string(),
            ("require", [path, version, ..]) => self.requires.push(Require {
                path: path.to_string(),
                version: version.to_string(),
            }),
            ("replace", _) => {
                let Some(arrow) = args.iter().position(|a| *a == "=>") else {
                    return;
                };
                let (lhs, rhs) = (&args[..arrow], &args[arrow + 1..]);
                let (Some(old), Some(new)) = (lhs.first(), rhs.first()) else {
                    return;
                };
                self.replaces.push(Replace {
                    old: old.to_string(),
                    old_version: lhs.get(1).map(|v| v.to_string()),
                    new: new.to_string(),
                    new_version: rhs.get(1).map(|v| v.to_string()),
                });
            }
            _ => {}
        }
    }

    pub fn require(&self, package: &str) -> Option<&Require> {
        self.requires
            .iter()
            .filter(|r| within(package, &r.path).is_some())
            .max_by_key(|r| r.path.len())
    }
}

/// Remainder of `package` below `module`, if it is inside it.
fn within<'a>(package: &'a str, module: &str) -> Option<&'a str> {
    if package == module {
        Some("")
    } else {
        package
            .strip_prefix(module)
            .and_then(|rest| rest.strip_prefix('/'))
    }
}

/// Module cache escaping: uppercase letters become `!` + lowercase.
pub fn escape_path(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    for c in path.chars() {
        if c.is_ascii_uppercase() {
            out.push('!');
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LookupStep {
    Module,
    Replace,
    Modcache,
    Gopath,
}

pub const DEFAULT_LOOKUP_ORDER: &[LookupStep] = &[
    LookupStep::Module,
    LookupStep::Replace,
    LookupStep::Modcache,
    LookupStep::Gopath,
];

/// Everything needed to turn an import path into a directory.
#[derive(Debug, Clone)]
pub struct ModuleLayout {
    pub project_dir: PathBuf,
    pub go_mod: Option<GoMod>,
    pub mod_cache: Option<PathBuf>,
    pub gopath: Option<PathBuf>,
    pub order: Vec<LookupStep>,
}

impl ModuleLayout {
    /// Read `go.mod` under `project_dir`; a missing or unreadable file leaves
    /// only the cache and GOPATH steps usable.
    pub fn load(project_dir: &Path) -> Self {
        let go_mod = std::fs::read_to_string(project_dir.join("go.mod"))
            .ok()
            .map(|text| GoMod::parse(&text));
        let gopath = std::env::var_os("GOPATH")
            .and_then(|v| std::env::split_paths(&v).next())
            .or_else(|| dirs::home_dir().map(|h| h.join("go")));
        let mod_cache = std::env::var_os("GOMODCACHE")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .or_else(|| gopath.as_ref().map(|g| g.join("pkg").join("mod")));
        Self {
            project_dir: project_dir.to_path_buf(),
            go_mod,
            mod_cache,
            gopath,
            order: DEFAULT_LOOKUP_ORDER.to_vec(),
        }
    }

    pub fn with_order(mut self, order: Vec<LookupStep>) -> Self {
        if !order.is_empty() {
            self.order = order;
        }
        self
    }

    /// Candidate directories for `package`, in lookup order. Only existing
    /// directories are returned.
    pub fn package_dirs(&self, package: &str) -> Vec<PathBuf> {
        let mut dirs = Vec::new();
        for step in &self.order {
            if let Some(dir) = self.step(*step, package) {
                if dir.is_dir() && !dirs.contains(&dir) {
                    dirs.push(dir);
                }
            }
        }
        dirs
    }

    fn step(&self, step: LookupStep, package: &str) -> Option<PathBuf> {
        let go_mod = self.go_mod.as_ref();
        match step {
            LookupStep::Module => {
                let module = go_mod?.module.as_str();
                let rest = within(package, module)?;
                Some(clean(&self.project_dir.join(rest), &self.project_dir))
            }
            LookupStep::Replace => {
                let replace = go_mod?
                    .replaces
                    .iter()
                    .filter(|r| within(package, &r.old).is_some())
                    .max_by_key(|r| r.old.len())?;
                let rest = within(package, &replace.old)?;
                if replace.is_local() {
                    Some(clean(&Path::new(&replace.new).join(rest), &self.project_dir))
                } else {
                    let version = replace.new_version.as_deref()?;
                    self.cached(&replace.new, version, rest)
                }
            }
            LookupStep::Modcache => {
                let require = go_mod?.require(package)?;
                let rest = within(package, &require.path)?;
                self.cached(&require.path, &require.version, rest)
            }
            LookupStep::Gopath => Some(self.gopath.as_ref()?.join("src").join(package)),
        }
    }

    fn cached(&self, module: &str, version: &str, rest: &str) -> Option<PathBuf> {
        let root = self.mod_cache.as_ref()?;
        Some(root.join(format!("{}@{}", escape_path(module), version)).join(rest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GO_MOD: &str = r#"
module github.com/acme/shop // main module

go 1.21

require github.com/acme/Types v1.2.0

require (
    golang.org/x/text v0.14.0
    github.com/acme/lib v0.3.1 // indirect
)

replace github.com/acme/lib => ../lib

replace (
    golang.org/x/text v0.14.0 => golang.org/x/text v0.15.0
)
"#;

    #[test]
    fn test_parse_go_mod() {
        let m = GoMod::parse(GO_MOD);
        assert_eq!(m.module, "github.com/acme/shop");
        assert_eq!(m.requires.len(), 3);
        assert_eq!(m.requires[2].path, "github.com/acme/lib");
        assert_eq!(m.replaces.len(), 2);
        assert!(m.replaces[0].is_local());
        assert_eq!(m.replaces[1].old_version.as_deref(), Some("v0.14.0"));
        assert_eq!(m.replaces[1].new_version.as_deref(), Some("v0.15.0"));
        assert_eq!(
            m.require("github.com/acme/Types/model").map(|r| r.version.as_str()),
            Some("v1.2.0")
        );
    }

    #[test]
    fn test_escape_path() {
        assert_eq!(escape_path("github.com/acme/Types"), "github.com/acme/!types");
    }

    #[test]
    fn test_package_dirs() {
        let root = tempfile::tempdir().unwrap();
        let project = root.path().join("shop");
        let cache = root.path().join("cache");
        std::fs::create_dir_all(project.join("model")).unwrap();
        std::fs::create_dir_all(root.path().join("lib/util")).unwrap();
        std::fs::create_dir_all(cache.join("github.com/acme/!types@v1.2.0/model")).unwrap();
        std::fs::write(project.join("go.mod"), GO_MOD).unwrap();

        let mut layout = ModuleLayout::load(&project);
        layout.mod_cache = Some(cache.clone());
        layout.gopath = None;

        assert_eq!(layout.package_dirs("github.com/acme/shop/model"), vec![project.join("model")]);
        assert_eq!(layout.package_dirs("github.com/acme/lib/util"), vec![root.path().join("lib/util")]);
        assert_eq!(
            layout.package_dirs("github.com/acme/Types/model"),
            vec![cache.join("github.com/acme/!types@v1.2.0/model")]
        );
        assert!(layout.package_dirs("example.com/none").is_empty());
    }
}
