//! Go source scanning: package clause and top-level type declarations.

use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Tok<'a> {
    Word(&'a str),
    Punct(u8),
    Newline,
}

/// Go tokens with comments and literals dropped; newlines kept.
fn tokens(src: &str) -> Vec<Tok<'_>> {
    let bytes = src.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match b {
            b'\n' => {
                out.push(Tok::Newline);
                i += 1;
            }
            b' ' | b'\t' | b'\r' => i += 1,
            b'/' if bytes.get(i + 1) == Some(&b'/') => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i += 2;
                while i + 1 < bytes.len() && !(bytes[i] == b'*' && bytes[i + 1] == b'/') {
                    if bytes[i] == b'\n' {
                        out.push(Tok::Newline);
                    }
                    i += 1;
                }
                i += 2;
            }
            b'"' | b'\'' | b'`' => {
                i += 1;
                while i < bytes.len() && bytes[i] != b {
                    if bytes[i] == b'\\' && b != b'`' {
                        i += 1;
                    }
                    i += 1;
                }
                i += 1;
                out.push(Tok::Word(""));
            }
            _ if b.is_ascii_alphanumeric() || b == b'_' || b >= 0x80 => {
                let start = i;
                while i < bytes.len()
                    && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_' || bytes[i] >= 0x80)
                {
                    i += 1;
                }
                out.push(Tok::Word(&src[start..i]));
            }
            _ => {
                out.push(Tok::Punct(b));
                i += 1;
            }
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GoFile {
    pub package: String,
    pub types: Vec<String>,
}

/// Package name and top-level type names of one Go file.
pub fn scan_file(src: &str) -> GoFile {
    let toks = tokens(src);
    let mut file = GoFile::default();
    let mut depth = 0i32;
    let mut i = 0;
    while i < toks.len() {
        match &toks[i] {
            Tok::Punct(b'{' | b'(' | b'[') => depth += 1,
            Tok::Punct(b'}' | b')' | b']') => depth -= 1,
            Tok::Word("package") if depth == 0 && file.package.is_empty() => {
                if let Some(Tok::Word(name)) = toks.get(i + 1) {
                    file.package = name.to_string();
                    i += 1;
                }
            }
            Tok::Word("type") if depth == 0 => match toks.get(i + 1) {
                Some(Tok::Word(name)) => {
                    file.types.push(name.to_string());
                    i += 1;
                }
                Some(Tok::Punct(b'(')) => {
                    i = type_group(&toks, i + 2, &mut file.types);
                    continue;
                }
                _ => {}
            },
            _ => {}
        }
        i += 1;
    }
    file
}

/// Names declared in a `type ( .. )` group; returns the index after `)`.
fn type_group(toks: &[Tok<'_>], mut i: usize, out: &mut Vec<String>) -> usize {
    let mut depth = 0i32;
    let mut line_start = true;
    while i < toks.len() {
        match &toks[i] {
            Tok::Punct(b')') if depth == 0 => return i + 1,
            Tok::Punct(b'{' | b'(' | b'[') => depth += 1,
            Tok::Punct(b'}' | b')' | b']') => depth -= 1,
            Tok::Newline | Tok::Punct(b';') => {
                line_start = true;
                i += 1;
                continue;
            }
            Tok::Word(name) if line_start && depth == 0 && !name.is_empty() => out.push(name.to_string()),
            _ => {}
        }
        line_start = false;
        i += 1;
    }
    i
}

/// First non-test `.go` file in `dir` declaring type `name`. Files are
/// visited in name order.
pub fn find_type(dir: &Path, name: &str) -> io::Result<Option<PathBuf>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.is_file()
                && p.extension().is_some_and(|e| e == "go")
                && !p
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.ends_with("_test.go"))
        })
        .collect();
    files.sort();
    for path in files {
        let src = std::fs::read_to_string(&path)?;
        let file = scan_file(&src);
        if !file.package.is_empty() && file.types.iter().any(|t| t == name) {
            return Ok(Some(path));
        }
    }
    Ok(None)
}
