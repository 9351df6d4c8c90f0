//! dql: the DQL shape compiler CLI
//!
//! # Usage
//!
//! ```bash
//! # Compile a DQL file into a route document
//! dql compile orders.sql --format yaml
//!
//! # Validate hand-written route YAML
//! dql validate orders.yaml
//!
//! # Compare two route documents
//! dql diff generated.yaml legacy.yaml
//!
//! # Compile every .sql under a directory, diffing against sibling .yaml
//! dql check ./routes
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use dql::prelude::*;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "dql")]
#[command(author = "DQL Contributors")]
#[command(version)]
#[command(about = "DQL shape compiler: annotated SQL in, route plan out", long_about = None)]
#[command(after_help = "EXAMPLES:
    dql compile orders.sql --name orders
    dql validate orders.yaml
    dql diff generated.yaml legacy.yaml
    dql check ./routes")]
struct Cli {
    /// Config file (defaults to ./dql.toml, then the user config dir)
    #[arg(short, long, global = true, env = "DQL_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Yaml,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a DQL file and print its route document
    Compile {
        file: PathBuf,
        /// Route name (defaults to the file stem)
        #[arg(short, long)]
        name: Option<String>,
        #[arg(short, long, value_enum, default_value = "yaml")]
        format: OutputFormat,
    },
    /// Run the relation validator on a route document
    Validate { file: PathBuf },
    /// Canonicalize two route documents and print their differences
    Diff { lhs: PathBuf, rhs: PathBuf },
    /// Compile every .sql under a directory and diff against sibling .yaml
    Check { dir: PathBuf },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("dql=info")))
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            2
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<i32> {
    let config = Config::load(cli.config.as_deref()).context("loading config")?;
    let options = config.options();
    debug!(?options, "options");

    match cli.command {
        Commands::Compile { file, name, format } => compile_file(&file, name, format, options),
        Commands::Validate { file } => validate_file(&file, options.dialect),
        Commands::Diff { lhs, rhs } => diff_files(&lhs, &rhs),
        Commands::Check { dir } => check_dir(&dir, options).await,
    }
}

fn route_name(file: &Path) -> String {
    file.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("route")
        .to_string()
}

fn print_diagnostics(file: &Path, diagnostics: &Diagnostics) {
    for d in diagnostics {
        let label = match d.severity {
            Severity::Error => "error".red().bold(),
            Severity::Warning => "warning".yellow().bold(),
        };
        let mut line = format!(
            "{}:{}:{} {}[{}] {}",
            file.display(),
            d.span.start.line,
            d.span.start.char,
            label,
            d.code,
            d.message
        );
        if !d.hint.is_empty() {
            line.push_str(&format!(" {}", format!("({})", d.hint).dimmed()));
        }
        eprintln!("{}", line);
    }
}

fn compile_file(file: &Path, name: Option<String>, format: OutputFormat, options: CompileOptions) -> Result<i32> {
    let source = std::fs::read_to_string(file).with_context(|| format!("reading {}", file.display()))?;
    let name = name.unwrap_or_else(|| route_name(file));
    let out = Compiler::new(options).compile(&name, &source)?;
    print_diagnostics(file, &out.diagnostics);

    let document = out.plan.to_ir();
    match format {
        OutputFormat::Yaml => print!("{}", document.to_yaml_string()?),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&document.to_json())?),
    }
    Ok(if out.diagnostics.has_errors() { 1 } else { 0 })
}

fn load_document(file: &Path) -> Result<Node> {
    let text = std::fs::read_to_string(file).with_context(|| format!("reading {}", file.display()))?;
    let node = if file.extension().is_some_and(|e| e == "json") {
        dql::ir::from_json_str(&text)?
    } else {
        dql::ir::from_yaml(&text)?
    };
    Ok(node)
}

fn validate_file(file: &Path, dialect: SqlDialect) -> Result<i32> {
    let document = load_document(file)?;
    match dql::validate::validate_with(&document, dialect) {
        Ok(()) => {
            println!("{} {}", "✓".green(), file.display());
            Ok(0)
        }
        Err(report) => {
            println!("{} {}", "✗".red(), file.display());
            println!("{}", report);
            Ok(1)
        }
    }
}

fn diff_files(lhs: &Path, rhs: &Path) -> Result<i32> {
    let lhs = canonicalize(&load_document(lhs)?);
    let rhs = canonicalize(&load_document(rhs)?);
    let lines = diff(&lhs, &rhs);
    if lines.is_empty() {
        println!("{}", "no differences".green());
        return Ok(0);
    }
    for line in &lines {
        println!("{}", line);
    }
    Ok(1)
}

#[derive(Debug)]
enum CheckOutcome {
    Compiled { errors: usize },
    Matched,
    Differs(Vec<String>),
}

fn check_one(sql: &Path, options: CompileOptions) -> Result<CheckOutcome> {
    let source = std::fs::read_to_string(sql)?;
    let out = Compiler::new(options).compile(&route_name(sql), &source)?;
    let errors = out.diagnostics.iter().filter(|d| d.is_error()).count();
    print_diagnostics(sql, &out.diagnostics);

    let sibling = sql.with_extension("yaml");
    if !sibling.is_file() {
        return Ok(CheckOutcome::Compiled { errors });
    }
    let expected = canonicalize(&load_document(&sibling)?);
    let lines = diff(&canonicalize(&out.plan.to_ir()), &expected);
    Ok(if lines.is_empty() {
        CheckOutcome::Matched
    } else {
        CheckOutcome::Differs(lines)
    })
}

fn collect_sql(dir: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_sql(&path, out)?;
        } else if path.extension().is_some_and(|e| e == "sql") {
            out.push(path);
        }
    }
    Ok(())
}

async fn check_dir(dir: &Path, options: CompileOptions) -> Result<i32> {
    let mut files = Vec::new();
    collect_sql(dir, &mut files).with_context(|| format!("scanning {}", dir.display()))?;
    files.sort();
    info!(dir = %dir.display(), files = files.len(), "checking");

    let handles: Vec<_> = files
        .into_iter()
        .map(|file| {
            let options = options.clone();
            tokio::task::spawn_blocking(move || {
                let outcome = check_one(&file, options);
                (file, outcome)
            })
        })
        .collect();

    let (mut passed, mut failed) = (0usize, 0usize);
    for handle in handles {
        let (file, outcome) = handle.await?;
        match outcome {
            Ok(CheckOutcome::Compiled { errors: 0 }) | Ok(CheckOutcome::Matched) => {
                passed += 1;
                println!("{} {}", "✓".green(), file.display());
            }
            Ok(CheckOutcome::Compiled { errors }) => {
                failed += 1;
                println!("{} {} ({} errors)", "✗".red(), file.display(), errors);
            }
            Ok(CheckOutcome::Differs(lines)) => {
                failed += 1;
                println!("{} {}", "✗".red(), file.display());
                for line in lines {
                    println!("    {}", line.dimmed());
                }
            }
            Err(e) => {
                failed += 1;
                println!("{} {}: {:#}", "✗".red(), file.display(), e);
            }
        }
    }

    println!();
    println!("{} passed, {} failed", passed.to_string().green(), failed.to_string().red());
    Ok(if failed > 0 { 1 } else { 0 })
}
