//! # DQL: Shape Compiler
//!
//! > **Write the SQL. Get the shape.**
//!
//! DQL turns annotated, templated SQL into a view/relation plan plus
//! diagnostics, and renders that plan as a route document. Hand-written
//! route YAML can be validated, canonicalized and diffed against it.
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use dql::prelude::*;
//!
//! let out = Compiler::default().compile(
//!     "orders",
//!     "SELECT o.*, i.* FROM (SELECT * FROM ORDERS) o JOIN (SELECT * FROM ITEMS) i ON o.ID = i.ORDER_ID",
//! )?;
//! assert_eq!(out.plan.views.len(), 2);
//! let yaml = out.plan.to_ir().to_yaml_string()?;
//! ```
//!
//! ## Annotations
//!
//! | Call                         | Effect                          |
//! |------------------------------|---------------------------------|
//! | `cast(o.ID as 'int')`        | Column type, provenance checked |
//! | `tag(o.ID, 'json:"id"')`     | Column tag                      |
//! | `set_limit(o, 10)`           | Selector limit                  |
//! | `cardinality(i, 'one')`      | Relation cardinality            |
//! | `use_connector(o, 'dev')`    | View connector                  |

pub mod canonical;
pub mod compile;
pub mod config;
pub mod cursor;
pub mod declaration;
pub mod diagnostic;
pub mod error;
pub mod ir;
pub mod lexer;
pub mod provenance;
pub mod relation;
pub mod shape;
pub mod sql;
pub mod template;
pub mod validate;

pub mod prelude {
    pub use crate::canonical::{CanonicalDocument, canonicalize, diff};
    pub use crate::compile::{CompileOutput, Compiler};
    pub use crate::config::{CompileOptions, Config};
    pub use crate::diagnostic::{Diagnostic, Diagnostics, Severity};
    pub use crate::error::*;
    pub use crate::ir::Node;
    pub use crate::shape::{Cardinality, Plan, View, ViewMode};
    pub use crate::sql::SqlDialect;
    pub use crate::validate::validate;
}

/// Compile `source` with default options.
///
/// # Example
///
/// ```
/// let out = dql::compile("orders", "SELECT o.ID FROM ORDERS o").unwrap();
/// assert_eq!(out.plan.root().unwrap().table, "ORDERS");
/// ```
pub fn compile(name: &str, source: &str) -> error::CompileResult<compile::CompileOutput> {
    compile::Compiler::default().compile(name, source)
}
