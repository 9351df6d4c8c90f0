//! Join relations: raw FROM/JOIN scanning and AST-based extraction.

mod extract;
pub mod scan;

pub use extract::extract;
pub use scan::{RawJoin, RawQuery, RawTarget};
