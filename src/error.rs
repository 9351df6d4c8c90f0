//! Error types for DQL compilation.

use thiserror::Error;

pub use crate::ir::IrError;
pub use crate::provenance::ProvenanceError;
pub use crate::validate::ValidationReport;

/// Errors that abort a compilation. Everything else is a diagnostic.
#[derive(Debug, Error)]
pub enum CompileError {
    /// Type provenance rejected by policy or trusted roots.
    #[error("Provenance error: {0}")]
    Provenance(#[from] ProvenanceError),

    /// Aggregated relation validation failure.
    #[error("{0}")]
    Validation(#[from] ValidationReport),

    /// Route document could not be loaded or rendered.
    #[error("IR error: {0}")]
    Ir(#[from] IrError),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CompileError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}

/// Result type alias for DQL operations.
pub type CompileResult<T> = Result<T, CompileError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CompileError::config("unknown dialect");
        assert_eq!(err.to_string(), "Configuration error: unknown dialect");

        let err = CompileError::from(ProvenanceError::PolicyFailed {
            expression: "Order".into(),
            kind: "resource_type".into(),
            origin: "/x/order.go".into(),
            reason: "outside".into(),
        });
        assert!(err.to_string().contains("provenance policy failed"));
    }
}
