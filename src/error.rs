//! Error taxonomy for the analysis engine.
//!
//! Only genuine failures live here. An unresolved call site or an
//! unclassified CRUD call is a normal value in the model, not an error.

use thiserror::Error;

use crate::model::AnalysisLevel;

/// Errors surfaced by ingestion, indexing, querying and configuration.
///
/// The type is `Clone` so a single failed build can be reported to every
/// caller that joined it while it was in flight.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AnalysisError {
    /// A malformed external artifact, a grammar-parse error or an
    /// unsupported schema. Fatal to the current build attempt.
    #[error("ingestion failed for {origin}: {reason}")]
    IngestionFailure { origin: String, reason: String },

    /// The chosen adapter cannot produce the requested analysis level.
    #[error("adapter '{adapter}' supports up to {supported}, but {requested} was requested")]
    UnsupportedLevel {
        adapter: String,
        requested: AnalysisLevel,
        supported: AnalysisLevel,
    },

    /// Two declarations collided under the qualified-name uniqueness rule.
    #[error("duplicate qualified name '{name}' (declared in {first} and {second})")]
    DuplicateQualifiedName {
        name: String,
        first: String,
        second: String,
    },

    /// A query named an entity that does not exist in the generation.
    #[error("not found: {name}")]
    NotFound { name: String },

    /// Invalid engine configuration.
    #[error("invalid configuration: {reason}")]
    Config { reason: String },

    /// Reading sources from disk failed.
    #[error("i/o error on {path}: {reason}")]
    Io { path: String, reason: String },
}

impl AnalysisError {
    /// Convenience constructor for ingestion failures.
    pub fn ingestion(origin: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        AnalysisError::IngestionFailure {
            origin: origin.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether this error was raised while ingesting external artifacts.
    pub fn is_ingestion_failure(&self) -> bool {
        matches!(self, AnalysisError::IngestionFailure { .. })
    }
}

/// Result alias used across the crate's public API.
pub type Result<T> = std::result::Result<T, AnalysisError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_level_message() {
        let err = AnalysisError::UnsupportedLevel {
            adapter: "c-syntax".to_string(),
            requested: AnalysisLevel::CallGraph,
            supported: AnalysisLevel::SymbolTable,
        };
        assert_eq!(
            err.to_string(),
            "adapter 'c-syntax' supports up to symbol-table, but call-graph was requested"
        );
    }

    #[test]
    fn test_ingestion_helper() {
        let err = AnalysisError::ingestion("dump.json", "unknown schema_version '9'");
        assert!(err.is_ingestion_failure());
        assert!(err.to_string().contains("dump.json"));
    }
}
