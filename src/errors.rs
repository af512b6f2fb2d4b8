//! Structured error types for the engine
//!
//! Backend-level failures are translated into this taxonomy at the contract
//! boundary so callers never see backend-specific error types.

use std::fmt;

/// Engine error taxonomy
#[derive(Debug)]
pub enum EngineError {
    /// Vector length does not match collection dimensionality.
    /// Rejected, never coerced.
    DimensionMismatch { expected: usize, actual: usize },

    /// A configured backend could not be initialized. The collection layer
    /// treats this as a signal to fall back to the portable backend.
    BackendUnavailable { kind: String, reason: String },

    /// Delete/update of an id that does not exist.
    NotFound(String),

    /// Skill prerequisite graph would contain a cycle.
    CyclicDependency(String),

    /// Persisted index state failed to load. The owning backend rebuilds the
    /// index from the vector table instead of refusing to start.
    IndexCorruption(String),

    /// Cooperative timeout/cancellation tripped during a search.
    /// A normal terminal state, not a failure: callers decide whether to
    /// retry with a larger budget.
    SearchCancelled,

    /// Metadata value rejected by the collection's declared schema.
    InvalidMetadata { field: String, reason: String },

    /// Generic wrapper for internal errors (storage, serialization).
    Internal(anyhow::Error),
}

impl EngineError {
    /// Machine-readable error code
    pub fn code(&self) -> &'static str {
        match self {
            Self::DimensionMismatch { .. } => "DIMENSION_MISMATCH",
            Self::BackendUnavailable { .. } => "BACKEND_UNAVAILABLE",
            Self::NotFound(_) => "NOT_FOUND",
            Self::CyclicDependency(_) => "CYCLIC_DEPENDENCY",
            Self::IndexCorruption(_) => "INDEX_CORRUPTION",
            Self::SearchCancelled => "SEARCH_CANCELLED",
            Self::InvalidMetadata { .. } => "INVALID_METADATA",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Detailed error message
    pub fn message(&self) -> String {
        match self {
            Self::DimensionMismatch { expected, actual } => {
                format!("Vector dimension mismatch: expected {expected}, got {actual}")
            }
            Self::BackendUnavailable { kind, reason } => {
                format!("Backend '{kind}' unavailable: {reason}")
            }
            Self::NotFound(id) => format!("Record not found: {id}"),
            Self::CyclicDependency(name) => {
                format!("Skill '{name}' would introduce a prerequisite cycle")
            }
            Self::IndexCorruption(detail) => format!("Persisted index corrupt: {detail}"),
            Self::SearchCancelled => "Search cancelled before completion".to_string(),
            Self::InvalidMetadata { field, reason } => {
                format!("Invalid metadata for field '{field}': {reason}")
            }
            Self::Internal(err) => format!("Internal error: {err}"),
        }
    }

    /// True when the error is the cooperative-cancellation terminal state
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::SearchCancelled)
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for EngineError {}

impl From<anyhow::Error> for EngineError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err)
    }
}

/// Type alias for Results using EngineError
pub type Result<T> = std::result::Result<T, EngineError>;
