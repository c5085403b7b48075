//! Error taxonomy for the classification engine.
//!
//! Artifact faults ([`EngineError::ArtifactMissing`], [`EngineError::ArtifactInvalid`])
//! are recovered locally by rebuilding. User-input faults surface directly. Mapping
//! faults ([`EngineError::IndexOutOfRange`]) are defects and are never absorbed.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// No persisted artifact under the given key.
    #[error("no persisted artifact: {0}")]
    ArtifactMissing(String),

    /// A persisted artifact disagrees with the current corpus or curated label set.
    #[error("artifact invalid: {0}")]
    ArtifactInvalid(String),

    /// The query text is empty or whitespace-only.
    #[error("query text is empty or whitespace-only")]
    EmptyQuery,

    /// The corpus has no rows the classifier could be fit on.
    #[error("classifier cannot be fit: {0}")]
    ClassifierUnfit(String),

    /// A positional index fell outside the array it addresses.
    #[error("{what} index {index} out of range (len {len})")]
    IndexOutOfRange {
        what: &'static str,
        index: usize,
        len: usize,
    },

    /// The embedding model failed to produce a vector.
    #[error("embedding failed: {0}")]
    Embedding(#[source] anyhow::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl EngineError {
    /// True for faults caused by the caller's input rather than the engine.
    pub fn is_user_error(&self) -> bool {
        matches!(self, Self::EmptyQuery)
    }
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
