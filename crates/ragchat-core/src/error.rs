//! Error taxonomy shared by every ragchat component.
//!
//! Errors are grouped by how callers are expected to react:
//!
//! | Variant | Reaction |
//! |---------|----------|
//! | [`Configuration`](RagError::Configuration) | fatal at startup |
//! | [`DimensionMismatch`](RagError::DimensionMismatch), [`IndexMismatch`](RagError::IndexMismatch), [`CorruptIndex`](RagError::CorruptIndex) | refuse to serve; rebuild the index |
//! | [`QuotaExceeded`](RagError::QuotaExceeded), [`TransientNetwork`](RagError::TransientNetwork) | retry with backoff |
//! | [`UnsupportedFormat`](RagError::UnsupportedFormat), [`Extraction`](RagError::Extraction) | skip the document and log |
//! | [`Generation`](RagError::Generation) | surface as a failed answer |

use std::fmt;

use thiserror::Error;

/// Pipeline stage a retrieval failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Embedding,
    Search,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Embedding => write!(f, "embedding"),
            Stage::Search => write!(f, "search"),
        }
    }
}

/// Sub-kind of a generation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationFailure {
    Quota,
    Auth,
    Network,
    Other,
}

impl fmt::Display for GenerationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GenerationFailure::Quota => write!(f, "quota exceeded"),
            GenerationFailure::Auth => write!(f, "authentication failed"),
            GenerationFailure::Network => write!(f, "network error"),
            GenerationFailure::Other => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Error)]
pub enum RagError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("dimension mismatch: index expects {expected} dims, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("transient network error: {0}")]
    TransientNetwork(String),

    #[error("input rejected by embedding provider: {0}")]
    InvalidInput(String),

    #[error("unsupported document format: {0}")]
    UnsupportedFormat(String),

    #[error("extraction failed: {0}")]
    Extraction(String),

    #[error("generation {kind}: {message}")]
    Generation {
        kind: GenerationFailure,
        message: String,
    },

    #[error("retrieval failed during {stage}: {source}")]
    Retrieval {
        stage: Stage,
        #[source]
        source: Box<RagError>,
    },

    #[error("similarity index is not ready")]
    IndexNotReady,

    #[error("index does not match the current configuration: {0}")]
    IndexMismatch(String),

    #[error("index is corrupt: {0}")]
    CorruptIndex(String),

    #[error("{provider} provider error: {message}")]
    Provider { provider: String, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

impl RagError {
    pub fn generation(kind: GenerationFailure, message: impl Into<String>) -> Self {
        RagError::Generation {
            kind,
            message: message.into(),
        }
    }

    /// Wrap an error with the retrieval stage it came from.
    pub fn at_stage(self, stage: Stage) -> Self {
        RagError::Retrieval {
            stage,
            source: Box::new(self),
        }
    }

    /// Whether a later attempt may succeed without any change on our side.
    pub fn is_retryable(&self) -> bool {
        match self {
            RagError::QuotaExceeded(_) | RagError::TransientNetwork(_) => true,
            RagError::Generation { kind, .. } => {
                matches!(kind, GenerationFailure::Quota | GenerationFailure::Network)
            }
            RagError::Retrieval { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    /// Whether the error means the index and provider disagree; such errors
    /// must stop the service rather than degrade results.
    pub fn is_index_inconsistency(&self) -> bool {
        match self {
            RagError::DimensionMismatch { .. }
            | RagError::IndexMismatch(_)
            | RagError::CorruptIndex(_) => true,
            RagError::Retrieval { source, .. } => source.is_index_inconsistency(),
            _ => false,
        }
    }

    /// Innermost error, looking through retrieval stage tags.
    pub fn root(&self) -> &RagError {
        match self {
            RagError::Retrieval { source, .. } => source.root(),
            other => other,
        }
    }
}

pub type Result<T, E = RagError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_through_stage() {
        let err = RagError::TransientNetwork("reset".into()).at_stage(Stage::Embedding);
        assert!(err.is_retryable());
        assert!(matches!(err.root(), RagError::TransientNetwork(_)));
    }

    #[test]
    fn test_not_retryable() {
        assert!(!RagError::InvalidInput("too long".into()).is_retryable());
        assert!(!RagError::generation(GenerationFailure::Auth, "bad key").is_retryable());
        assert!(RagError::generation(GenerationFailure::Quota, "429").is_retryable());
    }

    #[test]
    fn test_index_inconsistency() {
        let err = RagError::DimensionMismatch {
            expected: 384,
            actual: 768,
        }
        .at_stage(Stage::Search);
        assert!(err.is_index_inconsistency());
        assert!(!RagError::IndexNotReady.is_index_inconsistency());
    }

    #[test]
    fn test_display_includes_stage() {
        let err = RagError::QuotaExceeded("daily limit".into()).at_stage(Stage::Embedding);
        assert_eq!(
            err.to_string(),
            "retrieval failed during embedding: quota exceeded: daily limit"
        );
    }
}
