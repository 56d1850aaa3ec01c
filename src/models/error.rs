//! Error types for the annotator.
//!
//! Failure classes:
//! - Input failures: corpus, prompt or config cannot be read (fatal for a stage)
//! - Persistence failures: checkpoint cannot be read or written (fatal for a stage)
//! - Per-document failures: classifier replies, retried locally (see [`ClassifyError`])

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for the annotator.
#[derive(Debug, Error)]
pub enum AnnotatorError {
    // ═══════════════════════════════════════════════════════════════════
    // INPUT: the run cannot start or a stage cannot load its inputs
    // ═══════════════════════════════════════════════════════════════════
    #[error("Configuration error: {0}")]
    Config(#[from] super::ConfigError),

    #[error("Failed to load corpus {path}: {reason}")]
    CorpusLoad { path: PathBuf, reason: String },

    #[error("Failed to load prompt definition {path}: {reason}")]
    PromptLoad { path: PathBuf, reason: String },

    // ═══════════════════════════════════════════════════════════════════
    // PERSISTENCE: checkpoint state on disk
    // ═══════════════════════════════════════════════════════════════════
    #[error("Failed to read checkpoint {path}: {reason}")]
    CheckpointRead { path: PathBuf, reason: String },

    #[error("Failed to write checkpoint {path}: {source}")]
    CheckpointWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ═══════════════════════════════════════════════════════════════════
    // INFRASTRUCTURE
    // ═══════════════════════════════════════════════════════════════════
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AnnotatorError {
    /// Create an IO error with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a corpus load error.
    pub fn corpus(path: impl Into<PathBuf>, reason: impl std::fmt::Display) -> Self {
        Self::CorpusLoad {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Create a checkpoint write error.
    pub fn checkpoint_write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::CheckpointWrite {
            path: path.into(),
            source,
        }
    }
}

/// Why a single classification call failed.
///
/// Both kinds are retried by the executor; the distinction drives logging
/// and lets callers report the cause of an exhausted document.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClassifyError {
    /// The reply did not parse into the annotation schema.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Network, timeout or service-side failure.
    #[error("Transient error: {0}")]
    Transient(String),
}

impl ClassifyError {
    /// Short name of the failure kind, used as a log field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidResponse(_) => "invalid_response",
            Self::Transient(_) => "transient",
        }
    }
}

/// Result type alias for the annotator.
pub type Result<T> = std::result::Result<T, AnnotatorError>;
