use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid {what}: {reason}")]
    Validation { what: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Store failure during {phase} ({context}): {source}")]
    Store {
        phase: &'static str,
        context: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn validation(what: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Validation {
            what: what.into(),
            reason: reason.into(),
        }
    }

    pub fn store(phase: &'static str, context: impl Into<String>, source: rusqlite::Error) -> Self {
        Error::Store {
            phase,
            context: context.into(),
            source,
        }
    }
}

/// Failure to derive a single attribute for a single file. Never aborts a batch.
#[derive(Error, Debug)]
pub enum CalculationError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not decode image {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("Embedding unavailable for {path}: {source}")]
    EmbeddingUnavailable {
        path: PathBuf,
        #[source]
        source: crate::embedding::EmbeddingError,
    },
}

impl CalculationError {
    /// Whether the same file content would fail again. Permanent failures are remembered
    /// until the file changes; I/O trouble and an unavailable model are retried next run.
    pub fn is_permanent(&self) -> bool {
        use crate::embedding::EmbeddingError;
        match self {
            CalculationError::Io { .. } => false,
            CalculationError::Image { source, .. } => {
                !matches!(source, image::ImageError::IoError(_))
            }
            CalculationError::EmbeddingUnavailable { source, .. } => match source {
                EmbeddingError::Unavailable(_) => false,
                EmbeddingError::Decode(e) => !matches!(e, image::ImageError::IoError(_)),
                EmbeddingError::Dimension { .. } => true,
            },
        }
    }
}

/// A path that could not be stat'ed or read during a sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InaccessiblePath {
    pub path: PathBuf,
    pub reason: String,
}
