//! Error types for slabmap.

use std::path::PathBuf;

use crate::generate::GenerationError;

/// Errors that can occur while chunking or processing a document.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A precondition for talking to the generation service is not met.
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// The input document could not be read.
    #[error("failed to read file {}: {source}", path.display())]
    DocumentRead {
        /// The path that was attempted.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The token counter could not be initialized.
    #[error("token estimation unavailable: {0}")]
    EstimationUnavailable(String),

    /// Splitting the document into chunks failed.
    #[error("failed to split into chunks: {0}")]
    Chunking(#[source] Box<Error>),

    /// Invalid chunk budget (must be > 0).
    #[error("invalid chunk budget: {0} (must be > 0)")]
    InvalidBudget(usize),

    /// Generation failed for one chunk.
    #[error("failed to generate completion for chunk {index}: {source}")]
    Generation {
        /// One-based index of the failing chunk.
        index: usize,
        /// The underlying generation failure.
        #[source]
        source: GenerationError,
    },

    /// A chunk task or the confirmation gate panicked or was aborted.
    #[error("background task failed: {source}")]
    Task {
        /// The join error reported by the runtime.
        #[source]
        source: tokio::task::JoinError,
    },

    /// Reading or writing the chunk cache failed.
    #[error("cache I/O failed at {}: {source}", path.display())]
    Cache {
        /// The cache location involved.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The combined output could not be written.
    #[error("failed to write combined results to {}: {source}", path.display())]
    MergeWrite {
        /// The output path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Result type for slabmap operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;
