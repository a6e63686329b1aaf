//! The generation seam.
//!
//! The pipeline only needs "send an instruction and a payload, get text back,
//! or fail". Retries, rate limits and transport live behind this trait.

use async_trait::async_trait;

use crate::Model;

/// One generation call: a system instruction plus a user payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    /// Model to run.
    pub model: Model,
    /// Instruction applied to the payload.
    pub system: String,
    /// The chunk text.
    pub user: String,
}

/// Failure of a single generation call.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    /// The request could not be sent or its response could not be read.
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The service answered with a non-success status.
    #[error("API error ({status}): {body}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Response body, as returned.
        body: String,
    },

    /// The response could not be decoded.
    #[error("failed to parse response: {0}")]
    Decode(#[from] serde_json::Error),

    /// The response carried no text.
    #[error("no content in response")]
    EmptyResponse,

    /// Any other backend failure.
    #[error("{0}")]
    Backend(String),
}

/// A text-generation backend.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Run one request and return the generated text.
    ///
    /// # Errors
    ///
    /// Returns a [`GenerationError`] if the backend fails or returns no text.
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError>;
}
