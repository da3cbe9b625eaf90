//! Embedding client abstraction and provider adapters.
//!
//! Every client returns exactly one vector per input, each with the dimension configured for the
//! running process. A vector of any other length is a configuration error and is never padded or
//! truncated. Hosted providers retry transient failures through the shared
//! [`RetryPolicy`](crate::retry::RetryPolicy).

mod hash;
mod huggingface;
mod openai;

pub use hash::HashEmbeddingClient;
pub use huggingface::{HuggingFaceEmbeddingClient, mean_pool};
pub use openai::OpenAiEmbeddingClient;

use crate::config::{Config, EmbeddingProvider};
use crate::retry::{Transient, is_transient_status};
use async_trait::async_trait;
use reqwest::StatusCode;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised by embedding providers.
#[derive(Debug, Error)]
pub enum EmbeddingClientError {
    /// Provider was unable to produce embeddings for the supplied input.
    #[error("Failed to generate embeddings: {0}")]
    GenerationFailed(String),
    /// HTTP layer failed before receiving a response.
    #[error("Embedding request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// Provider responded with a non-success status code.
    #[error("Embedding provider returned {status}: {body}")]
    UnexpectedStatus {
        /// HTTP status returned by the provider.
        status: StatusCode,
        /// Body payload associated with the failing response.
        body: String,
    },
    /// Provider response could not be interpreted.
    #[error("Malformed embedding response: {0}")]
    InvalidResponse(String),
    /// Provider produced vectors whose length differs from the configured dimension.
    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimension configured for this process.
        expected: usize,
        /// Dimension returned by the provider.
        actual: usize,
    },
}

impl EmbeddingClientError {
    /// Whether the error reflects a broken deployment rather than a failed call.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::DimensionMismatch { .. })
    }
}

impl Transient for EmbeddingClientError {
    fn is_transient(&self) -> bool {
        match self {
            Self::Http(error) => error.is_transient(),
            Self::UnexpectedStatus { status, .. } => is_transient_status(*status),
            _ => false,
        }
    }
}

/// Interface implemented by embedding backends.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Produce an embedding vector for each supplied text, in input order.
    async fn generate_embeddings(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError>;

    /// Length of every vector this client produces.
    fn dimension(&self) -> usize;

    /// Model identifier reported in logs.
    fn model(&self) -> &str;
}

/// Embed a single text, such as a question.
pub async fn embed_one(
    client: &dyn EmbeddingClient,
    text: &str,
) -> Result<Vec<f32>, EmbeddingClientError> {
    client
        .generate_embeddings(vec![text.to_string()])
        .await?
        .pop()
        .ok_or_else(|| EmbeddingClientError::InvalidResponse("no vector returned".into()))
}

/// Verify the provider returned one vector of the expected dimension per input.
pub(crate) fn check_vectors(
    expected_dimension: usize,
    input_count: usize,
    vectors: &[Vec<f32>],
) -> Result<(), EmbeddingClientError> {
    if vectors.len() != input_count {
        return Err(EmbeddingClientError::InvalidResponse(format!(
            "received {} embeddings for {input_count} inputs",
            vectors.len()
        )));
    }
    if let Some(vector) = vectors.iter().find(|v| v.len() != expected_dimension) {
        return Err(EmbeddingClientError::DimensionMismatch {
            expected: expected_dimension,
            actual: vector.len(),
        });
    }
    Ok(())
}

/// Build an embedding client suitable for the current configuration.
pub fn get_embedding_client(
    config: &Config,
) -> Result<Arc<dyn EmbeddingClient>, EmbeddingClientError> {
    tracing::debug!(
        provider = ?config.embedding_provider,
        model = %config.embedding_model,
        dimension = config.embedding_dimension,
        has_api_key = config.embedding_api_key.is_some(),
        "Building embedding client"
    );
    let client: Arc<dyn EmbeddingClient> = match config.embedding_provider {
        EmbeddingProvider::OpenAI => Arc::new(OpenAiEmbeddingClient::from_config(config)?),
        EmbeddingProvider::HuggingFace => {
            Arc::new(HuggingFaceEmbeddingClient::from_config(config)?)
        }
        EmbeddingProvider::Hash => Arc::new(HashEmbeddingClient::new(config.embedding_dimension)),
    };
    Ok(client)
}
