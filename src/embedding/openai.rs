use super::{EmbeddingClient, EmbeddingClientError, check_vectors};
use crate::config::Config;
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Client for OpenAI-compatible `POST /embeddings` endpoints (OpenAI, OpenRouter).
pub struct OpenAiEmbeddingClient {
    http: Client,
    endpoint: String,
    model: String,
    dimension: usize,
    request_dimensions: bool,
    retry: RetryPolicy,
}

impl OpenAiEmbeddingClient {
    /// Build a client against `base_url` (for example `https://openrouter.ai/api/v1`).
    pub fn new(
        base_url: &str,
        api_key: &str,
        model: String,
        dimension: usize,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self, EmbeddingClientError> {
        let mut headers = HeaderMap::new();
        let auth = HeaderValue::from_str(&format!("Bearer {}", api_key.trim())).map_err(|_| {
            EmbeddingClientError::GenerationFailed("invalid embedding API key".into())
        })?;
        headers.insert(AUTHORIZATION, auth);
        let http = Client::builder()
            .user_agent("rusty-rag/embeddings")
            .default_headers(headers)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            endpoint: format!("{}/embeddings", base_url.trim_end_matches('/')),
            model,
            dimension,
            request_dimensions: false,
            retry,
        })
    }

    /// Ask the provider for vectors of the configured dimension (models that support
    /// shortening, such as `text-embedding-3-*`).
    pub fn with_requested_dimensions(mut self, enabled: bool) -> Self {
        self.request_dimensions = enabled;
        self
    }

    /// Build the client from the embedding section of the runtime configuration.
    pub fn from_config(config: &Config) -> Result<Self, EmbeddingClientError> {
        let api_key = config.embedding_api_key.as_deref().ok_or_else(|| {
            EmbeddingClientError::GenerationFailed("EMBEDDING_API_KEY is not set".into())
        })?;
        Self::new(
            &config.embedding_base_url,
            api_key,
            config.embedding_model.clone(),
            config.embedding_dimension,
            config.http_timeout,
            config.retry_policy(),
        )
        .map(|client| client.with_requested_dimensions(config.embedding_request_dimensions))
    }

    async fn request_once(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        let body = EmbeddingRequest {
            model: &self.model,
            input: texts,
            dimensions: self.request_dimensions.then_some(self.dimension),
        };
        let response = self.http.post(&self.endpoint).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingClientError::UnexpectedStatus { status, body });
        }

        let mut parsed: EmbeddingResponse = response.json().await.map_err(|error| {
            EmbeddingClientError::InvalidResponse(format!(
                "failed to decode embeddings response: {error}"
            ))
        })?;
        parsed.data.sort_by_key(|entry| entry.index);
        let vectors = parsed.data.into_iter().map(|entry| entry.embedding);
        Ok(vectors.collect())
    }
}

#[async_trait]
impl EmbeddingClient for OpenAiEmbeddingClient {
    async fn generate_embeddings(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        tracing::debug!(model = %self.model, inputs = texts.len(), "Requesting embeddings");
        let vectors = self
            .retry
            .run("embeddings", || self.request_once(&texts))
            .await?;
        check_vectors(self.dimension, texts.len(), &vectors)?;
        Ok(vectors)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}
