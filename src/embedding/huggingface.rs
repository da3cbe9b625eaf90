//! Hugging Face feature-extraction adapter.
//!
//! Sentence-transformer deployments answer with one pooled vector per input, while raw
//! transformer deployments answer with a token-by-dimension matrix per input. Token matrices are
//! reduced with [`mean_pool`], the component-wise arithmetic mean over tokens.

use super::{EmbeddingClient, EmbeddingClientError, check_vectors};
use crate::config::Config;
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

/// Client for the Hugging Face inference feature-extraction pipeline.
pub struct HuggingFaceEmbeddingClient {
    http: Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    dimension: usize,
    retry: RetryPolicy,
}

impl HuggingFaceEmbeddingClient {
    /// Build a client posting to `{base_url}/{model}`.
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        model: String,
        dimension: usize,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self, EmbeddingClientError> {
        let http = Client::builder()
            .user_agent("rusty-rag/embeddings")
            .timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            endpoint: format!("{}/{}", base_url.trim_end_matches('/'), model),
            api_key,
            model,
            dimension,
            retry,
        })
    }

    /// Build the client from the embedding section of the runtime configuration.
    pub fn from_config(config: &Config) -> Result<Self, EmbeddingClientError> {
        Self::new(
            &config.embedding_base_url,
            config.embedding_api_key.clone(),
            config.embedding_model.clone(),
            config.embedding_dimension,
            config.http_timeout,
            config.retry_policy(),
        )
    }

    async fn request_once(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        let mut request = self.http.post(&self.endpoint).json(&json!({
            "inputs": texts,
            "options": { "wait_for_model": true }
        }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingClientError::UnexpectedStatus { status, body });
        }

        let parsed: FeatureResponse = response.json().await.map_err(|error| {
            EmbeddingClientError::InvalidResponse(format!(
                "failed to decode feature-extraction response: {error}"
            ))
        })?;
        normalize(parsed, texts.len())
    }
}

#[async_trait]
impl EmbeddingClient for HuggingFaceEmbeddingClient {
    async fn generate_embeddings(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        tracing::debug!(model = %self.model, inputs = texts.len(), "Requesting feature extraction");
        let vectors = self
            .retry
            .run("feature-extraction", || self.request_once(&texts))
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

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FeatureResponse {
    Vector(Vec<f32>),
    Matrix(Vec<Vec<f32>>),
    Batch(Vec<Vec<Vec<f32>>>),
}

/// Reduce any of the supported response shapes to one vector per input.
///
/// - a flat vector is the pooled embedding of a single input;
/// - a matrix with one row per input is a batch of pooled embeddings;
/// - any other matrix for a single input is a token matrix and is mean-pooled;
/// - a batch of matrices holds one token matrix per input, each mean-pooled.
fn normalize(
    response: FeatureResponse,
    input_count: usize,
) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
    match response {
        FeatureResponse::Vector(vector) if input_count == 1 => Ok(vec![vector]),
        FeatureResponse::Matrix(rows) if rows.len() == input_count => Ok(rows),
        FeatureResponse::Matrix(tokens) if input_count == 1 => Ok(vec![mean_pool(&tokens)?]),
        FeatureResponse::Batch(matrices) => {
            matrices.iter().map(|tokens| mean_pool(tokens)).collect()
        }
        other => Err(EmbeddingClientError::InvalidResponse(format!(
            "response shape {} does not match {input_count} inputs",
            shape_name(&other)
        ))),
    }
}

fn shape_name(response: &FeatureResponse) -> &'static str {
    match response {
        FeatureResponse::Vector(_) => "vector",
        FeatureResponse::Matrix(_) => "matrix",
        FeatureResponse::Batch(_) => "batch",
    }
}

/// Component-wise mean over token vectors.
pub fn mean_pool(tokens: &[Vec<f32>]) -> Result<Vec<f32>, EmbeddingClientError> {
    let first = tokens
        .first()
        .ok_or_else(|| EmbeddingClientError::InvalidResponse("empty token matrix".into()))?;
    let width = first.len();
    let mut sums = vec![0.0_f64; width];
    for token in tokens {
        if token.len() != width {
            return Err(EmbeddingClientError::InvalidResponse(format!(
                "ragged token matrix: rows of {width} and {} values",
                token.len()
            )));
        }
        for (sum, value) in sums.iter_mut().zip(token) {
            *sum += f64::from(*value);
        }
    }
    let count = tokens.len() as f64;
    Ok(sums.into_iter().map(|sum| (sum / count) as f32).collect())
}
