//! HTTP client wrapper for interacting with Qdrant.

use crate::config::Config;
use crate::qdrant::payload::{build_point, current_timestamp_rfc3339, document_filter, read_payload};
use crate::qdrant::types::{
    CollectionInfo, CollectionInfoResponse, QdrantError, QueryResponse, QueryResponseResult,
    VectorsConfig,
};
use crate::retry::RetryPolicy;
use crate::vector_index::{IndexEntry, IndexError, RetrievedChunk, VectorIndex, check_dimension};
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde_json::{Value, json};
use std::time::Duration;

const DISTANCE: &str = "Cosine";

/// Connection settings for a Qdrant collection.
#[derive(Debug, Clone)]
pub struct QdrantSettings {
    /// Base URL of the Qdrant REST API.
    pub url: String,
    /// Collection holding chunk vectors.
    pub collection: String,
    /// Optional API key sent as the `api-key` header.
    pub api_key: Option<String>,
    /// Vector size the collection must have.
    pub dimension: usize,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Retry policy applied to every request.
    pub retry: RetryPolicy,
}

impl QdrantSettings {
    /// Derive Qdrant settings from the runtime configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            url: config.qdrant_url.clone(),
            collection: config.qdrant_collection_name.clone(),
            api_key: config.qdrant_api_key.clone(),
            dimension: config.embedding_dimension,
            timeout: config.http_timeout,
            retry: config.retry_policy(),
        }
    }
}

/// Lightweight HTTP client for a single Qdrant collection.
pub struct QdrantIndex {
    pub(crate) client: Client,
    pub(crate) base_url: String,
    pub(crate) api_key: Option<String>,
    pub(crate) collection: String,
    pub(crate) dimension: usize,
    pub(crate) retry: RetryPolicy,
}

impl QdrantIndex {
    /// Construct a new client; no request is sent until [`VectorIndex::ensure_index`].
    pub fn new(settings: QdrantSettings) -> Result<Self, QdrantError> {
        let client = Client::builder()
            .user_agent("rusty-rag/0.1")
            .timeout(settings.timeout)
            .build()?;

        let base_url = normalize_base_url(&settings.url).map_err(QdrantError::InvalidUrl)?;
        tracing::debug!(
            url = %base_url,
            collection = %settings.collection,
            has_api_key = %settings
                .api_key
                .as_deref()
                .map(|value| !value.is_empty())
                .unwrap_or(false),
            "Initialized Qdrant HTTP client"
        );

        Ok(Self {
            client,
            base_url,
            api_key: settings.api_key,
            collection: settings.collection,
            dimension: settings.dimension,
            retry: settings.retry,
        })
    }

    /// Fetch the collection description, or `None` when it does not exist.
    async fn collection_info(&self) -> Result<Option<CollectionInfo>, QdrantError> {
        let path = format!("collections/{}", self.collection);
        self.retry
            .run("qdrant.collection_info", || async {
                let response = self.request(Method::GET, &path).send().await?;
                match response.status() {
                    StatusCode::NOT_FOUND => Ok(None),
                    status if status.is_success() => {
                        let info: CollectionInfoResponse = response.json().await?;
                        Ok(Some(info.result))
                    }
                    status => Err(unexpected(status, response).await),
                }
            })
            .await
    }

    async fn create_collection(&self) -> Result<(), QdrantError> {
        let path = format!("collections/{}", self.collection);
        let body = json!({
            "vectors": {
                "size": self.dimension,
                "distance": DISTANCE
            }
        });

        self.retry
            .run("qdrant.create_collection", || async {
                let response = self.request(Method::PUT, &path).json(&body).send().await?;
                match response.status() {
                    status if status.is_success() => {
                        tracing::info!(
                            collection = %self.collection,
                            vector_size = self.dimension,
                            "Collection created"
                        );
                        Ok(())
                    }
                    // Another replica created it first; validated by the caller.
                    StatusCode::CONFLICT => Ok(()),
                    status => Err(unexpected(status, response).await),
                }
            })
            .await
    }

    /// Ensure the keyword index used to scope queries to one document.
    ///
    /// Best-effort: filtered queries work without the index, so a failure that survives the
    /// retry policy is logged and swallowed.
    async fn ensure_payload_index(&self) {
        let path = format!("collections/{}/index", self.collection);
        let body = json!({ "field_name": "document_id", "field_schema": "keyword" });
        let outcome: Result<(), QdrantError> = self
            .retry
            .run("qdrant.payload_index", || async {
                let response = self.request(Method::PUT, &path).json(&body).send().await?;
                match response.status() {
                    status if status.is_success() => Ok(()),
                    StatusCode::CONFLICT => Ok(()),
                    status => Err(unexpected(status, response).await),
                }
            })
            .await;

        match outcome {
            Ok(()) => tracing::debug!(collection = %self.collection, "Payload index ensured"),
            Err(error) => tracing::warn!(
                collection = %self.collection,
                error = %error,
                "Failed to ensure payload index"
            ),
        }
    }

    fn validate(&self, info: &CollectionInfo) -> Result<(), IndexError> {
        let params = match &info.config.params.vectors {
            VectorsConfig::Single(params) => params,
            VectorsConfig::Named(named) => {
                let mut names: Vec<&str> = named.keys().map(String::as_str).collect();
                names.sort_unstable();
                return Err(IndexError::IncompatibleCollection(format!(
                    "collection {} uses named vectors ({}), expected a single unnamed vector",
                    self.collection,
                    names.join(", ")
                )));
            }
        };
        if params.size != self.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                actual: params.size,
            });
        }
        if !params.distance.eq_ignore_ascii_case(DISTANCE) {
            return Err(IndexError::IncompatibleCollection(format!(
                "collection {} uses {} distance, expected {DISTANCE}",
                self.collection, params.distance
            )));
        }
        Ok(())
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format_endpoint(&self.base_url, path);
        let mut req = self.client.request(method, url);
        if let Some(api_key) = &self.api_key
            && !api_key.is_empty()
        {
            req = req.header("api-key", api_key);
        }
        req
    }
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    async fn ensure_index(&self) -> Result<(), IndexError> {
        let info = match self.collection_info().await? {
            Some(info) => info,
            None => {
                tracing::debug!(
                    collection = %self.collection,
                    vector_size = self.dimension,
                    "Creating collection"
                );
                self.create_collection().await?;
                // Creation is asynchronous on the server; poll until the collection is usable.
                self.retry
                    .run("qdrant.await_collection", || async {
                        match self.collection_info().await? {
                            Some(info) if is_usable(&info) => Ok(info),
                            Some(info) => Err(IndexError::NotReady(format!(
                                "collection {} reported status {}",
                                self.collection,
                                info.status.as_deref().unwrap_or("unknown")
                            ))),
                            None => Err(IndexError::NotReady(format!(
                                "collection {} not visible after creation",
                                self.collection
                            ))),
                        }
                    })
                    .await?
            }
        };

        self.validate(&info)?;
        self.ensure_payload_index().await;
        tracing::debug!(collection = %self.collection, "Collection ready");
        Ok(())
    }

    async fn upsert(&self, entries: Vec<IndexEntry>) -> Result<usize, IndexError> {
        if entries.is_empty() {
            return Ok(0);
        }
        for entry in &entries {
            check_dimension(self.dimension, &entry.vector)?;
        }

        let now = current_timestamp_rfc3339();
        let points: Vec<Value> = entries
            .iter()
            .map(|entry| build_point(entry, &now))
            .collect();
        let point_count = points.len();
        let body = json!({ "points": points });
        let path = format!("collections/{}/points", self.collection);

        self.retry
            .run("qdrant.upsert", || async {
                let response = self
                    .request(Method::PUT, &path)
                    .query(&[("wait", true)])
                    .json(&body)
                    .send()
                    .await?;
                if response.status().is_success() {
                    Ok(())
                } else {
                    Err(unexpected(response.status(), response).await)
                }
            })
            .await?;

        tracing::debug!(collection = %self.collection, points = point_count, "Points upserted");
        Ok(point_count)
    }

    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        document_id: Option<&str>,
    ) -> Result<Vec<RetrievedChunk>, IndexError> {
        check_dimension(self.dimension, vector)?;

        let mut body = json!({
            "query": vector,
            "limit": k,
            "with_payload": true,
        });
        if let (Some(id), Some(object)) = (document_id, body.as_object_mut()) {
            object.insert("filter".into(), document_filter(id));
        }
        let path = format!("collections/{}/points/query", self.collection);

        let payload: QueryResponse = self
            .retry
            .run("qdrant.query", || async {
                let response = self.request(Method::POST, &path).json(&body).send().await?;
                if !response.status().is_success() {
                    return Err(unexpected(response.status(), response).await);
                }
                Ok(response.json().await?)
            })
            .await?;

        let points = match payload.result {
            QueryResponseResult::Points(points) => points,
            QueryResponseResult::Object { points } => points,
        };

        let mut hits: Vec<(u64, RetrievedChunk)> = points
            .into_iter()
            .filter_map(|point| {
                let payload = point.payload?;
                let (text, chunk_id, ordinal) = read_payload(&payload)?;
                let id = if chunk_id.is_empty() {
                    stringify_point_id(point.id)
                } else {
                    chunk_id
                };
                Some((
                    ordinal,
                    RetrievedChunk {
                        id,
                        score: point.score,
                        text,
                    },
                ))
            })
            .collect();
        hits.sort_by(|a, b| b.1.score.total_cmp(&a.1.score).then(a.0.cmp(&b.0)));

        Ok(hits.into_iter().map(|(_, hit)| hit).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Green and yellow collections accept writes and queries; red or unreported ones do not.
fn is_usable(info: &CollectionInfo) -> bool {
    matches!(info.status.as_deref(), Some("green" | "yellow"))
}

async fn unexpected(status: StatusCode, response: reqwest::Response) -> QdrantError {
    let body = response.text().await.unwrap_or_default();
    let error = QdrantError::UnexpectedStatus { status, body };
    tracing::error!(error = %error, "Qdrant request failed");
    error
}

fn normalize_base_url(url: &str) -> Result<String, String> {
    let mut parsed = reqwest::Url::parse(url).map_err(|err| err.to_string())?;
    let path = parsed.path().trim_end_matches('/').to_string();
    parsed.set_path(&path);
    Ok(parsed.to_string())
}

fn format_endpoint(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    format!("{base}/{path}")
}

fn stringify_point_id(id: Value) -> String {
    match id {
        Value::String(text) => text,
        Value::Number(number) => number.to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
