use crate::retry::RetryPolicy;
use std::env;
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";
const DEFAULT_HUGGINGFACE_BASE_URL: &str =
    "https://api-inference.huggingface.co/pipeline/feature-extraction";

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable was not provided.
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

/// Runtime configuration for the Rusty RAG server.
#[derive(Debug, Clone)]
pub struct Config {
    /// Optional override for the HTTP server port.
    pub server_port: Option<u16>,
    /// Shared secret expected in the inbound `Authorization: Bearer` header.
    pub api_bearer_token: Option<String>,
    /// Backend that stores chunk vectors.
    pub vector_backend: VectorBackend,
    /// Base URL of the Qdrant instance that stores embeddings.
    pub qdrant_url: String,
    /// Name of the Qdrant collection used for chunk storage.
    pub qdrant_collection_name: String,
    /// Optional API key required to access Qdrant.
    pub qdrant_api_key: Option<String>,
    /// Embedding provider used to generate vector representations.
    pub embedding_provider: EmbeddingProvider,
    /// Embedding model identifier passed to the provider.
    pub embedding_model: String,
    /// Dimensionality of the produced vectors.
    pub embedding_dimension: usize,
    /// Base URL of the embeddings endpoint.
    pub embedding_base_url: String,
    /// API key sent to the embedding provider.
    pub embedding_api_key: Option<String>,
    /// Send the configured dimension as the `dimensions` request field.
    pub embedding_request_dimensions: bool,
    /// Base URL of the OpenAI-compatible chat completions API.
    pub llm_base_url: String,
    /// API key sent to the chat completions API.
    pub llm_api_key: Option<String>,
    /// Chat model identifier.
    pub llm_model: String,
    /// Sampling temperature for answer generation.
    pub llm_temperature: f32,
    /// Attempts allowed for a single answer generation call.
    pub llm_max_attempts: u32,
    /// Optional `HTTP-Referer` attribution header for OpenRouter.
    pub site_url: Option<String>,
    /// Optional `X-Title` attribution header for OpenRouter.
    pub site_name: Option<String>,
    /// Chunk window size in characters.
    pub chunk_size: usize,
    /// Overlap between consecutive chunks in characters.
    pub chunk_overlap: usize,
    /// Number of chunks retrieved per question.
    pub top_k: usize,
    /// Number of chunks embedded and upserted together.
    pub index_batch_size: usize,
    /// Maximum embedding requests in flight within one batch.
    pub embed_concurrency: usize,
    /// Attempts allowed for embedding and index calls.
    pub retry_max_attempts: u32,
    /// Delay before the first retry.
    pub retry_base_delay: Duration,
    /// Upper bound for a single backoff delay.
    pub retry_max_delay: Duration,
    /// Jitter ratio applied on top of each backoff delay.
    pub retry_jitter: f64,
    /// Timeout for downloading a document.
    pub fetch_timeout: Duration,
    /// Maximum accepted document size in bytes.
    pub fetch_max_bytes: u64,
    /// Timeout for calls to the embedding, index, and chat services.
    pub http_timeout: Duration,
    /// Timeout enclosing a whole question-answering request.
    pub request_timeout: Duration,
    /// Optional SQLite URL of the append-only chunk archive.
    pub chunk_store_url: Option<String>,
}

/// Supported embedding backends for the pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EmbeddingProvider {
    /// OpenAI-compatible embeddings API (OpenAI, OpenRouter).
    OpenAI,
    /// Hugging Face feature-extraction inference API.
    HuggingFace,
    /// Deterministic local hashing embedder.
    Hash,
}

/// Storage backends for chunk vectors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VectorBackend {
    /// Remote Qdrant collection.
    Qdrant,
    /// Process-local brute-force index.
    Memory,
}

impl Config {
    /// Load configuration from environment variables, performing validation along the way.
    pub fn from_env() -> Result<Self, ConfigError> {
        let shared_key = load_env_optional("OPENROUTER_API_KEY");
        let embedding_provider: EmbeddingProvider =
            parse_or("EMBEDDING_PROVIDER", EmbeddingProvider::OpenAI)?;
        let default_embedding_base_url = match embedding_provider {
            EmbeddingProvider::HuggingFace => DEFAULT_HUGGINGFACE_BASE_URL,
            _ => DEFAULT_OPENROUTER_BASE_URL,
        };
        let embedding_base_url = load_env_optional("EMBEDDING_BASE_URL")
            .unwrap_or_else(|| default_embedding_base_url.to_string());

        let config = Self {
            server_port: parse_optional("SERVER_PORT")?,
            api_bearer_token: load_env_optional("API_BEARER_TOKEN"),
            vector_backend: parse_or("VECTOR_BACKEND", VectorBackend::Qdrant)?,
            qdrant_url: load_env_optional("QDRANT_URL")
                .unwrap_or_else(|| "http://127.0.0.1:6333".to_string()),
            qdrant_collection_name: load_env_optional("QDRANT_COLLECTION_NAME")
                .unwrap_or_else(|| "policy-index".to_string()),
            qdrant_api_key: load_env_optional("QDRANT_API_KEY"),
            embedding_provider,
            embedding_model: load_env_optional("EMBEDDING_MODEL")
                .unwrap_or_else(|| "openai/text-embedding-ada-002".to_string()),
            embedding_dimension: parse_or("EMBEDDING_DIMENSION", 1536)?,
            embedding_base_url,
            embedding_api_key: load_env_optional("EMBEDDING_API_KEY")
                .or_else(|| shared_key.clone()),
            embedding_request_dimensions: parse_or("EMBEDDING_REQUEST_DIMENSIONS", false)?,
            llm_base_url: load_env_optional("LLM_BASE_URL")
                .unwrap_or_else(|| DEFAULT_OPENROUTER_BASE_URL.to_string()),
            llm_api_key: load_env_optional("LLM_API_KEY").or(shared_key),
            llm_model: load_env_optional("LLM_MODEL")
                .unwrap_or_else(|| "deepseek/deepseek-chat-v3-0324:free".to_string()),
            llm_temperature: parse_or("LLM_TEMPERATURE", 0.2)?,
            llm_max_attempts: parse_or("LLM_MAX_ATTEMPTS", 2)?,
            site_url: load_env_optional("SITE_URL"),
            site_name: load_env_optional("SITE_NAME"),
            chunk_size: parse_or("CHUNK_SIZE", 1000)?,
            chunk_overlap: parse_or("CHUNK_OVERLAP", 100)?,
            top_k: parse_or("TOP_K", 3)?,
            index_batch_size: parse_or("INDEX_BATCH_SIZE", 16)?,
            embed_concurrency: parse_or("EMBED_CONCURRENCY", 4)?,
            retry_max_attempts: parse_or("RETRY_MAX_ATTEMPTS", 3)?,
            retry_base_delay: Duration::from_millis(parse_or("RETRY_BASE_DELAY_MS", 250)?),
            retry_max_delay: Duration::from_millis(parse_or("RETRY_MAX_DELAY_MS", 4000)?),
            retry_jitter: parse_or("RETRY_JITTER", 0.2)?,
            fetch_timeout: Duration::from_secs(parse_or("FETCH_TIMEOUT_SECS", 30)?),
            fetch_max_bytes: parse_or("FETCH_MAX_BYTES", 50 * 1024 * 1024)?,
            http_timeout: Duration::from_secs(parse_or("HTTP_TIMEOUT_SECS", 60)?),
            request_timeout: Duration::from_secs(parse_or("REQUEST_TIMEOUT_SECS", 300)?),
            chunk_store_url: load_env_optional("CHUNK_STORE_URL"),
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject combinations that would make the pipeline misbehave at runtime.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::InvalidValue("CHUNK_SIZE".into()));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(ConfigError::InvalidValue("CHUNK_OVERLAP".into()));
        }
        if self.embedding_dimension == 0 {
            return Err(ConfigError::InvalidValue("EMBEDDING_DIMENSION".into()));
        }
        if self.top_k == 0 {
            return Err(ConfigError::InvalidValue("TOP_K".into()));
        }
        if self.index_batch_size == 0 {
            return Err(ConfigError::InvalidValue("INDEX_BATCH_SIZE".into()));
        }
        if self.embed_concurrency == 0 {
            return Err(ConfigError::InvalidValue("EMBED_CONCURRENCY".into()));
        }
        if self.retry_max_attempts == 0 {
            return Err(ConfigError::InvalidValue("RETRY_MAX_ATTEMPTS".into()));
        }
        if self.llm_max_attempts == 0 {
            return Err(ConfigError::InvalidValue("LLM_MAX_ATTEMPTS".into()));
        }
        if !(0.0..=1.0).contains(&self.retry_jitter) {
            return Err(ConfigError::InvalidValue("RETRY_JITTER".into()));
        }
        let hosted = self.embedding_provider == EmbeddingProvider::OpenAI;
        if hosted && self.embedding_api_key.is_none() {
            return Err(ConfigError::MissingVariable("EMBEDDING_API_KEY".into()));
        }
        Ok(())
    }

    /// Retry policy shared by the embedding client and the vector index.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry_max_attempts,
            self.retry_base_delay,
            self.retry_max_delay,
            self.retry_jitter,
        )
    }

    /// Retry policy for answer generation, which allows fewer attempts.
    pub fn generation_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.llm_max_attempts,
            self.retry_base_delay,
            self.retry_max_delay,
            self.retry_jitter,
        )
    }
}

fn load_env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_optional<T: FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    load_env_optional(key)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue(key.to_string()))
        })
        .transpose()
}

fn parse_or<T: FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    Ok(parse_optional(key)?.unwrap_or(default))
}

impl FromStr for EmbeddingProvider {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" | "openrouter" => Ok(Self::OpenAI),
            "huggingface" | "hf" => Ok(Self::HuggingFace),
            "hash" => Ok(Self::Hash),
            _ => Err(()),
        }
    }
}

impl FromStr for VectorBackend {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "qdrant" => Ok(Self::Qdrant),
            "memory" => Ok(Self::Memory),
            _ => Err(()),
        }
    }
}

/// Global configuration cache populated during process start.
pub static CONFIG: OnceLock<Config> = OnceLock::new();

/// Load configuration from the environment and install it in the global cache.
pub fn init_config() -> Result<&'static Config, ConfigError> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;
    tracing::debug!(
        vector_backend = ?config.vector_backend,
        qdrant_url = %config.qdrant_url,
        collection = %config.qdrant_collection_name,
        server_port = ?config.server_port,
        embedding_provider = ?config.embedding_provider,
        embedding_model = %config.embedding_model,
        embedding_dimension = config.embedding_dimension,
        llm_model = %config.llm_model,
        auth_enabled = config.api_bearer_token.is_some(),
        "Loaded configuration"
    );
    Ok(CONFIG.get_or_init(|| config))
}

#[cfg(test)]
pub(crate) fn test_config() -> Config {
    Config {
        server_port: None,
        api_bearer_token: Some("secret".into()),
        vector_backend: VectorBackend::Memory,
        qdrant_url: "http://127.0.0.1:6333".into(),
        qdrant_collection_name: "policy-index".into(),
        qdrant_api_key: None,
        embedding_provider: EmbeddingProvider::Hash,
        embedding_model: "hash".into(),
        embedding_dimension: 64,
        embedding_base_url: DEFAULT_OPENROUTER_BASE_URL.into(),
        embedding_api_key: None,
        embedding_request_dimensions: false,
        llm_base_url: DEFAULT_OPENROUTER_BASE_URL.into(),
        llm_api_key: None,
        llm_model: "test-model".into(),
        llm_temperature: 0.2,
        llm_max_attempts: 2,
        site_url: None,
        site_name: None,
        chunk_size: 1000,
        chunk_overlap: 100,
        top_k: 3,
        index_batch_size: 16,
        embed_concurrency: 4,
        retry_max_attempts: 3,
        retry_base_delay: Duration::from_millis(1),
        retry_max_delay: Duration::from_millis(2),
        retry_jitter: 0.0,
        fetch_timeout: Duration::from_secs(5),
        fetch_max_bytes: 1024 * 1024,
        http_timeout: Duration::from_secs(5),
        request_timeout: Duration::from_secs(30),
        chunk_store_url: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn providers_parse_case_insensitively() {
        assert_eq!("OpenAI".parse(), Ok(EmbeddingProvider::OpenAI));
        assert_eq!("openrouter".parse(), Ok(EmbeddingProvider::OpenAI));
        assert_eq!("HF".parse(), Ok(EmbeddingProvider::HuggingFace));
        assert_eq!("hash".parse(), Ok(EmbeddingProvider::Hash));
        assert!("faiss".parse::<EmbeddingProvider>().is_err());
        assert_eq!("Memory".parse(), Ok(VectorBackend::Memory));
    }

    #[test]
    fn validate_accepts_defaults() {
        assert!(test_config().validate().is_ok());
    }

    #[test]
    fn validate_rejects_overlap_not_below_chunk_size() {
        let mut config = test_config();
        config.chunk_overlap = config.chunk_size;
        let error = config.validate().unwrap_err();
        assert!(matches!(error, ConfigError::InvalidValue(key) if key == "CHUNK_OVERLAP"));
    }

    #[test]
    fn validate_rejects_zero_dimension() {
        let mut config = test_config();
        config.embedding_dimension = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_requires_key_for_hosted_embeddings() {
        let mut config = test_config();
        config.embedding_provider = EmbeddingProvider::OpenAI;
        let error = config.validate().unwrap_err();
        assert!(matches!(error, ConfigError::MissingVariable(_)));
    }
}
