//! Answer generation against an OpenAI-compatible chat completions endpoint.
//!
//! The prompt is assembled deterministically from the question and the retrieved chunks; the
//! generator sends it as a single user message and returns the assistant's reply verbatim
//! (whitespace trimmed). A reply with no content is an error, never an empty answer.

use crate::config::Config;
use crate::retry::{RetryPolicy, Transient, is_transient_status};
use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced while generating an answer.
#[derive(Debug, Error)]
pub enum GenerationError {
    /// Generator could not be configured (missing or malformed credentials).
    #[error("Generator misconfigured: {0}")]
    Configuration(String),
    /// HTTP transport failed before a response arrived.
    #[error("Generation request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// The provider answered with a non-success status.
    #[error("Generation provider returned {status}: {body}")]
    UnexpectedStatus {
        /// HTTP status returned by the provider.
        status: StatusCode,
        /// Response body, for diagnostics.
        body: String,
    },
    /// The provider's reply could not be used as an answer.
    #[error("Malformed generation response: {0}")]
    InvalidResponse(String),
}

impl Transient for GenerationError {
    fn is_transient(&self) -> bool {
        match self {
            Self::Http(error) => error.is_transient(),
            Self::UnexpectedStatus { status, .. } => is_transient_status(*status),
            Self::Configuration(_) | Self::InvalidResponse(_) => false,
        }
    }
}

/// Produces an answer to a question from retrieved context.
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    /// Answer `question` using `context` chunks, nearest first.
    async fn answer(&self, question: &str, context: &[String]) -> Result<String, GenerationError>;
}

/// Assemble the prompt for a question. Chunks are joined with newlines in rank order.
pub fn build_prompt(question: &str, context: &[String]) -> String {
    let context = context.join("\n");
    format!(
        "You are a helpful assistant. Based on the policy document below, answer the user's question.\n\
         Context:\n{context}\n\n\
         Question: {question}\n\
         Provide a concise and accurate answer with explanation."
    )
}

/// Settings for [`ChatCompletionsGenerator`].
#[derive(Debug, Clone)]
pub struct GeneratorSettings {
    /// Base URL, for example `https://openrouter.ai/api/v1`.
    pub base_url: String,
    /// Bearer key for the provider.
    pub api_key: String,
    /// Chat model identifier.
    pub model: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Optional `HTTP-Referer` attribution header.
    pub site_url: Option<String>,
    /// Optional `X-Title` attribution header.
    pub site_name: Option<String>,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Retry policy for transient failures.
    pub retry: RetryPolicy,
}

impl GeneratorSettings {
    /// Derive generator settings from the runtime configuration.
    pub fn from_config(config: &Config) -> Result<Self, GenerationError> {
        let api_key = config
            .llm_api_key
            .clone()
            .ok_or_else(|| GenerationError::Configuration("LLM_API_KEY is not set".into()))?;
        Ok(Self {
            base_url: config.llm_base_url.clone(),
            api_key,
            model: config.llm_model.clone(),
            temperature: config.llm_temperature,
            site_url: config.site_url.clone(),
            site_name: config.site_name.clone(),
            timeout: config.http_timeout,
            retry: config.generation_retry_policy(),
        })
    }
}

/// Generator for OpenAI-compatible `POST /chat/completions` APIs.
pub struct ChatCompletionsGenerator {
    http: Client,
    endpoint: String,
    model: String,
    temperature: f32,
    retry: RetryPolicy,
}

impl ChatCompletionsGenerator {
    /// Build the generator. Attribution headers are attached to every request when set.
    pub fn new(settings: GeneratorSettings) -> Result<Self, GenerationError> {
        let mut headers = HeaderMap::new();
        let auth = HeaderValue::from_str(&format!("Bearer {}", settings.api_key.trim()))
            .map_err(|_| GenerationError::Configuration("invalid LLM API key".into()))?;
        headers.insert(AUTHORIZATION, auth);
        for (name, value) in [
            ("http-referer", settings.site_url.as_deref()),
            ("x-title", settings.site_name.as_deref()),
        ] {
            if let Some(value) = value
                && let Ok(value) = HeaderValue::from_str(value)
            {
                headers.insert(HeaderName::from_static(name), value);
            }
        }

        let http = Client::builder()
            .user_agent("rusty-rag/generation")
            .default_headers(headers)
            .timeout(settings.timeout)
            .build()?;
        Ok(Self {
            http,
            endpoint: format!(
                "{}/chat/completions",
                settings.base_url.trim_end_matches('/')
            ),
            model: settings.model,
            temperature: settings.temperature,
            retry: settings.retry,
        })
    }

    async fn complete_once(&self, prompt: &str) -> Result<String, GenerationError> {
        let body = ChatRequest {
            model: &self.model,
            temperature: self.temperature,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
        };
        let response = self.http.post(&self.endpoint).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::UnexpectedStatus { status, body });
        }

        let parsed: ChatResponse = response.json().await.map_err(|error| {
            GenerationError::InvalidResponse(format!("failed to decode chat response: {error}"))
        })?;
        let answer = parsed
            .choices
            .into_iter()
            .find_map(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .unwrap_or_default();
        if answer.is_empty() {
            return Err(GenerationError::InvalidResponse(
                "response contained no answer text".into(),
            ));
        }
        Ok(answer)
    }
}

#[async_trait]
impl AnswerGenerator for ChatCompletionsGenerator {
    async fn answer(&self, question: &str, context: &[String]) -> Result<String, GenerationError> {
        let prompt = build_prompt(question, context);
        tracing::debug!(
            model = %self.model,
            context_chunks = context.len(),
            prompt_chars = prompt.len(),
            "Requesting answer"
        );
        self.retry
            .run("generation", || self.complete_once(&prompt))
            .await
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: AssistantMessage,
}

#[derive(Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::POST, MockServer};
    use serde_json::json;

    fn generator(server: &MockServer, attempts: u32) -> ChatCompletionsGenerator {
        ChatCompletionsGenerator::new(GeneratorSettings {
            base_url: server.base_url(),
            api_key: "llm-key".into(),
            model: "test-model".into(),
            temperature: 0.2,
            site_url: Some("https://example.test".into()),
            site_name: Some("Rusty RAG".into()),
            timeout: Duration::from_secs(5),
            retry: RetryPolicy::new(
                attempts,
                Duration::from_millis(1),
                Duration::from_millis(2),
                0.0,
            ),
        })
        .expect("generator")
    }

    fn chat_body(content: &str) -> serde_json::Value {
        json!({
            "id": "chatcmpl-1",
            "choices": [ { "index": 0, "message": { "role": "assistant", "content": content } } ]
        })
    }

    #[test]
    fn prompt_embeds_context_in_rank_order() {
        let prompt = build_prompt(
            "What is the waiting period?",
            &["first chunk".to_string(), "second chunk".to_string()],
        );
        assert!(prompt.starts_with("You are a helpful assistant."));
        let context = "Context:\nfirst chunk\nsecond chunk\n\n";
        let question = "Question: What is the waiting period?\n";
        assert!(prompt.contains(&format!("{context}{question}")));
        assert!(prompt.ends_with("Provide a concise and accurate answer with explanation."));
    }

    #[test]
    fn prompt_is_deterministic() {
        let context = vec!["a".to_string()];
        assert_eq!(build_prompt("q", &context), build_prompt("q", &context));
    }

    #[tokio::test]
    async fn returns_trimmed_answer_and_sends_attribution() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/chat/completions")
                    .header("authorization", "Bearer llm-key")
                    .header("http-referer", "https://example.test")
                    .header("x-title", "Rusty RAG")
                    .body_contains("\"temperature\":0.2")
                    .body_contains("Question: What is covered?");
                then.status(200)
                    .json_body(chat_body("  Hospitalisation is covered.  \n"));
            })
            .await;

        let answer = generator(&server, 2)
            .answer("What is covered?", &["Hospitalisation is covered.".into()])
            .await
            .expect("answer");

        mock.assert();
        assert_eq!(answer, "Hospitalisation is covered.");
    }

    #[tokio::test]
    async fn transient_failures_are_retried_then_surface() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/chat/completions");
                then.status(503).body("overloaded");
            })
            .await;

        let error = generator(&server, 2)
            .answer("q", &[])
            .await
            .expect_err("exhausted");

        mock.assert_hits(2);
        match error {
            GenerationError::UnexpectedStatus { status, .. } => {
                assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE)
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/chat/completions");
                then.status(400).body("bad request");
            })
            .await;

        let error = generator(&server, 3).answer("q", &[]).await.unwrap_err();

        mock.assert_hits(1);
        assert!(!error.is_transient());
    }

    #[tokio::test]
    async fn empty_content_is_an_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/chat/completions");
                then.status(200).json_body(json!({ "choices": [] }));
            })
            .await;

        let error = generator(&server, 2).answer("q", &[]).await.unwrap_err();
        assert!(matches!(error, GenerationError::InvalidResponse(_)));
    }

    #[test]
    fn missing_key_is_a_configuration_error() {
        let config = crate::config::test_config();
        let error = GeneratorSettings::from_config(&config).unwrap_err();
        assert!(matches!(error, GenerationError::Configuration(_)));
    }
}
