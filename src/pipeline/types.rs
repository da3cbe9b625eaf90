//! Request, response and error types for the question-answering pipeline.

use crate::metrics::MetricsSnapshot;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Progress of a request through the pipeline, in the order stages are reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Request accepted, nothing fetched yet.
    Received,
    /// Document bytes downloaded.
    Fetched,
    /// Text extracted.
    Parsed,
    /// Text split into chunks.
    Chunked,
    /// Every chunk embedded and written to the index.
    Indexed,
    /// Questions are being answered.
    Answering,
    /// All answers produced.
    Complete,
}

impl Stage {
    const ALL: [Stage; 7] = [
        Stage::Received,
        Stage::Fetched,
        Stage::Parsed,
        Stage::Chunked,
        Stage::Indexed,
        Stage::Answering,
        Stage::Complete,
    ];

    pub(crate) fn as_index(self) -> u8 {
        self as u8
    }

    pub(crate) fn from_index(index: u8) -> Self {
        Self::ALL
            .get(usize::from(index))
            .copied()
            .unwrap_or(Stage::Received)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Received => "received",
            Self::Fetched => "fetched",
            Self::Parsed => "parsed",
            Self::Chunked => "chunked",
            Self::Indexed => "indexed",
            Self::Answering => "answering",
            Self::Complete => "complete",
        };
        f.write_str(name)
    }
}

/// Classification of a failed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Request body is missing the document or has no questions.
    BadRequest,
    /// Caller did not present the configured bearer token.
    Unauthorized,
    /// Document URL does not name a PDF or DOCX file.
    UnsupportedFormat,
    /// Document download failed.
    Fetch,
    /// Document bytes could not be parsed.
    Parse,
    /// Document contained no extractable text.
    EmptyDocument,
    /// Embedding provider failed.
    Embedding,
    /// Vector index failed.
    Index,
    /// Answer generation failed.
    Generation,
    /// Audit store failed.
    Store,
    /// Deployment is inconsistent, such as an embedding dimension the index cannot hold.
    Configuration,
    /// Request exceeded its time budget.
    Timeout,
}

impl ErrorKind {
    fn activity(self) -> &'static str {
        match self {
            Self::BadRequest => "validation",
            Self::Unauthorized => "authentication",
            Self::UnsupportedFormat => "format detection",
            Self::Fetch => "fetching",
            Self::Parse | Self::EmptyDocument => "parsing",
            Self::Embedding => "embedding",
            Self::Index => "indexing",
            Self::Generation => "generation",
            Self::Store => "chunk storage",
            Self::Configuration => "configuration",
            Self::Timeout => "request",
        }
    }
}

/// A failed request: where it stopped, why, and a stage-qualified message.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct PipelineError {
    /// Last stage the request reached.
    pub stage: Stage,
    /// Failure classification.
    pub kind: ErrorKind,
    /// Human-readable message, prefixed with the failing activity.
    pub message: String,
}

impl PipelineError {
    /// Build an error whose message reads `"{activity} failed: {detail}"`.
    pub fn new(stage: Stage, kind: ErrorKind, detail: impl fmt::Display) -> Self {
        Self {
            stage,
            kind,
            message: format!("{} failed: {detail}", kind.activity()),
        }
    }

    /// Shorthand for a rejected request body.
    pub fn bad_request(detail: impl fmt::Display) -> Self {
        Self::new(Stage::Received, ErrorKind::BadRequest, detail)
    }
}

/// Body of `POST /api/v1/hackrx/run`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct QueryRequest {
    /// URL of the document to answer questions about.
    #[serde(default)]
    pub documents: Option<String>,
    /// Questions, answered in order.
    #[serde(default)]
    pub questions: Vec<String>,
}

impl QueryRequest {
    /// Build a request for one document.
    pub fn new(document_url: impl Into<String>, questions: Vec<String>) -> Self {
        Self {
            documents: Some(document_url.into()),
            questions,
        }
    }

    /// Return the document URL after checking the request is answerable.
    pub fn validate(&self) -> Result<&str, PipelineError> {
        let url = self
            .documents
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .ok_or_else(|| PipelineError::bad_request("`documents` must name a document URL"))?;
        if self.questions.is_empty() {
            return Err(PipelineError::bad_request(
                "`questions` must contain at least one question",
            ));
        }
        Ok(url)
    }
}

/// Answers in the same order as the request's questions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct QueryResponse {
    /// One answer per question.
    pub answers: Vec<String>,
}

/// Abstraction over the pipeline used by the HTTP surface and the CLI.
#[async_trait]
pub trait AnswerApi: Send + Sync {
    /// Fetch, index and answer every question of `request`.
    async fn run(&self, request: QueryRequest) -> Result<QueryResponse, PipelineError>;

    /// Current counters for diagnostics.
    fn metrics_snapshot(&self) -> MetricsSnapshot;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_are_prefixed_with_the_failing_activity() {
        let error = PipelineError::new(Stage::Chunked, ErrorKind::Index, "qdrant unavailable");
        assert_eq!(error.to_string(), "indexing failed: qdrant unavailable");
        assert_eq!(error.stage, Stage::Chunked);
    }

    #[test]
    fn missing_document_is_rejected() {
        let request = QueryRequest {
            documents: None,
            questions: vec!["q".into()],
        };
        let error = request.validate().unwrap_err();
        assert_eq!(error.kind, ErrorKind::BadRequest);
    }

    #[test]
    fn empty_question_list_is_rejected() {
        let request = QueryRequest::new("https://host/doc.pdf", vec![]);
        assert_eq!(request.validate().unwrap_err().kind, ErrorKind::BadRequest);
    }

    #[test]
    fn blank_document_url_is_rejected() {
        let request = QueryRequest::new("   ", vec!["q".into()]);
        assert!(request.validate().is_err());
    }

    #[test]
    fn stage_index_round_trips() {
        for stage in Stage::ALL {
            assert_eq!(Stage::from_index(stage.as_index()), stage);
        }
        assert_eq!(Stage::from_index(200), Stage::Received);
    }

    #[test]
    fn request_deserializes_without_optional_fields() {
        let request: QueryRequest = serde_json::from_str(r#"{"questions":["q"]}"#).expect("json");
        assert!(request.documents.is_none());
        assert_eq!(request.questions, vec!["q".to_string()]);
    }
}
