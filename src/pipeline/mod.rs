//! Question-answering pipeline: one document in, one answer per question out.
//!
//! A request moves through [`Stage`]s in order. Indexing finishes before the first question is
//! answered, questions are answered in input order, and the first failure ends the request with
//! a [`PipelineError`] naming the stage it reached.

/// Orchestration of the pipeline stages.
pub mod service;
/// Request, response and error types.
pub mod types;

pub use service::{BuildError, PipelineService, PipelineSettings};
pub use types::{AnswerApi, ErrorKind, PipelineError, QueryRequest, QueryResponse, Stage};
