#![deny(missing_docs)]

//! Core library for the Rusty RAG question-answering service.

/// HTTP routing and REST handlers.
pub mod api;
/// Document chunking with a fixed character window.
pub mod chunking;
/// Environment-driven configuration management.
pub mod config;
/// Document download and text extraction.
pub mod document;
/// Embedding client abstraction and adapters.
pub mod embedding;
/// Answer generation over retrieved context.
pub mod generation;
/// Structured logging and tracing setup.
pub mod logging;
/// Pipeline metrics helpers.
pub mod metrics;
/// Request orchestration.
pub mod pipeline;
/// Qdrant vector store integration.
pub mod qdrant;
/// Retry policy for outbound calls.
pub mod retry;
/// Optional SQLite audit store for indexed chunks.
pub mod store;
/// Vector index abstraction and in-process backend.
pub mod vector_index;
