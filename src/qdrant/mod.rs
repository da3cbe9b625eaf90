//! Qdrant vector store integration.

pub mod client;
pub(crate) mod payload;
pub mod types;

pub use client::{QdrantIndex, QdrantSettings};
pub use types::QdrantError;
