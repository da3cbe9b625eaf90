//! Vector index abstraction shared by the Qdrant backend and the in-process index.
//!
//! Contract common to every backend:
//!
//! - similarity is cosine, higher is closer;
//! - upserts are idempotent on id (last write wins, no duplicates);
//! - equal scores keep insertion order (Qdrant does not expose it, so that backend orders ties
//!   by chunk ordinal, which is the insertion order within a document);
//! - a vector whose length differs from the index dimension is rejected with
//!   [`IndexError::DimensionMismatch`], a fatal configuration error.

mod memory;

pub use memory::MemoryIndex;

use crate::qdrant::QdrantError;
use crate::retry::Transient;
use async_trait::async_trait;
use thiserror::Error;

/// Errors returned by vector index backends.
#[derive(Debug, Error)]
pub enum IndexError {
    /// A vector does not match the dimension the index was created with.
    #[error("Vector dimension mismatch: index expects {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimension of the index.
        expected: usize,
        /// Dimension of the offending vector.
        actual: usize,
    },
    /// An existing collection was created with settings this service cannot use.
    #[error("Incompatible vector collection: {0}")]
    IncompatibleCollection(String),
    /// The backing collection did not become ready in time.
    #[error("Vector collection not ready: {0}")]
    NotReady(String),
    /// Request to the backing service failed.
    #[error("Qdrant request failed: {0}")]
    Qdrant(#[from] QdrantError),
}

impl IndexError {
    /// Whether the error reflects a broken deployment rather than a failed call.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::DimensionMismatch { .. } | Self::IncompatibleCollection(_)
        )
    }
}

impl Transient for IndexError {
    fn is_transient(&self) -> bool {
        match self {
            Self::Qdrant(error) => error.is_transient(),
            Self::NotReady(_) => true,
            _ => false,
        }
    }
}

/// A chunk and its embedding, ready to be written to the index.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    /// Document-scoped chunk identifier (`{document_id}_{ordinal}`).
    pub id: String,
    /// Identifier of the document the chunk belongs to.
    pub document_id: String,
    /// Position of the chunk within its document.
    pub ordinal: usize,
    /// Embedding of the chunk text.
    pub vector: Vec<f32>,
    /// Chunk text, stored as metadata and returned by queries.
    pub text: String,
}

/// A query hit, nearest first.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedChunk {
    /// Chunk identifier.
    pub id: String,
    /// Cosine similarity to the query vector.
    pub score: f32,
    /// Stored chunk text.
    pub text: String,
}

/// Nearest-neighbour store for chunk embeddings.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Create the backing index when missing, or validate the existing one.
    async fn ensure_index(&self) -> Result<(), IndexError>;

    /// Insert or replace entries by id. Returns the number of entries written.
    async fn upsert(&self, entries: Vec<IndexEntry>) -> Result<usize, IndexError>;

    /// Return up to `k` entries closest to `vector`, optionally limited to one document.
    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        document_id: Option<&str>,
    ) -> Result<Vec<RetrievedChunk>, IndexError>;

    /// Dimension every stored and queried vector must have.
    fn dimension(&self) -> usize;
}

/// Reject vectors that do not match the index dimension.
pub(crate) fn check_dimension(expected: usize, vector: &[f32]) -> Result<(), IndexError> {
    if vector.len() == expected {
        Ok(())
    } else {
        Err(IndexError::DimensionMismatch {
            expected,
            actual: vector.len(),
        })
    }
}

/// Cosine similarity in `[-1, 1]`; zero when either vector has no magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }
    dot / denom
}
