//! Fixed-size, overlapping character windows over parsed document text.
//!
//! Chunk `i` starts at character offset `i * (size - overlap)` and spans `min(size, remaining)`
//! characters. Windows are measured in Unicode scalar values so a multi-byte character is never
//! split. The last chunk may be shorter than `size`; once a window reaches the end of the text
//! no further chunks are produced.

use crate::config::Config;
use thiserror::Error;

/// Errors produced while configuring the chunk window.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChunkingError {
    /// The window cannot make progress through the text.
    #[error("invalid chunk window: size {size} must be positive and exceed overlap {overlap}")]
    InvalidWindow {
        /// Requested chunk size in characters.
        size: usize,
        /// Requested overlap in characters.
        overlap: usize,
    },
}

/// Chunk size and overlap, both in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkWindow {
    size: usize,
    overlap: usize,
}

impl ChunkWindow {
    /// Validate a window; `overlap` must be strictly smaller than `size`.
    pub fn new(size: usize, overlap: usize) -> Result<Self, ChunkingError> {
        if size == 0 || overlap >= size {
            return Err(ChunkingError::InvalidWindow { size, overlap });
        }
        Ok(Self { size, overlap })
    }

    /// Window configured for the running server.
    pub fn from_config(config: &Config) -> Result<Self, ChunkingError> {
        Self::new(config.chunk_size, config.chunk_overlap)
    }

    /// Characters per chunk.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Characters shared by consecutive chunks.
    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Distance between the starts of consecutive chunks.
    pub fn stride(&self) -> usize {
        self.size - self.overlap
    }
}

impl Default for ChunkWindow {
    fn default() -> Self {
        Self {
            size: 1000,
            overlap: 100,
        }
    }
}

/// A contiguous slice of a document's text with its position in the document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Identifier of the owning document.
    pub document_id: String,
    /// Zero-based position of the chunk within the document.
    pub ordinal: usize,
    /// Chunk text.
    pub text: String,
}

impl Chunk {
    /// Document-scoped identifier, `{document_id}_{ordinal}`.
    pub fn id(&self) -> String {
        format!("{}_{}", self.document_id, self.ordinal)
    }
}

/// Split `text` into overlapping windows. Empty input yields no chunks.
pub fn split_text(text: &str, window: ChunkWindow) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }

    // Byte offset of every character boundary, plus the end of the text.
    let boundaries: Vec<usize> = text
        .char_indices()
        .map(|(offset, _)| offset)
        .chain(std::iter::once(text.len()))
        .collect();
    let char_count = boundaries.len() - 1;

    let mut chunks = Vec::with_capacity(char_count.div_ceil(window.stride()));
    let mut start = 0;
    loop {
        let end = (start + window.size).min(char_count);
        chunks.push(text[boundaries[start]..boundaries[end]].to_string());
        if end == char_count {
            break;
        }
        start += window.stride();
    }
    chunks
}

/// Split a document's text into ordered [`Chunk`]s.
pub fn chunk_document(document_id: &str, text: &str, window: ChunkWindow) -> Vec<Chunk> {
    split_text(text, window)
        .into_iter()
        .enumerate()
        .map(|(ordinal, text)| Chunk {
            document_id: document_id.to_string(),
            ordinal,
            text,
        })
        .collect()
}
