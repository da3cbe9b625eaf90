//! Document acquisition: URL classification, download, and text extraction.

mod fetch;
mod parse;

pub use fetch::{DocumentFetcher, FetchSettings};
pub use parse::parse_document;

#[cfg(test)]
pub(crate) use parse::docx_fixture;

use sha2::{Digest, Sha256};
use thiserror::Error;

/// Errors produced while fetching or parsing a document.
#[derive(Debug, Error)]
pub enum DocumentError {
    /// The URL does not end in a supported extension.
    #[error("unsupported document format for {0}; expected .pdf or .docx")]
    UnsupportedFormat(String),
    /// The document host could not be reached or returned a non-success status.
    #[error("failed to fetch document: {0}")]
    Fetch(String),
    /// The bytes could not be decoded as the expected container format.
    #[error("failed to parse {kind} document: {message}")]
    Parse {
        /// Format the parser expected.
        kind: DocumentKind,
        /// Underlying parser diagnostic.
        message: String,
    },
    /// Every page or paragraph of the document extracted to empty text.
    #[error("document contains no extractable text")]
    EmptyDocument,
}

/// File formats the parser understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    /// Portable Document Format.
    Pdf,
    /// Office Open XML word processing document.
    Docx,
}

impl DocumentKind {
    /// Classify a document URL by the extension of its path.
    ///
    /// Query strings and fragments are ignored so that pre-signed blob URLs
    /// (`.../policy.pdf?sv=...&sig=...`) resolve to their file type.
    pub fn from_url(url: &str) -> Result<Self, DocumentError> {
        let path = url
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase();
        if path.ends_with(".pdf") {
            Ok(Self::Pdf)
        } else if path.ends_with(".docx") {
            Ok(Self::Docx)
        } else {
            Err(DocumentError::UnsupportedFormat(url.to_string()))
        }
    }
}

impl std::fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pdf => f.write_str("pdf"),
            Self::Docx => f.write_str("docx"),
        }
    }
}

/// Raw document content held for the duration of one request.
#[derive(Debug)]
pub struct Document {
    /// Source URL the bytes were downloaded from.
    pub url: String,
    /// Document-scoped identifier used to prefix chunk ids.
    pub id: String,
    /// Detected file format.
    pub kind: DocumentKind,
    /// Downloaded content.
    pub bytes: Vec<u8>,
}

/// Derive a stable identifier for a document from its source URL.
pub fn document_id(url: &str) -> String {
    let digest = Sha256::digest(url.as_bytes());
    hex::encode(&digest[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_by_extension() {
        assert_eq!(
            DocumentKind::from_url("https://host/a/policy.pdf").unwrap(),
            DocumentKind::Pdf
        );
        assert_eq!(
            DocumentKind::from_url("https://host/a/policy.DOCX").unwrap(),
            DocumentKind::Docx
        );
    }

    #[test]
    fn ignores_query_string_when_classifying() {
        let url = "https://blob.example/policy.pdf?sv=2023&sig=abc%2Fdef";
        assert_eq!(DocumentKind::from_url(url).unwrap(), DocumentKind::Pdf);
    }

    #[test]
    fn rejects_other_extensions() {
        let error = DocumentKind::from_url("https://host/notes.txt").unwrap_err();
        assert!(matches!(error, DocumentError::UnsupportedFormat(url) if url.ends_with(".txt")));
        assert!(DocumentKind::from_url("https://host/pdf").is_err());
    }

    #[test]
    fn document_id_is_stable_and_short() {
        let first = document_id("https://host/policy.pdf");
        assert_eq!(first, document_id("https://host/policy.pdf"));
        assert_ne!(first, document_id("https://host/other.pdf"));
        assert_eq!(first.len(), 16);
    }
}
