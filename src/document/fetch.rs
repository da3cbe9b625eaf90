use super::{Document, DocumentError, DocumentKind, document_id};
use crate::config::Config;
use reqwest::Client;
use std::time::Duration;

/// Limits applied to document downloads.
#[derive(Debug, Clone, Copy)]
pub struct FetchSettings {
    /// Maximum time allowed for the whole download.
    pub timeout: Duration,
    /// Largest accepted body, in bytes.
    pub max_bytes: u64,
}

impl FetchSettings {
    /// Derive fetch limits from the runtime configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            timeout: config.fetch_timeout,
            max_bytes: config.fetch_max_bytes,
        }
    }
}

/// Downloads documents over plain HTTP(S).
pub struct DocumentFetcher {
    client: Client,
    max_bytes: u64,
}

impl DocumentFetcher {
    /// Build a fetcher with a bounded request timeout.
    pub fn new(settings: FetchSettings) -> Result<Self, DocumentError> {
        let client = Client::builder()
            .user_agent("rusty-rag/0.1")
            .timeout(settings.timeout)
            .build()
            .map_err(|error| {
                DocumentError::Fetch(format!("failed to build HTTP client: {error}"))
            })?;
        Ok(Self {
            client,
            max_bytes: settings.max_bytes,
        })
    }

    /// Classify and download the document behind `url`.
    ///
    /// The format check runs first, so unsupported URLs never reach the network.
    pub async fn fetch(&self, url: &str) -> Result<Document, DocumentError> {
        let kind = DocumentKind::from_url(url)?;
        tracing::debug!(url, %kind, "Fetching document");

        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|error| DocumentError::Fetch(format!("request to {url} failed: {error}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DocumentError::Fetch(format!("document host returned {status} for {url}")));
        }

        if let Some(length) = response.content_length()
            && length > self.max_bytes
        {
            return Err(self.too_large(length));
        }

        let mut bytes = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|error| {
                DocumentError::Fetch(format!("failed to read body of {url}: {error}"))
            })?
        {
            bytes.extend_from_slice(&chunk);
            if bytes.len() as u64 > self.max_bytes {
                return Err(self.too_large(bytes.len() as u64));
            }
        }

        tracing::debug!(url, %kind, bytes = bytes.len(), "Document downloaded");
        Ok(Document {
            url: url.to_string(),
            id: document_id(url),
            kind,
            bytes,
        })
    }

    fn too_large(&self, length: u64) -> DocumentError {
        DocumentError::Fetch(format!(
            "document is {length} bytes, larger than the {} byte limit",
            self.max_bytes
        ))
    }
}
