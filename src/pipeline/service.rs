//! Pipeline service coordinating fetching, parsing, chunking, indexing and answering.

use crate::{
    chunking::{Chunk, ChunkWindow, ChunkingError, chunk_document},
    config::{Config, VectorBackend},
    document::{DocumentError, DocumentFetcher, FetchSettings, parse_document},
    embedding::{EmbeddingClient, EmbeddingClientError, embed_one, get_embedding_client},
    generation::{AnswerGenerator, ChatCompletionsGenerator, GenerationError, GeneratorSettings},
    metrics::{MetricsSnapshot, PipelineMetrics},
    pipeline::types::{AnswerApi, ErrorKind, PipelineError, QueryRequest, QueryResponse, Stage},
    qdrant::{QdrantError, QdrantIndex, QdrantSettings},
    store::{ChunkStore, StoreError, StoredChunk},
    vector_index::{IndexEntry, IndexError, MemoryIndex, VectorIndex},
};
use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::Instrument;
use uuid::Uuid;

/// Errors raised while assembling the pipeline at startup.
#[derive(Debug, Error)]
pub enum BuildError {
    /// Chunk window settings are invalid.
    #[error(transparent)]
    Chunking(#[from] ChunkingError),
    /// Document fetcher could not be built.
    #[error(transparent)]
    Document(#[from] DocumentError),
    /// Embedding client could not be built.
    #[error(transparent)]
    Embedding(#[from] EmbeddingClientError),
    /// Vector index is unreachable or incompatible.
    #[error(transparent)]
    Index(#[from] IndexError),
    /// Qdrant client could not be built.
    #[error(transparent)]
    Qdrant(#[from] QdrantError),
    /// Answer generator could not be built.
    #[error(transparent)]
    Generation(#[from] GenerationError),
    /// Chunk store could not be opened.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Tunables governing one pipeline run.
#[derive(Debug, Clone, Copy)]
pub struct PipelineSettings {
    /// Chunk size and overlap.
    pub window: ChunkWindow,
    /// Chunks retrieved per question.
    pub top_k: usize,
    /// Chunks embedded and upserted together.
    pub batch_size: usize,
    /// Embedding requests allowed in flight.
    pub embed_concurrency: usize,
    /// Budget for the whole request.
    pub request_timeout: Duration,
}

impl PipelineSettings {
    /// Derive settings from the runtime configuration.
    pub fn from_config(config: &Config) -> Result<Self, ChunkingError> {
        Ok(Self {
            window: ChunkWindow::from_config(config)?,
            top_k: config.top_k,
            batch_size: config.index_batch_size,
            embed_concurrency: config.embed_concurrency,
            request_timeout: config.request_timeout,
        })
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            window: ChunkWindow::default(),
            top_k: 3,
            batch_size: 16,
            embed_concurrency: 4,
            request_timeout: Duration::from_secs(300),
        }
    }
}

/// Runs the full question-answering pipeline for one document per request.
///
/// The service owns long-lived handles to the fetcher, embedding client, vector index and
/// generator, so that the HTTP surface and the CLI share the same components. Construct it once
/// near process start and share it through an `Arc`.
pub struct PipelineService {
    fetcher: DocumentFetcher,
    embedder: Arc<dyn EmbeddingClient>,
    index: Arc<dyn VectorIndex>,
    generator: Arc<dyn AnswerGenerator>,
    store: Option<ChunkStore>,
    metrics: Arc<PipelineMetrics>,
    settings: PipelineSettings,
}

impl PipelineService {
    /// Assemble a service from prebuilt components.
    ///
    /// Fails when the embedder and the index disagree on vector dimension.
    pub fn new(
        fetcher: DocumentFetcher,
        embedder: Arc<dyn EmbeddingClient>,
        index: Arc<dyn VectorIndex>,
        generator: Arc<dyn AnswerGenerator>,
        settings: PipelineSettings,
    ) -> Result<Self, BuildError> {
        if embedder.dimension() != index.dimension() {
            return Err(IndexError::DimensionMismatch {
                expected: index.dimension(),
                actual: embedder.dimension(),
            }
            .into());
        }
        Ok(Self {
            fetcher,
            embedder,
            index,
            generator,
            store: None,
            metrics: Arc::new(PipelineMetrics::new()),
            settings,
        })
    }

    /// Also append every indexed chunk to `store`.
    pub fn with_store(mut self, store: ChunkStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Build every component from configuration and prepare the vector index.
    pub async fn from_config(config: &Config) -> Result<Self, BuildError> {
        let embedder = get_embedding_client(config)?;
        tracing::info!(
            provider = ?config.embedding_provider,
            model = embedder.model(),
            dimension = embedder.dimension(),
            "Embedding client ready"
        );

        let index: Arc<dyn VectorIndex> = match config.vector_backend {
            VectorBackend::Qdrant => {
                Arc::new(QdrantIndex::new(QdrantSettings::from_config(config))?)
            }
            VectorBackend::Memory => Arc::new(MemoryIndex::new(config.embedding_dimension)),
        };
        tracing::debug!(backend = ?config.vector_backend, "Ensuring vector index");
        index.ensure_index().await?;

        let generator = Arc::new(ChatCompletionsGenerator::new(
            GeneratorSettings::from_config(config)?,
        )?);
        let fetcher = DocumentFetcher::new(FetchSettings::from_config(config))?;
        let service = Self::new(
            fetcher,
            embedder,
            index,
            generator,
            PipelineSettings::from_config(config)?,
        )?;

        match &config.chunk_store_url {
            Some(url) => Ok(service.with_store(ChunkStore::connect(url).await?)),
            None => Ok(service),
        }
    }

    /// Shared metrics registry.
    pub fn metrics(&self) -> Arc<PipelineMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Answer every question of `request` against its document, within the request budget.
    pub async fn run(&self, request: QueryRequest) -> Result<QueryResponse, PipelineError> {
        let request_id = Uuid::new_v4();
        let span = tracing::info_span!("pipeline", %request_id);
        let progress = AtomicU8::new(Stage::Received.as_index());
        let started = Instant::now();

        let outcome = tokio::time::timeout(
            self.settings.request_timeout,
            self.execute(request, &progress),
        )
        .instrument(span)
        .await;

        let result = outcome.unwrap_or_else(|_| {
            Err(PipelineError::new(
                Stage::from_index(progress.load(Ordering::Relaxed)),
                ErrorKind::Timeout,
                format!(
                    "exceeded the {}s request budget",
                    self.settings.request_timeout.as_secs()
                ),
            ))
        });

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(response) => {
                self.metrics.record_answers(response.answers.len() as u64);
                tracing::info!(
                    %request_id,
                    answers = response.answers.len(),
                    elapsed_ms,
                    "Request completed"
                );
            }
            Err(error) => {
                self.metrics.record_failure();
                tracing::warn!(
                    %request_id,
                    stage = %error.stage,
                    kind = ?error.kind,
                    elapsed_ms,
                    error = %error,
                    "Request failed"
                );
            }
        }
        result
    }

    async fn execute(
        &self,
        request: QueryRequest,
        progress: &AtomicU8,
    ) -> Result<QueryResponse, PipelineError> {
        let url = request.validate()?.to_string();
        let questions = request.questions;
        tracing::debug!(url = %url, questions = questions.len(), "Request received");

        let document = self
            .fetcher
            .fetch(&url)
            .await
            .map_err(|error| document_failure(Stage::Received, error))?;
        advance(progress, Stage::Fetched);

        let document_id = document.id.clone();
        // pdf-extract can panic on malformed input; the join error turns that into a parse failure.
        let text = tokio::task::spawn_blocking(move || parse_document(document))
            .await
            .map_err(|error| {
                PipelineError::new(
                    Stage::Fetched,
                    ErrorKind::Parse,
                    format!("parser aborted: {error}"),
                )
            })?
            .map_err(|error| document_failure(Stage::Fetched, error))?;
        advance(progress, Stage::Parsed);

        let chunks = chunk_document(&document_id, &text, self.settings.window);
        drop(text);
        if chunks.is_empty() {
            return Err(document_failure(Stage::Parsed, DocumentError::EmptyDocument));
        }
        tracing::debug!(document_id = %document_id, chunks = chunks.len(), "Document chunked");
        advance(progress, Stage::Chunked);

        let written = self.index_chunks(&url, chunks).await?;
        self.metrics.record_document(written as u64);
        advance(progress, Stage::Indexed);

        advance(progress, Stage::Answering);
        let mut answers = Vec::with_capacity(questions.len());
        for question in &questions {
            match self.answer_question(&document_id, question).await {
                Ok(answer) => answers.push(answer),
                Err(error) => {
                    if !answers.is_empty() {
                        tracing::warn!(
                            answered = answers.len(),
                            total = questions.len(),
                            "Discarding partial answers"
                        );
                    }
                    return Err(error);
                }
            }
        }
        advance(progress, Stage::Complete);

        Ok(QueryResponse { answers })
    }

    /// Embed chunks batch by batch (with bounded fan-out) and upsert each batch in order.
    async fn index_chunks(&self, url: &str, chunks: Vec<Chunk>) -> Result<usize, PipelineError> {
        let batches: Vec<Vec<Chunk>> = chunks
            .chunks(self.settings.batch_size.max(1))
            .map(<[Chunk]>::to_vec)
            .collect();
        let total_batches = batches.len();

        let mut embedded = stream::iter(batches)
            .map(|batch| async move {
                let texts = batch.iter().map(|chunk| chunk.text.clone()).collect();
                let vectors = self.embedder.generate_embeddings(texts).await?;
                Ok::<_, EmbeddingClientError>((batch, vectors))
            })
            .buffered(self.settings.embed_concurrency.max(1));

        let mut written = 0;
        let mut batch_number = 0;
        while let Some(result) = embedded.next().await {
            let (batch, vectors) =
                result.map_err(|error| embedding_failure(Stage::Chunked, error))?;
            batch_number += 1;

            let entries: Vec<IndexEntry> = batch
                .into_iter()
                .zip(vectors)
                .map(|(chunk, vector)| IndexEntry {
                    id: chunk.id(),
                    document_id: chunk.document_id,
                    ordinal: chunk.ordinal,
                    vector,
                    text: chunk.text,
                })
                .collect();
            let rows: Option<Vec<StoredChunk>> = self.store.as_ref().map(|_| {
                entries
                    .iter()
                    .map(|entry| StoredChunk {
                        chunk_id: entry.id.clone(),
                        document_url: url.to_string(),
                        text: entry.text.clone(),
                        embedding: entry.vector.clone(),
                    })
                    .collect()
            });

            written += self
                .index
                .upsert(entries)
                .await
                .map_err(|error| index_failure(Stage::Chunked, error))?;

            if let (Some(store), Some(rows)) = (&self.store, rows) {
                store.append_chunks(&rows).await.map_err(|error| {
                    PipelineError::new(Stage::Chunked, ErrorKind::Store, error)
                })?;
            }
            tracing::debug!(batch = batch_number, total_batches, written, "Batch indexed");
        }
        Ok(written)
    }

    async fn answer_question(
        &self,
        document_id: &str,
        question: &str,
    ) -> Result<String, PipelineError> {
        let vector = embed_one(self.embedder.as_ref(), question)
            .await
            .map_err(|error| embedding_failure(Stage::Answering, error))?;
        let hits = self
            .index
            .query(&vector, self.settings.top_k, Some(document_id))
            .await
            .map_err(|error| index_failure(Stage::Answering, error))?;
        tracing::debug!(hits = hits.len(), "Context retrieved");

        let context: Vec<String> = hits.into_iter().map(|hit| hit.text).collect();
        self.generator
            .answer(question, &context)
            .await
            .map_err(|error| PipelineError::new(Stage::Answering, ErrorKind::Generation, error))
    }
}

#[async_trait]
impl AnswerApi for PipelineService {
    async fn run(&self, request: QueryRequest) -> Result<QueryResponse, PipelineError> {
        PipelineService::run(self, request).await
    }

    fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}

fn advance(progress: &AtomicU8, stage: Stage) {
    progress.store(stage.as_index(), Ordering::Relaxed);
    tracing::debug!(%stage, "Stage reached");
}

fn document_failure(stage: Stage, error: DocumentError) -> PipelineError {
    let kind = match &error {
        DocumentError::UnsupportedFormat(_) => ErrorKind::UnsupportedFormat,
        DocumentError::Fetch(_) => ErrorKind::Fetch,
        DocumentError::Parse { .. } => ErrorKind::Parse,
        DocumentError::EmptyDocument => ErrorKind::EmptyDocument,
    };
    PipelineError::new(stage, kind, error)
}

fn embedding_failure(stage: Stage, error: EmbeddingClientError) -> PipelineError {
    let kind = if error.is_configuration() {
        ErrorKind::Configuration
    } else {
        ErrorKind::Embedding
    };
    PipelineError::new(stage, kind, error)
}

fn index_failure(stage: Stage, error: IndexError) -> PipelineError {
    let kind = if error.is_configuration() {
        ErrorKind::Configuration
    } else {
        ErrorKind::Index
    };
    PipelineError::new(stage, kind, error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::docx_fixture;
    use crate::embedding::HashEmbeddingClient;
    use httpmock::{
        Method::{GET, POST},
        MockServer,
    };
    use serde_json::json;
    use std::sync::Mutex;

    /// Generator that records its calls and echoes the first context chunk.
    #[derive(Default)]
    struct RecordingGenerator {
        calls: Mutex<Vec<(String, Vec<String>)>>,
        fail_on: Option<usize>,
    }

    #[async_trait]
    impl AnswerGenerator for RecordingGenerator {
        async fn answer(
            &self,
            question: &str,
            context: &[String],
        ) -> Result<String, GenerationError> {
            let mut calls = self.calls.lock().expect("calls lock");
            calls.push((question.to_string(), context.to_vec()));
            if self.fail_on == Some(calls.len()) {
                return Err(GenerationError::InvalidResponse("scripted failure".into()));
            }
            Ok(format!("answer to {question}"))
        }
    }

    fn settings() -> PipelineSettings {
        PipelineSettings {
            window: ChunkWindow::new(40, 10).expect("window"),
            batch_size: 2,
            embed_concurrency: 2,
            ..PipelineSettings::default()
        }
    }

    fn service_with(
        generator: Arc<RecordingGenerator>,
        settings: PipelineSettings,
    ) -> (PipelineService, Arc<MemoryIndex>) {
        let index = Arc::new(MemoryIndex::new(64));
        let fetcher = DocumentFetcher::new(FetchSettings {
            timeout: Duration::from_secs(5),
            max_bytes: 1024 * 1024,
        })
        .expect("fetcher");
        let service = PipelineService::new(
            fetcher,
            Arc::new(HashEmbeddingClient::new(64)),
            index.clone(),
            generator,
            settings,
        )
        .expect("service");
        (service, index)
    }

    async fn serve_docx(server: &MockServer, paragraphs: &[&str]) {
        let body = docx_fixture(paragraphs);
        server
            .mock_async(|when, then| {
                when.method(GET).path("/policy.docx");
                then.status(200).body(body);
            })
            .await;
    }

    #[tokio::test]
    async fn answers_follow_question_order() {
        let server = MockServer::start_async().await;
        serve_docx(
            &server,
            &[
                "The grace period for premium payment is thirty days.",
                "Maternity expenses are covered after two years.",
            ],
        )
        .await;
        let generator = Arc::new(RecordingGenerator::default());
        let (service, index) = service_with(generator.clone(), settings());

        let response = service
            .run(QueryRequest::new(
                server.url("/policy.docx"),
                vec!["first?".into(), "second?".into(), "third?".into()],
            ))
            .await
            .expect("answers");

        assert_eq!(
            response.answers,
            vec!["answer to first?", "answer to second?", "answer to third?"]
        );
        assert!(!index.is_empty());
        let calls = generator.calls.lock().expect("calls lock");
        assert_eq!(calls.len(), 3);
        assert!(calls.iter().all(|(_, context)| context.len() <= 3 && !context.is_empty()));

        let snapshot = service.metrics_snapshot();
        assert_eq!(snapshot.documents_processed, 1);
        assert_eq!(snapshot.questions_answered, 3);
        assert_eq!(snapshot.chunks_indexed, index.len() as u64);
    }

    #[tokio::test]
    async fn unsupported_format_never_reaches_the_network() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/notes.txt");
                then.status(200).body("plain text");
            })
            .await;
        let generator = Arc::new(RecordingGenerator::default());
        let (service, index) = service_with(generator.clone(), settings());

        let error = service
            .run(QueryRequest::new(server.url("/notes.txt"), vec!["q".into()]))
            .await
            .unwrap_err();

        assert_eq!(error.kind, ErrorKind::UnsupportedFormat);
        assert_eq!(error.stage, Stage::Received);
        mock.assert_hits(0);
        assert!(index.is_empty());
        assert!(generator.calls.lock().expect("calls lock").is_empty());
        assert_eq!(service.metrics_snapshot().failed_requests, 1);
    }

    #[tokio::test]
    async fn empty_document_stops_before_indexing() {
        let server = MockServer::start_async().await;
        serve_docx(&server, &["", "   "]).await;
        let generator = Arc::new(RecordingGenerator::default());
        let (service, index) = service_with(generator.clone(), settings());

        let error = service
            .run(QueryRequest::new(server.url("/policy.docx"), vec!["q".into()]))
            .await
            .unwrap_err();

        assert_eq!(error.kind, ErrorKind::EmptyDocument);
        assert!(index.is_empty());
        assert!(generator.calls.lock().expect("calls lock").is_empty());
    }

    #[tokio::test]
    async fn generation_failure_discards_earlier_answers() {
        let server = MockServer::start_async().await;
        serve_docx(
            &server,
            &["Room rent is capped at one percent of the sum insured."],
        )
        .await;
        let generator = Arc::new(RecordingGenerator {
            fail_on: Some(2),
            ..RecordingGenerator::default()
        });
        let (service, _index) = service_with(generator.clone(), settings());

        let error = service
            .run(QueryRequest::new(
                server.url("/policy.docx"),
                vec!["one".into(), "two".into(), "three".into()],
            ))
            .await
            .unwrap_err();

        assert_eq!(error.kind, ErrorKind::Generation);
        assert_eq!(error.stage, Stage::Answering);
        assert!(error.message.starts_with("generation failed:"));
        assert_eq!(generator.calls.lock().expect("calls lock").len(), 2);
    }

    #[tokio::test]
    async fn fetch_failure_is_reported_as_fetch_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/missing.pdf");
                then.status(404);
            })
            .await;
        let (service, _index) = service_with(Arc::new(RecordingGenerator::default()), settings());

        let error = service
            .run(QueryRequest::new(server.url("/missing.pdf"), vec!["q".into()]))
            .await
            .unwrap_err();
        assert_eq!(error.kind, ErrorKind::Fetch);
    }

    #[tokio::test]
    async fn slow_document_host_hits_the_request_budget() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/slow.pdf");
                then.status(200)
                    .delay(Duration::from_secs(2))
                    .body("%PDF-1.4");
            })
            .await;
        let (service, _index) = service_with(
            Arc::new(RecordingGenerator::default()),
            PipelineSettings {
                request_timeout: Duration::from_millis(100),
                ..settings()
            },
        );

        let error = service
            .run(QueryRequest::new(server.url("/slow.pdf"), vec!["q".into()]))
            .await
            .unwrap_err();
        assert_eq!(error.kind, ErrorKind::Timeout);
        assert_eq!(error.stage, Stage::Received);
    }

    #[tokio::test]
    async fn embedding_failures_surface_as_embedding_errors() {
        let server = MockServer::start_async().await;
        serve_docx(
            &server,
            &["Cataract surgery has a two year waiting period."],
        )
        .await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/embeddings");
                then.status(500).json_body(json!({ "error": "boom" }));
            })
            .await;
        let embedder = crate::embedding::OpenAiEmbeddingClient::new(
            &server.base_url(),
            "key",
            "model".into(),
            64,
            Duration::from_secs(5),
            crate::retry::RetryPolicy::no_retry(),
        )
        .expect("embedder");
        let fetcher = DocumentFetcher::new(FetchSettings {
            timeout: Duration::from_secs(5),
            max_bytes: 1024 * 1024,
        })
        .expect("fetcher");
        let service = PipelineService::new(
            fetcher,
            Arc::new(embedder),
            Arc::new(MemoryIndex::new(64)),
            Arc::new(RecordingGenerator::default()),
            settings(),
        )
        .expect("service");

        let error = service
            .run(QueryRequest::new(server.url("/policy.docx"), vec!["q".into()]))
            .await
            .unwrap_err();
        assert_eq!(error.kind, ErrorKind::Embedding);
        assert_eq!(error.stage, Stage::Chunked);
    }

    #[tokio::test]
    async fn indexed_chunks_are_appended_to_the_store() {
        let server = MockServer::start_async().await;
        serve_docx(
            &server,
            &["Ambulance charges are covered up to two thousand per hospitalisation event."],
        )
        .await;
        let (service, index) = service_with(Arc::new(RecordingGenerator::default()), settings());
        let store = ChunkStore::connect("sqlite::memory:").await.expect("store");
        let service = service.with_store(store.clone());
        let url = server.url("/policy.docx");

        service
            .run(QueryRequest::new(url.clone(), vec!["q".into()]))
            .await
            .expect("answers");

        let rows = store.chunks_for_document(&url).await.expect("rows");
        assert_eq!(rows.len(), index.len());
        assert!(rows.iter().all(|row| row.embedding.len() == 64));
    }

    #[test]
    fn mismatched_embedder_and_index_are_rejected() {
        let fetcher = DocumentFetcher::new(FetchSettings {
            timeout: Duration::from_secs(5),
            max_bytes: 1024,
        })
        .expect("fetcher");
        let result = PipelineService::new(
            fetcher,
            Arc::new(HashEmbeddingClient::new(32)),
            Arc::new(MemoryIndex::new(64)),
            Arc::new(RecordingGenerator::default()),
            PipelineSettings::default(),
        );
        assert!(matches!(
            result,
            Err(BuildError::Index(IndexError::DimensionMismatch { .. }))
        ));
    }
}
