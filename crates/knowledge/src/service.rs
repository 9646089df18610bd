//! Knowledge service: the explicitly wired entry point for bases, ingestion
//! and question answering.

use crate::chunk::{Chunk, ChunkPipeline};
use crate::config;
use crate::embeddings::{create_provider, EmbeddingConfig, EmbeddingProvider};
use crate::extract::{validate_upload, ExtractorRegistry};
use crate::indexer::{IndexTarget, Indexer};
use crate::rag::answer::{AnswerStream, RagService};
use crate::rag::conversation::{
    ConversationStore, ConversationTracker, FileIndex, MetadataFileIndex, SqliteConversationStore,
};
use crate::rag::search::RetrievalGateway;
use crate::rag::types::{AnswerEvent, ChatReply, ChatTurn, RetrievedChunk};
use crate::types::{IngestReport, KnowledgeBaseConfig, ProcessingStatus};
use crate::lancedb_index::LanceDbVectorIndex;
use crate::vector_index::VectorIndex;
use futures::stream::{self, StreamExt};
use kbase_core::{AppConfig, AppError, AppResult};
use kbase_llm::{create_client, LlmClient};
use kbase_prompt::{load_prompt, DEFAULT_RAG_PROMPT_ID};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Wires configuration, providers, the vector index and conversations.
pub struct KnowledgeService {
    app: AppConfig,
    embeddings: Arc<dyn EmbeddingProvider>,
    llm: Arc<dyn LlmClient>,
    extractors: ExtractorRegistry,
    conversations: Arc<dyn ConversationStore>,
    files: Arc<dyn FileIndex>,

    /// Shared index used instead of each base's LanceDB directory
    vector_index: Option<Arc<dyn VectorIndex>>,
}

impl KnowledgeService {
    pub fn new(
        app: AppConfig,
        embeddings: Arc<dyn EmbeddingProvider>,
        llm: Arc<dyn LlmClient>,
        conversations: Arc<dyn ConversationStore>,
    ) -> Self {
        Self {
            app,
            embeddings,
            llm,
            extractors: ExtractorRegistry::default(),
            conversations,
            files: Arc::new(MetadataFileIndex),
            vector_index: None,
        }
    }

    /// Build every collaborator from configuration.
    pub fn from_config(app: &AppConfig) -> AppResult<Self> {
        let api_key = app.resolve_api_key();
        let llm_settings = &app.llm;

        let embeddings =
            create_provider(&EmbeddingConfig::from_settings(llm_settings), api_key.as_deref())?;

        let llm = create_client(
            &llm_settings.provider,
            llm_settings.endpoint_override(),
            api_key.as_deref(),
            Duration::from_secs(llm_settings.chat_timeout_secs),
            llm_settings.max_retries,
        )
        .map_err(AppError::Config)?;

        let conversations = Arc::new(SqliteConversationStore::open(
            &config::get_conversations_db(&app.workspace),
        )?);

        tracing::debug!(
            "Knowledge service ready: chat={} embeddings={} ({})",
            llm.provider_name(),
            embeddings.provider_name(),
            embeddings.model_name()
        );

        Ok(Self::new(app.clone(), embeddings, llm, conversations))
    }

    pub fn with_extractors(mut self, extractors: ExtractorRegistry) -> Self {
        self.extractors = extractors;
        self
    }

    pub fn with_file_index(mut self, files: Arc<dyn FileIndex>) -> Self {
        self.files = files;
        self
    }

    pub fn with_vector_index(mut self, index: Arc<dyn VectorIndex>) -> Self {
        self.vector_index = Some(index);
        self
    }

    pub fn workspace(&self) -> &Path {
        &self.app.workspace
    }

    pub fn conversations(&self) -> &Arc<dyn ConversationStore> {
        &self.conversations
    }

    /// Create a base; fails if it already exists.
    pub fn create_base(&self, name: &str, description: &str) -> AppResult<KnowledgeBaseConfig> {
        if name.trim().is_empty() {
            return Err(AppError::Input("Knowledge base name must not be empty".to_string()));
        }
        if config::base_exists(self.workspace(), name) {
            return Err(AppError::Knowledge(format!(
                "Knowledge base '{}' already exists",
                name
            )));
        }

        let mut base = KnowledgeBaseConfig::new(name, &self.app);
        base.description = description.to_string();
        base.embedding_model = self.embeddings.model_name().to_string();
        base.embedding_dimensions = self.embeddings.dimensions();
        config::save_config(self.workspace(), &base)?;

        tracing::info!(
            "Created knowledge base '{}' (collection {})",
            name,
            base.collection_name
        );
        Ok(base)
    }

    /// Delete a base and its index. Returns whether anything was removed.
    pub fn delete_base(&self, name: &str) -> AppResult<bool> {
        let removed = config::remove_base_dir(self.workspace(), name)?;
        if removed {
            tracing::info!("Deleted knowledge base '{}'", name);
        } else {
            tracing::debug!("Knowledge base '{}' did not exist", name);
        }
        Ok(removed)
    }

    fn load_base(&self, name: &str) -> AppResult<KnowledgeBaseConfig> {
        let base = config::load_config(self.workspace(), name)?;
        let expected = EmbeddingConfig::for_base(&self.app.llm, &base);
        let actual = EmbeddingConfig {
            model: self.embeddings.model_name().to_string(),
            dimensions: self.embeddings.dimensions(),
            ..expected.clone()
        };
        expected.validate_consistency(&actual)?;
        Ok(base)
    }

    async fn open_index(&self, base: &KnowledgeBaseConfig) -> AppResult<Arc<dyn VectorIndex>> {
        if let Some(index) = &self.vector_index {
            return Ok(Arc::clone(index));
        }
        let path = config::get_index_path(self.workspace(), &base.name);
        let index = LanceDbVectorIndex::connect(&path, base.embedding_dimensions).await?;
        Ok(Arc::new(index))
    }

    fn pipeline_for(&self, base: &KnowledgeBaseConfig) -> ChunkPipeline {
        ChunkPipeline::new(&base.chunking(self.app.chunking.coalesce), base.splitter)
    }

    /// Validate, extract and chunk a file without indexing it.
    pub async fn preview_chunks(
        &self,
        base_name: &str,
        filename: &str,
        bytes: &[u8],
    ) -> AppResult<Vec<Chunk>> {
        let base = config::load_config(self.workspace(), base_name)?;
        let mime = validate_upload(filename, None, bytes.len() as u64, &self.app.upload)?;
        let document = self.extractors.extract(bytes, filename, &mime).await?;
        Ok(self
            .pipeline_for(&base)
            .process(document.content.text(), &document.metadata))
    }

    /// Ingest one file: validate, extract, chunk, embed and index.
    ///
    /// Rejected uploads are returned as errors before anything is written.
    /// Failures after that point produce a `Failed` report.
    #[tracing::instrument(skip(self, bytes), fields(size = bytes.len()))]
    pub async fn ingest_file(
        &self,
        base_name: &str,
        filename: &str,
        bytes: &[u8],
        mime_type: Option<&str>,
    ) -> AppResult<IngestReport> {
        let start = Instant::now();
        let base = self.load_base(base_name)?;
        let mime = validate_upload(filename, mime_type, bytes.len() as u64, &self.app.upload)?;

        let mut report = IngestReport {
            file_id: uuid::Uuid::new_v4().to_string(),
            filename: filename.to_string(),
            status: ProcessingStatus::Processing,
            chunk_count: 0,
            text_length: 0,
            error: None,
            duration_secs: 0.0,
        };

        match self.process(&base, &mut report, bytes, &mime).await {
            Ok(()) => report.status = ProcessingStatus::Completed,
            Err(e) => {
                tracing::error!("Failed to process {}: {}", filename, e);
                report.status = ProcessingStatus::Failed;
                report.error = Some(e.to_string());
            }
        }
        report.duration_secs = start.elapsed().as_secs_f64();

        tracing::info!(
            "Ingested {} into '{}': {} ({} chunks in {:.2}s)",
            filename,
            base_name,
            report.status.as_str(),
            report.chunk_count,
            report.duration_secs
        );
        Ok(report)
    }

    async fn process(
        &self,
        base: &KnowledgeBaseConfig,
        report: &mut IngestReport,
        bytes: &[u8],
        mime: &str,
    ) -> AppResult<()> {
        let document = self.extractors.extract(bytes, &report.filename, mime).await?;
        let text = document.content.text();
        report.text_length = text.chars().count();
        if text.trim().is_empty() {
            return Err(AppError::Extraction(format!(
                "No text content extracted from {}",
                report.filename
            )));
        }

        let chunks = self.pipeline_for(base).process(text, &document.metadata);
        if chunks.is_empty() {
            return Err(AppError::Knowledge(format!(
                "No chunks produced from {}",
                report.filename
            )));
        }

        let index = self.open_index(base).await?;
        let indexer = Indexer::new(Arc::clone(&self.embeddings), index);
        let target = IndexTarget {
            collection: &base.collection_name,
            knowledge_base_id: &base.name,
            file_id: &report.file_id,
        };
        let ids = indexer.index_chunks(target, &chunks).await?;

        report.chunk_count = ids.len();
        Ok(())
    }

    /// Retrieve context for a question.
    ///
    /// Empty when the base has nothing relevant or its index cannot be opened.
    pub async fn retrieve(&self, base: &KnowledgeBaseConfig, question: &str) -> Vec<RetrievedChunk> {
        let index = match self.open_index(base).await {
            Ok(index) => index,
            Err(e) => {
                tracing::warn!("Index for '{}' unavailable, answering without context: {}", base.name, e);
                return Vec::new();
            }
        };
        let gateway = RetrievalGateway::new(Arc::clone(&self.embeddings), index);
        gateway
            .search(&base.collection_name, question, self.app.retrieval.max_chunks)
            .await
    }

    fn tracker(&self) -> AppResult<ConversationTracker> {
        let prompt = load_prompt(self.workspace(), DEFAULT_RAG_PROMPT_ID)?;
        let rag = RagService::new(Arc::clone(&self.llm), self.app.llm.chat_model.clone())
            .with_prompt(prompt)
            .with_temperature(self.app.retrieval.temperature);
        Ok(ConversationTracker::new(
            Arc::clone(&self.conversations),
            Arc::clone(&self.files),
            rag,
        ))
    }

    /// Answer a question in one shot.
    pub async fn ask(&self, turn: &ChatTurn) -> AppResult<ChatReply> {
        let base = self.load_base(&turn.knowledge_base_id)?;
        let chunks = self.retrieve(&base, &turn.question).await;
        self.tracker()?.answer(turn, chunks).await
    }

    /// Answer a question as a stream of events.
    pub async fn ask_stream(&self, turn: &ChatTurn) -> AnswerStream {
        let prepared = match self.load_base(&turn.knowledge_base_id) {
            Ok(base) => {
                let chunks = self.retrieve(&base, &turn.question).await;
                self.tracker().map(|tracker| (tracker, chunks))
            }
            Err(e) => Err(e),
        };

        match prepared {
            Ok((tracker, chunks)) => tracker.answer_stream(turn, chunks).await,
            Err(e) => {
                tracing::error!("Cannot answer question: {}", e);
                stream::iter([AnswerEvent::Error {
                    message: e.user_message(),
                }])
                .boxed()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::MockEmbeddings;
    use crate::rag::conversation::InMemoryConversationStore;
    use crate::vector_index::InMemoryVectorIndex;
    use kbase_llm::MockLlmClient;
    use tempfile::TempDir;

    const GUIDE: &str = "# Vector search\n\nEmbeddings map text to vectors. Nearest neighbour search over those vectors finds related passages quickly.\n\n## Chunking\n\nDocuments are split into overlapping chunks before embedding so each vector covers a focused passage of text.";

    fn service(temp: &TempDir, llm: MockLlmClient) -> KnowledgeService {
        let mut app = AppConfig::default();
        app.workspace = temp.path().to_path_buf();
        app.chunking.coalesce.min_chars = 20;
        app.chunking.coalesce.min_words = 3;
        KnowledgeService::new(
            app,
            Arc::new(MockEmbeddings::new(64)),
            Arc::new(llm),
            Arc::new(InMemoryConversationStore::new()),
        )
    }

    #[test]
    fn test_create_and_delete_base() {
        let temp = TempDir::new().unwrap();
        let service = service(&temp, MockLlmClient::new());

        let base = service.create_base("docs", "Product docs").unwrap();
        assert_eq!(base.collection_name, "kb_docs");
        assert_eq!(base.embedding_model, "hashed-bow-v1");
        assert_eq!(base.embedding_dimensions, 64);
        assert!(service.create_base("docs", "").is_err());

        assert!(service.delete_base("docs").unwrap());
        assert!(!service.delete_base("docs").unwrap());
    }

    #[tokio::test]
    async fn test_ingest_then_ask() {
        let temp = TempDir::new().unwrap();
        let service = service(&temp, MockLlmClient::answering(&["Vectors."]));
        service.create_base("docs", "").unwrap();

        let report = service
            .ingest_file("docs", "guide.md", GUIDE.as_bytes(), Some("text/markdown"))
            .await
            .unwrap();
        assert_eq!(report.status, ProcessingStatus::Completed);
        assert!(report.chunk_count >= 1);
        assert!(config::get_index_path(temp.path(), "docs").exists());

        let reply = service
            .ask(&ChatTurn::new("docs", "How does nearest neighbour search work?"))
            .await
            .unwrap();
        assert_eq!(reply.answer, "Vectors.");
        assert!(reply.retrieved_chunks >= 1);
        assert_eq!(reply.sources[0].file_name, "guide.md");
        assert_eq!(reply.source_files, vec!["guide.md"]);
    }

    #[tokio::test]
    async fn test_ask_stream_events() {
        let temp = TempDir::new().unwrap();
        let service = service(&temp, MockLlmClient::answering(&["a", "b"]))
            .with_vector_index(Arc::new(InMemoryVectorIndex::new()));
        service.create_base("docs", "").unwrap();
        service
            .ingest_file("docs", "guide.md", GUIDE.as_bytes(), None)
            .await
            .unwrap();

        let turn = ChatTurn::new("docs", "chunking").with_session("s-1");
        let events: Vec<_> = service.ask_stream(&turn).await.collect().await;
        assert!(matches!(events[0], AnswerEvent::Start { .. }));
        assert!(matches!(events.last(), Some(AnswerEvent::End { answer, .. }) if answer == "ab"));
    }

    #[tokio::test]
    async fn test_concurrent_ingests_keep_both_files() {
        let temp = TempDir::new().unwrap();
        let service = service(&temp, MockLlmClient::new());
        let base = service.create_base("docs", "").unwrap();
        service
            .ingest_file("docs", "guide.md", GUIDE.as_bytes(), None)
            .await
            .unwrap();

        let other = GUIDE.replace("Vector search", "Keyword search");
        let (a, b) = tokio::join!(
            service.ingest_file("docs", "a.md", GUIDE.as_bytes(), None),
            service.ingest_file("docs", "b.md", other.as_bytes(), None),
        );
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_eq!(a.status, ProcessingStatus::Completed);
        assert_eq!(b.status, ProcessingStatus::Completed);

        let index = LanceDbVectorIndex::connect(&config::get_index_path(temp.path(), "docs"), 64)
            .await
            .unwrap();
        let stored = index.count(&base.collection_name).await.unwrap();
        assert!(stored >= a.chunk_count + b.chunk_count + 1);
    }

    #[tokio::test]
    async fn test_unreadable_index_answers_without_context() {
        let temp = TempDir::new().unwrap();
        let service = service(&temp, MockLlmClient::answering(&["No context."]));
        service.create_base("docs", "").unwrap();
        // a plain file where the index directory belongs
        std::fs::write(config::get_index_path(temp.path(), "docs"), "{not json").unwrap();

        let reply = service.ask(&ChatTurn::new("docs", "q")).await.unwrap();
        assert_eq!(reply.answer, "No context.");
        assert_eq!(reply.retrieved_chunks, 0);
        assert!(reply.sources.is_empty());

        let events: Vec<_> = service
            .ask_stream(&ChatTurn::new("docs", "q"))
            .await
            .collect()
            .await;
        assert!(matches!(events.last(), Some(AnswerEvent::End { answer, .. }) if answer == "No context."));
    }

    #[tokio::test]
    async fn test_ask_unknown_base_is_error_event() {
        let temp = TempDir::new().unwrap();
        let service = service(&temp, MockLlmClient::new());

        let events: Vec<_> = service
            .ask_stream(&ChatTurn::new("missing", "q"))
            .await
            .collect()
            .await;
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], AnswerEvent::Error { message } if message == "Failed to process question"));
    }

    #[tokio::test]
    async fn test_rejected_upload_is_input_error() {
        let temp = TempDir::new().unwrap();
        let service = service(&temp, MockLlmClient::new());
        service.create_base("docs", "").unwrap();

        let err = service
            .ingest_file("docs", "tool.exe", b"MZ", None)
            .await
            .unwrap_err();
        assert!(err.is_client_error());
        assert!(!config::get_index_path(temp.path(), "docs").exists());
    }

    #[tokio::test]
    async fn test_extraction_failure_marks_report_failed() {
        let temp = TempDir::new().unwrap();
        let service = service(&temp, MockLlmClient::new());
        service.create_base("docs", "").unwrap();

        let report = service
            .ingest_file("docs", "notes.txt", &[0xff, 0xfe, 0x00], None)
            .await
            .unwrap();
        assert_eq!(report.status, ProcessingStatus::Failed);
        assert!(report.error.unwrap().contains("UTF-8"));
        assert_eq!(report.chunk_count, 0);
    }

    #[tokio::test]
    async fn test_preview_chunks() {
        let temp = TempDir::new().unwrap();
        let service = service(&temp, MockLlmClient::new());
        service.create_base("docs", "").unwrap();

        let chunks = service
            .preview_chunks("docs", "guide.md", GUIDE.as_bytes())
            .await
            .unwrap();
        assert!(!chunks.is_empty());
        assert_eq!(chunks[0].metadata_str("chunk_method"), Some("markdown"));
        assert!(!config::get_index_path(temp.path(), "docs").exists());
    }
}
