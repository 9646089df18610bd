//! Conversation bookkeeping around answer generation.
//!
//! A turn moves `New -> AwaitingAnswer -> Answered` in batch mode, or
//! `New -> AwaitingAnswer -> Streaming -> Completed | Failed` when streamed.
//! The user message is durably stored before generation starts. The
//! assistant message is stored only once the answer has finished, so a
//! failed or abandoned stream leaves no partial answer behind.

use crate::rag::answer::{AnswerOptions, AnswerStream, RagService};
use crate::rag::types::{AnswerEvent, ChatReply, ChatTurn, RetrievedChunk, SourceRef};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use kbase_core::{AppError, AppResult};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};

const TITLE_CHARS: usize = 50;

/// Lifecycle of one question/answer turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    New,
    AwaitingAnswer,
    Answered,
    Streaming,
    Completed,
    Failed,
}

impl TurnPhase {
    /// Move to `next`, rejecting transitions the lifecycle does not allow.
    pub fn advance(self, next: TurnPhase) -> AppResult<TurnPhase> {
        use TurnPhase::*;
        let allowed = matches!(
            (self, next),
            (New, AwaitingAnswer)
                | (AwaitingAnswer, Answered)
                | (AwaitingAnswer, Streaming)
                | (Streaming, Completed)
                | (AwaitingAnswer, Failed)
                | (Streaming, Failed)
        );
        if allowed {
            tracing::debug!("Turn phase {:?} -> {:?}", self, next);
            Ok(next)
        } else {
            Err(AppError::Other(format!(
                "Invalid turn transition {:?} -> {:?}",
                self, next
            )))
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Answered | Self::Completed | Self::Failed)
    }
}

/// Conversation title: the first 50 chars of the opening question.
pub fn conversation_title(question: &str) -> String {
    if question.chars().count() > TITLE_CHARS {
        let head: String = question.chars().take(TITLE_CHARS).collect();
        format!("{}...", head)
    } else {
        question.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

/// A file cited by an answer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileRef {
    pub file_id: String,
    pub filename: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,

    /// External identifier clients use to continue the conversation
    pub session_id: String,

    pub knowledge_base_id: String,
    pub title: String,
    pub message_count: u32,
    pub created_at: DateTime<Utc>,
    pub last_message_at: Option<DateTime<Utc>>,
}

impl Conversation {
    pub fn new(session_id: &str, knowledge_base_id: &str, question: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            knowledge_base_id: knowledge_base_id.to_string(),
            title: conversation_title(question),
            message_count: 0,
            created_at: Utc::now(),
            last_message_at: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub id: String,
    pub conversation_id: String,
    pub role: MessageRole,
    pub content: String,
    #[serde(default)]
    pub sources: Vec<SourceRef>,
    #[serde(default)]
    pub source_files: Vec<FileRef>,
    pub created_at: DateTime<Utc>,
}

impl ConversationMessage {
    fn new(conversation_id: &str, role: MessageRole, content: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            role,
            content: content.to_string(),
            sources: Vec::new(),
            source_files: Vec::new(),
            created_at: Utc::now(),
        }
    }
}

/// Durable conversation storage.
///
/// Each append stores the message and bumps the conversation's count and
/// timestamp in a single durable write.
#[async_trait::async_trait]
pub trait ConversationStore: Send + Sync {
    async fn find_by_session(&self, session_id: &str) -> AppResult<Option<Conversation>>;

    async fn create(&self, conversation: Conversation) -> AppResult<Conversation>;

    async fn append_user_message(&self, conversation_id: &str, content: &str) -> AppResult<String>;

    /// Returns the new message id.
    async fn append_assistant_message(
        &self,
        conversation_id: &str,
        content: &str,
        sources: &[SourceRef],
        files: &[FileRef],
    ) -> AppResult<String>;

    async fn get(&self, conversation_id: &str) -> AppResult<Option<Conversation>>;

    async fn messages(&self, conversation_id: &str) -> AppResult<Vec<ConversationMessage>>;
}

/// Maps cited chunks to human-readable files.
#[async_trait::async_trait]
pub trait FileIndex: Send + Sync {
    async fn resolve_file_refs(&self, chunks: &[RetrievedChunk]) -> AppResult<Vec<FileRef>>;
}

/// Resolves files from the `file_id`/`source_file` stored with each chunk.
#[derive(Debug, Default, Clone, Copy)]
pub struct MetadataFileIndex;

#[async_trait::async_trait]
impl FileIndex for MetadataFileIndex {
    async fn resolve_file_refs(&self, chunks: &[RetrievedChunk]) -> AppResult<Vec<FileRef>> {
        let mut seen = HashSet::new();
        let mut refs = Vec::new();
        for chunk in chunks {
            let file_id = chunk.file_id.clone().or_else(|| {
                chunk
                    .metadata
                    .get("file_id")
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
            });
            let Some(file_id) = file_id else { continue };
            if !seen.insert(file_id.clone()) {
                continue;
            }
            let filename = chunk
                .source_file
                .clone()
                .unwrap_or_else(|| file_id.clone());
            refs.push(FileRef { file_id, filename });
        }
        Ok(refs)
    }
}

fn not_found(conversation_id: &str) -> AppError {
    AppError::Persistence(format!("Conversation '{}' not found", conversation_id))
}

fn lock_poisoned() -> AppError {
    AppError::Persistence("Conversation store lock poisoned".to_string())
}

fn record_message(conversation: &mut Conversation, message: &ConversationMessage) {
    conversation.message_count += 1;
    conversation.last_message_at = Some(message.created_at);
}

/// Process-local store, used by tests and one-shot runs.
#[derive(Debug, Default)]
pub struct InMemoryConversationStore {
    conversations: Mutex<HashMap<String, (Conversation, Vec<ConversationMessage>)>>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn append(&self, message: ConversationMessage) -> AppResult<String> {
        let mut conversations = self.conversations.lock().map_err(|_| lock_poisoned())?;
        let (conversation, messages) = conversations
            .get_mut(&message.conversation_id)
            .ok_or_else(|| not_found(&message.conversation_id))?;
        record_message(conversation, &message);
        let id = message.id.clone();
        messages.push(message);
        Ok(id)
    }
}

#[async_trait::async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn find_by_session(&self, session_id: &str) -> AppResult<Option<Conversation>> {
        let conversations = self.conversations.lock().map_err(|_| lock_poisoned())?;
        Ok(conversations
            .values()
            .map(|(c, _)| c)
            .find(|c| c.session_id == session_id)
            .cloned())
    }

    async fn create(&self, conversation: Conversation) -> AppResult<Conversation> {
        let mut conversations = self.conversations.lock().map_err(|_| lock_poisoned())?;
        conversations.insert(conversation.id.clone(), (conversation.clone(), Vec::new()));
        Ok(conversation)
    }

    async fn append_user_message(&self, conversation_id: &str, content: &str) -> AppResult<String> {
        self.append(ConversationMessage::new(conversation_id, MessageRole::User, content))
    }

    async fn append_assistant_message(
        &self,
        conversation_id: &str,
        content: &str,
        sources: &[SourceRef],
        files: &[FileRef],
    ) -> AppResult<String> {
        let mut message = ConversationMessage::new(conversation_id, MessageRole::Assistant, content);
        message.sources = sources.to_vec();
        message.source_files = files.to_vec();
        self.append(message)
    }

    async fn get(&self, conversation_id: &str) -> AppResult<Option<Conversation>> {
        let conversations = self.conversations.lock().map_err(|_| lock_poisoned())?;
        Ok(conversations.get(conversation_id).map(|(c, _)| c.clone()))
    }

    async fn messages(&self, conversation_id: &str) -> AppResult<Vec<ConversationMessage>> {
        let conversations = self.conversations.lock().map_err(|_| lock_poisoned())?;
        Ok(conversations
            .get(conversation_id)
            .map(|(_, m)| m.clone())
            .unwrap_or_default())
    }
}

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS conversations (
        id TEXT PRIMARY KEY,
        session_id TEXT NOT NULL,
        knowledge_base_id TEXT NOT NULL,
        title TEXT NOT NULL,
        message_count INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        last_message_at TEXT
    );

    CREATE TABLE IF NOT EXISTS messages (
        id TEXT PRIMARY KEY,
        conversation_id TEXT NOT NULL,
        role TEXT NOT NULL,
        content TEXT NOT NULL,
        sources TEXT NOT NULL,
        source_files TEXT NOT NULL,
        created_at TEXT NOT NULL,
        FOREIGN KEY (conversation_id) REFERENCES conversations(id)
    );

    CREATE INDEX IF NOT EXISTS idx_conversations_session ON conversations(session_id);
    CREATE INDEX IF NOT EXISTS idx_messages_conversation ON messages(conversation_id);
"#;

fn sql_error(action: &'static str) -> impl Fn(rusqlite::Error) -> AppError {
    move |e| AppError::Persistence(format!("Failed to {}: {}", action, e))
}

fn conversion_error<E>(column: usize, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(e))
}

fn timestamp(row: &Row<'_>, column: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(column)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| conversion_error(column, e))
}

fn json_column<T: serde::de::DeserializeOwned>(row: &Row<'_>, column: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(column)?;
    serde_json::from_str(&raw).map_err(|e| conversion_error(column, e))
}

const CONVERSATION_COLUMNS: &str =
    "id, session_id, knowledge_base_id, title, message_count, created_at, last_message_at";

fn conversation_from_row(row: &Row<'_>) -> rusqlite::Result<Conversation> {
    let last_message_at = match row.get::<_, Option<String>>(6)? {
        Some(_) => Some(timestamp(row, 6)?),
        None => None,
    };
    Ok(Conversation {
        id: row.get(0)?,
        session_id: row.get(1)?,
        knowledge_base_id: row.get(2)?,
        title: row.get(3)?,
        message_count: row.get::<_, i64>(4)? as u32,
        created_at: timestamp(row, 5)?,
        last_message_at,
    })
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<ConversationMessage> {
    let role = match row.get::<_, String>(2)?.as_str() {
        "user" => MessageRole::User,
        "assistant" => MessageRole::Assistant,
        other => {
            return Err(rusqlite::Error::InvalidColumnType(
                2,
                format!("role '{}'", other),
                rusqlite::types::Type::Text,
            ))
        }
    };
    Ok(ConversationMessage {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        role,
        content: row.get(3)?,
        sources: json_column(row, 4)?,
        source_files: json_column(row, 5)?,
        created_at: timestamp(row, 6)?,
    })
}

/// SQLite-backed store.
///
/// The connection is shared behind a mutex and every call runs on the
/// blocking pool. Appending a message and bumping the conversation's count
/// and timestamp happen in one transaction.
#[derive(Clone)]
pub struct SqliteConversationStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteConversationStore {
    /// Open (or create) the database at `db_path`.
    pub fn open(db_path: &Path) -> AppResult<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                AppError::Persistence(format!("Failed to create {:?}: {}", parent, e))
            })?;
        }
        let conn = Connection::open(db_path).map_err(sql_error("open conversation database"))?;
        tracing::debug!("Opened conversation database at {:?}", db_path);
        Self::init(conn)
    }

    pub fn in_memory() -> AppResult<Self> {
        let conn = Connection::open_in_memory().map_err(sql_error("open conversation database"))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> AppResult<Self> {
        conn.execute_batch(SCHEMA)
            .map_err(sql_error("create conversation tables"))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> AppResult<T>
    where
        F: FnOnce(&mut Connection) -> AppResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().map_err(|_| lock_poisoned())?;
            f(&mut *conn)
        })
        .await
        .map_err(|e| AppError::Persistence(format!("Conversation task failed: {}", e)))?
    }

    fn insert_message(conn: &mut Connection, message: &ConversationMessage) -> AppResult<()> {
        let role = match message.role {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        };
        let sources = serde_json::to_string(&message.sources)?;
        let source_files = serde_json::to_string(&message.source_files)?;
        let created_at = message.created_at.to_rfc3339();

        let tx = conn.transaction().map_err(sql_error("begin transaction"))?;
        let updated = tx
            .execute(
                "UPDATE conversations
                 SET message_count = message_count + 1, last_message_at = ?2
                 WHERE id = ?1",
                params![message.conversation_id, created_at],
            )
            .map_err(sql_error("update conversation"))?;
        if updated == 0 {
            // dropping the transaction rolls it back
            return Err(not_found(&message.conversation_id));
        }
        tx.execute(
            "INSERT INTO messages (id, conversation_id, role, content, sources, source_files, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                message.id,
                message.conversation_id,
                role,
                message.content,
                sources,
                source_files,
                created_at
            ],
        )
        .map_err(sql_error("insert message"))?;
        tx.commit().map_err(sql_error("commit message"))
    }

    async fn append(&self, message: ConversationMessage) -> AppResult<String> {
        self.with_conn(move |conn| {
            Self::insert_message(conn, &message)?;
            Ok(message.id)
        })
        .await
    }
}

#[async_trait::async_trait]
impl ConversationStore for SqliteConversationStore {
    async fn find_by_session(&self, session_id: &str) -> AppResult<Option<Conversation>> {
        let session_id = session_id.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                &format!(
                    "SELECT {} FROM conversations WHERE session_id = ?1 ORDER BY created_at LIMIT 1",
                    CONVERSATION_COLUMNS
                ),
                params![session_id],
                conversation_from_row,
            )
            .optional()
            .map_err(sql_error("find conversation"))
        })
        .await
    }

    async fn create(&self, conversation: Conversation) -> AppResult<Conversation> {
        self.with_conn(move |conn| {
            conn.execute(
                &format!(
                    "INSERT INTO conversations ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    CONVERSATION_COLUMNS
                ),
                params![
                    conversation.id,
                    conversation.session_id,
                    conversation.knowledge_base_id,
                    conversation.title,
                    conversation.message_count as i64,
                    conversation.created_at.to_rfc3339(),
                    conversation.last_message_at.map(|t| t.to_rfc3339())
                ],
            )
            .map_err(sql_error("create conversation"))?;
            tracing::debug!("Created conversation {}", conversation.id);
            Ok(conversation)
        })
        .await
    }

    async fn append_user_message(&self, conversation_id: &str, content: &str) -> AppResult<String> {
        self.append(ConversationMessage::new(conversation_id, MessageRole::User, content))
            .await
    }

    async fn append_assistant_message(
        &self,
        conversation_id: &str,
        content: &str,
        sources: &[SourceRef],
        files: &[FileRef],
    ) -> AppResult<String> {
        let mut message = ConversationMessage::new(conversation_id, MessageRole::Assistant, content);
        message.sources = sources.to_vec();
        message.source_files = files.to_vec();
        self.append(message).await
    }

    async fn get(&self, conversation_id: &str) -> AppResult<Option<Conversation>> {
        let conversation_id = conversation_id.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                &format!("SELECT {} FROM conversations WHERE id = ?1", CONVERSATION_COLUMNS),
                params![conversation_id],
                conversation_from_row,
            )
            .optional()
            .map_err(sql_error("load conversation"))
        })
        .await
    }

    async fn messages(&self, conversation_id: &str) -> AppResult<Vec<ConversationMessage>> {
        let conversation_id = conversation_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, conversation_id, role, content, sources, source_files, created_at
                     FROM messages WHERE conversation_id = ?1 ORDER BY rowid",
                )
                .map_err(sql_error("prepare message query"))?;
            let rows = stmt
                .query_map(params![conversation_id], message_from_row)
                .map_err(sql_error("query messages"))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(sql_error("read messages"))
        })
        .await
    }
}

/// Runs question/answer turns and records them.
#[derive(Clone)]
pub struct ConversationTracker {
    store: Arc<dyn ConversationStore>,
    files: Arc<dyn FileIndex>,
    rag: RagService,
}

/// State captured once the user message is stored.
struct OpenTurn {
    conversation_id: String,
    session_id: String,
    phase: TurnPhase,
}

impl ConversationTracker {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        files: Arc<dyn FileIndex>,
        rag: RagService,
    ) -> Self {
        Self { store, files, rag }
    }

    pub fn store(&self) -> &Arc<dyn ConversationStore> {
        &self.store
    }

    /// Look up the conversation by session id, or create one.
    ///
    /// Not atomic: two concurrent first turns with the same session id may
    /// both create a conversation.
    async fn open(&self, turn: &ChatTurn) -> AppResult<Conversation> {
        if let Some(session_id) = turn.session_id.as_deref() {
            if let Some(existing) = self.store.find_by_session(session_id).await? {
                return Ok(existing);
            }
        }

        let session_id = turn
            .session_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let conversation = Conversation::new(&session_id, &turn.knowledge_base_id, &turn.question);
        tracing::info!("Starting conversation {} ({})", conversation.id, conversation.title);
        self.store.create(conversation).await
    }

    /// Store the user's question; generation must not start before this returns.
    async fn begin(&self, turn: &ChatTurn) -> AppResult<OpenTurn> {
        let conversation = self.open(turn).await?;
        self.store
            .append_user_message(&conversation.id, &turn.question)
            .await?;

        Ok(OpenTurn {
            conversation_id: conversation.id,
            session_id: conversation.session_id,
            phase: TurnPhase::New.advance(TurnPhase::AwaitingAnswer)?,
        })
    }

    /// Resolve citations and store the assistant message; returns its id and file names.
    async fn complete(
        store: &dyn ConversationStore,
        files: &dyn FileIndex,
        conversation_id: &str,
        answer: &str,
        sources: &[SourceRef],
        chunks: &[RetrievedChunk],
    ) -> AppResult<(String, Vec<String>)> {
        let refs = files.resolve_file_refs(chunks).await?;
        let message_id = store
            .append_assistant_message(conversation_id, answer, sources, &refs)
            .await?;
        Ok((message_id, refs.into_iter().map(|r| r.filename).collect()))
    }

    fn options(turn: &ChatTurn) -> AnswerOptions {
        AnswerOptions {
            system_prompt: turn.system_prompt.clone(),
            temperature: turn.temperature,
        }
    }

    /// Batch turn. Errors are returned after the user message is stored.
    pub async fn answer(&self, turn: &ChatTurn, chunks: Vec<RetrievedChunk>) -> AppResult<ChatReply> {
        let mut open = self.begin(turn).await?;

        let result = match self
            .rag
            .generate_answer(&turn.question, &chunks, &Self::options(turn))
            .await
        {
            Ok(result) => result,
            Err(e) => {
                open.phase = open.phase.advance(TurnPhase::Failed)?;
                tracing::warn!(
                    "Turn in conversation {} ended {:?}: {}",
                    open.conversation_id,
                    open.phase,
                    e
                );
                return Err(e);
            }
        };

        let (message_id, source_files) = Self::complete(
            self.store.as_ref(),
            self.files.as_ref(),
            &open.conversation_id,
            &result.answer,
            &result.sources,
            &chunks,
        )
        .await?;
        open.phase = open.phase.advance(TurnPhase::Answered)?;
        tracing::debug!(
            "Turn in conversation {} ended {:?}",
            open.conversation_id,
            open.phase
        );

        Ok(ChatReply {
            answer: result.answer,
            sources: result.sources,
            conversation_id: open.session_id,
            message_id,
            usage: result.usage,
            retrieved_chunks: chunks.len(),
            source_files,
        })
    }

    /// Streamed turn: `start`, `content*`, then `end` or `error`.
    ///
    /// The assistant message is stored when the model's finish signal is
    /// seen; dropping the stream earlier stores nothing.
    pub async fn answer_stream(&self, turn: &ChatTurn, chunks: Vec<RetrievedChunk>) -> AnswerStream {
        let open = match self.begin(turn).await {
            Ok(open) => open,
            Err(e) => {
                tracing::error!("Failed to record question: {}", e);
                return stream::iter([AnswerEvent::Error {
                    message: e.user_message(),
                }])
                .boxed();
            }
        };

        let inner = self
            .rag
            .stream_answer(&turn.question, &chunks, &Self::options(turn))
            .await;

        let start = AnswerEvent::Start {
            conversation_id: open.session_id.clone(),
        };
        let store = Arc::clone(&self.store);
        let files = Arc::clone(&self.files);
        let chunks = Arc::new(chunks);
        let conversation_id = Arc::new(open.conversation_id);
        let phase = Arc::new(Mutex::new(open.phase));

        let events = inner.then(move |event| {
            let store = Arc::clone(&store);
            let files = Arc::clone(&files);
            let chunks = Arc::clone(&chunks);
            let conversation_id = Arc::clone(&conversation_id);
            let phase = Arc::clone(&phase);
            async move {
                match event {
                    AnswerEvent::Content { .. } => {
                        set_phase(&phase, TurnPhase::Streaming);
                        event
                    }
                    AnswerEvent::End {
                        answer,
                        sources,
                        context_chunks,
                        ..
                    } => {
                        set_phase(&phase, TurnPhase::Streaming);
                        match Self::complete(
                            store.as_ref(),
                            files.as_ref(),
                            &conversation_id,
                            &answer,
                            &sources,
                            &chunks,
                        )
                        .await
                        {
                            Ok((_, source_files)) => {
                                set_phase(&phase, TurnPhase::Completed);
                                AnswerEvent::End {
                                    answer,
                                    sources,
                                    source_files,
                                    context_chunks,
                                }
                            }
                            Err(e) => {
                                tracing::error!("Failed to store answer: {}", e);
                                set_phase(&phase, TurnPhase::Failed);
                                AnswerEvent::Error {
                                    message: e.user_message(),
                                }
                            }
                        }
                    }
                    AnswerEvent::Error { .. } => {
                        set_phase(&phase, TurnPhase::Failed);
                        event
                    }
                    AnswerEvent::Start { .. } => event,
                }
            }
        });

        stream::once(async move { start }).chain(events).boxed()
    }
}

fn set_phase(phase: &Mutex<TurnPhase>, next: TurnPhase) {
    if let Ok(mut current) = phase.lock() {
        if *current == next {
            return;
        }
        match current.advance(next) {
            Ok(next) => *current = next,
            Err(e) => tracing::warn!("{}", e),
        }
    }
}
