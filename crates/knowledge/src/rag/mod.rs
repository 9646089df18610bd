//! Retrieval-augmented answering.
//!
//! Retrieval, grounded answer generation and conversation bookkeeping.

pub mod answer;
pub mod conversation;
pub mod search;
pub mod types;

pub use answer::{build_context, extract_sources, AnswerOptions, AnswerStream, RagService};
pub use conversation::{
    Conversation, ConversationMessage, ConversationStore, ConversationTracker, FileIndex, FileRef,
    InMemoryConversationStore, MessageRole, MetadataFileIndex, SqliteConversationStore,
    TurnPhase,
};
pub use search::RetrievalGateway;
pub use types::{AnswerEvent, AnswerResult, ChatReply, ChatTurn, RetrievedChunk, SourceRef};
