//! Knowledge base core for kbase.
//!
//! Documents are validated, extracted, split into size-bounded chunks,
//! embedded and stored in a vector index. Questions are answered from the
//! retrieved chunks, with each turn recorded in a conversation log.
//!
//! # Example
//! ```no_run
//! use kbase_core::AppConfig;
//! use kbase_knowledge::{ChatTurn, KnowledgeService};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let service = KnowledgeService::from_config(&AppConfig::load()?)?;
//! service.create_base("docs", "Product documentation")?;
//! service
//!     .ingest_file("docs", "guide.md", b"# Guide\n\nHello", None)
//!     .await?;
//! let reply = service.ask(&ChatTurn::new("docs", "What does the guide say?")).await?;
//! println!("{}", reply.answer);
//! # Ok(())
//! # }
//! ```

pub mod chunk;
pub mod config;
pub mod embeddings;
pub mod extract;
pub mod indexer;
pub mod lancedb_index;
pub mod rag;
pub mod service;
pub mod types;
pub mod vector_index;

#[cfg(test)]
mod tests;

// Re-export commonly used types
pub use chunk::{Chunk, ChunkPipeline, Metadata, SplitterKind};
pub use rag::{AnswerEvent, ChatReply, ChatTurn, RetrievedChunk, SourceRef};
pub use service::KnowledgeService;
pub use types::{IngestReport, KnowledgeBaseConfig, ProcessingStatus};
