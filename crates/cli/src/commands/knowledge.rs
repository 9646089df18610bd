//! Knowledge command handler.
//!
//! Creates, deletes and fills knowledge bases.

use clap::{Args, Subcommand};
use kbase_core::{config::AppConfig, AppError, AppResult};
use kbase_knowledge::{KnowledgeService, ProcessingStatus};
use std::path::{Path, PathBuf};

/// Knowledge base management
#[derive(Args, Debug)]
pub struct KnowledgeCommand {
    #[command(subcommand)]
    pub action: KnowledgeAction,
}

#[derive(Subcommand, Debug)]
pub enum KnowledgeAction {
    /// Create an empty knowledge base
    Create(KnowledgeCreateCommand),
    /// Delete a knowledge base and its index
    Delete(KnowledgeDeleteCommand),
    /// Ingest files into a knowledge base
    Ingest(KnowledgeIngestCommand),
    /// Show how a file would be chunked, without indexing it
    Chunk(KnowledgeChunkCommand),
}

/// Create a knowledge base
#[derive(Args, Debug)]
pub struct KnowledgeCreateCommand {
    /// Knowledge base name
    pub base: String,

    /// Free-form description
    #[arg(short, long, default_value = "")]
    pub description: String,
}

impl KnowledgeCreateCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing knowledge create command for base '{}'", self.base);

        let service = KnowledgeService::from_config(config)?;
        let base = service.create_base(&self.base, &self.description)?;

        println!(
            "Created knowledge base '{}' (embeddings: {}, {} dims)",
            base.name, base.embedding_model, base.embedding_dimensions
        );
        Ok(())
    }
}

/// Delete a knowledge base
#[derive(Args, Debug)]
pub struct KnowledgeDeleteCommand {
    /// Knowledge base name
    pub base: String,
}

impl KnowledgeDeleteCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing knowledge delete command for base '{}'", self.base);

        let service = KnowledgeService::from_config(config)?;
        if service.delete_base(&self.base)? {
            println!("Knowledge base '{}' deleted", self.base);
        } else {
            println!("Knowledge base '{}' does not exist", self.base);
        }
        Ok(())
    }
}

/// Ingest files
#[derive(Args, Debug)]
pub struct KnowledgeIngestCommand {
    /// Knowledge base name
    pub base: String,

    /// Files to ingest
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// MIME type to declare for every file (default: guessed from extension)
    #[arg(long)]
    pub mime: Option<String>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl KnowledgeIngestCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!(
            "Executing knowledge ingest command for base '{}' ({} files)",
            self.base,
            self.files.len()
        );

        let service = KnowledgeService::from_config(config)?;
        let mut reports = Vec::with_capacity(self.files.len());
        let mut failed = 0usize;

        for path in &self.files {
            let (filename, bytes) = read_file(path)?;
            let report = service
                .ingest_file(&self.base, &filename, &bytes, self.mime.as_deref())
                .await?;

            if report.status == ProcessingStatus::Failed {
                failed += 1;
            }
            if !self.json {
                match &report.error {
                    None => println!(
                        "{}: {} chunks ({} chars) in {:.2}s",
                        report.filename, report.chunk_count, report.text_length, report.duration_secs
                    ),
                    Some(error) => println!("{}: failed: {}", report.filename, error),
                }
            }
            reports.push(report);
        }

        if self.json {
            let json = serde_json::to_string_pretty(&reports)
                .map_err(|e| AppError::Serialization(e.to_string()))?;
            println!("{}", json);
        }

        if failed > 0 {
            return Err(AppError::Knowledge(format!(
                "{} of {} files failed to ingest",
                failed,
                reports.len()
            )));
        }
        Ok(())
    }
}

/// Preview chunking
#[derive(Args, Debug)]
pub struct KnowledgeChunkCommand {
    /// Knowledge base name (its splitter and sizes are used)
    pub base: String,

    /// File to chunk
    pub file: PathBuf,
}

impl KnowledgeChunkCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing knowledge chunk command for {:?}", self.file);

        let service = KnowledgeService::from_config(config)?;
        let (filename, bytes) = read_file(&self.file)?;
        let chunks = service.preview_chunks(&self.base, &filename, &bytes).await?;

        let json = serde_json::to_string_pretty(&chunks)
            .map_err(|e| AppError::Serialization(e.to_string()))?;
        println!("{}", json);
        Ok(())
    }
}

fn read_file(path: &Path) -> AppResult<(String, Vec<u8>)> {
    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| AppError::Input(format!("Not a file path: {:?}", path)))?;
    let bytes = std::fs::read(path)?;
    Ok((filename, bytes))
}

impl KnowledgeCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        match &self.action {
            KnowledgeAction::Create(cmd) => cmd.execute(config).await,
            KnowledgeAction::Delete(cmd) => cmd.execute(config).await,
            KnowledgeAction::Ingest(cmd) => cmd.execute(config).await,
            KnowledgeAction::Chunk(cmd) => cmd.execute(config).await,
        }
    }
}
