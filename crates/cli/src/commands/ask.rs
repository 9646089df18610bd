//! Ask command handler.
//!
//! Answers a question from a knowledge base, streaming by default.

use clap::Args;
use futures::StreamExt;
use kbase_core::{config::AppConfig, AppError, AppResult};
use kbase_knowledge::{AnswerEvent, ChatTurn, KnowledgeService, SourceRef};
use std::io::Write;

/// Ask a question against a knowledge base
#[derive(Args, Debug)]
pub struct AskCommand {
    /// Knowledge base name
    pub base: String,

    /// The question to ask
    pub question: String,

    /// Continue an existing conversation
    #[arg(short, long)]
    pub session: Option<String>,

    /// Override the system prompt
    #[arg(long)]
    pub system_prompt: Option<String>,

    /// Temperature for response generation (0.0-2.0)
    #[arg(long)]
    pub temperature: Option<f32>,

    /// Wait for the full answer instead of streaming
    #[arg(long)]
    pub no_stream: bool,

    /// Print raw server-sent events (streaming only)
    #[arg(long, conflicts_with_all = ["no_stream", "json"])]
    pub sse: bool,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl AskCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing ask command for base '{}'", self.base);

        let service = KnowledgeService::from_config(config)?;
        let turn = self.turn();

        if turn.stream {
            self.handle_streaming(&service, &turn).await
        } else {
            self.handle_non_streaming(&service, &turn).await
        }
    }

    fn turn(&self) -> ChatTurn {
        let mut turn = ChatTurn::new(&self.base, &self.question);
        turn.session_id = self.session.clone();
        turn.system_prompt = self.system_prompt.clone();
        turn.temperature = self.temperature;
        turn.stream = !self.no_stream;
        turn
    }

    async fn handle_non_streaming(
        &self,
        service: &KnowledgeService,
        turn: &ChatTurn,
    ) -> AppResult<()> {
        let reply = service.ask(turn).await?;

        if self.json {
            let json = serde_json::to_string_pretty(&reply)
                .map_err(|e| AppError::Serialization(e.to_string()))?;
            println!("{}", json);
        } else {
            println!("{}", reply.answer);
            print_sources(&reply.sources);
            eprintln!("Conversation: {}", reply.conversation_id);

            if let Some(usage) = reply.usage {
                tracing::debug!(
                    "Token usage - Prompt: {}, Completion: {}, Total: {}",
                    usage.prompt_tokens,
                    usage.completion_tokens,
                    usage.total_tokens
                );
            }
        }

        Ok(())
    }

    async fn handle_streaming(&self, service: &KnowledgeService, turn: &ChatTurn) -> AppResult<()> {
        let mut events = service.ask_stream(turn).await;
        let mut conversation_id = None;

        while let Some(event) = events.next().await {
            if self.sse {
                print!("{}", event.to_sse());
                std::io::stdout().flush().ok();
                if let AnswerEvent::Error { message } = &event {
                    return Err(AppError::Llm(message.clone()));
                }
                continue;
            }

            match event {
                AnswerEvent::Start { conversation_id: id } => conversation_id = Some(id),
                AnswerEvent::Content { content } => {
                    if !self.json {
                        print!("{}", content);
                        std::io::stdout().flush().ok();
                    }
                }
                AnswerEvent::End {
                    answer,
                    sources,
                    source_files,
                    context_chunks,
                } => {
                    if self.json {
                        let output = serde_json::json!({
                            "answer": answer,
                            "sources": sources,
                            "sourceFiles": source_files,
                            "contextChunks": context_chunks,
                            "conversationId": conversation_id,
                        });
                        let json = serde_json::to_string_pretty(&output)
                            .map_err(|e| AppError::Serialization(e.to_string()))?;
                        println!("{}", json);
                    } else {
                        println!();
                        print_sources(&sources);
                        if let Some(id) = &conversation_id {
                            eprintln!("Conversation: {}", id);
                        }
                    }
                }
                AnswerEvent::Error { message } => {
                    if !self.json {
                        println!();
                    }
                    return Err(AppError::Llm(message));
                }
            }
        }

        Ok(())
    }
}

fn print_sources(sources: &[SourceRef]) {
    if sources.is_empty() {
        return;
    }
    println!();
    println!("Sources:");
    for source in sources {
        match source.relevance_score {
            Some(score) => println!("- {} (relevance {:.3})", source.file_name, score),
            None => println!("- {}", source.file_name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        ask: AskCommand,
    }

    #[test]
    fn test_turn_from_flags() {
        let harness = Harness::parse_from([
            "kbase", "docs", "what is rust?", "--session", "s1", "--no-stream",
        ]);
        let turn = harness.ask.turn();
        assert_eq!(turn.knowledge_base_id, "docs");
        assert_eq!(turn.question, "what is rust?");
        assert_eq!(turn.session_id.as_deref(), Some("s1"));
        assert!(!turn.stream);
    }

    #[test]
    fn test_sse_conflicts_with_json() {
        assert!(Harness::try_parse_from(["kbase", "docs", "q", "--sse", "--json"]).is_err());
    }
}
