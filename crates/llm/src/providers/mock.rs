//! Offline chat provider.
//!
//! Replays a scripted list of stream items, which makes answer generation
//! reproducible without a network. Without a script it echoes the last user
//! message back.

use crate::client::{
    LlmClient, LlmRequest, LlmResponse, LlmStream, LlmStreamChunk, LlmUsage, Role,
};
use kbase_core::{AppError, AppResult};
use std::sync::Mutex;

/// One scripted stream item.
#[derive(Debug, Clone)]
pub enum ScriptedDelta {
    Chunk(LlmStreamChunk),
    Fail(String),
}

/// Chat client that never leaves the process.
#[derive(Debug, Default)]
pub struct MockLlmClient {
    script: Option<Vec<ScriptedDelta>>,
    requests: Mutex<Vec<LlmRequest>>,
}

impl MockLlmClient {
    /// Echo client.
    pub fn new() -> Self {
        Self::default()
    }

    /// Client that streams the given items for every request.
    pub fn scripted(script: Vec<ScriptedDelta>) -> Self {
        Self {
            script: Some(script),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Client that streams `pieces` and then a `stop` signal.
    pub fn answering(pieces: &[&str]) -> Self {
        let mut script: Vec<ScriptedDelta> = pieces
            .iter()
            .map(|p| ScriptedDelta::Chunk(LlmStreamChunk::delta(*p)))
            .collect();
        script.push(ScriptedDelta::Chunk(LlmStreamChunk::finished("stop")));
        Self::scripted(script)
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<LlmRequest> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    fn record(&self, request: &LlmRequest) {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
    }

    fn items_for(&self, request: &LlmRequest) -> Vec<ScriptedDelta> {
        match &self.script {
            Some(script) => script.clone(),
            None => {
                let echo = request
                    .messages
                    .iter()
                    .rev()
                    .find(|m| m.role == Role::User)
                    .map(|m| m.content.clone())
                    .unwrap_or_default();
                vec![
                    ScriptedDelta::Chunk(LlmStreamChunk::delta(echo)),
                    ScriptedDelta::Chunk(LlmStreamChunk::finished("stop")),
                ]
            }
        }
    }
}

#[async_trait::async_trait]
impl LlmClient for MockLlmClient {
    fn provider_name(&self) -> &str {
        "mock"
    }

    async fn complete(&self, request: &LlmRequest) -> AppResult<LlmResponse> {
        self.record(request);

        let mut content = String::new();
        let mut finish_reason = None;
        for item in self.items_for(request) {
            match item {
                ScriptedDelta::Chunk(chunk) => {
                    content.push_str(&chunk.content);
                    if chunk.finish_reason.is_some() {
                        finish_reason = chunk.finish_reason;
                    }
                }
                ScriptedDelta::Fail(message) => return Err(AppError::Llm(message)),
            }
        }

        Ok(LlmResponse {
            content,
            model: request.model.clone(),
            usage: Some(LlmUsage::default()),
            finish_reason,
        })
    }

    async fn stream(&self, request: &LlmRequest) -> AppResult<LlmStream> {
        self.record(request);

        let items = self.items_for(request).into_iter().map(|item| match item {
            ScriptedDelta::Chunk(chunk) => Ok(chunk),
            ScriptedDelta::Fail(message) => Err(AppError::Llm(message)),
        });

        Ok(Box::pin(futures::stream::iter(items)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ChatMessage;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_echo_returns_last_user_message() {
        let client = MockLlmClient::new();
        let request = LlmRequest::new(
            vec![ChatMessage::system("sys"), ChatMessage::user("ping")],
            "m",
        );
        let response = client.complete(&request).await.unwrap();
        assert_eq!(response.content, "ping");
        assert_eq!(response.finish_reason.as_deref(), Some("stop"));
    }

    #[tokio::test]
    async fn test_scripted_stream_and_recording() {
        let client = MockLlmClient::answering(&["a", "b"]);
        let request = LlmRequest::new(vec![ChatMessage::user("q")], "m");
        let items: Vec<_> = client.stream(&request).await.unwrap().collect().await;

        assert_eq!(items.len(), 3);
        assert_eq!(items[0].as_ref().unwrap().content, "a");
        assert!(items[2].as_ref().unwrap().is_final());
        assert_eq!(client.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_scripted_failure() {
        let client = MockLlmClient::scripted(vec![ScriptedDelta::Fail("boom".to_string())]);
        let request = LlmRequest::new(vec![ChatMessage::user("q")], "m");
        assert!(client.complete(&request).await.is_err());
    }
}
