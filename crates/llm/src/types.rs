//! Provider identifiers.

/// Chat provider families understood by the factory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderType {
    /// Any `/chat/completions` endpoint (OpenAI, DashScope compatible mode, vLLM, ...)
    OpenAiCompatible,
    Ollama,
    Mock,
}

impl ProviderType {
    /// Parse provider type from string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "openai-compatible" | "openai" | "dashscope" => Some(Self::OpenAiCompatible),
            "ollama" => Some(Self::Ollama),
            "mock" => Some(Self::Mock),
            _ => None,
        }
    }

    /// Get the canonical provider name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAiCompatible => "openai-compatible",
            Self::Ollama => "ollama",
            Self::Mock => "mock",
        }
    }

    /// Whether the provider refuses to start without an API key.
    pub fn requires_api_key(&self) -> bool {
        matches!(self, Self::OpenAiCompatible)
    }
}
