//! Chat provider factory.
//!
//! Resolves a provider name from configuration into a shared client.

use crate::client::LlmClient;
use crate::providers::{ollama, openai_compat, MockLlmClient, OllamaClient, OpenAiCompatClient};
use crate::retry::RetryPolicy;
use crate::types::ProviderType;
use std::sync::Arc;
use std::time::Duration;

/// Create a chat client based on the provider name.
///
/// # Arguments
/// * `provider` - Provider identifier ("openai-compatible", "dashscope", "ollama", "mock")
/// * `endpoint` - Optional custom endpoint URL
/// * `api_key` - API key (required by hosted providers)
/// * `timeout` - Per-request timeout
/// * `max_retries` - Attempts for transient failures
///
/// # Errors
/// Returns error if the provider is unknown, a required key is missing, or
/// the HTTP client cannot be built.
pub fn create_client(
    provider: &str,
    endpoint: Option<&str>,
    api_key: Option<&str>,
    timeout: Duration,
    max_retries: u32,
) -> Result<Arc<dyn LlmClient>, String> {
    let provider_type =
        ProviderType::parse(provider).ok_or_else(|| format!("Unknown provider: {}", provider))?;

    if provider_type.requires_api_key() && api_key.is_none() {
        return Err(format!("{} provider requires API key", provider));
    }

    match provider_type {
        ProviderType::OpenAiCompatible => {
            let base_url = endpoint.unwrap_or(openai_compat::DEFAULT_ENDPOINT);
            let client =
                OpenAiCompatClient::new(base_url, api_key.map(str::to_string), timeout)
                    .map_err(|e| e.to_string())?
                    .with_retry_policy(RetryPolicy::new(max_retries));
            Ok(Arc::new(client))
        }
        ProviderType::Ollama => {
            let base_url = endpoint.unwrap_or(ollama::DEFAULT_ENDPOINT);
            let http = reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|e| format!("Failed to create HTTP client: {}", e))?;
            Ok(Arc::new(OllamaClient::with_http_client(base_url, http)))
        }
        ProviderType::Mock => Ok(Arc::new(MockLlmClient::new())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[test]
    fn test_create_ollama_client() {
        let client = create_client("ollama", None, None, TIMEOUT, 3).unwrap();
        assert_eq!(client.provider_name(), "ollama");
    }

    #[test]
    fn test_create_compatible_with_custom_endpoint() {
        let client =
            create_client("dashscope", Some("http://localhost:8080/v1"), Some("k"), TIMEOUT, 3)
                .unwrap();
        assert_eq!(client.provider_name(), "openai-compatible");
    }

    #[test]
    fn test_hosted_provider_requires_api_key() {
        match create_client("openai", None, None, TIMEOUT, 3) {
            Err(err) => assert!(err.contains("requires API key")),
            Ok(_) => panic!("Expected error for openai without API key"),
        }
    }

    #[test]
    fn test_mock_needs_nothing() {
        let client = create_client("mock", None, None, TIMEOUT, 3).unwrap();
        assert_eq!(client.provider_name(), "mock");
    }

    #[test]
    fn test_unknown_provider() {
        match create_client("unknown", None, None, TIMEOUT, 3) {
            Err(err) => assert!(err.contains("Unknown provider")),
            Ok(_) => panic!("Expected error for unknown provider"),
        }
    }
}
