//! OpenAI backend built on rig's Responses API client.

use async_trait::async_trait;
use rig::client::CompletionClient;
use rig::completion::{AssistantContent, CompletionError, CompletionModel};
use rig::providers::openai;
use rig::OneOrMany;
use tracing::debug;

use super::{Generation, TextGenerationClient, TokenUsage};
use crate::{Error, GenerationError, Result};

/// Base URL of the public OpenAI API.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Environment variable holding the API key.
pub const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Environment variable overriding [`DEFAULT_BASE_URL`].
pub const OPENAI_BASE_URL_ENV: &str = "OPENAI_BASE_URL";

/// Text generation through `POST {base_url}/responses`.
#[derive(Clone)]
pub struct OpenAiClient {
    inner: openai::Client,
}

impl OpenAiClient {
    /// Create a client using `api_key` against the public API.
    pub fn new(api_key: &str) -> Result<Self> {
        Self::with_base_url(api_key, DEFAULT_BASE_URL)
    }

    /// Create a client using `api_key` against another API root.
    pub fn with_base_url(api_key: &str, base_url: &str) -> Result<Self> {
        let inner = openai::Client::builder()
            .api_key(api_key)
            .base_url(base_url.trim_end_matches('/'))
            .build()
            .map_err(|e| Error::Config(format!("failed to build OpenAI client: {e}")))?;
        Ok(Self { inner })
    }

    /// Create a client from `OPENAI_API_KEY`, honouring `OPENAI_BASE_URL`.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var(OPENAI_API_KEY_ENV)
            .ok()
            .filter(|key| !key.is_empty())
            .ok_or_else(|| Error::Config(format!("{OPENAI_API_KEY_ENV} is not set")))?;
        match std::env::var(OPENAI_BASE_URL_ENV) {
            Ok(url) if !url.is_empty() => Self::with_base_url(&api_key, &url),
            _ => Self::new(&api_key),
        }
    }
}

#[async_trait]
impl TextGenerationClient for OpenAiClient {
    async fn generate(&self, model: &str, input: &str) -> std::result::Result<Generation, GenerationError> {
        debug!(model, input_len = input.len(), "calling responses API");
        let response = self
            .inner
            .completion_model(model)
            .completion_request(input)
            .send()
            .await?;

        let usage = TokenUsage::new(response.usage.input_tokens, response.usage.output_tokens);
        Ok(Generation::new(response_text(response.choice), usage))
    }

    fn system(&self) -> &str {
        "openai"
    }
}

/// The text parts of a response, in order; tool calls and reasoning are skipped.
fn response_text(choice: OneOrMany<AssistantContent>) -> String {
    choice
        .into_iter()
        .filter_map(|content| match content {
            AssistantContent::Text(text) => Some(text.text),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

impl From<CompletionError> for GenerationError {
    fn from(err: CompletionError) -> Self {
        GenerationError::new(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use rig::message::Text;

    fn text(s: &str) -> AssistantContent {
        AssistantContent::Text(Text {
            text: s.to_string(),
        })
    }

    #[test]
    fn test_response_text_joins_text_parts() {
        let choice = OneOrMany::many(vec![text("| Metric |"), text("| Value |")]).unwrap();
        assert_eq!(response_text(choice), "| Metric |\n| Value |");
        assert_eq!(response_text(OneOrMany::one(text("HELLO"))), "HELLO");
    }

    #[test]
    fn test_completion_error_is_opaque() {
        let err = GenerationError::from(CompletionError::ProviderError(
            "You exceeded your current quota".to_string(),
        ));
        assert!(err.message.contains("You exceeded your current quota"));
        assert_eq!(err.status, None);
    }

    #[test]
    fn test_system_name() {
        let client = OpenAiClient::with_base_url("key", "http://localhost:8080/v1/").unwrap();
        assert_eq!(client.system(), "openai");
    }

    #[tokio::test]
    async fn test_rejected_request_becomes_generation_error() {
        let server = MockServer::start_async().await;
        let responses = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/responses")
                    .header("authorization", "Bearer test-key")
                    .body_includes("gpt-test")
                    .body_includes("uppercase the text\\nInput: hello");
                then.status(429)
                    .header("content-type", "application/json")
                    .body(r#"{"error": {"message": "Rate limit reached", "type": "requests"}}"#);
            })
            .await;

        let client =
            OpenAiClient::with_base_url("test-key", &format!("{}/v1", server.base_url())).unwrap();
        let result = client
            .generate("gpt-test", "uppercase the text\nInput: hello")
            .await;

        responses.assert_async().await;
        let err = result.unwrap_err();
        assert!(err.message.contains("Rate limit reached"), "{}", err.message);
    }
}
