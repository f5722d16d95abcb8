//! The text-generation capability the pipeline calls out to.
//!
//! [`TextGenerationClient`] is the only seam between the executor and a
//! model backend: text in, text and token usage out, or a
//! [`GenerationError`]. [`OpenAiClient`] talks to the OpenAI Responses API;
//! [`LambdaClient`] wraps a closure for tests and offline runs.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;

use crate::GenerationError;

pub mod openai;

pub use openai::OpenAiClient;

/// Token counts reported for one generation call.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Tokens consumed by the request.
    pub input_tokens: u64,
    /// Tokens produced in the response.
    pub output_tokens: u64,
}

impl TokenUsage {
    /// Create a usage record.
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    /// Input plus output tokens.
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Output of one successful generation call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Generation {
    /// Generated text.
    pub text: String,
    /// Token usage for the call.
    pub usage: TokenUsage,
}

impl Generation {
    /// Create a generation result.
    pub fn new(text: impl Into<String>, usage: TokenUsage) -> Self {
        Self {
            text: text.into(),
            usage,
        }
    }
}

/// A backend that turns an input prompt into text.
#[async_trait]
pub trait TextGenerationClient: Send + Sync {
    /// Generate text for `input` with the model identified by `model`.
    async fn generate(&self, model: &str, input: &str) -> Result<Generation, GenerationError>;

    /// Value for the `gen_ai.system` span attribute.
    fn system(&self) -> &str {
        "unknown"
    }
}

/// A client backed by an async closure taking `(model, input)`.
///
/// # Example
///
/// ```rust
/// use prompt_chain::generation::{Generation, LambdaClient, TextGenerationClient, TokenUsage};
///
/// # tokio_test::block_on(async {
/// let client = LambdaClient::new(|_model: String, input: String| async move {
///     Ok(Generation::new(input.to_uppercase(), TokenUsage::default()))
/// });
/// let out = client.generate("any", "shout").await.unwrap();
/// assert_eq!(out.text, "SHOUT");
/// # });
/// ```
pub struct LambdaClient<F> {
    f: F,
    system: String,
}

impl<F, Fut> LambdaClient<F>
where
    F: Fn(String, String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Generation, GenerationError>> + Send + 'static,
{
    /// Create a client from the given closure.
    pub fn new(f: F) -> Self {
        Self {
            f,
            system: "lambda".to_string(),
        }
    }

    /// Override the reported `gen_ai.system`.
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = system.into();
        self
    }
}

#[async_trait]
impl<F, Fut> TextGenerationClient for LambdaClient<F>
where
    F: Fn(String, String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Generation, GenerationError>> + Send + 'static,
{
    async fn generate(&self, model: &str, input: &str) -> Result<Generation, GenerationError> {
        (self.f)(model.to_string(), input.to_string()).await
    }

    fn system(&self) -> &str {
        &self.system
    }
}

/// Build a [`LambdaClient`] from a synchronous function.
///
/// ```rust
/// use prompt_chain::generation::{from_fn, Generation, TextGenerationClient, TokenUsage};
///
/// # tokio_test::block_on(async {
/// let client = from_fn(|_model, input| Ok(Generation::new(input.len().to_string(), TokenUsage::new(1, 1))));
/// assert_eq!(client.generate("m", "four").await.unwrap().text, "4");
/// # });
/// ```
pub fn from_fn<G>(
    g: G,
) -> LambdaClient<
    impl Fn(String, String) -> futures::future::Ready<Result<Generation, GenerationError>>
        + Send
        + Sync
        + 'static,
>
where
    G: Fn(&str, &str) -> Result<Generation, GenerationError> + Send + Sync + 'static,
{
    LambdaClient::new(move |model: String, input: String| futures::future::ready(g(&model, &input)))
}
