//! Answer generation from retrieved context.
//!
//! The core never depends on a language model. [`AnswerGenerator`] is the
//! seam the HTTP layer calls after retrieval; [`format_context`] renders the
//! ranked results into the context block handed to it.

use async_trait::async_trait;

use crate::document::SearchResult;
use crate::error::Result;

/// Default sampling temperature when the caller does not choose one.
pub const DEFAULT_TEMPERATURE: f32 = 1.0;

/// Default completion length when the caller does not choose one.
pub const DEFAULT_MAX_TOKENS: u32 = 100;

/// Inputs for a single answer.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    /// The user's question, without the topic prefix.
    pub question: String,
    /// Retrieved context, as produced by [`format_context`].
    pub context: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Maximum number of tokens to generate.
    pub max_tokens: u32,
}

impl GenerationRequest {
    /// A request with default temperature and length.
    pub fn new(question: impl Into<String>, context: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            context: context.into(),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }
}

/// Produces an answer from a question and its context.
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    /// Engine name, as selected by callers.
    fn name(&self) -> &str;

    /// Generate an answer.
    async fn generate(&self, request: &GenerationRequest) -> Result<String>;
}

/// Render ranked results as a numbered context block with provenance.
pub fn format_context(results: &[SearchResult]) -> String {
    results
        .iter()
        .enumerate()
        .map(|(i, result)| {
            format!("[{}] {}\n{}", i + 1, result.chunk.source_label(), result.chunk.text.trim())
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// OpenAI-compatible `/chat/completions` generator.
///
/// Only available with the `openai` feature.
#[cfg(feature = "openai")]
pub mod openai {
    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};
    use tracing::debug;

    use super::{AnswerGenerator, GenerationRequest};
    use crate::config::GeneratorConfig;
    use crate::error::{RagError, Result};
    use crate::openai::OpenAIClient;

    const SYSTEM_PROMPT: &str = "Answer the question using only the provided context. \
        If the context does not contain the answer, say that you don't know.";

    /// Calls an OpenAI-compatible chat completions endpoint.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// let generator = OpenAICompatibleGenerator::new(GeneratorConfig {
    ///     base_url: "http://localhost:8080/v1".into(),
    ///     model: "llama-2-13b-chat".into(),
    ///     api_key: None,
    /// });
    /// let answer = generator.generate(&GenerationRequest::new(question, context)).await?;
    /// ```
    pub struct OpenAICompatibleGenerator {
        client: OpenAIClient,
        model: String,
    }

    impl OpenAICompatibleGenerator {
        /// Create a generator from its connection settings.
        pub fn new(config: GeneratorConfig) -> Self {
            let client = OpenAIClient::new(
                &config.base_url,
                config.api_key,
                config.model.clone(),
                |provider, message| RagError::GenerationError { provider, message },
            );
            Self { client, model: config.model }
        }
    }

    #[derive(Serialize)]
    struct ChatRequest<'a> {
        model: &'a str,
        messages: [ChatMessage; 2],
        temperature: f32,
        max_tokens: u32,
    }

    #[derive(Serialize)]
    struct ChatMessage {
        role: &'static str,
        content: String,
    }

    #[derive(Deserialize)]
    struct ChatResponse {
        choices: Vec<Choice>,
    }

    #[derive(Deserialize)]
    struct Choice {
        message: ResponseMessage,
    }

    #[derive(Deserialize)]
    struct ResponseMessage {
        #[serde(default)]
        content: Option<String>,
    }

    #[async_trait]
    impl AnswerGenerator for OpenAICompatibleGenerator {
        fn name(&self) -> &str {
            &self.model
        }

        async fn generate(&self, request: &GenerationRequest) -> Result<String> {
            debug!(model = %self.model, max_tokens = request.max_tokens, "generating answer");

            let body = ChatRequest {
                model: &self.model,
                messages: [
                    ChatMessage { role: "system", content: SYSTEM_PROMPT.to_string() },
                    ChatMessage {
                        role: "user",
                        content: format!(
                            "Context:\n{}\n\nQuestion: {}",
                            request.context, request.question
                        ),
                    },
                ],
                temperature: request.temperature,
                max_tokens: request.max_tokens,
            };
            let response: ChatResponse = self.client.post("chat/completions", &body).await?;

            response
                .choices
                .into_iter()
                .next()
                .and_then(|choice| choice.message.content)
                .map(|content| content.trim().to_string())
                .ok_or_else(|| self.client.fail("response contained no answer"))
        }
    }
}
