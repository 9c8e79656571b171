//! OpenAI-compatible HTTP backends.
//!
//! [`OpenAIClient`] owns the plumbing every OpenAI-style endpoint shares:
//! base URL, optional bearer token, status checks and error bodies. The
//! embeddings provider here and the chat generator in
//! [`generation::openai`](crate::generation::openai) are thin request/response
//! shapes on top of it.
//!
//! This module is only available when the `openai` feature is enabled.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::embedding::{EmbeddingProvider, check_batch_len};
use crate::error::{RagError, Result};

/// The public OpenAI API.
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

const API_KEY_VAR: &str = "OPENAI_API_KEY";
const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

/// Builds the error variant for a failed call from `(backend label, message)`.
pub(crate) type FailureKind = fn(String, String) -> RagError;

/// A connection to one OpenAI-compatible server.
pub(crate) struct OpenAIClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    label: String,
    failure: FailureKind,
}

impl OpenAIClient {
    pub(crate) fn new(
        base_url: &str,
        api_key: Option<String>,
        label: impl Into<String>,
        failure: FailureKind,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.filter(|key| !key.trim().is_empty()),
            label: label.into(),
            failure,
        }
    }

    pub(crate) fn base_url(&self) -> &str {
        &self.base_url
    }

    pub(crate) fn fail(&self, message: impl Into<String>) -> RagError {
        (self.failure)(self.label.clone(), message.into())
    }

    /// POST `body` as JSON to `{base_url}/{path}` and decode the reply.
    pub(crate) async fn post<B, R>(&self, path: &str, body: &B) -> Result<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let url = format!("{}/{path}", self.base_url);
        let mut request = self.http.post(&url).json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            error!(backend = %self.label, %url, error = %e, "request failed");
            self.fail(format!("request to {url} failed: {e}"))
        })?;

        let status = response.status();
        if !status.is_success() {
            let detail = error_detail(response.text().await.unwrap_or_default());
            error!(backend = %self.label, %url, %status, %detail, "server rejected request");
            return Err(self.fail(format!("{path} returned {status}: {detail}")));
        }

        response.json::<R>().await.map_err(|e| {
            error!(backend = %self.label, %url, error = %e, "unreadable response");
            self.fail(format!("unreadable {path} response: {e}"))
        })
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    error: ErrorMessage,
}

#[derive(Deserialize)]
struct ErrorMessage {
    message: String,
}

/// The `error.message` of an OpenAI error body, or the body itself.
fn error_detail(body: String) -> String {
    match serde_json::from_str::<ErrorBody>(&body) {
        Ok(parsed) => parsed.error.message,
        Err(_) => body,
    }
}

/// Native output size of the OpenAI embedding models.
fn native_dimensions(model: &str) -> usize {
    match model {
        "text-embedding-3-large" => 3072,
        _ => 1536,
    }
}

/// An [`EmbeddingProvider`] calling the `/embeddings` endpoint of OpenAI or
/// any server that speaks its API.
///
/// `dimensions()` reports the requested truncation when one is set, otherwise
/// the model's native size.
///
/// ```rust,ignore
/// use docrag::openai::OpenAIEmbeddingProvider;
///
/// let provider = OpenAIEmbeddingProvider::from_env()?.with_dimensions(256);
/// let local = OpenAIEmbeddingProvider::compatible("http://localhost:8080/v1", None)
///     .with_model("nomic-embed-text");
/// ```
pub struct OpenAIEmbeddingProvider {
    client: OpenAIClient,
    model: String,
    truncate_to: Option<usize>,
}

impl OpenAIEmbeddingProvider {
    fn with_client(base_url: &str, api_key: Option<String>) -> Self {
        let client = OpenAIClient::new(base_url, api_key, "openai", |provider, message| {
            RagError::EmbeddingError { provider, message }
        });
        Self { client, model: DEFAULT_EMBEDDING_MODEL.to_string(), truncate_to: None }
    }

    /// A provider for the public OpenAI API.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::EmbeddingError`] for a blank key.
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(RagError::EmbeddingError {
                provider: "openai".into(),
                message: "API key must not be empty".into(),
            });
        }
        Ok(Self::with_client(OPENAI_BASE_URL, Some(api_key)))
    }

    /// A provider for the public OpenAI API keyed by `OPENAI_API_KEY`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::EmbeddingError`] if the variable is unset or blank.
    pub fn from_env() -> Result<Self> {
        match std::env::var(API_KEY_VAR) {
            Ok(key) => Self::new(key),
            Err(_) => Err(RagError::EmbeddingError {
                provider: "openai".into(),
                message: format!("{API_KEY_VAR} is not set"),
            }),
        }
    }

    /// A provider for a self-hosted OpenAI-compatible server, which may not
    /// need a key.
    pub fn compatible(base_url: &str, api_key: Option<String>) -> Self {
        Self::with_client(base_url, api_key)
    }

    /// Use another embedding model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Ask the server to truncate vectors to `dims` (Matryoshka models).
    pub fn with_dimensions(mut self, dims: usize) -> Self {
        self.truncate_to = Some(dims);
        self
    }

    /// The server this provider talks to.
    pub fn base_url(&self) -> &str {
        self.client.base_url()
    }
}

#[derive(Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
    encoding_format: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    index: usize,
    embedding: Vec<f32>,
}

#[async_trait]
impl EmbeddingProvider for OpenAIEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_batch(&[text]).await?;
        vectors.pop().ok_or_else(|| self.client.fail("no embedding returned"))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        debug!(model = %self.model, batch_size = texts.len(), "requesting embeddings");

        let request = EmbeddingsRequest {
            model: &self.model,
            input: texts,
            encoding_format: "float",
            dimensions: self.truncate_to,
        };
        let response: EmbeddingsResponse = self.client.post("embeddings", &request).await?;
        check_batch_len(&self.model, texts.len(), response.data.len())?;

        // Servers may answer out of order; `index` points back at the input.
        let mut ordered: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
        for item in response.data {
            let index = item.index;
            let slot = ordered.get_mut(index).filter(|slot| slot.is_none()).ok_or_else(|| {
                self.client.fail(format!("unexpected or repeated embedding index {index}"))
            })?;
            *slot = Some(item.embedding);
        }
        Ok(ordered.into_iter().flatten().collect())
    }

    fn dimensions(&self) -> usize {
        self.truncate_to.unwrap_or_else(|| native_dimensions(&self.model))
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}
