//! JSON request and response bodies for the HTTP API.

use docrag::SearchResult;
use serde::{Deserialize, Serialize};

/// Message returned when a required field is missing or blank.
pub const MISSING_FIELDS: &str = "One or more fields have not been specified.";

/// Answer returned when retrieval finds nothing.
pub const NO_RESULTS: &str = "No relevant documents were found for this question.";

/// Engine name that returns the retrieved context instead of calling a model.
pub const RETRIEVAL_ENGINE: &str = "retrieval";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetrieveRequest {
    #[serde(default)]
    pub question: Option<String>,
    #[serde(default)]
    pub top_k: Option<usize>,
    #[serde(default)]
    pub topic_weight: Option<String>,
    #[serde(default)]
    pub collection: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AskRequest {
    #[serde(default)]
    pub question: Option<String>,
    #[serde(default)]
    pub top_k: Option<usize>,
    #[serde(default)]
    pub topic_weight: Option<String>,
    #[serde(default)]
    pub engine: Option<String>,
    /// Sampling temperature, defaults to 1.0.
    #[serde(default)]
    pub temperature: Option<f32>,
    /// Completion length, defaults to 100 tokens.
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

/// One retrieved chunk with its provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub id: String,
    pub text: String,
    pub document_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    pub distance: f32,
}

impl From<SearchResult> for Source {
    fn from(result: SearchResult) -> Self {
        Self {
            id: result.chunk.id,
            text: result.chunk.text,
            document_id: result.chunk.document_id,
            page: result.chunk.page,
            distance: result.distance,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrieveResponse {
    pub results: Vec<Source>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AskResponse {
    pub answer: String,
    pub engine: String,
    pub sources: Vec<Source>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnginesResponse {
    pub engines: Vec<String>,
    pub default: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// The trimmed value of an optional text field, or `None` when absent or blank.
pub fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
