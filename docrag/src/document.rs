//! Data types for documents, chunks, and search results.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// One page of a source document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Page {
    /// 1-based page number, if the source format has pages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub number: Option<u32>,
    /// The text content of the page.
    pub text: String,
}

impl Page {
    /// Create a numbered page.
    pub fn new(number: u32, text: impl Into<String>) -> Self {
        Self { number: Some(number), text: text.into() }
    }

    /// Create a page without a page number.
    pub fn unnumbered(text: impl Into<String>) -> Self {
        Self { number: None, text: text.into() }
    }
}

/// A source document: ordered pages of text plus metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    /// Stable identifier for the document, usually its path.
    pub id: String,
    /// The pages of the document, in reading order.
    pub pages: Vec<Page>,
    /// Key-value metadata associated with the document.
    pub metadata: HashMap<String, String>,
}

impl Document {
    /// Create a document from its pages.
    pub fn new(id: impl Into<String>, pages: Vec<Page>) -> Self {
        Self { id: id.into(), pages, metadata: HashMap::new() }
    }

    /// Create a single, unnumbered page document from raw text.
    pub fn from_text(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(id, vec![Page::unnumbered(text)])
    }

    /// Attach a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Whether every page is empty or whitespace-only.
    pub fn is_blank(&self) -> bool {
        self.pages.iter().all(|page| page.text.trim().is_empty())
    }
}

/// Derive the stable chunk ID for the `index`-th chunk of a document.
pub fn chunk_id(document_id: &str, index: usize) -> String {
    format!("{document_id}_{index}")
}

/// A segment of a [`Document`] with its vector embedding.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    /// Unique identifier, derived from `document_id` and `index`.
    pub id: String,
    /// The text content of the chunk.
    pub text: String,
    /// The vector embedding for this chunk's text. Empty until embedded.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub embedding: Vec<f32>,
    /// Key-value metadata inherited from the parent document plus chunk-specific fields.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    /// The ID of the parent [`Document`].
    pub document_id: String,
    /// The page the chunk was cut from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    /// Position of the chunk within its document.
    pub index: usize,
}

impl Chunk {
    /// A human-readable provenance label, e.g. `report.pdf (page 3)`.
    pub fn source_label(&self) -> String {
        match self.page {
            Some(page) => format!("{} (page {page})", self.document_id),
            None => self.document_id.clone(),
        }
    }
}

/// A retrieved [`Chunk`] paired with its distance to the query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    /// The retrieved chunk.
    pub chunk: Chunk,
    /// Distance under the collection's metric (lower is more relevant).
    pub distance: f32,
}
