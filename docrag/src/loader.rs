//! Document loaders and input discovery.
//!
//! A [`DocumentLoader`] turns a file into a [`Document`] of numbered pages.
//! [`AutoLoader`] picks a loader by file extension and
//! [`discover_documents`] finds the files to feed it.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;
use walkdir::WalkDir;

use crate::document::{Document, Page};
use crate::error::{RagError, Result};

/// Character separating pages in plain-text sources.
pub const PAGE_BREAK: char = '\x0c';

/// Extensions handled by [`TextLoader`].
pub const TEXT_EXTENSIONS: &[&str] = &["txt", "text", "md", "markdown"];

/// Extensions handled by `PdfLoader`.
pub const PDF_EXTENSIONS: &[&str] = &["pdf"];

fn load_failure(path: &Path, message: impl std::fmt::Display) -> RagError {
    RagError::DocumentLoadFailure { path: path.display().to_string(), message: message.to_string() }
}

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| extensions.iter().any(|known| known.eq_ignore_ascii_case(ext)))
}

/// Build a document for `path` with the standard source metadata.
fn document_for(path: &Path, pages: Vec<Page>) -> Document {
    let id = path.display().to_string();
    let mut document = Document::new(id.clone(), pages).with_metadata("source", id);
    if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
        document = document.with_metadata("file_name", name);
    }
    document
}

/// Reads a source file into an ordered list of pages.
#[async_trait]
pub trait DocumentLoader: Send + Sync {
    /// Whether this loader understands `path`.
    fn supports(&self, path: &Path) -> bool;

    /// Load `path` into a [`Document`] whose ID is the path.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::DocumentLoadFailure`] if the file cannot be read
    /// or parsed.
    async fn load(&self, path: &Path) -> Result<Document>;
}

/// Loads UTF-8 text files. Form feeds split the text into pages.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextLoader;

/// Split text on form feeds into pages numbered from 1.
pub fn text_pages(text: &str) -> Vec<Page> {
    text.split(PAGE_BREAK).zip(1u32..).map(|(page, number)| Page::new(number, page)).collect()
}

#[async_trait]
impl DocumentLoader for TextLoader {
    fn supports(&self, path: &Path) -> bool {
        has_extension(path, TEXT_EXTENSIONS)
    }

    async fn load(&self, path: &Path) -> Result<Document> {
        let text = tokio::fs::read_to_string(path).await.map_err(|e| load_failure(path, e))?;
        let pages = text_pages(&text);
        debug!(path = %path.display(), pages = pages.len(), "loaded text document");
        Ok(document_for(path, pages))
    }
}

/// Extracts per-page text from PDF files with [lopdf](https://docs.rs/lopdf).
///
/// Only available with the `pdf` feature.
#[cfg(feature = "pdf")]
#[derive(Debug, Clone, Copy, Default)]
pub struct PdfLoader;

#[cfg(feature = "pdf")]
impl PdfLoader {
    fn extract(path: &Path) -> Result<Vec<Page>> {
        let pdf = lopdf::Document::load(path).map_err(|e| load_failure(path, e))?;
        pdf.get_pages()
            .keys()
            .map(|&number| {
                let text = pdf.extract_text(&[number]).map_err(|e| {
                    load_failure(path, format!("failed to extract page {number}: {e}"))
                })?;
                Ok(Page::new(number, text))
            })
            .collect()
    }
}

#[cfg(feature = "pdf")]
#[async_trait]
impl DocumentLoader for PdfLoader {
    fn supports(&self, path: &Path) -> bool {
        has_extension(path, PDF_EXTENSIONS)
    }

    async fn load(&self, path: &Path) -> Result<Document> {
        let owned = path.to_path_buf();
        let pages = tokio::task::spawn_blocking(move || Self::extract(&owned))
            .await
            .map_err(|e| load_failure(path, e))??;
        debug!(path = %path.display(), pages = pages.len(), "loaded pdf document");
        Ok(document_for(path, pages))
    }
}

/// Dispatches to the first registered loader that supports a path.
pub struct AutoLoader {
    loaders: Vec<Box<dyn DocumentLoader>>,
}

impl AutoLoader {
    /// A loader with no registered formats.
    pub fn empty() -> Self {
        Self { loaders: Vec::new() }
    }

    /// Register another loader. Earlier registrations win.
    pub fn with_loader(mut self, loader: impl DocumentLoader + 'static) -> Self {
        self.loaders.push(Box::new(loader));
        self
    }

    /// File extensions the built-in loaders understand.
    pub fn default_extensions() -> Vec<&'static str> {
        let mut extensions = TEXT_EXTENSIONS.to_vec();
        if cfg!(feature = "pdf") {
            extensions.extend_from_slice(PDF_EXTENSIONS);
        }
        extensions
    }
}

impl Default for AutoLoader {
    fn default() -> Self {
        let loader = Self::empty().with_loader(TextLoader);
        #[cfg(feature = "pdf")]
        let loader = loader.with_loader(PdfLoader);
        loader
    }
}

#[async_trait]
impl DocumentLoader for AutoLoader {
    fn supports(&self, path: &Path) -> bool {
        self.loaders.iter().any(|loader| loader.supports(path))
    }

    async fn load(&self, path: &Path) -> Result<Document> {
        match self.loaders.iter().find(|loader| loader.supports(path)) {
            Some(loader) => loader.load(path).await,
            None => Err(load_failure(path, "unsupported file type")),
        }
    }
}

/// Recursively find files under `dir` whose extension is in `extensions`.
///
/// Matching is case-insensitive and the result is sorted.
///
/// # Errors
///
/// Returns [`RagError::DocumentLoadFailure`] if `dir` is not a directory.
pub fn discover_documents(dir: impl AsRef<Path>, extensions: &[&str]) -> Result<Vec<PathBuf>> {
    let root = dir.as_ref();
    if !root.is_dir() {
        return Err(load_failure(root, "not a directory"));
    }

    let mut files = WalkDir::new(root)
        .into_iter()
        .filter_map(std::result::Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| has_extension(entry.path(), extensions))
        .map(|entry| entry.into_path())
        .collect::<Vec<_>>();

    files.sort();
    Ok(files)
}
