//! Document chunking strategies.
//!
//! This module provides the [`Chunker`] trait and two implementations:
//!
//! - [`RecursiveChunker`]: splits at paragraph, line, sentence, then word
//!   boundaries before falling back to single characters
//! - [`FixedSizeChunker`]: plain character windows with configurable overlap
//!
//! All sizes are counted in characters, so multi-byte text never gets cut
//! inside a code point. Chunks never span pages.

use std::collections::VecDeque;

use crate::document::{Chunk, Document, chunk_id};
use crate::error::{RagError, Result};

/// Separators tried by [`RecursiveChunker`], coarsest first.
pub const DEFAULT_SEPARATORS: &[&str] = &["\n\n", "\n", ". ", "! ", "? ", " "];

/// A strategy for splitting documents into chunks.
///
/// Implementations produce [`Chunk`]s with text and metadata but no embeddings.
/// Embeddings are attached later by the ingestion pipeline.
pub trait Chunker: Send + Sync {
    /// Split a document into chunks, numbered in document order.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidInput`] if the document has no text or the
    /// chunker's sizes are inconsistent.
    fn chunk(&self, document: &Document) -> Result<Vec<Chunk>>;
}

fn validate_sizes(chunk_size: usize, chunk_overlap: usize) -> Result<()> {
    if chunk_size == 0 {
        return Err(RagError::invalid_input("chunk size must be greater than zero"));
    }
    if chunk_overlap >= chunk_size {
        return Err(RagError::invalid_input(format!(
            "chunk overlap ({chunk_overlap}) must be less than chunk size ({chunk_size})"
        )));
    }
    Ok(())
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Split `text` into chunks of at most `chunk_size` characters.
///
/// This is the splitting policy behind [`RecursiveChunker`], exposed for
/// callers that only have a string.
///
/// # Errors
///
/// Returns [`RagError::InvalidInput`] if `text` is empty or whitespace-only,
/// `chunk_size` is zero, or `chunk_overlap >= chunk_size`.
pub fn split_text(text: &str, chunk_size: usize, chunk_overlap: usize) -> Result<Vec<String>> {
    validate_sizes(chunk_size, chunk_overlap)?;
    if text.trim().is_empty() {
        return Err(RagError::invalid_input("document text is empty"));
    }
    Ok(split_recursive(text, chunk_size, chunk_overlap, DEFAULT_SEPARATORS))
}

/// Split with the first separator present in `text`, merge the pieces back
/// up to `chunk_size`, and recurse with finer separators into any piece that
/// is still too large.
fn split_recursive(
    text: &str,
    chunk_size: usize,
    chunk_overlap: usize,
    separators: &[&str],
) -> Vec<String> {
    if char_len(text) <= chunk_size {
        return if text.trim().is_empty() { Vec::new() } else { vec![text.to_string()] };
    }

    let (pieces, finer) = match separators.iter().position(|sep| text.contains(sep)) {
        Some(i) => (split_keeping_separator(text, separators[i]), &separators[i + 1..]),
        None => (split_chars(text), &separators[separators.len()..]),
    };

    let mut chunks = Vec::new();
    let mut pending: Vec<&str> = Vec::new();

    for piece in pieces {
        if char_len(piece) <= chunk_size {
            pending.push(piece);
            continue;
        }
        if !pending.is_empty() {
            chunks.extend(merge_pieces(&pending, chunk_size, chunk_overlap));
            pending.clear();
        }
        chunks.extend(split_recursive(piece, chunk_size, chunk_overlap, finer));
    }

    if !pending.is_empty() {
        chunks.extend(merge_pieces(&pending, chunk_size, chunk_overlap));
    }

    chunks
}

/// Split text at a separator while keeping the separator attached to the preceding segment.
fn split_keeping_separator<'a>(text: &'a str, separator: &str) -> Vec<&'a str> {
    let mut result = Vec::new();
    let mut start = 0;

    while let Some(pos) = text[start..].find(separator) {
        let end = start + pos + separator.len();
        result.push(&text[start..end]);
        start = end;
    }

    if start < text.len() {
        result.push(&text[start..]);
    }

    result
}

fn split_chars(text: &str) -> Vec<&str> {
    text.char_indices().map(|(i, c)| &text[i..i + c.len_utf8()]).collect()
}

/// Greedily pack pieces into chunks of at most `chunk_size` characters.
///
/// After a chunk is emitted, trailing pieces totalling at most
/// `chunk_overlap` characters are carried into the next one.
fn merge_pieces(pieces: &[&str], chunk_size: usize, chunk_overlap: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut window: VecDeque<(&str, usize)> = VecDeque::new();
    let mut total = 0;

    for &piece in pieces {
        let len = char_len(piece);
        if total + len > chunk_size && !window.is_empty() {
            push_window(&mut chunks, &window);
            while let Some(&(_, front_len)) = window.front() {
                if total <= chunk_overlap && total + len <= chunk_size {
                    break;
                }
                window.pop_front();
                total -= front_len;
            }
        }
        window.push_back((piece, len));
        total += len;
    }

    if !window.is_empty() {
        push_window(&mut chunks, &window);
    }

    chunks
}

fn push_window(chunks: &mut Vec<String>, window: &VecDeque<(&str, usize)>) {
    let text: String = window.iter().map(|(piece, _)| *piece).collect();
    if !text.trim().is_empty() {
        chunks.push(text);
    }
}

/// Character windows with overlap.
fn split_fixed(text: &str, chunk_size: usize, chunk_overlap: usize) -> Vec<String> {
    let bounds: Vec<usize> =
        text.char_indices().map(|(i, _)| i).chain(std::iter::once(text.len())).collect();
    let char_count = bounds.len() - 1;
    let step = chunk_size - chunk_overlap;

    let mut chunks = Vec::new();
    let mut start = 0;
    while start < char_count {
        let end = (start + chunk_size).min(char_count);
        let piece = &text[bounds[start]..bounds[end]];
        if !piece.trim().is_empty() {
            chunks.push(piece.to_string());
        }
        if end == char_count {
            break;
        }
        start += step;
    }
    chunks
}

/// Build chunks page by page, numbering them across the whole document.
fn chunk_pages<F>(document: &Document, mut split: F) -> Vec<Chunk>
where
    F: FnMut(&str) -> Vec<String>,
{
    let mut chunks = Vec::new();
    for page in &document.pages {
        if page.text.trim().is_empty() {
            continue;
        }
        for text in split(&page.text) {
            let index = chunks.len();
            let mut metadata = document.metadata.clone();
            metadata.insert("chunk_index".to_string(), index.to_string());
            metadata.insert("source".to_string(), document.id.clone());
            if let Some(number) = page.number {
                metadata.insert("page".to_string(), number.to_string());
            }
            chunks.push(Chunk {
                id: chunk_id(&document.id, index),
                text,
                embedding: Vec::new(),
                metadata,
                document_id: document.id.clone(),
                page: page.number,
                index,
            });
        }
    }
    chunks
}

fn ensure_text(document: &Document) -> Result<()> {
    if document.is_blank() {
        return Err(RagError::invalid_input(format!("document '{}' has no text", document.id)));
    }
    Ok(())
}

/// Splits text hierarchically: paragraphs → lines → sentences → words → characters.
///
/// The first separator found in a page is used to cut it into pieces, which
/// are merged back into chunks of up to `chunk_size` characters with up to
/// `chunk_overlap` characters carried between neighbours. Pieces that are
/// still too large are split again with the next, finer separator.
///
/// Chunk IDs are generated as `{document_id}_{chunk_index}`. Each chunk inherits
/// the parent document's metadata plus `chunk_index`, `source` and `page` fields.
///
/// # Example
///
/// ```rust,ignore
/// use docrag::RecursiveChunker;
///
/// let chunker = RecursiveChunker::new(1000, 0);
/// let chunks = chunker.chunk(&document)?;
/// ```
#[derive(Debug, Clone)]
pub struct RecursiveChunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl RecursiveChunker {
    /// Create a new `RecursiveChunker`.
    ///
    /// # Arguments
    ///
    /// * `chunk_size`: maximum number of characters per chunk
    /// * `chunk_overlap`: number of overlapping characters between consecutive chunks
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self { chunk_size, chunk_overlap }
    }
}

impl Chunker for RecursiveChunker {
    fn chunk(&self, document: &Document) -> Result<Vec<Chunk>> {
        validate_sizes(self.chunk_size, self.chunk_overlap)?;
        ensure_text(document)?;
        Ok(chunk_pages(document, |text| {
            split_recursive(text, self.chunk_size, self.chunk_overlap, DEFAULT_SEPARATORS)
        }))
    }
}

/// Splits text into fixed-size character windows with configurable overlap.
///
/// # Example
///
/// ```rust,ignore
/// use docrag::FixedSizeChunker;
///
/// let chunker = FixedSizeChunker::new(256, 50);
/// let chunks = chunker.chunk(&document)?;
/// ```
#[derive(Debug, Clone)]
pub struct FixedSizeChunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl FixedSizeChunker {
    /// Create a new `FixedSizeChunker`.
    ///
    /// # Arguments
    ///
    /// * `chunk_size`: maximum number of characters per chunk
    /// * `chunk_overlap`: number of overlapping characters between consecutive chunks
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self { chunk_size, chunk_overlap }
    }
}

impl Chunker for FixedSizeChunker {
    fn chunk(&self, document: &Document) -> Result<Vec<Chunk>> {
        validate_sizes(self.chunk_size, self.chunk_overlap)?;
        ensure_text(document)?;
        Ok(chunk_pages(document, |text| split_fixed(text, self.chunk_size, self.chunk_overlap)))
    }
}
