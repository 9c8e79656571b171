//! Property tests for recursive chunking.

use docrag::chunking::{Chunker, RecursiveChunker, split_text};
use docrag::document::{Document, Page};
use proptest::prelude::*;

/// Text made of words, sentences, lines and paragraphs, with some multi-byte characters.
fn arb_text() -> impl Strategy<Value = String> {
    proptest::collection::vec(
        prop_oneof![
            8 => "[a-zé]{1,12}",
            2 => Just(" ".to_string()),
            1 => Just(". ".to_string()),
            1 => Just("\n".to_string()),
            1 => Just("\n\n".to_string()),
            1 => Just("日本語".to_string()),
        ],
        1..120,
    )
    .prop_map(|parts| parts.concat())
    .prop_filter("non-blank text", |t| !t.trim().is_empty())
}

fn strip_whitespace(text: &str) -> String {
    text.chars().filter(|c| !c.is_whitespace()).collect()
}

mod prop_chunk_bounds {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        /// Every chunk respects the size limit and carries some text.
        #[test]
        fn chunks_are_bounded_and_non_blank(
            text in arb_text(),
            size in 1usize..80,
            overlap_frac in 0.0f64..1.0,
        ) {
            let overlap = ((size as f64) * overlap_frac) as usize;
            let overlap = overlap.min(size - 1);
            let chunks = split_text(&text, size, overlap).unwrap();
            prop_assert!(!chunks.is_empty());
            for chunk in &chunks {
                prop_assert!(chunk.chars().count() <= size, "chunk {:?} exceeds {}", chunk, size);
                prop_assert!(!chunk.trim().is_empty());
            }
        }

        /// Without overlap, chunks are consecutive slices of the input.
        #[test]
        fn zero_overlap_reconstructs_the_text(text in arb_text(), size in 1usize..80) {
            let chunks = split_text(&text, size, 0).unwrap();
            prop_assert_eq!(strip_whitespace(&chunks.concat()), strip_whitespace(&text));
        }

        /// Text within the limit comes back untouched.
        #[test]
        fn short_text_is_one_chunk(text in arb_text()) {
            let size = text.chars().count();
            let chunks = split_text(&text, size, 0).unwrap();
            prop_assert_eq!(chunks, vec![text]);
        }
    }
}

mod prop_chunk_provenance {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Chunk indices count up across pages and IDs follow them.
        #[test]
        fn indices_are_sequential_across_pages(
            pages in proptest::collection::vec(arb_text(), 1..4),
            size in 5usize..60,
        ) {
            let document = Document::new(
                "doc.pdf",
                pages.iter().zip(1u32..).map(|(text, n)| Page::new(n, text.clone())).collect(),
            );
            let chunks = RecursiveChunker::new(size, 0).chunk(&document).unwrap();

            let mut last_page = 0;
            for (i, chunk) in chunks.iter().enumerate() {
                prop_assert_eq!(chunk.index, i);
                prop_assert_eq!(&chunk.id, &format!("doc.pdf_{i}"));
                prop_assert_eq!(&chunk.document_id, "doc.pdf");
                let page = chunk.page.unwrap_or_default();
                prop_assert!(page >= last_page);
                last_page = page;
                let source = &pages[(page - 1) as usize];
                prop_assert!(source.contains(chunk.text.as_str()));
            }
        }
    }
}
