//! Token-aware splitter with size/overlap (C12).
//!
//! Ported from the fixed-window `cl100k_base` chunking style used elsewhere
//! in this retrieval pack (token-count sliding window, decode back to text)
//! rather than the teacher's line-based demo splitter in `bin/main.rs`,
//! which the teacher itself only used for a CLI demo and not as the
//! library's chunking contract.

use std::sync::OnceLock;

use regex::Regex;
use tiktoken_rs::CoreBPE;

use crate::error::Result;
use crate::models::ContentType;

/// Collapses runs of 3+ blank lines down to one, which Markdown extracted
/// from notes/wikis tends to accumulate and which otherwise wastes tokens
/// on whitespace the splitter would just chunk around.
fn blank_line_run() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n{3,}").expect("static regex"))
}

/// Defaults keyed by model dimension (spec.md §4.13 step 3): 250/50 for
/// 384-d models, 400/80 for 768-d models. Anything else falls back to the
/// 384-d default.
pub fn default_chunk_params(dimensions: u16) -> (usize, usize) {
    match dimensions {
        768 => (400, 80),
        _ => (250, 50),
    }
}

fn tokenizer() -> &'static CoreBPE {
    static TOKENIZER: OnceLock<CoreBPE> = OnceLock::new();
    TOKENIZER.get_or_init(|| tiktoken_rs::cl100k_base().expect("failed to load cl100k tokenizer"))
}

/// One chunk produced by [`chunk_text`], not yet assigned an `embedding_id`.
#[derive(Debug, Clone)]
pub struct TextChunk {
    pub index: u32,
    pub content: String,
}

/// Per-format preprocessing hook (spec.md §4.13 step 2/3): normalizes raw
/// text before it is handed to the token splitter. Markdown and plain text
/// pass through unchanged; PDF/DOCX text extraction happens upstream of the
/// core (spec.md §1 "deliberately out of scope"), so by the time content
/// reaches here it is already plain text regardless of `content_type`.
pub fn preprocess(content_type: ContentType, text: &str) -> String {
    match content_type {
        ContentType::Markdown => {
            let stripped = text.replace('\r', "");
            blank_line_run().replace_all(&stripped, "\n\n").into_owned()
        }
        _ => text.to_string(),
    }
}

/// Splits `text` into overlapping, bounded token windows.
///
/// Empty or whitespace-only input produces no chunks. `overlap` is clamped
/// to be strictly smaller than `chunk_size` so the sliding window always
/// advances.
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Result<Vec<TextChunk>> {
    let trimmed = text.trim();
    if trimmed.is_empty() || chunk_size == 0 {
        return Ok(Vec::new());
    }
    let overlap = overlap.min(chunk_size.saturating_sub(1));
    let stride = chunk_size - overlap;

    let bpe = tokenizer();
    let tokens = bpe.encode_ordinary(trimmed);
    if tokens.is_empty() {
        return Ok(Vec::new());
    }

    let mut chunks = Vec::new();
    let mut start = 0usize;
    let mut index = 0u32;
    while start < tokens.len() {
        let end = (start + chunk_size).min(tokens.len());
        let decoded = decode_to_valid_utf8(bpe, &tokens[start..end]);
        let content = decoded.trim();
        if !content.is_empty() {
            chunks.push(TextChunk {
                index,
                content: content.to_string(),
            });
            index += 1;
        }
        if end == tokens.len() {
            break;
        }
        start += stride;
    }
    Ok(chunks)
}

/// Decodes a token slice, extending the end of the window forward one token
/// at a time when the boundary splits a multi-byte UTF-8 sequence.
fn decode_to_valid_utf8(bpe: &CoreBPE, tokens: &[u32]) -> String {
    let mut end = tokens.len();
    loop {
        if let Ok(s) = bpe.decode(tokens[..end].to_vec()) {
            return s;
        }
        if end == 0 {
            return String::new();
        }
        end -= 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_and_whitespace_input_produce_no_chunks() {
        assert!(chunk_text("", 100, 10).unwrap().is_empty());
        assert!(chunk_text("   \n  ", 100, 10).unwrap().is_empty());
    }

    #[test]
    fn short_text_is_a_single_chunk() {
        let chunks = chunk_text("cats sleep a lot", 250, 50).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].index, 0);
        assert_eq!(chunks[0].content, "cats sleep a lot");
    }

    #[test]
    fn long_text_splits_into_overlapping_windows() {
        let text = (0..2000).map(|i| format!("word{i}")).collect::<Vec<_>>().join(" ");
        let chunks = chunk_text(&text, 100, 20).unwrap();
        assert!(chunks.len() > 1);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.index as usize, i);
        }
    }

    #[test]
    fn default_params_match_dimension_table() {
        assert_eq!(default_chunk_params(384), (250, 50));
        assert_eq!(default_chunk_params(768), (400, 80));
        assert_eq!(default_chunk_params(512), (250, 50));
    }

    #[test]
    fn overlap_greater_than_chunk_size_is_clamped() {
        let chunks = chunk_text("a b c d e f g h i j k l m n o p", 3, 30).unwrap();
        assert!(!chunks.is_empty());
    }

    #[test]
    fn preprocess_collapses_blank_line_runs_in_markdown() {
        let out = preprocess(ContentType::Markdown, "a\n\n\n\n\nb");
        assert_eq!(out, "a\n\nb");
    }

    #[test]
    fn preprocess_leaves_plain_text_untouched() {
        let out = preprocess(ContentType::Text, "a\n\n\n\nb");
        assert_eq!(out, "a\n\n\n\nb");
    }
}
