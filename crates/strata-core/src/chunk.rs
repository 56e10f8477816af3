//! Paragraph-aware text chunker.
//!
//! Splits a cleaned document body into [`Chunk`]s of at most `max_tokens`
//! (approximated as 4 characters per token). Paragraphs are packed
//! together until the next one would overflow; a paragraph that is too
//! large on its own is split at sentence ends, then at whitespace, and
//! only as a last resort mid-word.
//!
//! Chunk IDs are derived from the document ID, the chunk index, and the
//! chunk text, so a re-sync of identical content reproduces identical IDs
//! while any edit yields fresh ones.
//!
//! ```rust
//! use strata_core::chunk::chunk_text;
//!
//! let chunks = chunk_text("doc-123", "Hello world.\n\nSecond paragraph.", 700);
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].chunk_index, 0);
//! ```

use crate::models::Chunk;
use crate::text::content_hash;

const CHARS_PER_TOKEN: usize = 4;

/// Split `text` into chunks with contiguous indices starting at 0.
///
/// Always returns at least one chunk, even for empty input.
pub fn chunk_text(document_id: &str, text: &str, max_tokens: usize) -> Vec<Chunk> {
    let max_chars = (max_tokens * CHARS_PER_TOKEN).max(1);
    let mut pieces: Vec<String> = Vec::new();
    let mut buf = String::new();

    for para in text.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
        let para_len = para.chars().count();
        if para_len > max_chars {
            if !buf.is_empty() {
                pieces.push(std::mem::take(&mut buf));
            }
            pieces.extend(split_oversized(para, max_chars));
            continue;
        }
        let joined_len = if buf.is_empty() {
            para_len
        } else {
            buf.chars().count() + 2 + para_len
        };
        if joined_len > max_chars && !buf.is_empty() {
            pieces.push(std::mem::take(&mut buf));
        }
        if !buf.is_empty() {
            buf.push_str("\n\n");
        }
        buf.push_str(para);
    }
    if !buf.is_empty() {
        pieces.push(buf);
    }
    if pieces.is_empty() {
        pieces.push(text.trim().to_string());
    }

    pieces
        .into_iter()
        .enumerate()
        .map(|(idx, piece)| make_chunk(document_id, idx as i64, piece))
        .collect()
}

/// Split one paragraph that exceeds `max_chars`.
fn split_oversized(para: &str, max_chars: usize) -> Vec<String> {
    let mut out = Vec::new();
    let mut rest: &str = para;
    while rest.chars().count() > max_chars {
        let limit = rest
            .char_indices()
            .nth(max_chars)
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        let window = &rest[..limit];
        let cut = window
            .rfind(". ")
            .map(|i| i + 2)
            .or_else(|| window.rfind([' ', '\n', '\t']).map(|i| i + 1))
            .filter(|&i| i > 0)
            .unwrap_or(limit);
        let (head, tail) = rest.split_at(cut);
        let head = head.trim();
        if !head.is_empty() {
            out.push(head.to_string());
        }
        rest = tail.trim_start();
    }
    if !rest.trim().is_empty() {
        out.push(rest.trim().to_string());
    }
    out
}

fn make_chunk(document_id: &str, index: i64, text: String) -> Chunk {
    let hash = content_hash(&text);
    let id = content_hash(&format!("{}:{}:{}", document_id, index, hash));
    Chunk {
        id: format!("chk_{}", &id[..32]),
        document_id: document_id.to_string(),
        chunk_index: index,
        text,
        hash,
    }
}
