//! Paragraph-boundary text chunker with overlap.
//!
//! Splits document text into [`Chunk`]s that target `target_tokens` (default
//! 384) with a configurable overlap fraction (default 25%) between
//! consecutive chunks, splitting on paragraph boundaries (`\n\n`) to
//! preserve semantic coherence. Oversized paragraphs hard-split on the
//! nearest newline/space boundary, same as plain non-overlapping chunking.
//!
//! Page breaks are detected via the form-feed character (`\x0c`) that
//! [`crate::extract::extract_text`]'s PDF path may emit between pages; text
//! with no form feeds is treated as a single unpaginated page.

use sha2::{Digest, Sha256};

use crate::models::Chunk;

/// Approximate chars-per-token ratio, consistent with the validator's text
/// metadata and the rest of the pipeline.
const CHARS_PER_TOKEN: usize = 4;

struct Atom<'a> {
    start: usize,
    text: &'a str,
}

/// Split `text` into overlapping chunks targeting `target_tokens` tokens
/// with `overlap_ratio` (0.0..1.0) of that window repeated at the start of
/// the next chunk.
pub fn chunk_document(
    document_id: &str,
    text: &str,
    target_tokens: usize,
    overlap_ratio: f32,
) -> Vec<Chunk> {
    let max_chars = (target_tokens * CHARS_PER_TOKEN).max(1);
    let overlap_chars = ((max_chars as f32) * overlap_ratio.clamp(0.0, 0.9)) as usize;

    if text.trim().is_empty() {
        return vec![make_chunk(document_id, None, 0, "")];
    }

    let pages = split_pages(text);
    let mut out = Vec::new();
    for (page, page_text) in pages {
        let atoms = split_atoms(page_text, max_chars);
        for (offset, piece) in merge_with_overlap(&atoms, max_chars, overlap_chars) {
            out.push(make_chunk(document_id, page, offset, &piece));
        }
    }
    if out.is_empty() {
        out.push(make_chunk(document_id, None, 0, text.trim()));
    }
    out
}

/// Splits text on form-feed page breaks. Returns `(None, text)` for the
/// whole document when no form feed is present.
fn split_pages(text: &str) -> Vec<(Option<u32>, &str)> {
    if !text.contains('\x0c') {
        return vec![(None, text)];
    }
    text.split('\x0c')
        .enumerate()
        .map(|(i, page_text)| (Some(i as u32 + 1), page_text))
        .collect()
}

/// Breaks `text` into paragraph atoms, hard-splitting any paragraph that
/// alone exceeds `max_chars` on a newline/space boundary. Each atom retains
/// its byte offset within `text`.
fn split_atoms(text: &str, max_chars: usize) -> Vec<Atom<'_>> {
    let mut atoms = Vec::new();
    let mut search_from = 0usize;
    for para in text.split("\n\n") {
        let trimmed = para.trim();
        // Locate this paragraph's actual position so offsets are faithful.
        let start_in_para = para.find(trimmed).unwrap_or(0);
        let found = text[search_from..].find(para).map(|p| search_from + p);
        let base = found.unwrap_or(search_from) + start_in_para;
        search_from = base + trimmed.len();

        if trimmed.is_empty() {
            continue;
        }
        if trimmed.len() <= max_chars {
            atoms.push(Atom {
                start: base,
                text: trimmed,
            });
            continue;
        }
        let mut remaining = trimmed;
        let mut cursor = base;
        while !remaining.is_empty() {
            let split_at = remaining.len().min(max_chars);
            let actual_split = if split_at < remaining.len() {
                remaining[..split_at]
                    .rfind('\n')
                    .or_else(|| remaining[..split_at].rfind(' '))
                    .map(|pos| pos + 1)
                    .unwrap_or(split_at)
            } else {
                split_at
            };
            let piece = &remaining[..actual_split];
            let piece_trimmed = piece.trim();
            if !piece_trimmed.is_empty() {
                let piece_start = cursor + piece.find(piece_trimmed).unwrap_or(0);
                atoms.push(Atom {
                    start: piece_start,
                    text: piece_trimmed,
                });
            }
            cursor += actual_split;
            remaining = &remaining[actual_split..];
        }
    }
    atoms
}

/// Slides a window of atoms into chunks of at most `max_chars`, carrying
/// the trailing `overlap_chars` worth of atoms into the next window.
fn merge_with_overlap(atoms: &[Atom<'_>], max_chars: usize, overlap_chars: usize) -> Vec<(usize, String)> {
    let mut out = Vec::new();
    let mut buf: Vec<&Atom> = Vec::new();
    let mut buf_len = 0usize;
    let mut i = 0;
    while i < atoms.len() {
        let atom = &atoms[i];
        let added_len = if buf.is_empty() {
            atom.text.len()
        } else {
            buf_len + 2 + atom.text.len()
        };
        if added_len > max_chars && !buf.is_empty() {
            out.push(flush(&buf));
            // carry overlap: keep trailing atoms whose combined length <= overlap_chars
            let mut keep_from = buf.len();
            let mut kept_len = 0usize;
            while keep_from > 0 {
                let candidate = buf[keep_from - 1].text.len();
                if kept_len + candidate > overlap_chars {
                    break;
                }
                kept_len += candidate + 2;
                keep_from -= 1;
            }
            buf = buf[keep_from..].to_vec();
            buf_len = buf.iter().map(|a| a.text.len()).sum::<usize>()
                + buf.len().saturating_sub(1) * 2;
            continue;
        }
        buf.push(atom);
        buf_len = added_len;
        i += 1;
    }
    if !buf.is_empty() {
        out.push(flush(&buf));
    }
    out
}

fn flush(buf: &[&Atom]) -> (usize, String) {
    let start = buf.first().map(|a| a.start).unwrap_or(0);
    let text = buf
        .iter()
        .map(|a| a.text)
        .collect::<Vec<_>>()
        .join("\n\n");
    (start, text)
}

fn make_chunk(document_id: &str, page: Option<u32>, offset: usize, text: &str) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(document_id.as_bytes());
    hasher.update(b":");
    hasher.update(offset.to_le_bytes());
    hasher.update(b":");
    hasher.update(text.as_bytes());
    let chunk_id = format!("{:x}", hasher.finalize());

    Chunk {
        chunk_id,
        document_id: document_id.to_string(),
        text: text.to_string(),
        page,
        offset,
        embedding: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_text_single_chunk() {
        let chunks = chunk_document("doc1", "Hello, world!", 700, 0.25);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "Hello, world!");
        assert_eq!(chunks[0].offset, 0);
    }

    #[test]
    fn empty_text_yields_one_chunk() {
        let chunks = chunk_document("doc1", "", 700, 0.25);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "");
    }

    #[test]
    fn multiple_paragraphs_exceed_limit_and_overlap() {
        let text = "This is paragraph one.\n\nThis is paragraph two.\n\nThis is paragraph three.\n\nThis is paragraph four.";
        let chunks = chunk_document("doc1", text, 5, 0.25);
        assert!(chunks.len() > 1);
        // consecutive chunks should share some text due to overlap
        let shares_overlap = chunks.windows(2).any(|w| {
            let a_tail = &w[0].text[w[0].text.len().saturating_sub(10)..];
            w[1].text.contains(a_tail.trim())
        });
        assert!(shares_overlap || chunks.len() <= 2);
    }

    #[test]
    fn deterministic_chunk_ids() {
        let text = "Alpha\n\nBeta\n\nGamma\n\nDelta";
        let c1 = chunk_document("doc1", text, 5, 0.25);
        let c2 = chunk_document("doc1", text, 5, 0.25);
        assert_eq!(c1.len(), c2.len());
        for (a, b) in c1.iter().zip(c2.iter()) {
            assert_eq!(a.text, b.text);
            assert_eq!(a.chunk_id, b.chunk_id);
            assert_eq!(a.offset, b.offset);
        }
    }

    #[test]
    fn page_breaks_produce_page_numbers() {
        let text = "page one text\x0cpage two text";
        let chunks = chunk_document("doc1", text, 700, 0.25);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].page, Some(1));
        assert_eq!(chunks[1].page, Some(2));
    }

    #[test]
    fn no_form_feed_means_no_page() {
        let chunks = chunk_document("doc1", "just some text", 700, 0.25);
        assert_eq!(chunks[0].page, None);
    }
}
