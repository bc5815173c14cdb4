//! Hybrid keyword + vector chunk retrieval.
//!
//! - **Keyword** — FTS5 full-text search over `chunks_fts`, BM25-ranked.
//! - **Vector** — cosine similarity over `chunk_vectors`.
//! - **Hybrid merge** — min-max normalize both candidate sets to `[0, 1]`,
//!   then `score = (1 - alpha) * keyword + alpha * vector`, grouped by
//!   chunk id with score taken as the max across the two sets the chunk
//!   appeared in.
//!
//! This module owns only the scoring math; [`crate::chunk_index::SqliteChunkIndex`]
//! owns the SQL that produces the raw candidate sets.

use serde::Serialize;

/// One scored chunk, as returned by [`crate::storage::ChunkIndex`]'s
/// `keyword_search`/`vector_search` and consumed by the retrieval composer
///.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredChunk {
    pub chunk_id: String,
    pub document_id: String,
    pub text: String,
    pub page: Option<u32>,
    pub score: f64,
}

/// Min-max normalizes `score` across `candidates` to `[0, 1]`. A candidate
/// set where every score is equal normalizes to all-`1.0` (no information to
/// rank by, so nothing is penalized).
pub fn normalize_scores(candidates: &[ScoredChunk]) -> Vec<(ScoredChunk, f64)> {
    if candidates.is_empty() {
        return Vec::new();
    }
    let s_min = candidates.iter().map(|c| c.score).fold(f64::INFINITY, f64::min);
    let s_max = candidates.iter().map(|c| c.score).fold(f64::NEG_INFINITY, f64::max);

    candidates
        .iter()
        .map(|c| {
            let norm = if (s_max - s_min).abs() < f64::EPSILON {
                1.0
            } else {
                (c.score - s_min) / (s_max - s_min)
            };
            (c.clone(), norm)
        })
        .collect()
}

/// Merges normalized keyword and vector candidate sets with weight `alpha`
/// applied to the vector side (`alpha` is `config.retrieval.hybrid_alpha`,
/// validated to `[0, 1]` at config load). A chunk present in only one set
/// contributes only that set's weighted term - absence from a set is not
/// treated as a zero score for that set, since the set was never asked to
/// rank a chunk it didn't retrieve.
pub fn merge_hybrid(keyword: &[ScoredChunk], vector: &[ScoredChunk], alpha: f64, limit: usize) -> Vec<ScoredChunk> {
    let norm_keyword = normalize_scores(keyword);
    let norm_vector = normalize_scores(vector);

    let mut merged: std::collections::HashMap<String, (ScoredChunk, f64)> = std::collections::HashMap::new();

    for (chunk, norm) in norm_keyword {
        let weighted = (1.0 - alpha) * norm;
        merged
            .entry(chunk.chunk_id.clone())
            .and_modify(|(_, score)| *score += weighted)
            .or_insert((chunk, weighted));
    }
    for (chunk, norm) in norm_vector {
        let weighted = alpha * norm;
        merged
            .entry(chunk.chunk_id.clone())
            .and_modify(|(_, score)| *score += weighted)
            .or_insert((chunk, weighted));
    }

    let mut results: Vec<ScoredChunk> = merged
        .into_iter()
        .map(|(_, (mut chunk, score))| {
            chunk.score = score;
            chunk
        })
        .collect();
    results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal).then_with(|| a.chunk_id.cmp(&b.chunk_id)));
    results.truncate(limit);
    results
}
