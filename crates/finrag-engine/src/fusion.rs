//! Reciprocal Rank Fusion.
//!
//! Merges the vector and lexical rankings on ranks alone, so the two score
//! spaces (distance vs. BM25 statistic) never have to be reconciled. The
//! fused score stays a rank-based consensus value; downstream code formats
//! it for display and never converts it back into either input space.

use std::cmp::Ordering;
use std::collections::HashMap;

use finrag_core::types::{FusedCandidate, Meta, RetrievalCandidate};

/// Smoothing constant from the RRF literature; larger values flatten the
/// weight difference between top and bottom ranks.
pub const DEFAULT_RRF_K: f32 = 60.0;

/// Candidates from different indexes are the same document when this many
/// leading characters of content agree.
const CONTENT_KEY_CHARS: usize = 200;

fn content_key(content: &str) -> String {
    content.chars().take(CONTENT_KEY_CHARS).collect()
}

struct Accumulated {
    content: String,
    metadata: Meta,
    score: f32,
}

fn accumulate(
    list: &[RetrievalCandidate],
    weight: f32,
    k_const: f32,
    by_key: &mut HashMap<String, usize>,
    accumulated: &mut Vec<Accumulated>,
) {
    for (position, candidate) in list.iter().enumerate() {
        let rank = (position + 1) as f32;
        let contribution = weight / (k_const + rank);
        let key = content_key(&candidate.content);
        match by_key.get(&key) {
            Some(&slot) => accumulated[slot].score += contribution,
            None => {
                by_key.insert(key, accumulated.len());
                accumulated.push(Accumulated {
                    content: candidate.content.clone(),
                    metadata: candidate.metadata.clone(),
                    score: contribution,
                });
            }
        }
    }
}

/// Fuses two ranked lists: each document at 1-based rank `r` in a list
/// contributes `weight / (k_const + r)`; contributions accumulate per
/// unique document across both lists. Sorted descending by fused score;
/// the sort is stable, so ties keep first-seen order and the output is
/// deterministic for a given pair of inputs.
pub fn reciprocal_rank_fusion(
    vector_results: &[RetrievalCandidate],
    lexical_results: &[RetrievalCandidate],
    k_const: f32,
    vector_weight: f32,
    lexical_weight: f32,
) -> Vec<FusedCandidate> {
    let mut by_key = HashMap::new();
    let mut accumulated = Vec::new();

    accumulate(vector_results, vector_weight, k_const, &mut by_key, &mut accumulated);
    accumulate(lexical_results, lexical_weight, k_const, &mut by_key, &mut accumulated);

    accumulated.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));

    accumulated
        .into_iter()
        .map(|a| FusedCandidate { content: a.content, metadata: a.metadata, rrf_score: a.score })
        .collect()
}
