//! Reciprocal Rank Fusion.
//!
//! `RRF(d) = Σ_list 1 / (k + rank(d) + 1)` over every ranked list that
//! contains `d`, with zero-based ranks and the conventional `k = 60`.

use std::collections::HashMap;

pub const RRF_K: f64 = 60.0;

/// Fuse ranked lists of item keys. Returns `(key, fused_score)` sorted by
/// score descending; ties break on the key so the order is deterministic.
pub fn reciprocal_rank_fusion(lists: &[Vec<String>], k: f64) -> Vec<(String, f64)> {
    let mut scores: HashMap<String, f64> = HashMap::new();
    for list in lists {
        for (rank, key) in list.iter().enumerate() {
            *scores.entry(key.clone()).or_insert(0.0) += 1.0 / (k + rank as f64 + 1.0);
        }
    }

    let mut fused: Vec<(String, f64)> = scores.into_iter().collect();
    fused.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    fused
}
