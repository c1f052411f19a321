//! Rank fusion of a BM25 ranking and a semantic ranking.
//!
//! Two strategies:
//! - weighted: min-max normalize each list, then `alpha * bm25 + (1 - alpha) * semantic`
//! - RRF: sum of `1 / (k + rank)` over the lists a document appears in
//!
//! Both return a strict order (score desc, then doc id asc).

use crate::config::{validate_alpha, validate_rrf_k};
use crate::error::Result;
use crate::types::{sort_hits, ScoredDoc, SearchHit};
use crate::DocId;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FusionStrategy {
    Weighted { alpha: f64 },
    Rrf { k: f64 },
}

/// Min-max normalize into [0, 1]. If every score is equal, all become 1.0.
pub fn normalize(scores: &[f64]) -> Vec<f64> {
    let Some((min, max)) = min_max(scores) else {
        return Vec::new();
    };
    let range = max - min;
    scores
        .iter()
        .map(|s| if range == 0.0 { 1.0 } else { (s - min) / range })
        .collect()
}

fn min_max(scores: &[f64]) -> Option<(f64, f64)> {
    if scores.is_empty() {
        return None;
    }
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for &s in scores {
        min = min.min(s);
        max = max.max(s);
    }
    Some((min, max))
}

/// `1 / (k + rank)` for a 1-based rank.
pub fn rrf_score(rank: usize, k: f64) -> f64 {
    1.0 / (k + rank as f64)
}

fn entry(acc: &mut BTreeMap<DocId, SearchHit>, doc_id: DocId) -> &mut SearchHit {
    acc.entry(doc_id).or_insert_with(|| SearchHit { doc_id, ..SearchHit::default() })
}

/// Record raw scores and 1-based ranks from both lists.
fn collect(bm25: &[ScoredDoc], semantic: &[ScoredDoc]) -> BTreeMap<DocId, SearchHit> {
    let mut acc = BTreeMap::new();
    for (i, d) in bm25.iter().enumerate() {
        let hit = entry(&mut acc, d.doc_id);
        if hit.bm25_rank.is_none() {
            hit.bm25_score = Some(d.score);
            hit.bm25_rank = Some(i + 1);
        }
    }
    for (i, d) in semantic.iter().enumerate() {
        let hit = entry(&mut acc, d.doc_id);
        if hit.semantic_rank.is_none() {
            hit.semantic_score = Some(d.score);
            hit.semantic_rank = Some(i + 1);
        }
    }
    acc
}

fn finish(acc: BTreeMap<DocId, SearchHit>, limit: usize) -> Vec<SearchHit> {
    let mut hits: Vec<SearchHit> = acc.into_values().collect();
    sort_hits(&mut hits);
    hits.truncate(limit);
    hits
}

/// Weighted fusion of normalized scores.
///
/// A document missing from one list gets 0.0 for that component.
pub fn weighted_fusion(
    bm25: &[ScoredDoc],
    semantic: &[ScoredDoc],
    alpha: f64,
    limit: usize,
) -> Result<Vec<SearchHit>> {
    validate_alpha(alpha)?;
    let bm25_norm: BTreeMap<DocId, f64> = normalized_by_id(bm25);
    let semantic_norm: BTreeMap<DocId, f64> = normalized_by_id(semantic);
    let mut acc = collect(bm25, semantic);
    for hit in acc.values_mut() {
        let b = bm25_norm.get(&hit.doc_id).copied().unwrap_or(0.0);
        let s = semantic_norm.get(&hit.doc_id).copied().unwrap_or(0.0);
        hit.score = alpha * b + (1.0 - alpha) * s;
    }
    Ok(finish(acc, limit))
}

fn normalized_by_id(list: &[ScoredDoc]) -> BTreeMap<DocId, f64> {
    let scores: Vec<f64> = list.iter().map(|d| d.score).collect();
    let mut out = BTreeMap::new();
    for (d, n) in list.iter().zip(normalize(&scores)) {
        out.entry(d.doc_id).or_insert(n);
    }
    out
}

/// Reciprocal rank fusion. Input lists must already be in rank order.
pub fn rrf_fusion(
    bm25: &[ScoredDoc],
    semantic: &[ScoredDoc],
    k: f64,
    limit: usize,
) -> Result<Vec<SearchHit>> {
    validate_rrf_k(k)?;
    let mut acc = collect(bm25, semantic);
    for hit in acc.values_mut() {
        hit.score = hit.bm25_rank.map_or(0.0, |r| rrf_score(r, k))
            + hit.semantic_rank.map_or(0.0, |r| rrf_score(r, k));
    }
    Ok(finish(acc, limit))
}

pub fn fuse(
    bm25: &[ScoredDoc],
    semantic: &[ScoredDoc],
    strategy: FusionStrategy,
    limit: usize,
) -> Result<Vec<SearchHit>> {
    match strategy {
        FusionStrategy::Weighted { alpha } => weighted_fusion(bm25, semantic, alpha, limit),
        FusionStrategy::Rrf { k } => rrf_fusion(bm25, semantic, k, limit),
    }
}
