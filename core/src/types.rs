use crate::DocId;
use serde::Serialize;
use std::cmp::Ordering;

/// One entry of a single-source ranking.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoredDoc {
    pub doc_id: DocId,
    pub score: f64,
}

impl ScoredDoc {
    pub fn new(doc_id: DocId, score: f64) -> Self {
        Self { doc_id, score }
    }
}

/// A fused (and possibly reranked) result. Ephemeral, never persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SearchHit {
    pub doc_id: DocId,
    /// Score under the fusion strategy that produced this hit.
    pub score: f64,
    pub bm25_score: Option<f64>,
    pub semantic_score: Option<f64>,
    /// 1-based position in the BM25 ranking.
    pub bm25_rank: Option<usize>,
    /// 1-based position in the semantic ranking.
    pub semantic_rank: Option<usize>,
    pub rerank_score: Option<f64>,
    /// 1-based position assigned by the reranker.
    pub rerank_rank: Option<usize>,
}

/// Descending score, ties by ascending id.
pub(crate) fn by_score_then_id(a_score: f64, a_id: DocId, b_score: f64, b_id: DocId) -> Ordering {
    b_score.total_cmp(&a_score).then(a_id.cmp(&b_id))
}

pub(crate) fn sort_ranking(results: &mut [ScoredDoc]) {
    results.sort_by(|a, b| by_score_then_id(a.score, a.doc_id, b.score, b.doc_id));
}

pub(crate) fn sort_hits(hits: &mut [SearchHit]) {
    hits.sort_by(|a, b| by_score_then_id(a.score, a.doc_id, b.score, b.doc_id));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ties_break_by_id() {
        let mut r = vec![ScoredDoc::new(9, 1.0), ScoredDoc::new(2, 1.0), ScoredDoc::new(5, 3.0)];
        sort_ranking(&mut r);
        let ids: Vec<DocId> = r.iter().map(|d| d.doc_id).collect();
        assert_eq!(ids, vec![5, 2, 9]);
    }
}
