//! Okapi BM25 over the inverted index.
//!
//! - IDF: `ln((N - n + 0.5) / (n + 0.5) + 1)`, non-negative for `n <= N`
//! - TF: `f (k1 + 1) / (f + k1 (1 - b + b |d| / avgdl))`
//! - ranking is deterministic: score desc, then doc id asc

use crate::config::{BM25_B, BM25_K1};
use crate::corpus::Corpus;
use crate::error::{Result, SearchError};
use crate::index::InvertedIndex;
use crate::persist::{self, BuildKey, CachePaths};
use crate::tokenizer::Analyzer;
use crate::types::{sort_ranking, ScoredDoc};
use crate::DocId;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Bm25Params {
    /// Term-frequency saturation.
    pub k1: f64,
    /// Length normalization.
    pub b: f64,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self { k1: BM25_K1, b: BM25_B }
    }
}

impl Bm25Params {
    pub fn validate(&self) -> Result<()> {
        if !(self.k1 >= 0.0 && self.k1.is_finite()) {
            return Err(SearchError::InvalidParameter(format!(
                "k1 must be a non-negative number, got {}",
                self.k1
            )));
        }
        if !(0.0..=1.0).contains(&self.b) {
            return Err(SearchError::InvalidParameter(format!(
                "b must be within [0, 1], got {}",
                self.b
            )));
        }
        Ok(())
    }
}

impl InvertedIndex {
    /// Okapi IDF of an already-analyzed term. Absent terms are not special-cased.
    pub fn bm25_idf(&self, term: &str) -> f64 {
        let n_docs = self.num_docs() as f64;
        let df = self.document_frequency(term) as f64;
        ((n_docs - df + 0.5) / (df + 0.5) + 1.0).ln()
    }

    /// Saturated, length-normalized term frequency.
    pub fn bm25_tf(&self, doc_id: DocId, term: &str, params: Bm25Params) -> f64 {
        let f = self.term_frequency(doc_id, term) as f64;
        if f == 0.0 {
            return 0.0;
        }
        let avg = self.average_document_length();
        let len_ratio = if avg > 0.0 { self.document_length(doc_id) as f64 / avg } else { 0.0 };
        let norm = 1.0 - params.b + params.b * len_ratio;
        (f * (params.k1 + 1.0)) / (f + params.k1 * norm)
    }

    pub fn bm25(&self, doc_id: DocId, term: &str, params: Bm25Params) -> f64 {
        self.bm25_idf(term) * self.bm25_tf(doc_id, term, params)
    }

    /// Classic smoothed IDF `ln((N + 1) / (df + 1))`.
    pub fn idf(&self, term: &str) -> f64 {
        let n_docs = self.num_docs() as f64;
        let df = self.document_frequency(term) as f64;
        ((n_docs + 1.0) / (df + 1.0)).ln()
    }

    pub fn tf_idf(&self, doc_id: DocId, term: &str) -> f64 {
        self.term_frequency(doc_id, term) as f64 * self.idf(term)
    }

    /// Score every document containing at least one of `terms`.
    ///
    /// Repeated query terms count once per occurrence.
    pub fn bm25_scores(&self, terms: &[String], params: Bm25Params) -> Vec<ScoredDoc> {
        let mut candidates: HashSet<DocId> = HashSet::new();
        for term in terms {
            if let Some(ids) = self.postings.get(term) {
                candidates.extend(ids.iter().copied());
            }
        }
        let idfs: HashMap<&str, f64> =
            terms.iter().map(|t| (t.as_str(), self.bm25_idf(t))).collect();
        let mut results: Vec<ScoredDoc> = candidates
            .into_iter()
            .map(|doc_id| {
                let score = terms
                    .iter()
                    .map(|t| idfs[t.as_str()] * self.bm25_tf(doc_id, t, params))
                    .sum();
                ScoredDoc::new(doc_id, score)
            })
            .collect();
        sort_ranking(&mut results);
        results
    }
}

/// Analyzer plus a swappable index snapshot.
pub struct KeywordSearch {
    analyzer: Analyzer,
    params: Bm25Params,
    index: RwLock<Option<Arc<InvertedIndex>>>,
}

impl KeywordSearch {
    pub fn new(analyzer: Analyzer, params: Bm25Params) -> Self {
        Self { analyzer, params, index: RwLock::new(None) }
    }

    pub fn analyzer(&self) -> &Analyzer {
        &self.analyzer
    }

    /// Load the cached index; fails with `MissingIndex` if it was never built
    /// and `StaleIndex` if it was built with other stop words.
    pub fn load(&self, paths: &CachePaths) -> Result<Arc<InvertedIndex>> {
        let (index, meta) = persist::load_index(paths)?;
        if meta.key != BuildKey::index(&self.analyzer) {
            return Err(SearchError::StaleIndex {
                path: paths.index_meta(),
                reason: "built with a different stop-word list".into(),
            });
        }
        tracing::debug!(num_docs = meta.num_docs, snapshot = %meta.snapshot_id, "loaded index");
        Ok(self.install(index))
    }

    /// Load the cache if it matches `corpus`, otherwise rebuild it.
    ///
    /// A cache built with a different stop-word list counts as stale.
    pub fn load_or_build(
        &self,
        corpus: &Corpus,
        paths: &CachePaths,
    ) -> Result<Arc<InvertedIndex>> {
        let key = BuildKey::index(&self.analyzer);
        if let Some(meta) = persist::existing_meta(&paths.index_meta())? {
            if meta.is_current_for(corpus, &key) {
                return self.load(paths);
            }
            tracing::info!(cache = %paths.root.display(), "cached index is stale; rebuilding");
        }
        self.rebuild(corpus, paths)
    }

    /// Build from scratch, persist, and swap the new index in.
    pub fn rebuild(&self, corpus: &Corpus, paths: &CachePaths) -> Result<Arc<InvertedIndex>> {
        let index = InvertedIndex::build(corpus, &self.analyzer);
        persist::save_index(paths, &index, corpus, &self.analyzer)?;
        Ok(self.install(index))
    }

    pub fn install(&self, index: InvertedIndex) -> Arc<InvertedIndex> {
        let index = Arc::new(index);
        *self.index.write() = Some(Arc::clone(&index));
        index
    }

    pub fn snapshot(&self) -> Result<Arc<InvertedIndex>> {
        self.index
            .read()
            .clone()
            .ok_or(SearchError::NotInitialized { component: "keyword index" })
    }

    /// BM25 top-`limit`. A query with no indexable terms returns nothing.
    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<ScoredDoc>> {
        let index = self.snapshot()?;
        let terms = self.analyzer.analyze(query);
        tracing::debug!(query, ?terms, limit, "bm25 search");
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        let mut results = index.bm25_scores(&terms, self.params);
        results.truncate(limit);
        Ok(results)
    }

    pub fn tf(&self, doc_id: DocId, term: &str) -> Result<u32> {
        let term = self.analyzer.single_term(term)?;
        Ok(self.snapshot()?.term_frequency(doc_id, &term))
    }

    pub fn idf(&self, term: &str) -> Result<f64> {
        let term = self.analyzer.single_term(term)?;
        Ok(self.snapshot()?.idf(&term))
    }

    pub fn tf_idf(&self, doc_id: DocId, term: &str) -> Result<f64> {
        let term = self.analyzer.single_term(term)?;
        Ok(self.snapshot()?.tf_idf(doc_id, &term))
    }

    pub fn bm25_idf(&self, term: &str) -> Result<f64> {
        let term = self.analyzer.single_term(term)?;
        Ok(self.snapshot()?.bm25_idf(&term))
    }

    pub fn bm25_tf(&self, doc_id: DocId, term: &str, params: Bm25Params) -> Result<f64> {
        params.validate()?;
        let term = self.analyzer.single_term(term)?;
        Ok(self.snapshot()?.bm25_tf(doc_id, &term, params))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::Document;

    fn bear_corpus() -> Corpus {
        Corpus::new(vec![
            Document::new(1, "The Revenant", "A man survives a bear attack"),
            Document::new(2, "Paddington", "A bear moves to London"),
            Document::new(3, "Heat", "A crew of thieves plans a heist in the city"),
        ])
        .unwrap()
    }

    fn search() -> KeywordSearch {
        let ks = KeywordSearch::new(Analyzer::default(), Bm25Params::default());
        ks.install(InvertedIndex::build(&bear_corpus(), ks.analyzer()));
        ks
    }

    #[test]
    fn bear_finds_both_bear_movies() {
        let results = search().search("bear", 10).unwrap();
        let ids: Vec<DocId> = results.iter().map(|r| r.doc_id).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&1) && ids.contains(&2));
        assert!(results.iter().all(|r| r.score > 0.0));
    }

    #[test]
    fn idf_formula() {
        let ks = search();
        let idx = ks.snapshot().unwrap();
        let expected = ((3.0 - 2.0 + 0.5) / (2.0 + 0.5) + 1.0f64).ln();
        assert!((idx.bm25_idf("bear") - expected).abs() < 1e-12);
        // absent term: n = 0, still defined and positive
        let absent = ((3.0 + 0.5) / 0.5 + 1.0f64).ln();
        assert!((idx.bm25_idf("dinosaur") - absent).abs() < 1e-12);
    }

    #[test]
    fn absent_term_scores_zero_everywhere() {
        let idx = search().snapshot().unwrap();
        for id in 1..=3 {
            assert_eq!(idx.bm25(id, "dinosaur", Bm25Params::default()), 0.0);
        }
    }

    #[test]
    fn tf_component_matches_formula() {
        let idx = search().snapshot().unwrap();
        let p = Bm25Params::default();
        let f = 1.0;
        let ratio = idx.document_length(2) as f64 / idx.average_document_length();
        let expected = f * (p.k1 + 1.0) / (f + p.k1 * (1.0 - p.b + p.b * ratio));
        assert!((idx.bm25_tf(2, "bear", p) - expected).abs() < 1e-12);
    }

    #[test]
    fn shorter_document_wins_equal_tf() {
        // Paddington is shorter than The Revenant, so its single "bear" weighs more.
        let results = search().search("bear", 10).unwrap();
        assert_eq!(results[0].doc_id, 2);
    }

    #[test]
    fn ties_break_by_ascending_id() {
        let corpus = Corpus::new(vec![
            Document::new(8, "Bear", "forest"),
            Document::new(3, "Bear", "forest"),
            Document::new(5, "Wolf", "forest"),
        ])
        .unwrap();
        let ks = KeywordSearch::new(Analyzer::default(), Bm25Params::default());
        ks.install(InvertedIndex::build(&corpus, ks.analyzer()));
        let ids: Vec<DocId> = ks.search("bear", 10).unwrap().iter().map(|r| r.doc_id).collect();
        assert_eq!(ids, vec![3, 8]);
    }

    #[test]
    fn stopword_only_query_is_empty() {
        assert!(search().search("the and of", 10).unwrap().is_empty());
        assert!(search().search("", 10).unwrap().is_empty());
    }

    #[test]
    fn limit_truncates() {
        assert_eq!(search().search("bear", 1).unwrap().len(), 1);
    }

    #[test]
    fn load_rejects_other_stop_words() {
        let dir = tempfile::tempdir().unwrap();
        let paths = CachePaths::new(dir.path());
        KeywordSearch::new(Analyzer::default(), Bm25Params::default())
            .rebuild(&bear_corpus(), &paths)
            .unwrap();

        let same = KeywordSearch::new(Analyzer::default(), Bm25Params::default());
        assert_eq!(same.load(&paths).unwrap().num_docs(), 3);
        let other = KeywordSearch::new(Analyzer::new(["bear"]), Bm25Params::default());
        assert!(matches!(other.load(&paths), Err(SearchError::StaleIndex { .. })));
    }

    #[test]
    fn uninitialized_search_is_an_error() {
        let ks = KeywordSearch::new(Analyzer::default(), Bm25Params::default());
        assert!(matches!(ks.search("bear", 5), Err(SearchError::NotInitialized { .. })));
    }

    #[test]
    fn diagnostics_require_single_term() {
        let ks = search();
        assert_eq!(ks.tf(1, "bears").unwrap(), 1);
        assert!(matches!(ks.tf(1, "brown bear"), Err(SearchError::InvalidTerm { .. })));
        assert!(ks.idf("bear").unwrap() > 0.0);
        assert!(ks.tf_idf(3, "bear").unwrap() == 0.0);
        assert!(ks.bm25_idf("bear").unwrap() > 0.0);
        assert!(ks.bm25_tf(1, "bear", Bm25Params { k1: 1.2, b: 0.5 }).unwrap() > 0.0);
        assert!(ks.bm25_tf(1, "bear", Bm25Params { k1: 1.2, b: 2.0 }).is_err());
    }
}
