//! Keyword + semantic retrieval fused into one ranking, with optional rerank.

use crate::bm25::KeywordSearch;
use crate::config::SearchConfig;
use crate::corpus::Corpus;
use crate::encoder::Encoder;
use crate::error::Result;
use crate::fusion::{self, FusionStrategy};
use crate::generate::{self, GroundedAnswer};
use crate::index::InvertedIndex;
use crate::oracle::Oracle;
use crate::persist::CachePaths;
use crate::rerank::{self, RerankStrategy};
use crate::tokenizer::Analyzer;
use crate::types::{ScoredDoc, SearchHit};
use crate::vector::{Granularity, VectorSearch};
use std::sync::Arc;

pub struct HybridSearch {
    keyword: KeywordSearch,
    vector: VectorSearch,
    encoder: Arc<dyn Encoder>,
    config: SearchConfig,
}

impl HybridSearch {
    /// Semantic side runs over sentence-window chunks.
    pub fn new(
        analyzer: Analyzer,
        encoder: Arc<dyn Encoder>,
        config: SearchConfig,
    ) -> Result<Self> {
        Self::with_granularity(analyzer, encoder, config, Granularity::Chunk)
    }

    pub fn with_granularity(
        analyzer: Analyzer,
        encoder: Arc<dyn Encoder>,
        config: SearchConfig,
        granularity: Granularity,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            keyword: KeywordSearch::new(analyzer, config.bm25),
            vector: VectorSearch::new(granularity, config.chunking),
            encoder,
            config,
        })
    }

    pub fn keyword(&self) -> &KeywordSearch { &self.keyword }
    pub fn vector(&self) -> &VectorSearch { &self.vector }
    pub fn encoder(&self) -> &dyn Encoder { self.encoder.as_ref() }
    pub fn config(&self) -> &SearchConfig { &self.config }

    /// Bring both snapshots up to date with `corpus`, reusing valid caches.
    pub fn load_or_build(&self, corpus: &Corpus, paths: &CachePaths) -> Result<()> {
        self.keyword.load_or_build(corpus, paths)?;
        self.vector.load_or_build(corpus, self.encoder(), paths)?;
        Ok(())
    }

    pub fn rebuild(&self, corpus: &Corpus, paths: &CachePaths) -> Result<()> {
        self.keyword.rebuild(corpus, paths)?;
        self.vector.rebuild(corpus, self.encoder(), paths)?;
        Ok(())
    }

    /// Loaded index, for resolving hit ids to documents.
    pub fn documents(&self) -> Result<Arc<InvertedIndex>> {
        self.keyword.snapshot()
    }

    pub fn bm25_search(&self, query: &str, limit: usize) -> Result<Vec<ScoredDoc>> {
        self.keyword.search(query, limit)
    }

    pub fn semantic_search(&self, query: &str, limit: usize) -> Result<Vec<ScoredDoc>> {
        self.vector.search(query, self.encoder(), limit)
    }

    /// Candidates each source ranking supplies before fusion.
    fn candidate_depth(&self, limit: usize) -> usize {
        limit.saturating_mul(self.config.overfetch_factor)
    }

    /// Fuse the two rankings under `strategy`.
    ///
    /// A query without a single letter or digit returns nothing, as does a
    /// zero `limit`.
    pub fn search(
        &self,
        query: &str,
        strategy: FusionStrategy,
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        // Parameters are checked before any index work.
        match strategy {
            FusionStrategy::Weighted { alpha } => crate::config::validate_alpha(alpha)?,
            FusionStrategy::Rrf { k } => crate::config::validate_rrf_k(k)?,
        }
        if !query.chars().any(char::is_alphanumeric) || limit == 0 {
            // still fail if nothing is loaded
            self.keyword.snapshot()?;
            self.vector.snapshot()?;
            return Ok(Vec::new());
        }
        let depth = self.candidate_depth(limit);
        let bm25 = self.bm25_search(query, depth)?;
        let semantic = self.semantic_search(query, depth)?;
        tracing::debug!(
            query,
            ?strategy,
            bm25_candidates = bm25.len(),
            semantic_candidates = semantic.len(),
            "fusing"
        );
        fusion::fuse(&bm25, &semantic, strategy, limit)
    }

    pub fn weighted_search(
        &self,
        query: &str,
        alpha: f64,
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        self.search(query, FusionStrategy::Weighted { alpha }, limit)
    }

    pub fn rrf_search(&self, query: &str, k: f64, limit: usize) -> Result<Vec<SearchHit>> {
        self.search(query, FusionStrategy::Rrf { k }, limit)
    }

    /// RRF, then rerank a bounded shortlist and keep the top `limit`.
    ///
    /// The shortlist is `limit * rerank_shortlist_factor` fused hits, never
    /// more than `max_rerank_candidates`.
    pub async fn rrf_search_reranked(
        &self,
        query: &str,
        k: f64,
        limit: usize,
        strategy: &RerankStrategy<'_>,
    ) -> Result<Vec<SearchHit>> {
        let shortlist = limit
            .saturating_mul(self.config.rerank_shortlist_factor)
            .min(self.config.max_rerank_candidates);
        let fused = self.rrf_search(query, k, shortlist)?;
        let index = self.keyword.snapshot()?;
        let mut reranked = rerank::rerank(fused, index.as_ref(), query, strategy).await?;
        reranked.truncate(limit);
        Ok(reranked)
    }

    /// Retrieve `limit` documents with RRF and have `oracle` answer from them.
    pub async fn answer(
        &self,
        oracle: &dyn Oracle,
        query: &str,
        k: f64,
        limit: usize,
    ) -> Result<GroundedAnswer> {
        let hits = self.rrf_search(query, k, limit)?;
        let index = self.keyword.snapshot()?;
        generate::answer_query(oracle, &hits, index.as_ref(), query).await
    }
}
