//! Tunables and their defaults.

use crate::bm25::Bm25Params;
use crate::chunking::ChunkingConfig;
use crate::error::{Result, SearchError};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_SEARCH_LIMIT: usize = 5;
pub const BM25_K1: f64 = 1.5;
pub const BM25_B: f64 = 0.75;
pub const DEFAULT_ALPHA: f64 = 0.5;
pub const DEFAULT_RRF_K: f64 = 60.0;
/// Each source ranking supplies `limit * overfetch` candidates before fusion.
pub const DEFAULT_OVERFETCH_FACTOR: usize = 500;
pub const DEFAULT_CHUNK_SENTENCES: usize = 4;
pub const DEFAULT_CHUNK_OVERLAP: usize = 1;
pub const DEFAULT_RERANK_SHORTLIST_FACTOR: usize = 5;
pub const DEFAULT_MAX_RERANK_CANDIDATES: usize = 50;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub bm25: Bm25Params,
    pub alpha: f64,
    pub rrf_k: f64,
    pub overfetch_factor: usize,
    pub chunking: ChunkingConfig,
    pub rerank_shortlist_factor: usize,
    pub max_rerank_candidates: usize,
    /// Pause between consecutive pairwise oracle calls.
    pub rerank_pacing_ms: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            bm25: Bm25Params::default(),
            alpha: DEFAULT_ALPHA,
            rrf_k: DEFAULT_RRF_K,
            overfetch_factor: DEFAULT_OVERFETCH_FACTOR,
            chunking: ChunkingConfig::default(),
            rerank_shortlist_factor: DEFAULT_RERANK_SHORTLIST_FACTOR,
            max_rerank_candidates: DEFAULT_MAX_RERANK_CANDIDATES,
            rerank_pacing_ms: 0,
        }
    }
}

impl SearchConfig {
    /// Read a JSON config; missing fields take their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text).map_err(|e| SearchError::Corpus {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.bm25.validate()?;
        self.chunking.validate()?;
        validate_alpha(self.alpha)?;
        validate_rrf_k(self.rrf_k)?;
        if self.overfetch_factor == 0 {
            return Err(SearchError::InvalidParameter("overfetch factor must be at least 1".into()));
        }
        if self.rerank_shortlist_factor == 0 || self.max_rerank_candidates == 0 {
            return Err(SearchError::InvalidParameter(
                "rerank shortlist must allow at least one candidate".into(),
            ));
        }
        Ok(())
    }

    pub fn rerank_pacing(&self) -> Duration {
        Duration::from_millis(self.rerank_pacing_ms)
    }
}

pub fn validate_alpha(alpha: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&alpha) {
        return Err(SearchError::InvalidParameter(format!(
            "alpha must be within [0, 1], got {alpha}"
        )));
    }
    Ok(())
}

pub fn validate_rrf_k(k: f64) -> Result<()> {
    if !(k >= 0.0 && k.is_finite()) {
        return Err(SearchError::InvalidParameter(format!(
            "rrf k must be a non-negative number, got {k}"
        )));
    }
    Ok(())
}
