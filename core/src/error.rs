//! Error taxonomy for indexing, retrieval, fusion and reranking.
//!
//! Build-or-load failures are fatal to the query path: callers never get an
//! empty result set in place of an error, since that would be
//! indistinguishable from "no relevant documents".

use crate::DocId;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for search operations.
pub type Result<T> = std::result::Result<T, SearchError>;

#[derive(Debug, Error)]
pub enum SearchError {
    /// A term-level diagnostic received empty or multi-token input.
    #[error("invalid term {input:?}: {reason}")]
    InvalidTerm { input: String, reason: String },

    /// A persisted artifact required for the query is absent; build first.
    #[error("missing index artifact {}; run a build first", path.display())]
    MissingIndex { path: PathBuf },

    /// A persisted snapshot was built with settings other than the current ones.
    #[error("stale index {}: {reason}; run a build", path.display())]
    StaleIndex { path: PathBuf, reason: String },

    /// A query was issued before the component was built or loaded.
    #[error("{component} is not initialized; build or load it first")]
    NotInitialized { component: &'static str },

    /// A hit names a document the loaded index does not hold.
    #[error("document {doc_id} is not in the loaded index")]
    UnknownDocument { doc_id: DocId },

    /// The oracle returned an ordering that disagrees with the candidates sent.
    #[error("rerank response mismatch: missing {missing:?}, unexpected {unexpected:?}")]
    RerankResponseMismatch {
        missing: Vec<DocId>,
        unexpected: Vec<DocId>,
    },

    /// The oracle returned text that could not be read as the expected shape.
    #[error("malformed oracle response for document {doc_id:?}: {response:?}")]
    MalformedOracleResponse {
        doc_id: Option<DocId>,
        response: String,
    },

    /// The oracle could not be reached or answered with a transport error.
    #[error("oracle error: {0}")]
    Oracle(String),

    /// The embedding collaborator failed or returned degenerate output.
    #[error("encoder error: {0}")]
    Encoder(String),

    /// The cross-encoder model failed to score a batch.
    #[error("cross-encoder error: {0}")]
    CrossEncoder(String),

    /// A persisted artifact is unreadable, of the wrong version, or does not
    /// belong to the same snapshot as its companions.
    #[error("cache corruption in {}: {reason}", path.display())]
    CacheCorruption { path: PathBuf, reason: String },

    /// A tunable was outside its valid range.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Corpus, stop-word or golden dataset input could not be read.
    #[error("corpus error in {}: {reason}", path.display())]
    Corpus { path: PathBuf, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl SearchError {
    pub(crate) fn corruption(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::CacheCorruption {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn invalid_term(input: &str, reason: &str) -> Self {
        Self::InvalidTerm {
            input: input.to_string(),
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_index_mentions_path() {
        let err = SearchError::MissingIndex {
            path: PathBuf::from("cache/index.bin"),
        };
        let msg = err.to_string();
        assert!(msg.contains("cache/index.bin"));
        assert!(msg.contains("build"));
    }

    #[test]
    fn mismatch_lists_ids() {
        let err = SearchError::RerankResponseMismatch {
            missing: vec![3],
            unexpected: vec![9],
        };
        let msg = err.to_string();
        assert!(msg.contains('3'));
        assert!(msg.contains('9'));
    }
}
