pub mod bm25;
pub mod chunking;
pub mod config;
pub mod corpus;
pub mod encoder;
pub mod enhance;
pub mod error;
pub mod evaluation;
pub mod fusion;
pub mod generate;
pub mod hybrid;
pub mod index;
pub mod oracle;
pub mod persist;
pub mod rerank;
pub mod tokenizer;
pub mod types;
pub mod vector;

pub use corpus::{Corpus, Document, DocumentSource};
pub use error::{Result, SearchError};
pub use hybrid::HybridSearch;
pub use index::{DocId, InvertedIndex};
pub use types::{ScoredDoc, SearchHit};
