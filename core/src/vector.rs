//! Dense-vector similarity search over document or chunk embeddings.

use crate::chunking::{sentence_windows, ChunkingConfig};
use crate::corpus::Corpus;
use crate::encoder::{embed_batch_checked, embed_checked, validate_embedding, Encoder};
use crate::error::{Result, SearchError};
use crate::persist::{self, BuildKey, CachePaths};
use crate::types::{sort_ranking, ScoredDoc};
use crate::DocId;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Cosine similarity in [-1, 1].
///
/// 0.0 when either vector has zero norm or the lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Granularity {
    /// One embedding per document.
    Document,
    /// One embedding per sentence window.
    Chunk,
}

/// Row-major embeddings of constant dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingMatrix {
    dimension: usize,
    rows: Vec<Vec<f32>>,
}

impl EmbeddingMatrix {
    pub fn new(dimension: usize) -> Self {
        Self { dimension, rows: Vec::new() }
    }

    pub fn push(&mut self, row: Vec<f32>) -> Result<()> {
        if row.len() != self.dimension {
            return Err(SearchError::Encoder(format!(
                "embedding has {} dimensions, store holds {}",
                row.len(),
                self.dimension
            )));
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn dimension(&self) -> usize { self.dimension }
    pub fn len(&self) -> usize { self.rows.len() }
    pub fn is_empty(&self) -> bool { self.rows.is_empty() }
    pub fn row(&self, i: usize) -> Option<&[f32]> { self.rows.get(i).map(Vec::as_slice) }
}

/// Which document (and which window of it) an embedding row belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMeta {
    pub doc_id: DocId,
    pub chunk_index: u32,
    pub total_chunks: u32,
}

impl ChunkMeta {
    pub fn whole(doc_id: DocId) -> Self {
        Self { doc_id, chunk_index: 0, total_chunks: 1 }
    }
}

/// Embeddings plus the index-aligned owner of each row.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingStore {
    granularity: Granularity,
    chunks: Vec<ChunkMeta>,
    matrix: EmbeddingMatrix,
}

impl EmbeddingStore {
    /// Embed every document, or every sentence window of every document.
    ///
    /// A document whose description has no sentences is embedded as one
    /// chunk of its title.
    pub fn build(
        corpus: &Corpus,
        encoder: &dyn Encoder,
        granularity: Granularity,
        chunking: &ChunkingConfig,
    ) -> Result<Self> {
        let mut chunks = Vec::new();
        let mut texts: Vec<String> = Vec::new();
        for doc in corpus.iter() {
            match granularity {
                Granularity::Document => {
                    chunks.push(ChunkMeta::whole(doc.id));
                    texts.push(doc.embedding_text());
                }
                Granularity::Chunk => {
                    let mut windows = sentence_windows(&doc.description, chunking)?;
                    if windows.is_empty() {
                        windows.push(doc.title.clone());
                    }
                    let total = windows.len() as u32;
                    for (i, text) in windows.into_iter().enumerate() {
                        chunks.push(ChunkMeta {
                            doc_id: doc.id,
                            chunk_index: i as u32,
                            total_chunks: total,
                        });
                        texts.push(text);
                    }
                }
            }
        }
        let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
        let vectors = embed_batch_checked(encoder, &refs)?;
        let mut matrix = EmbeddingMatrix::new(encoder.dimension());
        for v in vectors {
            matrix.push(v)?;
        }
        tracing::info!(
            num_docs = corpus.len(),
            rows = matrix.len(),
            encoder = encoder.id(),
            granularity = ?granularity,
            "built embeddings"
        );
        Ok(Self { granularity, chunks, matrix })
    }

    /// Reassemble a store read from disk; the two arrays must line up.
    pub(crate) fn from_parts(
        granularity: Granularity,
        chunks: Vec<ChunkMeta>,
        matrix: EmbeddingMatrix,
    ) -> std::result::Result<Self, String> {
        if chunks.len() != matrix.len() {
            return Err(format!("{} chunk records for {} embeddings", chunks.len(), matrix.len()));
        }
        if let Some(bad) = matrix.rows.iter().position(|r| r.len() != matrix.dimension) {
            return Err(format!("row {bad} does not have {} dimensions", matrix.dimension));
        }
        if let Some(c) = chunks.iter().find(|c| c.chunk_index >= c.total_chunks) {
            return Err(format!("chunk {} of document {} is out of range", c.chunk_index, c.doc_id));
        }
        Ok(Self { granularity, chunks, matrix })
    }

    pub fn granularity(&self) -> Granularity { self.granularity }
    pub fn chunks(&self) -> &[ChunkMeta] { &self.chunks }
    pub fn matrix(&self) -> &EmbeddingMatrix { &self.matrix }
    pub fn dimension(&self) -> usize { self.matrix.dimension }
    pub fn len(&self) -> usize { self.matrix.len() }
    pub fn is_empty(&self) -> bool { self.matrix.is_empty() }

    /// Rank documents by similarity to `query`.
    ///
    /// A document's score is its best chunk, so one strongly matching
    /// passage is enough to surface it.
    pub fn search_vector(&self, query: &[f32], limit: usize) -> Result<Vec<ScoredDoc>> {
        if query.len() != self.dimension() {
            return Err(SearchError::Encoder(format!(
                "query has {} dimensions, store holds {}",
                query.len(),
                self.dimension()
            )));
        }
        let mut best: HashMap<DocId, f64> = HashMap::new();
        for (meta, row) in self.chunks.iter().zip(&self.matrix.rows) {
            let sim = cosine_similarity(query, row);
            best.entry(meta.doc_id)
                .and_modify(|s| *s = s.max(sim))
                .or_insert(sim);
        }
        let mut results: Vec<ScoredDoc> =
            best.into_iter().map(|(id, s)| ScoredDoc::new(id, s)).collect();
        sort_ranking(&mut results);
        results.truncate(limit);
        Ok(results)
    }
}

/// Vector similarity search with a swappable embedding snapshot.
///
/// Queries clone the current `Arc` and run without holding the lock, so a
/// rebuild never mutates a store a query is reading.
pub struct VectorSearch {
    granularity: Granularity,
    chunking: ChunkingConfig,
    store: RwLock<Option<Arc<EmbeddingStore>>>,
}

impl VectorSearch {
    pub fn new(granularity: Granularity, chunking: ChunkingConfig) -> Self {
        Self { granularity, chunking, store: RwLock::new(None) }
    }

    pub fn granularity(&self) -> Granularity {
        self.granularity
    }

    /// Load the cached store if it was built from this corpus with this
    /// encoder (and, for chunks, these windows); otherwise embed everything
    /// and persist it.
    pub fn load_or_build(
        &self,
        corpus: &Corpus,
        encoder: &dyn Encoder,
        paths: &CachePaths,
    ) -> Result<Arc<EmbeddingStore>> {
        let meta_path = paths.embeddings_meta(self.granularity);
        let key = BuildKey::embeddings(encoder.id(), self.granularity, &self.chunking);
        if let Some(meta) = persist::existing_meta(&meta_path)? {
            if meta.is_current_for(corpus, &key) {
                let (store, _) = persist::load_embeddings(paths, self.granularity)?;
                if store.dimension() != encoder.dimension() {
                    return Err(SearchError::corruption(
                        meta_path,
                        format!(
                            "cached dimension {} but {} produces {}",
                            store.dimension(),
                            encoder.id(),
                            encoder.dimension()
                        ),
                    ));
                }
                tracing::debug!(rows = store.len(), "loaded cached embeddings");
                return Ok(self.install(store));
            }
            tracing::info!(cache = %meta_path.display(), "cached embeddings are stale; rebuilding");
        }
        self.rebuild(corpus, encoder, paths)
    }

    /// Embed the corpus from scratch, persist, and swap the new store in.
    pub fn rebuild(
        &self,
        corpus: &Corpus,
        encoder: &dyn Encoder,
        paths: &CachePaths,
    ) -> Result<Arc<EmbeddingStore>> {
        let store = EmbeddingStore::build(corpus, encoder, self.granularity, &self.chunking)?;
        persist::save_embeddings(paths, &store, corpus, encoder.id(), &self.chunking)?;
        Ok(self.install(store))
    }

    /// Use an already-built store without touching the cache.
    pub fn install(&self, store: EmbeddingStore) -> Arc<EmbeddingStore> {
        let store = Arc::new(store);
        *self.store.write() = Some(Arc::clone(&store));
        store
    }

    pub fn snapshot(&self) -> Result<Arc<EmbeddingStore>> {
        self.store
            .read()
            .clone()
            .ok_or(SearchError::NotInitialized { component: "vector search" })
    }

    pub fn search(
        &self,
        query: &str,
        encoder: &dyn Encoder,
        limit: usize,
    ) -> Result<Vec<ScoredDoc>> {
        let store = self.snapshot()?;
        let q = embed_checked(encoder, query)?;
        tracing::debug!(query, limit, "semantic search");
        store.search_vector(&q, limit)
    }

    /// Search with a precomputed query vector (e.g. an image embedding).
    pub fn search_vector(
        &self,
        encoder: &dyn Encoder,
        query: &[f32],
        limit: usize,
    ) -> Result<Vec<ScoredDoc>> {
        let store = self.snapshot()?;
        validate_embedding(encoder, query)?;
        store.search_vector(query, limit)
    }
}
