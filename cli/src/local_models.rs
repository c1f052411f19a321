//! Local ONNX models through fastembed.

use fastembed::{
    EmbeddingModel, ImageEmbedding, ImageEmbeddingModel, ImageInitOptions, InitOptions,
    RerankInitOptions, RerankerModel, TextEmbedding, TextRerank,
};
use hoopla_core::encoder::Encoder;
use hoopla_core::rerank::CrossEncoder;
use hoopla_core::{Result, SearchError};
use std::path::Path;
use std::sync::Mutex;

const MINILM_ID: &str = "minilm-384";
const MINILM_DIMENSION: usize = 384;
const CLIP_ID: &str = "clip-vit-b32";
const CLIP_DIMENSION: usize = 512;

/// all-MiniLM-L6-v2 sentence embeddings.
pub struct MiniLmEncoder {
    model: Mutex<TextEmbedding>,
}

impl MiniLmEncoder {
    pub fn new() -> Result<Self> {
        let model = TextEmbedding::try_new(InitOptions::new(EmbeddingModel::AllMiniLML6V2))
            .map_err(|e| SearchError::Encoder(format!("loading {MINILM_ID}: {e}")))?;
        tracing::info!(model = MINILM_ID, "loaded encoder");
        Ok(Self { model: Mutex::new(model) })
    }
}

impl Encoder for MiniLmEncoder {
    fn id(&self) -> &str {
        MINILM_ID
    }

    fn dimension(&self) -> usize {
        MINILM_DIMENSION
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text])?
            .into_iter()
            .next()
            .ok_or_else(|| SearchError::Encoder(format!("{MINILM_ID} returned no embedding")))
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        #[allow(unused_mut)]
        let mut model = self
            .model
            .lock()
            .map_err(|_| SearchError::Encoder("encoder lock poisoned".into()))?;
        model
            .embed(texts.to_vec(), None)
            .map_err(|e| SearchError::Encoder(format!("{MINILM_ID}: {e}")))
    }
}

/// CLIP ViT-B/32: text and images land in one vector space.
pub struct ClipEncoder {
    text: Mutex<TextEmbedding>,
    image: Mutex<ImageEmbedding>,
}

impl ClipEncoder {
    pub fn new() -> Result<Self> {
        let text = TextEmbedding::try_new(InitOptions::new(EmbeddingModel::ClipVitB32))
            .map_err(|e| SearchError::Encoder(format!("loading {CLIP_ID} text tower: {e}")))?;
        let image = ImageEmbedding::try_new(ImageInitOptions::new(ImageEmbeddingModel::ClipVitB32))
            .map_err(|e| SearchError::Encoder(format!("loading {CLIP_ID} image tower: {e}")))?;
        tracing::info!(model = CLIP_ID, "loaded encoder");
        Ok(Self { text: Mutex::new(text), image: Mutex::new(image) })
    }
}

impl Encoder for ClipEncoder {
    fn id(&self) -> &str {
        CLIP_ID
    }

    fn dimension(&self) -> usize {
        CLIP_DIMENSION
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text])?
            .into_iter()
            .next()
            .ok_or_else(|| SearchError::Encoder(format!("{CLIP_ID} returned no embedding")))
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        #[allow(unused_mut)]
        let mut model = self
            .text
            .lock()
            .map_err(|_| SearchError::Encoder("encoder lock poisoned".into()))?;
        model
            .embed(texts.to_vec(), None)
            .map_err(|e| SearchError::Encoder(format!("{CLIP_ID}: {e}")))
    }

    fn embed_image(&self, path: &Path) -> Result<Vec<f32>> {
        #[allow(unused_mut)]
        let mut model = self
            .image
            .lock()
            .map_err(|_| SearchError::Encoder("encoder lock poisoned".into()))?;
        model
            .embed(vec![path], None)
            .map_err(|e| SearchError::Encoder(format!("{CLIP_ID} on {}: {e}", path.display())))?
            .into_iter()
            .next()
            .ok_or_else(|| SearchError::Encoder(format!("{CLIP_ID} returned no image embedding")))
    }
}

/// Jina reranker v1 turbo as a cross-encoder.
pub struct FastEmbedCrossEncoder {
    model: Mutex<TextRerank>,
}

impl FastEmbedCrossEncoder {
    pub fn new() -> Result<Self> {
        let options = RerankInitOptions::new(RerankerModel::JINARerankerV1TurboEn);
        let model = TextRerank::try_new(options)
            .map_err(|e| SearchError::CrossEncoder(format!("loading reranker: {e}")))?;
        Ok(Self { model: Mutex::new(model) })
    }
}

impl CrossEncoder for FastEmbedCrossEncoder {
    fn id(&self) -> &str {
        "jina-reranker-v1-turbo-en"
    }

    fn score(&self, query: &str, documents: &[&str]) -> Result<Vec<f32>> {
        #[allow(unused_mut)]
        let mut model = self
            .model
            .lock()
            .map_err(|_| SearchError::CrossEncoder("reranker lock poisoned".into()))?;
        let ranked = model
            .rerank(query, documents, false, None)
            .map_err(|e| SearchError::CrossEncoder(e.to_string()))?;
        // results come back sorted; put scores back in input order
        let mut scores = vec![f32::NEG_INFINITY; documents.len()];
        for r in ranked {
            if let Some(slot) = scores.get_mut(r.index) {
                *slot = r.score;
            }
        }
        Ok(scores)
    }
}
