//! Seam to the embedding model.
//!
//! The model itself is a collaborator supplied by the caller; the core only
//! relies on it being deterministic for a fixed model version and on failures
//! coming back as [`SearchError::Encoder`] rather than as zero vectors.

use crate::error::{Result, SearchError};
use std::path::Path;

/// Maps text (and optionally images) to fixed-length vectors.
pub trait Encoder: Send + Sync {
    /// Stable identifier, recorded next to cached embeddings.
    fn id(&self) -> &str;

    fn dimension(&self) -> usize;

    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    fn embed_image(&self, path: &Path) -> Result<Vec<f32>> {
        Err(SearchError::Encoder(format!(
            "{} does not accept image input ({})",
            self.id(),
            path.display()
        )))
    }
}

/// Reject vectors that would poison similarity search.
pub fn validate_embedding(encoder: &dyn Encoder, vector: &[f32]) -> Result<()> {
    if vector.len() != encoder.dimension() {
        return Err(SearchError::Encoder(format!(
            "{} returned {} dimensions, expected {}",
            encoder.id(),
            vector.len(),
            encoder.dimension()
        )));
    }
    if vector.iter().any(|v| !v.is_finite()) {
        return Err(SearchError::Encoder(format!("{} returned a non-finite value", encoder.id())));
    }
    if vector.iter().all(|v| *v == 0.0) {
        return Err(SearchError::Encoder(format!("{} returned a zero vector", encoder.id())));
    }
    Ok(())
}

/// Embed one text, rejecting empty input and degenerate output.
pub fn embed_checked(encoder: &dyn Encoder, text: &str) -> Result<Vec<f32>> {
    if text.trim().is_empty() {
        return Err(SearchError::Encoder("cannot embed empty text".into()));
    }
    let v = encoder.embed(text)?;
    validate_embedding(encoder, &v)?;
    Ok(v)
}

/// Batch form of [`embed_checked`].
pub fn embed_batch_checked(encoder: &dyn Encoder, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
    if let Some(pos) = texts.iter().position(|t| t.trim().is_empty()) {
        return Err(SearchError::Encoder(format!("cannot embed empty text (input {pos})")));
    }
    let vectors = encoder.embed_batch(texts)?;
    if vectors.len() != texts.len() {
        return Err(SearchError::Encoder(format!(
            "{} returned {} embeddings for {} inputs",
            encoder.id(),
            vectors.len(),
            texts.len()
        )));
    }
    for v in &vectors {
        validate_embedding(encoder, v)?;
    }
    Ok(vectors)
}

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET;
    for b in bytes {
        hash ^= *b as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Signed feature hashing of lowercase words, L2-normalized.
///
/// Lexical rather than semantic, but deterministic and model-free.
#[derive(Debug, Clone)]
pub struct HashEncoder {
    id: String,
    dimension: usize,
}

impl HashEncoder {
    pub fn new(dimension: usize) -> Self {
        let dimension = dimension.max(1);
        Self { id: format!("fnv1a-{dimension}"), dimension }
    }
}

impl Default for HashEncoder {
    fn default() -> Self {
        Self::new(256)
    }
}

impl Encoder for HashEncoder {
    fn id(&self) -> &str {
        &self.id
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let lowered = text.to_lowercase();
        let mut v = vec![0.0f32; self.dimension];
        let mut tokens = 0usize;
        for word in lowered.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()) {
            let h = fnv1a(word.as_bytes());
            let slot = (h % self.dimension as u64) as usize;
            let sign = if h >> 63 == 0 { 1.0 } else { -1.0 };
            v[slot] += sign;
            tokens += 1;
        }
        if tokens == 0 {
            return Err(SearchError::Encoder(format!("no tokens to embed in {text:?}")));
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm <= f32::EPSILON {
            return Err(SearchError::Encoder(format!("hashed features cancel out for {text:?}")));
        }
        for x in v.iter_mut() {
            *x /= norm;
        }
        Ok(v)
    }
}
