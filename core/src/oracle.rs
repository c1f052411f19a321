//! Seam to the text-generation model used for reranking and query enhancement.

use crate::error::{Result, SearchError};
use async_trait::async_trait;
use std::path::Path;

/// Raw image bytes plus the MIME type sent alongside them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInput {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

impl ImageInput {
    /// Read an image file; the MIME type comes from the extension and falls
    /// back to `image/jpeg`.
    pub fn from_path(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Ok(Self { bytes, mime_type: mime_for(path).to_string() })
    }
}

fn mime_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("heic") => "image/heic",
        _ => "image/jpeg",
    }
}

/// `generate(prompt) -> text`. Timeouts and retries belong to the implementor.
#[async_trait]
pub trait Oracle: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(&self, prompt: &str) -> Result<String>;

    /// Prompt with an attached image. Text-only models keep the default.
    async fn generate_with_image(&self, prompt: &str, image: &ImageInput) -> Result<String> {
        let _ = (prompt, image);
        Err(SearchError::Oracle(format!("{} does not accept image input", self.name())))
    }
}

/// Trim whitespace and one layer of surrounding quotes.
pub fn clean_response(text: &str) -> &str {
    let t = text.trim();
    let t = t.strip_prefix('"').and_then(|s| s.strip_suffix('"')).unwrap_or(t);
    t.trim()
}

/// Strip a Markdown code fence (with optional language tag) if present.
pub fn strip_code_fence(text: &str) -> &str {
    let t = text.trim();
    let Some(rest) = t.strip_prefix("```") else {
        return t;
    };
    let body = rest.split_once('\n').map_or("", |(_, b)| b);
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}
