//! Splitting long text into overlapping windows for independent embedding.

use crate::config::{DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SENTENCES};
use crate::error::{Result, SearchError};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

lazy_static! {
    // sentence end: terminal punctuation followed by whitespace
    static ref SENTENCE_END: Regex = Regex::new(r"[.!?]\s+").expect("valid regex");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Sentences per window.
    pub max_sentences: usize,
    /// Sentences shared by consecutive windows; must be below `max_sentences`.
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self { max_sentences: DEFAULT_CHUNK_SENTENCES, overlap: DEFAULT_CHUNK_OVERLAP }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<()> {
        check_window(self.max_sentences, self.overlap)
    }
}

fn check_window(size: usize, overlap: usize) -> Result<()> {
    if size == 0 {
        return Err(SearchError::InvalidParameter("chunk size must be at least 1".into()));
    }
    if overlap >= size {
        return Err(SearchError::InvalidParameter(format!(
            "overlap {overlap} must be smaller than chunk size {size}"
        )));
    }
    Ok(())
}

/// Split on `.`, `!` or `?` followed by whitespace, keeping the punctuation.
pub fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    for m in SENTENCE_END.find_iter(text) {
        let end = m.start() + 1;
        let s = text[start..end].trim();
        if !s.is_empty() {
            sentences.push(s);
        }
        start = m.end();
    }
    let tail = text[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail);
    }
    sentences
}

/// Group items into windows of `size` advancing by `size - overlap`.
///
/// The last window ends exactly at the last item, so input shorter than one
/// window gives a single window and no truncated duplicate is emitted.
fn windows<T: AsRef<str>>(items: &[T], size: usize, overlap: usize) -> Vec<String> {
    let step = size - overlap;
    let mut out = Vec::new();
    let mut start = 0;
    while start < items.len() {
        let end = (start + size).min(items.len());
        let joined: Vec<&str> = items[start..end].iter().map(AsRef::as_ref).collect();
        out.push(joined.join(" "));
        if end == items.len() {
            break;
        }
        start += step;
    }
    out
}

/// Overlapping sentence windows. Text with no sentences yields no chunks.
pub fn sentence_windows(text: &str, config: &ChunkingConfig) -> Result<Vec<String>> {
    config.validate()?;
    Ok(windows(&split_sentences(text), config.max_sentences, config.overlap))
}

/// Overlapping windows of whitespace-separated words.
pub fn word_windows(text: &str, size: usize, overlap: usize) -> Result<Vec<String>> {
    check_window(size, overlap)?;
    let words: Vec<&str> = text.split_whitespace().collect();
    Ok(windows(&words, size, overlap))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_sentences_keeping_punctuation() {
        let s = split_sentences("A bear attacks. The man survives! Does he? Yes");
        assert_eq!(s, vec!["A bear attacks.", "The man survives!", "Does he?", "Yes"]);
    }

    #[test]
    fn decimals_do_not_split() {
        assert_eq!(split_sentences("Rated 8.5 by critics."), vec!["Rated 8.5 by critics."]);
    }

    #[test]
    fn short_text_is_one_chunk() {
        let cfg = ChunkingConfig { max_sentences: 4, overlap: 1 };
        let chunks = sentence_windows("One. Two.", &cfg).unwrap();
        assert_eq!(chunks, vec!["One. Two."]);
    }

    #[test]
    fn windows_overlap() {
        let cfg = ChunkingConfig { max_sentences: 2, overlap: 1 };
        let chunks = sentence_windows("A. B. C.", &cfg).unwrap();
        assert_eq!(chunks, vec!["A. B.", "B. C."]);
    }

    #[test]
    fn exact_multiple_has_no_tail_duplicate() {
        let chunks = word_windows("a b c d", 2, 0).unwrap();
        assert_eq!(chunks, vec!["a b", "c d"]);
    }

    #[test]
    fn empty_text_has_no_chunks() {
        assert!(sentence_windows("   ", &ChunkingConfig::default()).unwrap().is_empty());
        assert!(word_windows("", 3, 1).unwrap().is_empty());
    }

    #[test]
    fn overlap_must_be_smaller_than_window() {
        assert!(matches!(word_windows("a b", 2, 2), Err(SearchError::InvalidParameter(_))));
        assert!(matches!(word_windows("a b", 0, 0), Err(SearchError::InvalidParameter(_))));
    }
}
