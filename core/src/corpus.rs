use crate::error::{Result, SearchError};
use crate::DocId;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// A movie record. Immutable once loaded; everything downstream refers to it by `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocId,
    pub title: String,
    pub description: String,
}

impl Document {
    pub fn new(id: DocId, title: impl Into<String>, description: impl Into<String>) -> Self {
        Self { id, title: title.into(), description: description.into() }
    }

    /// Text fed to the analyzer when indexing.
    pub fn index_text(&self) -> String {
        format!("{} {}", self.title, self.description)
    }

    /// Text fed to the encoder for whole-document embeddings.
    pub fn embedding_text(&self) -> String {
        format!("{}: {}", self.title, self.description)
    }
}

/// Lookup of documents by id, implemented by the corpus and by a loaded index.
pub trait DocumentSource {
    fn document(&self, id: DocId) -> Option<&Document>;

    /// Like [`document`](Self::document), but a missing id is an error.
    fn require(&self, id: DocId) -> Result<&Document> {
        self.document(id).ok_or(SearchError::UnknownDocument { doc_id: id })
    }
}

#[derive(Deserialize)]
struct MoviesFile {
    movies: Vec<Document>,
}

/// The loaded corpus, ordered by document id.
#[derive(Debug, Clone, Default)]
pub struct Corpus {
    docs: BTreeMap<DocId, Document>,
}

impl Corpus {
    /// Builds a corpus, rejecting duplicate ids.
    pub fn new(documents: Vec<Document>) -> Result<Self> {
        let mut docs = BTreeMap::new();
        for doc in documents {
            let id = doc.id;
            if docs.insert(id, doc).is_some() {
                return Err(SearchError::InvalidParameter(format!("duplicate document id {id}")));
            }
        }
        Ok(Self { docs })
    }

    /// Load `{"movies": [{"id", "title", "description"}, ...]}`.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let f = File::open(path).map_err(|e| corpus_err(path, e))?;
        let parsed: MoviesFile =
            serde_json::from_reader(BufReader::new(f)).map_err(|e| corpus_err(path, e))?;
        let corpus = Self::new(parsed.movies)?;
        tracing::info!(num_docs = corpus.len(), path = %path.display(), "loaded corpus");
        Ok(corpus)
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// Documents in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = &Document> + '_ {
        self.docs.values()
    }

    /// SHA-1 over every `(id, title, description)` in id order.
    ///
    /// Stored next to cached artifacts so an edit that keeps the document
    /// count unchanged still invalidates them.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha1::new();
        for doc in self.docs.values() {
            hasher.update(doc.id.to_le_bytes());
            hasher.update((doc.title.len() as u64).to_le_bytes());
            hasher.update(doc.title.as_bytes());
            hasher.update((doc.description.len() as u64).to_le_bytes());
            hasher.update(doc.description.as_bytes());
        }
        format!("{:x}", hasher.finalize())
    }
}

impl DocumentSource for Corpus {
    fn document(&self, id: DocId) -> Option<&Document> {
        self.docs.get(&id)
    }
}

/// Load a stop-word list, one word per line. Blank lines are skipped.
pub fn load_stop_words(path: &Path) -> Result<Vec<String>> {
    let f = File::open(path).map_err(|e| corpus_err(path, e))?;
    let mut words = Vec::new();
    for line in BufReader::new(f).lines() {
        let line = line.map_err(|e| corpus_err(path, e))?;
        let word = line.trim();
        if !word.is_empty() {
            words.push(word.to_lowercase());
        }
    }
    Ok(words)
}

fn corpus_err(path: &Path, e: impl ToString) -> SearchError {
    SearchError::Corpus { path: path.to_path_buf(), reason: e.to_string() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_ids_are_rejected() {
        let docs = vec![Document::new(1, "a", "x"), Document::new(1, "b", "y")];
        assert!(matches!(Corpus::new(docs), Err(SearchError::InvalidParameter(_))));
    }

    #[test]
    fn fingerprint_tracks_content_not_just_count() {
        let a = Corpus::new(vec![Document::new(1, "Heat", "A heist")]).unwrap();
        let b = Corpus::new(vec![Document::new(1, "Heat", "A robbery")]).unwrap();
        assert_eq!(a.len(), b.len());
        assert_ne!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint(), a.clone().fingerprint());
    }

    #[test]
    fn fingerprint_separates_field_boundaries() {
        let a = Corpus::new(vec![Document::new(1, "ab", "c")]).unwrap();
        let b = Corpus::new(vec![Document::new(1, "a", "bc")]).unwrap();
        assert_ne!(a.fingerprint(), b.fingerprint());
    }
}
