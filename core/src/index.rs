use crate::corpus::{Corpus, Document, DocumentSource};
use crate::tokenizer::Analyzer;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

pub type DocId = u32;

/// term -> ids of the documents containing it
pub type Postings = HashMap<String, HashSet<DocId>>;
/// doc id -> (term -> raw count)
pub type TermFrequencies = HashMap<DocId, HashMap<String, u32>>;
/// doc id -> token count after analysis
pub type DocLengths = HashMap<DocId, u32>;

/// Inverted index over a corpus snapshot.
///
/// All four tables come from one analyzer pass over one corpus; the index is
/// rebuilt from scratch rather than updated in place.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvertedIndex {
    pub(crate) postings: Postings,
    pub(crate) term_frequencies: TermFrequencies,
    pub(crate) doc_lengths: DocLengths,
    pub(crate) docmap: BTreeMap<DocId, Document>,
}

impl InvertedIndex {
    pub fn new() -> Self { Self::default() }

    /// Analyze `title + " " + description` of every document.
    pub fn build(corpus: &Corpus, analyzer: &Analyzer) -> Self {
        let mut index = Self::new();
        for doc in corpus.iter() {
            index.add_document(doc, analyzer);
        }
        tracing::info!(
            num_docs = index.num_docs(),
            num_terms = index.postings.len(),
            "built inverted index"
        );
        index
    }

    fn add_document(&mut self, doc: &Document, analyzer: &Analyzer) {
        let tokens = analyzer.analyze(&doc.index_text());
        self.doc_lengths.insert(doc.id, tokens.len() as u32);
        let tf = self.term_frequencies.entry(doc.id).or_default();
        for token in tokens {
            *tf.entry(token.clone()).or_insert(0) += 1;
            self.postings.entry(token).or_default().insert(doc.id);
        }
        self.docmap.insert(doc.id, doc.clone());
    }

    /// Ids of documents containing `term`, ascending. Unknown terms yield nothing.
    pub fn postings(&self, term: &str) -> Vec<DocId> {
        let mut ids: Vec<DocId> = self
            .postings
            .get(term)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        ids.sort_unstable();
        ids
    }

    pub fn term_frequency(&self, doc_id: DocId, term: &str) -> u32 {
        self.term_frequencies
            .get(&doc_id)
            .and_then(|tf| tf.get(term))
            .copied()
            .unwrap_or(0)
    }

    pub fn document_frequency(&self, term: &str) -> usize {
        self.postings.get(term).map_or(0, HashSet::len)
    }

    pub fn document_length(&self, doc_id: DocId) -> u32 {
        self.doc_lengths.get(&doc_id).copied().unwrap_or(0)
    }

    /// Mean post-analysis length; 0.0 for an empty index.
    pub fn average_document_length(&self) -> f64 {
        if self.doc_lengths.is_empty() {
            return 0.0;
        }
        let total: u64 = self.doc_lengths.values().map(|&l| l as u64).sum();
        total as f64 / self.doc_lengths.len() as f64
    }

    pub fn num_docs(&self) -> usize {
        self.docmap.len()
    }

    pub fn num_terms(&self) -> usize {
        self.postings.len()
    }

    /// Documents in ascending id order.
    pub fn documents(&self) -> impl Iterator<Item = &Document> + '_ {
        self.docmap.values()
    }

    /// Term counts for one document.
    pub fn terms_of(&self, doc_id: DocId) -> Option<&HashMap<String, u32>> {
        self.term_frequencies.get(&doc_id)
    }

    /// Checks that the four tables describe the same set of documents and
    /// that every document's counts sum to its length.
    pub(crate) fn consistency_error(&self) -> Option<String> {
        if self.doc_lengths.len() != self.docmap.len()
            || self.term_frequencies.len() != self.docmap.len()
        {
            return Some(format!(
                "table sizes disagree: {} docs, {} lengths, {} tf rows",
                self.docmap.len(),
                self.doc_lengths.len(),
                self.term_frequencies.len()
            ));
        }
        for (id, len) in &self.doc_lengths {
            let sum: u32 = self.term_frequencies.get(id).map_or(0, |tf| tf.values().sum());
            if sum != *len {
                return Some(format!("document {id}: term counts sum to {sum}, length is {len}"));
            }
        }
        for (term, ids) in &self.postings {
            if let Some(id) = ids.iter().find(|id| self.term_frequency(**id, term) == 0) {
                return Some(format!(
                    "posting for {term:?} references document {id} without a count"
                ));
            }
        }
        None
    }
}

impl DocumentSource for InvertedIndex {
    fn document(&self, id: DocId) -> Option<&Document> {
        self.docmap.get(&id)
    }
}
