use crate::error::{Result, SearchError};
use lazy_static::lazy_static;
use rust_stemmers::{Algorithm, Stemmer};
use sha1::{Digest, Sha1};
use std::collections::HashSet;
use unicode_normalization::UnicodeNormalization;

const STEMMER_NAME: &str = "porter-english";

lazy_static! {
    static ref STEMMER: Stemmer = Stemmer::create(Algorithm::English);
}

const DEFAULT_STOPWORDS: &[&str] = &[
    "a","about","above","after","again","against","all","am","an","and","any","are","aren't","as","at",
    "be","because","been","before","being","below","between","both","but","by",
    "can","can't","cannot","could","couldn't",
    "did","didn't","do","does","doesn't","doing","don't","down","during",
    "each","few","for","from","further",
    "had","hadn't","has","hasn't","have","haven't","having","he","he'd","he'll","he's","her","here","here's","hers","herself","him","himself","his","how","how's",
    "i","i'd","i'll","i'm","i've","if","in","into","is","isn't","it","it's","its","itself",
    "let's","me","more","most","mustn't","my","myself",
    "no","nor","not","of","off","on","once","only","or","other","ought","our","ours","ourselves","out","over","own",
    "same","she","she'd","she'll","she's","should","shouldn't","so","some","such",
    "than","that","that's","the","their","theirs","them","themselves","then","there","there's","these","they","they'd","they'll","they're","they've","this","those","through","to","too",
    "under","until","up","very",
    "was","wasn't","we","we'd","we'll","we're","we've","were","weren't","what","what's","when","when's","where","where's","which","while","who","who's","whom","why","why's","with","won't","would","wouldn't",
    "you","you'd","you'll","you're","you've","your","yours","yourself","yourselves"
];

/// Text analyzer: NFKC, lowercase, strip punctuation, split on whitespace,
/// drop stop words, Porter-stem what remains.
///
/// The stop-word set is fixed at construction so every document and every
/// query in a process goes through the same pipeline.
#[derive(Debug, Clone)]
pub struct Analyzer {
    stop_words: HashSet<String>,
}

impl Default for Analyzer {
    fn default() -> Self {
        Self::new(DEFAULT_STOPWORDS.iter().copied())
    }
}

impl Analyzer {
    /// Build an analyzer over an external stop-word list.
    ///
    /// Stop words are normalized the same way as text, so `aren't` in the
    /// list matches the token `arent`.
    pub fn new<I, S>(stop_words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let stop_words = stop_words
            .into_iter()
            .map(|w| normalize(w.as_ref()))
            .filter(|w| !w.is_empty())
            .collect();
        Self { stop_words }
    }

    pub fn is_stopword(&self, token: &str) -> bool {
        self.stop_words.contains(token)
    }

    /// SHA-1 over the stemmer name and the sorted stop words. Analyzers with
    /// equal fingerprints turn the same text into the same terms.
    pub fn fingerprint(&self) -> String {
        let mut words: Vec<&str> = self.stop_words.iter().map(String::as_str).collect();
        words.sort_unstable();
        let mut hasher = Sha1::new();
        hasher.update(STEMMER_NAME.as_bytes());
        for w in words {
            hasher.update(b"\n");
            hasher.update(w.as_bytes());
        }
        format!("{:x}", hasher.finalize())
    }

    /// Analyze text into an ordered sequence of terms. Empty text yields no terms.
    pub fn analyze(&self, text: &str) -> Vec<String> {
        let normalized = normalize(text);
        normalized
            .split_whitespace()
            .filter(|t| !t.is_empty() && !self.is_stopword(t))
            .map(|t| STEMMER.stem(t).into_owned())
            .collect()
    }

    /// Analyze input that must produce exactly one term.
    pub fn single_term(&self, text: &str) -> Result<String> {
        let mut terms = self.analyze(text);
        match terms.len() {
            1 => Ok(terms.remove(0)),
            0 => Err(SearchError::invalid_term(text, "no indexable term after analysis")),
            n => Err(SearchError::invalid_term(text, &format!("expected one term, got {n}"))),
        }
    }
}

fn normalize(text: &str) -> String {
    text.nfkc()
        .collect::<String>()
        .to_lowercase()
        .chars()
        .filter(|c| !c.is_ascii_punctuation())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_analyze() {
        let t = Analyzer::default().analyze("Running, runner's run!");
        assert!(t.iter().any(|w| w == "run"));
    }

    #[test]
    fn empty_text_is_empty() {
        assert!(Analyzer::default().analyze("").is_empty());
        assert!(Analyzer::default().analyze("  ...!  ").is_empty());
    }

    #[test]
    fn preserves_order() {
        let t = Analyzer::new(Vec::<String>::new()).analyze("zebra apple mango");
        assert_eq!(t, vec!["zebra", "appl", "mango"]);
    }

    #[test]
    fn contracted_stopwords_match_stripped_tokens() {
        let a = Analyzer::default();
        assert!(a.analyze("aren't").is_empty());
    }

    #[test]
    fn single_term_rejects_empty_and_multi() {
        let a = Analyzer::default();
        assert_eq!(a.single_term("Bears").unwrap(), "bear");
        assert!(matches!(a.single_term(""), Err(SearchError::InvalidTerm { .. })));
        assert!(matches!(a.single_term("the"), Err(SearchError::InvalidTerm { .. })));
        assert!(matches!(a.single_term("brown bear"), Err(SearchError::InvalidTerm { .. })));
    }

    #[test]
    fn fingerprint_follows_stop_words() {
        let a = Analyzer::new(["the", "a"]);
        assert_eq!(a.fingerprint(), Analyzer::new(["A", "the", "a"]).fingerprint());
        assert_ne!(a.fingerprint(), Analyzer::new(Vec::<String>::new()).fingerprint());
        assert_ne!(a.fingerprint(), Analyzer::default().fingerprint());
    }
}
