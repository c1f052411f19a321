//! Retrieval quality against a golden dataset of relevant titles.

use crate::config::DEFAULT_RRF_K;
use crate::corpus::DocumentSource;
use crate::error::{Result, SearchError};
use crate::hybrid::HybridSearch;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TestCase {
    pub query: String,
    /// Titles of the documents a good search returns.
    pub relevant_docs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GoldenDataset {
    pub test_cases: Vec<TestCase>,
}

impl GoldenDataset {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| SearchError::Corpus {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        serde_json::from_str(&text).map_err(|e| SearchError::Corpus {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }
}

fn hits_in_top_k(retrieved: &[String], relevant: &HashSet<&str>, k: usize) -> usize {
    retrieved.iter().take(k).filter(|t| relevant.contains(t.as_str())).count()
}

/// Relevant results in the top `k`, divided by `k`.
pub fn precision_at_k(retrieved: &[String], relevant: &HashSet<&str>, k: usize) -> f64 {
    if k == 0 {
        return 0.0;
    }
    hits_in_top_k(retrieved, relevant, k) as f64 / k as f64
}

/// Relevant results in the top `k`, divided by the number of relevant documents.
pub fn recall_at_k(retrieved: &[String], relevant: &HashSet<&str>, k: usize) -> f64 {
    if relevant.is_empty() {
        return 0.0;
    }
    hits_in_top_k(retrieved, relevant, k) as f64 / relevant.len() as f64
}

pub fn f1(precision: f64, recall: f64) -> f64 {
    if precision + recall == 0.0 {
        return 0.0;
    }
    2.0 * precision * recall / (precision + recall)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryEvaluation {
    pub query: String,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub retrieved: Vec<String>,
    pub relevant: Vec<String>,
}

/// Run RRF search for every case and score the top `k` titles.
pub fn evaluate(
    search: &HybridSearch,
    golden: &GoldenDataset,
    k: usize,
) -> Result<Vec<QueryEvaluation>> {
    let index = search.documents()?;
    let mut out = Vec::with_capacity(golden.test_cases.len());
    for case in &golden.test_cases {
        let hits = search.rrf_search(&case.query, DEFAULT_RRF_K, k)?;
        let retrieved: Vec<String> = hits
            .iter()
            .filter_map(|h| index.document(h.doc_id))
            .map(|d| d.title.clone())
            .collect();
        let relevant: HashSet<&str> = case.relevant_docs.iter().map(String::as_str).collect();
        let precision = precision_at_k(&retrieved, &relevant, k);
        let recall = recall_at_k(&retrieved, &relevant, k);
        tracing::debug!(query = %case.query, precision, recall, "evaluated");
        out.push(QueryEvaluation {
            query: case.query.clone(),
            precision,
            recall,
            f1: f1(precision, recall),
            retrieved,
            relevant: case.relevant_docs.clone(),
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn titles(t: &[&str]) -> Vec<String> {
        t.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn precision_divides_by_k() {
        let relevant: HashSet<&str> = ["Paddington", "The Revenant"].into_iter().collect();
        let retrieved = titles(&["Paddington", "Heat", "The Revenant"]);
        assert!((precision_at_k(&retrieved, &relevant, 3) - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(precision_at_k(&retrieved, &relevant, 1), 1.0);
        // fewer results than k still divides by k
        assert_eq!(precision_at_k(&retrieved, &relevant, 4), 0.5);
    }

    #[test]
    fn recall_divides_by_relevant_count() {
        let relevant: HashSet<&str> = ["Paddington", "The Revenant", "Brother Bear"].into_iter().collect();
        let retrieved = titles(&["Paddington", "Heat"]);
        assert!((recall_at_k(&retrieved, &relevant, 5) - 1.0 / 3.0).abs() < 1e-12);
        assert_eq!(recall_at_k(&retrieved, &HashSet::new(), 5), 0.0);
    }

    #[test]
    fn f1_never_nan() {
        assert_eq!(f1(0.0, 0.0), 0.0);
        assert!((f1(0.5, 1.0) - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn golden_file_shape() {
        let g: GoldenDataset = serde_json::from_str(
            r#"{"test_cases": [{"query": "bear movies", "relevant_docs": ["Paddington"]}]}"#,
        )
        .unwrap();
        assert_eq!(g.test_cases[0].relevant_docs, vec!["Paddington".to_string()]);
    }
}
