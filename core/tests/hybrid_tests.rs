use async_trait::async_trait;
use hoopla_core::config::SearchConfig;
use hoopla_core::encoder::HashEncoder;
use hoopla_core::evaluation::{evaluate, GoldenDataset, TestCase};
use hoopla_core::oracle::Oracle;
use hoopla_core::persist::CachePaths;
use hoopla_core::rerank::RerankStrategy;
use hoopla_core::tokenizer::Analyzer;
use hoopla_core::{Corpus, Document, HybridSearch, Result, SearchError};
use std::sync::Arc;
use std::time::Duration;

fn corpus() -> Corpus {
    Corpus::new(vec![
        Document::new(10, "Grizzly Man", "A documentary about a man who lived among wild bears in Alaska."),
        Document::new(11, "Paddington", "A bear from Peru arrives in London. A kind family takes him in."),
        Document::new(12, "Heat", "A professional thief plans a final heist. A detective closes in."),
        Document::new(13, "Ratatouille", "A rat who loves cooking teams up with a young chef in Paris."),
        Document::new(14, "The Italian Job", "A crew of thieves plans a gold heist in Turin."),
    ])
    .unwrap()
}

fn loaded(dir: &tempfile::TempDir) -> HybridSearch {
    let hs = HybridSearch::new(Analyzer::default(), Arc::new(HashEncoder::default()), SearchConfig::default()).unwrap();
    hs.load_or_build(&corpus(), &CachePaths::new(dir.path())).unwrap();
    hs
}

#[test]
fn reloading_from_cache_gives_the_same_ranking() {
    let dir = tempfile::tempdir().unwrap();
    let first = loaded(&dir).rrf_search("heist thieves", 60.0, 5).unwrap();
    let second = loaded(&dir).rrf_search("heist thieves", 60.0, 5).unwrap();
    assert_eq!(first, second);
    let top: Vec<u32> = first.iter().take(2).map(|h| h.doc_id).collect();
    assert!(top.contains(&12) && top.contains(&14));
}

#[test]
fn weighted_and_rrf_agree_on_clear_winner() {
    let dir = tempfile::tempdir().unwrap();
    let hs = loaded(&dir);
    assert_eq!(hs.weighted_search("rat cooking chef", 0.5, 3).unwrap()[0].doc_id, 13);
    assert_eq!(hs.rrf_search("rat cooking chef", 60.0, 3).unwrap()[0].doc_id, 13);
}

#[test]
fn evaluation_reports_per_query_metrics() {
    let dir = tempfile::tempdir().unwrap();
    let hs = loaded(&dir);
    let golden = GoldenDataset {
        test_cases: vec![TestCase {
            query: "heist thieves".into(),
            relevant_docs: vec!["Heat".into(), "The Italian Job".into()],
        }],
    };
    let report = evaluate(&hs, &golden, 2).unwrap();
    assert_eq!(report.len(), 1);
    assert_eq!(report[0].retrieved.len(), 2);
    assert_eq!(report[0].precision, 1.0);
    assert_eq!(report[0].recall, 1.0);
    assert_eq!(report[0].f1, 1.0);
}

/// Ranks whatever it is shown in reverse id order.
struct ReverseOracle;

#[async_trait]
impl Oracle for ReverseOracle {
    fn name(&self) -> &str { "reverse" }
    async fn generate(&self, prompt: &str) -> Result<String> {
        let mut ids: Vec<u32> = prompt
            .split("\"id\":")
            .skip(1)
            .filter_map(|s| s.split(|c: char| !c.is_ascii_digit()).next()?.parse().ok())
            .collect();
        ids.sort_unstable_by(|a, b| b.cmp(a));
        Ok(serde_json::to_string(&ids).map_err(|e| SearchError::Oracle(e.to_string()))?)
    }
}

#[tokio::test]
async fn batch_rerank_reorders_the_shortlist() {
    let dir = tempfile::tempdir().unwrap();
    let hs = loaded(&dir);
    let strategy = RerankStrategy::Batch { oracle: &ReverseOracle };
    let hits = hs.rrf_search_reranked("bear", 60.0, 2, &strategy).await.unwrap();
    assert_eq!(hits.len(), 2);
    assert!(hits[0].doc_id > hits[1].doc_id);
    assert_eq!(hits[1].rerank_rank, Some(2));
}

/// Always answers with prose.
struct Chatty;

#[async_trait]
impl Oracle for Chatty {
    fn name(&self) -> &str { "chatty" }
    async fn generate(&self, _prompt: &str) -> Result<String> {
        Ok("I would say this one is quite relevant.".into())
    }
}

#[tokio::test]
async fn malformed_pairwise_score_fails_the_query() {
    let dir = tempfile::tempdir().unwrap();
    let hs = loaded(&dir);
    let strategy = RerankStrategy::Individual { oracle: &Chatty, pacing: Duration::ZERO };
    let err = hs.rrf_search_reranked("bear", 60.0, 2, &strategy).await.unwrap_err();
    assert!(matches!(err, SearchError::MalformedOracleResponse { .. }));
}
