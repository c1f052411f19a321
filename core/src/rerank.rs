//! Second-stage reranking of a fused shortlist.
//!
//! Three strategies share one entry point, [`rerank`]:
//!
//! | Strategy | Signal | Calls |
//! |----------|--------|-------|
//! | Individual | oracle score 0-10 per candidate | one per candidate, strictly sequential |
//! | Batch | oracle ordering of all candidate ids | one |
//! | CrossEncoder | local relevance model | none external |
//!
//! A malformed or mismatched oracle answer fails the whole batch; no
//! candidate is left at its pre-rerank position while others move.

use crate::corpus::{Document, DocumentSource};
use crate::error::{Result, SearchError};
use crate::oracle::{clean_response, strip_code_fence, Oracle};
use crate::types::SearchHit;
use crate::DocId;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Highest score the individual strategy accepts.
pub const MAX_ORACLE_SCORE: i64 = 10;

/// Local model scoring (query, passage) pairs; higher is more relevant.
pub trait CrossEncoder: Send + Sync {
    fn id(&self) -> &str;

    /// One score per document, in input order.
    fn score(&self, query: &str, documents: &[&str]) -> Result<Vec<f32>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RerankMethod {
    Individual,
    Batch,
    CrossEncoder,
}

impl FromStr for RerankMethod {
    type Err = SearchError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "individual" => Ok(Self::Individual),
            "batch" => Ok(Self::Batch),
            "cross_encoder" | "cross-encoder" => Ok(Self::CrossEncoder),
            other => Err(SearchError::InvalidParameter(format!("unknown rerank method {other:?}"))),
        }
    }
}

impl fmt::Display for RerankMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Individual => "individual",
            Self::Batch => "batch",
            Self::CrossEncoder => "cross_encoder",
        })
    }
}

/// A rerank method bound to the collaborator it needs.
pub enum RerankStrategy<'a> {
    Individual { oracle: &'a dyn Oracle, pacing: Duration },
    Batch { oracle: &'a dyn Oracle },
    CrossEncoder { model: &'a dyn CrossEncoder },
}

impl RerankStrategy<'_> {
    pub fn method(&self) -> RerankMethod {
        match self {
            Self::Individual { .. } => RerankMethod::Individual,
            Self::Batch { .. } => RerankMethod::Batch,
            Self::CrossEncoder { .. } => RerankMethod::CrossEncoder,
        }
    }
}

fn passage(doc: &Document) -> String {
    format!("{} - {}", doc.title, doc.description)
}

fn lookup<'d, D>(docs: &'d D, hits: &[SearchHit]) -> Result<Vec<&'d Document>>
where
    D: DocumentSource + ?Sized,
{
    hits.iter().map(|h| docs.require(h.doc_id)).collect()
}

/// Reorder `hits` against `query`. Input order breaks ties in the new scores.
pub async fn rerank<D>(
    hits: Vec<SearchHit>,
    docs: &D,
    query: &str,
    strategy: &RerankStrategy<'_>,
) -> Result<Vec<SearchHit>>
where
    D: DocumentSource + Sync + ?Sized,
{
    if hits.is_empty() {
        return Ok(hits);
    }
    tracing::debug!(method = %strategy.method(), candidates = hits.len(), "reranking");
    let mut reranked = match strategy {
        RerankStrategy::Individual { oracle, pacing } => {
            individual(hits, docs, query, *oracle, *pacing).await?
        }
        RerankStrategy::Batch { oracle } => batch(hits, docs, query, *oracle).await?,
        RerankStrategy::CrossEncoder { model } => cross_encoder(hits, docs, query, *model)?,
    };
    for (i, hit) in reranked.iter_mut().enumerate() {
        hit.rerank_rank = Some(i + 1);
    }
    Ok(reranked)
}

fn individual_prompt(query: &str, doc: &Document) -> String {
    format!(
        "Score how relevant this movie is to the search query.\n\n\
         Query: \"{query}\"\n\
         Movie: {}\n\n\
         Weigh direct topical relevance and what the user most likely wants.\n\
         Answer with a single integer from 0 to {MAX_ORACLE_SCORE} \
         ({MAX_ORACLE_SCORE} = perfect match) and nothing else.",
        passage(doc)
    )
}

/// Read a bare integer in `0..=MAX_ORACLE_SCORE`.
pub fn parse_score(response: &str) -> Option<i64> {
    let value: i64 = clean_response(response).parse().ok()?;
    (0..=MAX_ORACLE_SCORE).contains(&value).then_some(value)
}

async fn individual<D>(
    mut hits: Vec<SearchHit>,
    docs: &D,
    query: &str,
    oracle: &dyn Oracle,
    pacing: Duration,
) -> Result<Vec<SearchHit>>
where
    D: DocumentSource + Sync + ?Sized,
{
    let documents = lookup(docs, &hits)?;
    let mut scores = Vec::with_capacity(hits.len());
    // Sequential on purpose: each call, and its pause, completes before the next.
    for (i, doc) in documents.iter().enumerate() {
        if i > 0 && !pacing.is_zero() {
            tokio::time::sleep(pacing).await;
        }
        let response = oracle.generate(&individual_prompt(query, doc)).await?;
        let score = parse_score(&response).ok_or_else(|| SearchError::MalformedOracleResponse {
            doc_id: Some(doc.id),
            response: response.clone(),
        })?;
        tracing::debug!(doc_id = doc.id, score, "oracle score");
        scores.push(score as f64);
    }
    for (hit, score) in hits.iter_mut().zip(scores) {
        hit.rerank_score = Some(score);
    }
    hits.sort_by(|a, b| b.rerank_score.unwrap_or(0.0).total_cmp(&a.rerank_score.unwrap_or(0.0)));
    Ok(hits)
}

fn batch_prompt(query: &str, documents: &[&Document]) -> String {
    let listing: Vec<serde_json::Value> = documents
        .iter()
        .map(|d| {
            serde_json::json!({ "id": d.id, "title": d.title, "description": d.description })
        })
        .collect();
    format!(
        "Order these movies from most to least relevant to the search query.\n\n\
         Query: \"{query}\"\n\n\
         Movies:\n{}\n\n\
         Reply with only a JSON array containing every id exactly once, best first, \
         for example [75, 12, 34].",
        serde_json::Value::Array(listing)
    )
}

/// Parse the oracle's ordering and check it names exactly the candidates.
pub fn parse_ordering(response: &str, candidates: &[DocId]) -> Result<Vec<DocId>> {
    let body = strip_code_fence(response);
    let ordering: Vec<DocId> =
        serde_json::from_str(body).map_err(|_| SearchError::MalformedOracleResponse {
            doc_id: None,
            response: response.to_string(),
        })?;
    let expected: HashSet<DocId> = candidates.iter().copied().collect();
    let mut seen = HashSet::new();
    let mut unexpected = Vec::new();
    for id in &ordering {
        if !expected.contains(id) || !seen.insert(*id) {
            unexpected.push(*id);
        }
    }
    let missing: Vec<DocId> = candidates.iter().copied().filter(|id| !seen.contains(id)).collect();
    if !missing.is_empty() || !unexpected.is_empty() {
        return Err(SearchError::RerankResponseMismatch { missing, unexpected });
    }
    Ok(ordering)
}

async fn batch<D>(
    hits: Vec<SearchHit>,
    docs: &D,
    query: &str,
    oracle: &dyn Oracle,
) -> Result<Vec<SearchHit>>
where
    D: DocumentSource + Sync + ?Sized,
{
    let documents = lookup(docs, &hits)?;
    let response = oracle.generate(&batch_prompt(query, &documents)).await?;
    let candidates: Vec<DocId> = hits.iter().map(|h| h.doc_id).collect();
    let ordering = parse_ordering(&response, &candidates)?;
    let mut by_id: HashMap<DocId, SearchHit> = hits.into_iter().map(|h| (h.doc_id, h)).collect();
    Ok(ordering.into_iter().filter_map(|id| by_id.remove(&id)).collect())
}

fn cross_encoder<D>(
    mut hits: Vec<SearchHit>,
    docs: &D,
    query: &str,
    model: &dyn CrossEncoder,
) -> Result<Vec<SearchHit>>
where
    D: DocumentSource + ?Sized,
{
    let passages: Vec<String> = lookup(docs, &hits)?.into_iter().map(passage).collect();
    let refs: Vec<&str> = passages.iter().map(String::as_str).collect();
    let scores = model.score(query, &refs)?;
    if scores.len() != hits.len() {
        return Err(SearchError::CrossEncoder(format!(
            "{} returned {} scores for {} candidates",
            model.id(),
            scores.len(),
            hits.len()
        )));
    }
    for (hit, score) in hits.iter_mut().zip(scores) {
        hit.rerank_score = Some(score as f64);
    }
    hits.sort_by(|a, b| b.rerank_score.unwrap_or(0.0).total_cmp(&a.rerank_score.unwrap_or(0.0)));
    Ok(hits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::Corpus;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    fn corpus() -> Corpus {
        Corpus::new(vec![
            Document::new(1, "The Revenant", "A man survives a bear attack"),
            Document::new(2, "Paddington", "A bear moves to London"),
            Document::new(3, "Heat", "A crew plans a heist"),
        ])
        .unwrap()
    }

    fn hits() -> Vec<SearchHit> {
        [1, 2, 3]
            .into_iter()
            .enumerate()
            .map(|(i, id)| SearchHit { doc_id: id, score: 1.0 / (i + 1) as f64, ..SearchHit::default() })
            .collect()
    }

    /// Replies from a queue and records prompts.
    struct ScriptedOracle {
        replies: Mutex<Vec<String>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedOracle {
        fn new(replies: &[&str]) -> Self {
            let mut r: Vec<String> = replies.iter().map(|s| s.to_string()).collect();
            r.reverse();
            Self { replies: Mutex::new(r), prompts: Mutex::new(Vec::new()) }
        }
    }

    #[async_trait]
    impl Oracle for ScriptedOracle {
        fn name(&self) -> &str { "scripted" }
        async fn generate(&self, prompt: &str) -> Result<String> {
            self.prompts.lock().push(prompt.to_string());
            self.replies.lock().pop().ok_or_else(|| SearchError::Oracle("script exhausted".into()))
        }
    }

    struct LengthModel;
    impl CrossEncoder for LengthModel {
        fn id(&self) -> &str { "length" }
        fn score(&self, _query: &str, documents: &[&str]) -> Result<Vec<f32>> {
            Ok(documents.iter().map(|d| d.len() as f32).collect())
        }
    }

    fn order(hits: &[SearchHit]) -> Vec<DocId> {
        hits.iter().map(|h| h.doc_id).collect()
    }

    #[tokio::test]
    async fn individual_sorts_by_oracle_score() {
        let oracle = ScriptedOracle::new(&["3", "\"9\"", " 5 \n"]);
        let strategy = RerankStrategy::Individual { oracle: &oracle, pacing: Duration::ZERO };
        let out = rerank(hits(), &corpus(), "bear", &strategy).await.unwrap();
        assert_eq!(order(&out), vec![2, 3, 1]);
        assert_eq!(out[0].rerank_score, Some(9.0));
        assert_eq!(out[0].rerank_rank, Some(1));
        assert_eq!(oracle.prompts.lock().len(), 3);
        assert!(oracle.prompts.lock()[0].contains("The Revenant"));
    }

    #[tokio::test]
    async fn individual_ties_keep_input_order() {
        let oracle = ScriptedOracle::new(&["4", "4", "4"]);
        let strategy = RerankStrategy::Individual { oracle: &oracle, pacing: Duration::ZERO };
        let out = rerank(hits(), &corpus(), "bear", &strategy).await.unwrap();
        assert_eq!(order(&out), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn individual_malformed_score_aborts_batch() {
        let oracle = ScriptedOracle::new(&["7", "very relevant", "2"]);
        let strategy = RerankStrategy::Individual { oracle: &oracle, pacing: Duration::ZERO };
        let err = rerank(hits(), &corpus(), "bear", &strategy).await.unwrap_err();
        match err {
            SearchError::MalformedOracleResponse { doc_id, .. } => assert_eq!(doc_id, Some(2)),
            other => panic!("unexpected error {other:?}"),
        }
        // the third candidate is never sent
        assert_eq!(oracle.prompts.lock().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn individual_calls_are_paced() {
        let oracle = ScriptedOracle::new(&["1", "2", "3"]);
        let strategy = RerankStrategy::Individual { oracle: &oracle, pacing: Duration::from_secs(60) };
        let start = tokio::time::Instant::now();
        rerank(hits(), &corpus(), "bear", &strategy).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(120));
    }

    #[test]
    fn score_bounds() {
        assert_eq!(parse_score("10"), Some(10));
        assert_eq!(parse_score("0"), Some(0));
        assert_eq!(parse_score("11"), None);
        assert_eq!(parse_score("-1"), None);
        assert_eq!(parse_score("7.5"), None);
    }

    #[tokio::test]
    async fn batch_follows_oracle_order() {
        let oracle = ScriptedOracle::new(&["```json\n[3, 1, 2]\n```"]);
        let strategy = RerankStrategy::Batch { oracle: &oracle };
        let out = rerank(hits(), &corpus(), "heist", &strategy).await.unwrap();
        assert_eq!(order(&out), vec![3, 1, 2]);
        assert_eq!(out[2].rerank_rank, Some(3));
    }

    #[tokio::test]
    async fn batch_missing_id_rejects_everything() {
        let oracle = ScriptedOracle::new(&["[3, 1]"]);
        let strategy = RerankStrategy::Batch { oracle: &oracle };
        let err = rerank(hits(), &corpus(), "heist", &strategy).await.unwrap_err();
        match err {
            SearchError::RerankResponseMismatch { missing, unexpected } => {
                assert_eq!(missing, vec![2]);
                assert!(unexpected.is_empty());
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn ordering_rejects_duplicates_and_strangers() {
        let err = parse_ordering("[1, 1, 2, 3, 9]", &[1, 2, 3]).unwrap_err();
        match err {
            SearchError::RerankResponseMismatch { missing, unexpected } => {
                assert!(missing.is_empty());
                assert_eq!(unexpected, vec![1, 9]);
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(matches!(parse_ordering("first 3 then 1", &[1, 3]), Err(SearchError::MalformedOracleResponse { .. })));
    }

    #[tokio::test]
    async fn cross_encoder_sorts_by_model_score() {
        let strategy = RerankStrategy::CrossEncoder { model: &LengthModel };
        let out = rerank(hits(), &corpus(), "anything", &strategy).await.unwrap();
        // "The Revenant - A man survives a bear attack" is the longest passage
        assert_eq!(out[0].doc_id, 1);
        assert!(out.windows(2).all(|w| w[0].rerank_score >= w[1].rerank_score));
    }

    #[tokio::test]
    async fn hit_outside_the_index_is_unknown_document() {
        let mut stray = hits();
        stray[1].doc_id = 99;
        let oracle = ScriptedOracle::new(&["[1, 99, 3]"]);
        let strategy = RerankStrategy::Batch { oracle: &oracle };
        let err = rerank(stray, &corpus(), "bear", &strategy).await.unwrap_err();
        assert!(matches!(err, SearchError::UnknownDocument { doc_id: 99 }), "{err}");
        assert!(oracle.prompts.lock().is_empty());
    }

    #[test]
    fn method_names_round_trip() {
        for m in [RerankMethod::Individual, RerankMethod::Batch, RerankMethod::CrossEncoder] {
            assert_eq!(m.to_string().parse::<RerankMethod>().unwrap(), m);
        }
        assert!("llm".parse::<RerankMethod>().is_err());
    }
}
