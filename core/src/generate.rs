//! Answers written by the oracle from retrieved documents.

use crate::corpus::{Document, DocumentSource};
use crate::error::{Result, SearchError};
use crate::oracle::{clean_response, Oracle};
use crate::types::SearchHit;
use crate::DocId;
use serde::Serialize;

/// Documents handed to the oracle per question.
pub const DEFAULT_RAG_LIMIT: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroundedAnswer {
    pub query: String,
    /// Retrieved documents in rank order.
    pub sources: Vec<DocId>,
    pub answer: String,
}

fn prompt(query: &str, documents: &[&Document]) -> String {
    let listing = if documents.is_empty() {
        "(no matching documents)".to_string()
    } else {
        documents
            .iter()
            .enumerate()
            .map(|(i, d)| format!("{}. {}: {}", i + 1, d.title, d.description))
            .collect::<Vec<_>>()
            .join("\n")
    };
    format!(
        "Answer the question using only the documents below. The reader is a user of \
         Hoopla, a movie streaming service; recommend titles from the documents where \
         it helps, and say so if the documents do not cover the question.\n\n\
         Question: {query}\n\n\
         Documents:\n{listing}\n\n\
         Answer:"
    )
}

/// Ask the oracle to answer `query` from the documents behind `hits`.
pub async fn answer_query<D>(
    oracle: &dyn Oracle,
    hits: &[SearchHit],
    docs: &D,
    query: &str,
) -> Result<GroundedAnswer>
where
    D: DocumentSource + ?Sized,
{
    let documents = hits
        .iter()
        .map(|h| docs.require(h.doc_id))
        .collect::<Result<Vec<_>>>()?;
    let response = oracle.generate(&prompt(query, &documents)).await?;
    let answer = clean_response(&response);
    if answer.is_empty() {
        return Err(SearchError::MalformedOracleResponse { doc_id: None, response });
    }
    tracing::info!(
        query,
        sources = documents.len(),
        oracle = oracle.name(),
        "generated answer"
    );
    Ok(GroundedAnswer {
        query: query.to_string(),
        sources: hits.iter().map(|h| h.doc_id).collect(),
        answer: answer.to_string(),
    })
}
