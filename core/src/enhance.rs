//! Query rewriting through the oracle before retrieval.

use crate::error::{Result, SearchError};
use crate::oracle::{clean_response, ImageInput, Oracle};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnhanceMethod {
    /// Fix obvious typos only.
    Spell,
    /// Turn a vague request into a specific search query.
    Rewrite,
    /// Append related terms to the original query.
    Expand,
}

impl FromStr for EnhanceMethod {
    type Err = SearchError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "spell" => Ok(Self::Spell),
            "rewrite" => Ok(Self::Rewrite),
            "expand" => Ok(Self::Expand),
            other => Err(SearchError::InvalidParameter(format!(
                "unknown enhance method {other:?}"
            ))),
        }
    }
}

impl fmt::Display for EnhanceMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Spell => "spell",
            Self::Rewrite => "rewrite",
            Self::Expand => "expand",
        })
    }
}

fn prompt(method: EnhanceMethod, query: &str) -> String {
    match method {
        EnhanceMethod::Spell => format!(
            "Correct only clear spelling mistakes in this movie search query. \
             Keep the wording otherwise unchanged; if nothing is misspelled, return it as is.\n\n\
             Query: \"{query}\"\n\nCorrected query:"
        ),
        EnhanceMethod::Rewrite => format!(
            "Rewrite this movie search query so it names concrete genres, themes, settings or \
             well-known titles the user is probably after. Keep it under ten words and \
             return only the query.\n\n\
             Query: \"{query}\"\n\nRewritten query:"
        ),
        EnhanceMethod::Expand => format!(
            "List a few synonyms and closely related terms for this movie search query, \
             space separated, without repeating the query itself.\n\n\
             Query: \"{query}\"\n\nTerms:"
        ),
    }
}

/// Returns the enhanced query; `Expand` keeps the original terms in front.
pub async fn enhance_query(
    oracle: &dyn Oracle,
    query: &str,
    method: EnhanceMethod,
) -> Result<String> {
    let response = oracle.generate(&prompt(method, query)).await?;
    let cleaned = clean_response(&response);
    if cleaned.is_empty() {
        return Err(SearchError::MalformedOracleResponse { doc_id: None, response });
    }
    let enhanced = match method {
        EnhanceMethod::Expand => format!("{query} {cleaned}"),
        EnhanceMethod::Spell | EnhanceMethod::Rewrite => cleaned.to_string(),
    };
    tracing::info!(%method, original = query, enhanced = %enhanced, "enhanced query");
    Ok(enhanced)
}

/// Rewrite `query` using what the oracle sees in `image`.
pub async fn rewrite_with_image(
    oracle: &dyn Oracle,
    query: &str,
    image: &ImageInput,
) -> Result<String> {
    let prompt = format!(
        "Given the attached image and text query, rewrite the query to find the movie in a \
         movie database. Combine what the image shows with the text, prefer movie-specific \
         details such as actors, scenes and visual style, and return only the rewritten query.\n\n\
         Query: \"{}\"",
        query.trim()
    );
    let response = oracle.generate_with_image(&prompt, image).await?;
    let cleaned = clean_response(&response);
    if cleaned.is_empty() {
        return Err(SearchError::MalformedOracleResponse { doc_id: None, response });
    }
    tracing::info!(
        original = query,
        rewritten = cleaned,
        mime = %image.mime_type,
        "image query rewrite"
    );
    Ok(cleaned.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct Fixed(&'static str);

    #[async_trait]
    impl Oracle for Fixed {
        fn name(&self) -> &str { "fixed" }
        async fn generate(&self, _prompt: &str) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    #[tokio::test]
    async fn spell_replaces_query() {
        let q = enhance_query(&Fixed("\"bear attack\"\n"), "baer atack", EnhanceMethod::Spell)
            .await
            .unwrap();
        assert_eq!(q, "bear attack");
    }

    #[tokio::test]
    async fn expand_appends() {
        let q = enhance_query(&Fixed("grizzly wilderness"), "bear", EnhanceMethod::Expand)
            .await
            .unwrap();
        assert_eq!(q, "bear grizzly wilderness");
    }

    #[tokio::test]
    async fn empty_response_is_malformed() {
        let err = enhance_query(&Fixed("  "), "bear", EnhanceMethod::Rewrite).await.unwrap_err();
        assert!(matches!(err, SearchError::MalformedOracleResponse { .. }));
    }

    #[tokio::test]
    async fn text_only_oracle_refuses_images() {
        let image = ImageInput { bytes: vec![0xff, 0xd8], mime_type: "image/jpeg".into() };
        let err = rewrite_with_image(&Fixed("bears"), "bear", &image).await.unwrap_err();
        assert!(matches!(err, SearchError::Oracle(_)));
    }

    struct Sees(&'static str);

    #[async_trait]
    impl Oracle for Sees {
        fn name(&self) -> &str { "sees" }
        async fn generate(&self, _prompt: &str) -> Result<String> {
            Ok(String::new())
        }
        async fn generate_with_image(&self, prompt: &str, image: &ImageInput) -> Result<String> {
            assert!(prompt.contains("\"bear\""));
            assert_eq!(image.mime_type, "image/png");
            Ok(format!("\"{}\"", self.0))
        }
    }

    #[tokio::test]
    async fn image_rewrite_uses_image_call() {
        let image = ImageInput { bytes: vec![1, 2, 3], mime_type: "image/png".into() };
        let q = rewrite_with_image(&Sees("Paddington bear in London"), " bear ", &image).await.unwrap();
        assert_eq!(q, "Paddington bear in London");
    }

    #[test]
    fn parses_names() {
        assert_eq!("expand".parse::<EnhanceMethod>().unwrap(), EnhanceMethod::Expand);
        assert!("translate".parse::<EnhanceMethod>().is_err());
    }
}
