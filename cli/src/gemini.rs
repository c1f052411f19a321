//! Oracle backed by the Gemini `generateContent` endpoint.

use async_trait::async_trait;
use base64::prelude::*;
use hoopla_core::oracle::{ImageInput, Oracle};
use hoopla_core::{Result, SearchError};
use serde::{Deserialize, Serialize};

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_MODEL: &str = "gemini-2.5-flash-lite";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Blob {
    mime_type: String,
    /// Base64 of the raw bytes.
    data: String,
}

#[derive(Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct Part<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    inline_data: Option<Blob>,
}

impl<'a> Part<'a> {
    fn text(text: &'a str) -> Self {
        Self { text: Some(text), ..Self::default() }
    }

    fn image(image: &ImageInput) -> Self {
        Self {
            inline_data: Some(Blob {
                mime_type: image.mime_type.clone(),
                data: BASE64_STANDARD.encode(&image.bytes),
            }),
            ..Self::default()
        }
    }
}

#[derive(Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
}

#[derive(Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<ResponseContent>,
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    candidates: Option<Vec<Candidate>>,
}

pub struct GeminiOracle {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

impl GeminiOracle {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self { client: reqwest::Client::new(), api_key: api_key.into(), model: model.into() }
    }

    /// Reads `GEMINI_API_KEY` and optional `GEMINI_MODEL`.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("GEMINI_API_KEY")
            .map_err(|_| SearchError::Oracle("GEMINI_API_KEY is not set".into()))?;
        let model = std::env::var("GEMINI_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        Ok(Self::new(api_key, model))
    }

    fn url(&self) -> String {
        format!("{API_BASE}/models/{}:generateContent", self.model)
    }

    async fn send(&self, parts: Vec<Part<'_>>) -> Result<String> {
        let request = GenerateContentRequest { contents: vec![Content { role: "user", parts }] };
        let response = self
            .client
            .post(self.url())
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| SearchError::Oracle(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SearchError::Oracle(format!("{} returned {status}: {body}", self.model)));
        }

        let parsed: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| SearchError::Oracle(format!("unreadable response: {e}")))?;
        let text = parsed.text();
        tracing::debug!(model = %self.model, chars = text.len(), "oracle response");
        if text.is_empty() {
            return Err(SearchError::MalformedOracleResponse { doc_id: None, response: text });
        }
        Ok(text)
    }
}

impl GenerateContentResponse {
    /// Text parts of the first candidate, concatenated.
    fn text(self) -> String {
        self.candidates
            .unwrap_or_default()
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Oracle for GeminiOracle {
    fn name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        self.send(vec![Part::text(prompt)]).await
    }

    async fn generate_with_image(&self, prompt: &str, image: &ImageInput) -> Result<String> {
        self.send(vec![Part::text(prompt), Part::image(image)]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_shape() {
        let req = GenerateContentRequest {
            contents: vec![Content { role: "user", parts: vec![Part::text("hi")] }],
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["contents"][0]["parts"][0]["text"], "hi");
        assert!(json["contents"][0]["parts"][0].get("inlineData").is_none());
    }

    #[test]
    fn image_part_is_inline_base64() {
        let image = ImageInput { bytes: b"png!".to_vec(), mime_type: "image/png".into() };
        let json = serde_json::to_value(Part::image(&image)).unwrap();
        assert_eq!(json["inlineData"]["mimeType"], "image/png");
        assert_eq!(json["inlineData"]["data"], "cG5nIQ==");
        assert!(json.get("text").is_none());
    }

    #[test]
    fn response_text_is_joined() {
        let r: GenerateContentResponse = serde_json::from_str(
            r#"{"candidates":[{"content":{"parts":[{"text":"[3,"},{"text":"1]"}]}}]}"#,
        )
        .unwrap();
        assert_eq!(r.text(), "[3,1]");
    }

    #[test]
    fn url_names_model() {
        let o = GeminiOracle::new("k", "gemini-test");
        assert!(o.url().ends_with("/models/gemini-test:generateContent"));
    }
}
