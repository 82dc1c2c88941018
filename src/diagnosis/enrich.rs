use async_trait::async_trait;
use log::{ debug, warn };
use reqwest::Client as HttpClient;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;

use crate::models::diagnosis::{ DiseaseInfo, DiseaseLabel };

pub const NO_INFORMATION: &str = "No information available for this disease.";

#[derive(Debug, Error)]
pub enum EnrichError {
    #[error("Request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Service returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Unexpected response: {0}")]
    Decode(String),
}

#[async_trait]
pub trait Searcher: Send + Sync {
    /// Result snippets for `query`, best match first.
    async fn search(&self, query: &str) -> Result<Vec<String>, EnrichError>;
}

#[async_trait]
pub trait Translator: Send + Sync {
    async fn translate(&self, text: &str, target: &str) -> Result<String, EnrichError>;
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, EnrichError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(EnrichError::Status { status: status.as_u16(), body })
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Deserialize)]
struct SearchItem {
    #[serde(default)]
    snippet: String,
}

/// Google Programmable Search (`customsearch/v1`).
pub struct GoogleSearch {
    http: HttpClient,
    url: String,
    api_key: String,
    engine_id: String,
}

impl GoogleSearch {
    pub fn new(url: &str, api_key: &str, engine_id: &str) -> Self {
        Self {
            http: HttpClient::new(),
            url: url.to_string(),
            api_key: api_key.to_string(),
            engine_id: engine_id.to_string(),
        }
    }
}

#[async_trait]
impl Searcher for GoogleSearch {
    async fn search(&self, query: &str) -> Result<Vec<String>, EnrichError> {
        let resp = self.http
            .get(&self.url)
            .query(&[("q", query), ("cx", self.engine_id.as_str()), ("key", self.api_key.as_str())])
            .send().await?;
        let parsed: SearchResponse = check_status(resp).await?.json().await?;
        debug!("Search for '{}' returned {} items", query, parsed.items.len());
        Ok(
            parsed.items
                .into_iter()
                .map(|item| item.snippet)
                .collect()
        )
    }
}

#[derive(Deserialize)]
struct TranslateResponse {
    data: TranslateData,
}

#[derive(Deserialize)]
struct TranslateData {
    #[serde(default)]
    translations: Vec<Translation>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Translation {
    translated_text: String,
}

/// Google Cloud Translation v2.
pub struct GoogleTranslate {
    http: HttpClient,
    url: String,
    api_key: String,
}

impl GoogleTranslate {
    pub fn new(url: &str, api_key: &str) -> Self {
        Self { http: HttpClient::new(), url: url.to_string(), api_key: api_key.to_string() }
    }
}

#[async_trait]
impl Translator for GoogleTranslate {
    async fn translate(&self, text: &str, target: &str) -> Result<String, EnrichError> {
        let payload = json!({ "q": text, "target": target, "format": "text" });
        let resp = self.http
            .post(&self.url)
            .query(&[("key", self.api_key.as_str())])
            .json(&payload)
            .send().await?;
        let parsed: TranslateResponse = check_status(resp).await?.json().await?;
        parsed.data.translations
            .into_iter()
            .next()
            .map(|t| t.translated_text)
            .ok_or_else(|| EnrichError::Decode("translation response had no translations".to_string()))
    }
}

/// Builds the two-language information panel for a diagnosed label.
pub struct Enricher {
    searcher: Arc<dyn Searcher>,
    translator: Arc<dyn Translator>,
    target_language: String,
}

impl Enricher {
    pub fn new(
        searcher: Arc<dyn Searcher>,
        translator: Arc<dyn Translator>,
        target_language: &str
    ) -> Self {
        Self { searcher, translator, target_language: target_language.to_string() }
    }

    /// Only a failed search is an error; translation failures keep the source text.
    pub async fn enrich(&self, label: DiseaseLabel) -> Result<DiseaseInfo, EnrichError> {
        let query = format!("eggplant {}", label);
        let translated_query = self.translate_or_keep(&query).await;

        let snippets = self.searcher.search(&query).await?;
        let source_text = snippets
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n");

        if source_text.is_empty() {
            warn!("No search snippets for '{}'", query);
            return Ok(DiseaseInfo {
                query,
                translated_query,
                source_text: NO_INFORMATION.to_string(),
                translated_text: NO_INFORMATION.to_string(),
            });
        }

        let translated = self.translate_or_keep(&source_text).await;
        let translated_text = if translated.trim().is_empty() {
            NO_INFORMATION.to_string()
        } else {
            translated
        };

        Ok(DiseaseInfo { query, translated_query, source_text, translated_text })
    }

    async fn translate_or_keep(&self, text: &str) -> String {
        match self.translator.translate(text, &self.target_language).await {
            Ok(translated) => translated,
            Err(e) => {
                warn!("Translation to '{}' failed, keeping original text: {}", self.target_language, e);
                text.to_string()
            }
        }
    }
}
