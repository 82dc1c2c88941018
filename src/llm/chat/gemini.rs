use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde::{Deserialize, Serialize};
use std::error::Error as StdError;

use super::{ChatClient, http_post_json};
use crate::llm::LlmConfig;
use crate::models::chat::{ChatMessage, Role};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    generation_config: GenerationConfig,
}

#[derive(Serialize, Deserialize)]
struct GeminiContent {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    role: Option<String>,
    parts: Vec<GeminiPart>,
}

#[derive(Serialize, Deserialize)]
struct GeminiPart {
    text: String,
}

#[derive(Serialize)]
struct GenerationConfig {
    temperature: f32,
}

#[derive(Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: GeminiContent,
}

pub struct GeminiChatClient {
    http: HttpClient,
    api_key: String,
    model: String,
    base_url: String,
    temperature: f32,
}

impl GeminiChatClient {
    pub fn new(
        api_key: String,
        model: Option<String>,
        base_url: Option<String>,
        temperature: f32,
    ) -> Self {
        Self {
            http: HttpClient::new(),
            api_key,
            model: model.unwrap_or_else(|| "gemini-1.5-flash-latest".to_string()),
            base_url: base_url.unwrap_or_else(|| "https://generativelanguage.googleapis.com".to_string()),
            temperature,
        }
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self, Box<dyn StdError + Send + Sync>> {
        let api_key = config.api_key
            .clone()
            .ok_or_else(|| "Gemini API key is required".to_string())?;
        Ok(Self::new(api_key, config.completion_model.clone(), config.base_url.clone(), config.temperature))
    }
}

/// Gemini has no system role inside `contents`: system text moves to
/// `systemInstruction` and assistant turns are sent as `model`.
fn build_request(messages: &[ChatMessage], temperature: f32) -> GeminiRequest {
    let system_text = messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join("\n");

    let contents = messages
        .iter()
        .filter(|m| m.role != Role::System)
        .map(|m| GeminiContent {
            role: Some(if m.role == Role::Assistant { "model" } else { "user" }.to_string()),
            parts: vec![GeminiPart { text: m.content.clone() }],
        })
        .collect();

    GeminiRequest {
        contents,
        system_instruction: if system_text.is_empty() {
            None
        } else {
            Some(GeminiContent { role: None, parts: vec![GeminiPart { text: system_text }] })
        },
        generation_config: GenerationConfig { temperature },
    }
}

fn extract_reply(resp: GeminiResponse) -> Result<ChatMessage, Box<dyn StdError + Send + Sync>> {
    let text = resp.candidates
        .into_iter()
        .next()
        .map(|c| c.content.parts.into_iter().map(|p| p.text).collect::<Vec<_>>().join(""))
        .filter(|t| !t.is_empty())
        .ok_or("Gemini response contained no candidates")?;
    Ok(ChatMessage::assistant(text))
}

#[async_trait]
impl ChatClient for GeminiChatClient {
    async fn complete(
        &self,
        messages: &[ChatMessage]
    ) -> Result<ChatMessage, Box<dyn StdError + Send + Sync>> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.model
        );
        let req = build_request(messages, self.temperature);
        let headers = vec![("x-goog-api-key".to_string(), self.api_key.clone())];
        let resp: GeminiResponse = http_post_json(&self.http, &url, &req, Some(headers)).await?;
        extract_reply(resp)
    }

    fn get_model(&self) -> String {
        self.model.clone()
    }
}
