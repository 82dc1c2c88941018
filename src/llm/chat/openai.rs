use async_trait::async_trait;
use log::debug;
use reqwest::{Client as HttpClient, header::{HeaderMap, HeaderValue, CONTENT_TYPE, AUTHORIZATION}};
use serde::{Deserialize, Serialize};
use std::error::Error as StdError;

use super::{ChatClient, http_post_json};
use crate::llm::LlmConfig;
use crate::models::chat::ChatMessage;

pub struct OpenAIChatClient {
    http: HttpClient,
    model: String,
    base_url: String,
    temperature: f32,
}

#[derive(Serialize)]
struct OpenAIChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
}

#[derive(Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
}

#[derive(Deserialize)]
struct OpenAIChoice {
    message: ChatMessage,
}

impl OpenAIChatClient {
    pub fn new(
        api_key: String,
        model: Option<String>,
        base_url: Option<String>,
        temperature: f32,
    ) -> Result<Self, Box<dyn StdError + Send + Sync>> {
        let chat_model = model.unwrap_or_else(|| "gpt-4o".to_string());
        let api_url = base_url.unwrap_or_else(|| "https://api.openai.com/v1/chat/completions".to_string());
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", api_key))
                .map_err(|e| format!("Invalid API key format: {}", e))?
        );

        let http = HttpClient::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| Box::new(e) as Box<dyn StdError + Send + Sync>)?;

        Ok(Self {
            http,
            model: chat_model,
            base_url: api_url,
            temperature,
        })
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self, Box<dyn StdError + Send + Sync>> {
        let api_key = config.api_key
            .clone()
            .ok_or_else(|| "OpenAI API key is required".to_string())?;

        Self::new(
            api_key,
            config.completion_model.clone(),
            config.base_url.clone(),
            config.temperature,
        )
    }
}

fn first_choice(resp: OpenAIResponse) -> Result<ChatMessage, Box<dyn StdError + Send + Sync>> {
    resp.choices
        .into_iter()
        .next()
        .map(|choice| choice.message)
        .ok_or_else(|| "OpenAI response contained no choices".into())
}

#[async_trait]
impl ChatClient for OpenAIChatClient {
    async fn complete(
        &self,
        messages: &[ChatMessage]
    ) -> Result<ChatMessage, Box<dyn StdError + Send + Sync>> {
        let req = OpenAIChatRequest {
            model: &self.model,
            messages,
            temperature: self.temperature,
        };
        debug!("OpenAI completion with {} messages", messages.len());
        let resp: OpenAIResponse = http_post_json(&self.http, self.base_url.trim_end_matches('/'), &req, None).await?;
        first_choice(resp)
    }

    fn get_model(&self) -> String {
        self.model.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::chat::Role;

    #[test]
    fn request_matches_chat_completions_shape() {
        let messages = vec![ChatMessage::system("seed"), ChatMessage::user("hello")];
        let req = OpenAIChatRequest { model: "gpt-4o", messages: &messages, temperature: 0.2 };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["model"], "gpt-4o");
        assert_eq!(json["messages"][1]["role"], "user");
        assert_eq!(json["messages"][1]["content"], "hello");
        assert!((json["temperature"].as_f64().unwrap() - 0.2).abs() < 1e-6);
    }

    #[test]
    fn takes_the_first_choice() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"Rotate crops."}}]}"#;
        let resp: OpenAIResponse = serde_json::from_str(body).unwrap();
        let msg = first_choice(resp).unwrap();
        assert_eq!(msg.role, Role::Assistant);
        assert_eq!(msg.content, "Rotate crops.");
    }

    #[test]
    fn empty_choices_is_an_error() {
        let resp: OpenAIResponse = serde_json::from_str(r#"{"choices":[]}"#).unwrap();
        assert!(first_choice(resp).is_err());
    }

    #[test]
    fn from_config_requires_key() {
        let config = LlmConfig::default();
        assert!(OpenAIChatClient::from_config(&config).is_err());
    }
}
