// src/reply/gemini.rs
//! Reply generator backed by the Gemini `generateContent` endpoint

use async_trait::async_trait;
use log::{debug, info};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{prompt, ReplyError, ReplyGenerator, ReplyRequest};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-3-flash-preview";

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
    pub timeout: Duration,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        GeminiConfig {
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            temperature: 1.05,
            max_output_tokens: 1000,
            timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<Content>,
}

pub struct GeminiClient {
    http: Client,
    config: GeminiConfig,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> Result<Self, ReplyError> {
        let http = Client::builder().timeout(config.timeout).build()?;
        Ok(GeminiClient { http, config })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.config.base_url.trim_end_matches('/'),
            self.config.model
        )
    }

    fn build_request(&self, request: &ReplyRequest) -> GenerateRequest {
        let mut parts = Vec::new();

        // Media goes first, then the text prompt that refers to it
        if let Some(media) = &request.media {
            parts.push(Part {
                inline_data: Some(InlineData {
                    mime_type: media.mime_type.clone(),
                    data: media.base64_data().to_string(),
                }),
                ..Part::default()
            });
        }
        parts.push(Part {
            text: Some(prompt::build_prompt(request)),
            ..Part::default()
        });

        GenerateRequest {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts,
            }],
            generation_config: GenerationConfig {
                temperature: self.config.temperature,
                max_output_tokens: self.config.max_output_tokens,
            },
        }
    }
}

/// Concatenate the text parts of the first candidate
fn response_text(response: GenerateResponse) -> Option<String> {
    let content = response.candidates.into_iter().next()?.content?;
    let text: String = content.parts.into_iter().filter_map(|p| p.text).collect();
    if text.trim().is_empty() {
        None
    } else {
        Some(text.trim().to_string())
    }
}

#[async_trait]
impl ReplyGenerator for GeminiClient {
    async fn generate(&self, request: &ReplyRequest) -> Result<String, ReplyError> {
        let api_key = self.config.api_key.as_deref().ok_or(ReplyError::MissingApiKey)?;
        let body = self.build_request(request);

        debug!(
            "Requesting reply from {} with {} history entries",
            self.config.model,
            request.history.len()
        );

        let response = self
            .http
            .post(self.endpoint())
            .header("x-goog-api-key", api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ReplyError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: GenerateResponse = response.json().await?;
        let text = response_text(parsed).ok_or(ReplyError::EmptyResponse)?;
        info!("Received reply of {} chars from {}", text.len(), self.config.model);
        Ok(text)
    }
}
