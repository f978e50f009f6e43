// src/reply/mod.rs
//! Reply generation
//!
//! The accumulator hands a [`ReplyRequest`] to a [`ReplyGenerator`] and gets
//! back the persona's next message. The hosted model is one implementation
//! ([`gemini::GeminiClient`]); tests plug in scripted generators.

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{MediaPayload, Message};

pub mod gemini;
pub mod prompt;

pub use gemini::{GeminiClient, GeminiConfig};

/// Everything the generator needs to produce one reply
#[derive(Debug, Clone)]
pub struct ReplyRequest {
    pub contact_name: String,
    pub persona: String,
    pub user_name: String,
    /// Trailing conversation history, oldest first
    pub history: Vec<Message>,
    /// The user's new fragments, joined
    pub text: String,
    /// Most recent media sent in the batch
    pub media: Option<MediaPayload>,
}

#[derive(Debug, Error)]
pub enum ReplyError {
    #[error("No API key configured")]
    MissingApiKey,

    #[error("Network error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("API returned no text")]
    EmptyResponse,

    #[error("Generator failed: {0}")]
    Other(String),
}

#[async_trait]
pub trait ReplyGenerator: Send + Sync {
    async fn generate(&self, request: &ReplyRequest) -> Result<String, ReplyError>;
}
