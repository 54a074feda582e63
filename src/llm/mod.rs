//! Backend adapter for the two supported chat-completion dialects.
//!
//! Normalizes a `(ServiceConfig, model, Prompt)` tuple into an upstream HTTP
//! call in either the OpenAI or the Anthropic wire format and returns plain
//! text or a typed failure.

pub mod anthropic;
pub mod http_utils;
pub mod openai;

use crate::config::{Dialect, ServiceConfig};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Output-length cap applied to every upstream request, both dialects.
pub const MAX_COMPLETION_TOKENS: u32 = 1000;

/// Placeholder answer when an upstream reply parses but carries no content.
pub const NO_RESPONSE_FALLBACK: &str = "No response";

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("API error: {0}")]
    ApiError(String),
    #[error("Network error: {0}")]
    NetworkError(String),
    #[error("JSON error: {0}")]
    JsonError(String),
}

/// Role tag of a normalized chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
    System,
}

impl ChatRole {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }
}

/// Role-tagged text unit fed to the dialect serializers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }
}

/// Reference to an image attachment, resolved to a fetchable URL
#[derive(Debug, Clone)]
pub struct ImageRef {
    pub url: String,
}

/// What the user asked, with or without an attached image
#[derive(Debug, Clone)]
pub enum Prompt {
    TextOnly(String),
    TextWithImage { text: String, image: ImageRef },
}

impl Prompt {
    #[must_use]
    pub fn text(&self) -> &str {
        match self {
            Self::TextOnly(text) | Self::TextWithImage { text, .. } => text,
        }
    }

    #[must_use]
    pub fn image(&self) -> Option<&ImageRef> {
        match self {
            Self::TextOnly(_) => None,
            Self::TextWithImage { image, .. } => Some(image),
        }
    }
}

/// Client for the configured AI backends
pub struct AiClient {
    http: reqwest::Client,
}

impl AiClient {
    #[must_use]
    pub fn new() -> Self {
        Self {
            http: http_utils::create_http_client(),
        }
    }

    /// Send one prompt to the given service and model.
    ///
    /// Single attempt, no retry: interactive callers will not wait out a
    /// backoff schedule.
    ///
    /// # Errors
    ///
    /// Returns `LlmError::NetworkError` on connectivity issues,
    /// `LlmError::ApiError` on non-success status codes, or
    /// `LlmError::JsonError` if the response body is malformed.
    pub async fn complete(
        &self,
        config: &ServiceConfig,
        model: &str,
        prompt: &Prompt,
        system_message: Option<&str>,
    ) -> Result<String, LlmError> {
        debug!(
            "Backend call (dialect: {}, model: {}, image: {})",
            config.dialect,
            model,
            prompt.image().is_some()
        );

        let messages = assemble_messages(system_message, prompt.text());
        match config.dialect {
            Dialect::OpenAi => {
                openai::complete(&self.http, config, model, &messages, prompt.image()).await
            }
            Dialect::Anthropic => {
                anthropic::complete(&self.http, config, model, &messages, prompt.image()).await
            }
        }
    }
}

impl Default for AiClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Normalize one turn into the message list handed to a dialect serializer.
fn assemble_messages(system_message: Option<&str>, text: &str) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(2);
    if let Some(system) = system_message {
        if !system.is_empty() {
            messages.push(ChatMessage::system(system));
        }
    }
    messages.push(ChatMessage::user(text));
    messages
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assemble_messages_without_system() {
        let messages = assemble_messages(None, "hi");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, ChatRole::User);
        assert_eq!(messages[0].content, "hi");
    }

    #[test]
    fn test_assemble_messages_with_system() {
        let messages = assemble_messages(Some("be brief"), "hi");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, ChatRole::System);
        assert_eq!(messages[1].role, ChatRole::User);
    }

    #[test]
    fn test_prompt_accessors() {
        let plain = Prompt::TextOnly("q".into());
        assert_eq!(plain.text(), "q");
        assert!(plain.image().is_none());

        let with_image = Prompt::TextWithImage {
            text: "q".into(),
            image: ImageRef {
                url: "https://files.example/a.jpg".into(),
            },
        };
        assert_eq!(with_image.text(), "q");
        assert!(with_image.image().is_some());
    }
}
