//! OpenAI-style chat completion dialect.

use super::http_utils::send_json_request;
use super::{ChatMessage, ChatRole, ImageRef, LlmError, MAX_COMPLETION_TOKENS, NO_RESPONSE_FALLBACK};
use crate::config::ServiceConfig;
use reqwest::Client as HttpClient;
use serde_json::{json, Value};

/// Lenient response shape: a structurally valid reply with the content field
/// missing is a degenerate answer, not an error.
#[derive(serde::Deserialize, Debug)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(serde::Deserialize, Debug, Default)]
struct ChatChoice {
    #[serde(default)]
    message: ChoiceMessage,
}

#[derive(serde::Deserialize, Debug, Default)]
struct ChoiceMessage {
    content: Option<String>,
}

/// Build the request body for `{base_url}/chat/completions`.
///
/// Without an image the user message content is a plain string; with one it
/// is a two-part array, image part first, text part second.
pub(crate) fn build_request_body(
    model: &str,
    messages: &[ChatMessage],
    image: Option<&ImageRef>,
) -> Value {
    let rendered: Vec<Value> = messages
        .iter()
        .map(|m| render_message(m, image))
        .collect();

    json!({
        "model": model,
        "messages": rendered,
        "max_tokens": MAX_COMPLETION_TOKENS,
    })
}

fn render_message(message: &ChatMessage, image: Option<&ImageRef>) -> Value {
    match (message.role, image) {
        (ChatRole::User, Some(image)) => json!({
            "role": "user",
            "content": [
                {"type": "image_url", "image_url": {"url": image.url}},
                {"type": "text", "text": message.content},
            ],
        }),
        _ => json!({
            "role": message.role.as_str(),
            "content": message.content,
        }),
    }
}

/// Pull the answer text out of a decoded response body.
fn extract_content(body: Value) -> Result<String, LlmError> {
    let parsed: ChatCompletionResponse =
        serde_json::from_value(body).map_err(|e| LlmError::JsonError(e.to_string()))?;

    Ok(parsed
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .unwrap_or_else(|| NO_RESPONSE_FALLBACK.to_string()))
}

/// Send one chat completion request in the OpenAI dialect.
///
/// # Errors
///
/// Returns `LlmError::NetworkError` on connectivity issues,
/// `LlmError::ApiError` on non-success status codes, or
/// `LlmError::JsonError` if the response body is malformed.
pub async fn complete(
    http: &HttpClient,
    config: &ServiceConfig,
    model: &str,
    messages: &[ChatMessage],
    image: Option<&ImageRef>,
) -> Result<String, LlmError> {
    let url = format!("{}/chat/completions", config.base_url.trim_end_matches('/'));
    let body = build_request_body(model, messages, image);
    let auth = format!("Bearer {}", config.api_key);

    let response = send_json_request(http, &url, &body, Some(&auth), &[]).await?;
    extract_content(response)
}
