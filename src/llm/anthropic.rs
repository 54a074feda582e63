//! Anthropic-style messages dialect.

use super::http_utils::send_json_request;
use super::{ChatMessage, ChatRole, ImageRef, LlmError, MAX_COMPLETION_TOKENS, NO_RESPONSE_FALLBACK};
use crate::config::ServiceConfig;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use reqwest::Client as HttpClient;
use serde_json::{json, Value};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_IMAGE_MEDIA_TYPE: &str = "image/jpeg";

#[derive(serde::Deserialize, Debug)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(serde::Deserialize, Debug, Default)]
struct ContentBlock {
    text: Option<String>,
}

/// Split system-role messages out of the conversation; the dialect carries
/// them in a top-level field, not in the messages array.
fn split_system(messages: &[ChatMessage]) -> (Option<String>, Vec<&ChatMessage>) {
    let system = messages
        .iter()
        .find(|m| m.role == ChatRole::System)
        .map(|m| m.content.clone());
    let conversation = messages
        .iter()
        .filter(|m| m.role != ChatRole::System)
        .collect();
    (system, conversation)
}

/// Build the request body for `{base_url}/messages`.
///
/// `image_block` is the already-encoded inline image content block; it goes
/// before the text block inside the single user message.
pub(crate) fn build_request_body(
    model: &str,
    messages: &[ChatMessage],
    image_block: Option<Value>,
) -> Value {
    let (system, conversation) = split_system(messages);

    let rendered: Vec<Value> = conversation
        .iter()
        .map(|m| match (m.role, &image_block) {
            (ChatRole::User, Some(block)) => json!({
                "role": "user",
                "content": [
                    block,
                    {"type": "text", "text": m.content},
                ],
            }),
            _ => json!({
                "role": m.role.as_str(),
                "content": m.content,
            }),
        })
        .collect();

    let mut body = json!({
        "model": model,
        "max_tokens": MAX_COMPLETION_TOKENS,
        "messages": rendered,
    });
    if let Some(system) = system {
        body["system"] = json!(system);
    }
    body
}

/// Fetch the image and encode it as an inline base64 content block tagged
/// with the detected content type.
async fn fetch_image_block(http: &HttpClient, image: &ImageRef) -> Result<Value, LlmError> {
    let response = http
        .get(&image.url)
        .send()
        .await
        .map_err(|e| LlmError::NetworkError(e.to_string()))?;

    if !response.status().is_success() {
        return Err(LlmError::ApiError(format!(
            "Image fetch failed: {}",
            response.status()
        )));
    }

    let media_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map_or(DEFAULT_IMAGE_MEDIA_TYPE, str::trim)
        .to_string();

    let bytes = response
        .bytes()
        .await
        .map_err(|e| LlmError::NetworkError(e.to_string()))?;

    Ok(image_block(&media_type, &BASE64.encode(&bytes)))
}

fn image_block(media_type: &str, data: &str) -> Value {
    json!({
        "type": "image",
        "source": {
            "type": "base64",
            "media_type": media_type,
            "data": data,
        },
    })
}

fn extract_content(body: Value) -> Result<String, LlmError> {
    let parsed: MessagesResponse =
        serde_json::from_value(body).map_err(|e| LlmError::JsonError(e.to_string()))?;

    Ok(parsed
        .content
        .into_iter()
        .next()
        .and_then(|block| block.text)
        .unwrap_or_else(|| NO_RESPONSE_FALLBACK.to_string()))
}

/// Send one chat completion request in the Anthropic dialect.
///
/// # Errors
///
/// Returns `LlmError::NetworkError` on connectivity issues (including the
/// image fetch), `LlmError::ApiError` on non-success status codes, or
/// `LlmError::JsonError` if the response body is malformed.
pub async fn complete(
    http: &HttpClient,
    config: &ServiceConfig,
    model: &str,
    messages: &[ChatMessage],
    image: Option<&ImageRef>,
) -> Result<String, LlmError> {
    let block = match image {
        Some(image) => Some(fetch_image_block(http, image).await?),
        None => None,
    };

    let url = format!("{}/messages", config.base_url.trim_end_matches('/'));
    let body = build_request_body(model, messages, block);
    let headers = [
        ("x-api-key", config.api_key.as_str()),
        ("anthropic-version", ANTHROPIC_VERSION),
    ];

    let response = send_json_request(http, &url, &body, None, &headers).await?;
    extract_content(response)
}
