//! Shared HTTP plumbing for the backend dialects.

use crate::config::get_llm_http_timeout_secs;
use crate::llm::LlmError;
use reqwest::Client as HttpClient;
use serde_json::Value;
use std::time::Duration;

/// Creates an HTTP client configured with the standard backend timeout.
///
/// Uses `LLM_HTTP_TIMEOUT_SECS` or a 30s default. This prevents infinite
/// hangs when an upstream is slow or unresponsive.
#[must_use]
pub fn create_http_client() -> HttpClient {
    let timeout = Duration::from_secs(get_llm_http_timeout_secs());
    HttpClient::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|_| HttpClient::new())
}

/// Sends an HTTP POST with a JSON body and returns the parsed JSON response.
///
/// # Errors
///
/// Returns `LlmError::NetworkError` on connectivity issues,
/// `LlmError::ApiError` on non-success status codes, or
/// `LlmError::JsonError` if the body is not JSON.
pub async fn send_json_request(
    client: &HttpClient,
    url: &str,
    body: &Value,
    auth_header: Option<&str>,
    extra_headers: &[(&str, &str)],
) -> Result<Value, LlmError> {
    let mut request = client.post(url).json(body);

    if let Some(auth) = auth_header {
        request = request.header("Authorization", auth);
    }

    for (key, value) in extra_headers {
        request = request.header(*key, *value);
    }

    let response = request
        .send()
        .await
        .map_err(|e| LlmError::NetworkError(e.to_string()))?;

    if !response.status().is_success() {
        let status = response.status();
        let error_text = response.text().await.unwrap_or_default();

        // Truncate very long error bodies
        let truncated = if error_text.len() > 500 {
            format!("{}... (truncated)", &error_text[..500])
        } else {
            error_text
        };

        return Err(LlmError::ApiError(format!(
            "API error: {status} - {truncated}"
        )));
    }

    response
        .json()
        .await
        .map_err(|e| LlmError::JsonError(e.to_string()))
}
