//! Utility functions for text shaping and Telegram API retries.

use crate::config::{
    TELEGRAM_API_INITIAL_BACKOFF_MS, TELEGRAM_API_MAX_BACKOFF_MS, TELEGRAM_API_MAX_RETRIES,
};
use anyhow::Result;
use std::time::Duration;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;
use tracing::warn;

/// Safely truncates a string to a maximum character length (not bytes).
///
/// This is UTF-8 safe and will not panic on multi-byte characters.
///
/// # Examples
///
/// ```
/// use switchboard_bot::utils::truncate_str;
/// assert_eq!(truncate_str("hello world", 5), "hello");
/// assert_eq!(truncate_str("short", 10), "short");
/// ```
pub fn truncate_str(s: impl AsRef<str>, max_chars: usize) -> String {
    let s = s.as_ref();
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    s.char_indices()
        .nth(max_chars)
        .map_or_else(|| s.to_string(), |(pos, _)| s[..pos].to_string())
}

/// Splits a message into parts that each fit within `limit` characters.
///
/// Splitting prefers line boundaries; a single line longer than the limit is
/// hard-split on a character boundary.
#[must_use]
pub fn split_long_message(text: &str, limit: usize) -> Vec<String> {
    if text.chars().count() <= limit {
        return vec![text.to_string()];
    }

    let mut parts = Vec::new();
    let mut current = String::new();
    let mut current_chars = 0usize;

    for line in text.split('\n') {
        let mut line_chars = line.chars().count();
        let mut line = line;

        // Hard-split oversized lines first
        while line_chars > limit {
            if !current.is_empty() {
                parts.push(std::mem::take(&mut current).trim_end().to_string());
                current_chars = 0;
            }
            let head = truncate_str(line, limit);
            line = &line[head.len()..];
            line_chars -= limit;
            parts.push(head);
        }

        // +1 for the newline separator
        if current_chars + line_chars + 1 > limit && !current.is_empty() {
            parts.push(std::mem::take(&mut current).trim_end().to_string());
            current_chars = 0;
        }

        current.push_str(line);
        current.push('\n');
        current_chars += line_chars + 1;
    }

    if !current.trim().is_empty() {
        parts.push(current.trim_end().to_string());
    }

    parts
}

/// Wraps a prompt with the quoted content of the message it replies to.
#[must_use]
pub fn wrap_quoted(quoted: &str, question: &str) -> String {
    format!("Quoted content:\n\"\"\"\n{quoted}\n\"\"\"\n\nMy question: {question}")
}

/// Retry a Telegram API operation with exponential backoff.
///
/// Intended for Telegram file operations (`get_file` and downloads) that may
/// fail on transient network errors. Backend AI calls are never routed
/// through this: they are single-attempt by contract.
///
/// # Errors
///
/// Returns the last error if all attempts fail.
pub async fn retry_telegram_operation<F, Fut, T>(operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let retry_strategy = ExponentialBackoff::from_millis(TELEGRAM_API_INITIAL_BACKOFF_MS)
        .max_delay(Duration::from_millis(TELEGRAM_API_MAX_BACKOFF_MS))
        .map(jitter)
        .take(TELEGRAM_API_MAX_RETRIES);

    Retry::spawn(retry_strategy, operation).await.map_err(|e| {
        warn!(
            "Telegram API operation failed after {} attempts: {}",
            TELEGRAM_API_MAX_RETRIES, e
        );
        e
    })
}
