//! Configuration and settings management
//!
//! Loads settings from environment variables and defines the AI service
//! registry parsed from the `AI_SERVICES` JSON value.

use config::{Config, ConfigError, Environment, File};
use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;

/// Application settings loaded from environment variables
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Telegram Bot API token
    pub telegram_token: String,

    /// Comma-separated list of allowed user IDs; empty means unrestricted
    #[serde(rename = "whitelist")]
    pub whitelist_str: Option<String>,

    /// JSON map of service name to AI service configuration
    pub ai_services: String,

    /// Optional system message prepended to every AI call
    pub system_message: Option<String>,

    /// R2 Storage access key ID
    pub r2_access_key_id: Option<String>,
    /// R2 Storage secret access key
    pub r2_secret_access_key: Option<String>,
    /// R2 Storage endpoint URL
    pub r2_endpoint_url: Option<String>,
    /// R2 Storage bucket name
    pub r2_bucket_name: Option<String>,
}

impl Settings {
    /// Create new settings by loading from environment and files
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if loading fails.
    pub fn new() -> Result<Self, ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{run_mode}")).required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(Environment::with_prefix("APP").separator("__"))
            // Environment::default() auto-converts UPPER_SNAKE_CASE to snake_case;
            // ignore_empty treats empty env vars as unset
            .add_source(Environment::default().ignore_empty(true))
            .build()?;

        let mut settings: Self = s.try_deserialize()?;

        // Fallback: check environment variables directly if config didn't pick them up
        env_fallback(&mut settings.r2_endpoint_url, "R2_ENDPOINT_URL");
        env_fallback(&mut settings.r2_access_key_id, "R2_ACCESS_KEY_ID");
        env_fallback(&mut settings.r2_secret_access_key, "R2_SECRET_ACCESS_KEY");
        env_fallback(&mut settings.r2_bucket_name, "R2_BUCKET_NAME");

        Ok(settings)
    }

    /// Returns the set of Telegram IDs that are allowed to use the bot
    #[must_use]
    pub fn allowed_users(&self) -> HashSet<i64> {
        self.whitelist_str
            .as_ref()
            .map(|s| {
                s.split(|c: char| c == ',' || c == ';' || c.is_whitespace())
                    .filter(|token| !token.is_empty())
                    .filter_map(|id| id.parse::<i64>().ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Whitelist membership test; an empty whitelist allows everyone
    #[must_use]
    pub fn is_allowed(&self, user_id: i64) -> bool {
        let allowed = self.allowed_users();
        allowed.is_empty() || allowed.contains(&user_id)
    }
}

fn env_fallback(slot: &mut Option<String>, var: &str) {
    if slot.is_none() {
        if let Ok(val) = std::env::var(var) {
            if !val.is_empty() {
                *slot = Some(val);
            }
        }
    }
}

/// Upstream wire format for a chat completion request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    OpenAi,
    Anthropic,
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
        })
    }
}

/// One configured AI backend, immutable for the process lifetime
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceConfig {
    pub base_url: String,
    pub api_key: String,
    /// Ordered list of model identifiers; the first is the default
    pub models: Vec<String>,
    #[serde(rename = "type")]
    pub dialect: Dialect,
}

/// Errors raised while parsing the service registry
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("AI_SERVICES is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("AI_SERVICES defines no services")]
    Empty,
    #[error("service '{0}' defines no models")]
    NoModels(String),
}

/// Mapping from service name to config; insertion order defines the default
#[derive(Debug, Clone)]
pub struct ServiceRegistry {
    entries: Vec<(String, ServiceConfig)>,
}

impl ServiceRegistry {
    /// Parse the registry from the `AI_SERVICES` JSON value
    ///
    /// # Errors
    ///
    /// Returns an error on invalid JSON, an empty service map, or a service
    /// with an empty model list.
    pub fn from_json(raw: &str) -> Result<Self, RegistryError> {
        let registry: Self = serde_json::from_str(raw)?;
        if registry.entries.is_empty() {
            return Err(RegistryError::Empty);
        }
        for (name, config) in &registry.entries {
            if config.models.is_empty() {
                return Err(RegistryError::NoModels(name.clone()));
            }
        }
        Ok(registry)
    }

    /// The first configured service, if any
    #[must_use]
    pub fn first(&self) -> Option<(&str, &ServiceConfig)> {
        self.entries.first().map(|(n, c)| (n.as_str(), c))
    }

    /// Look up a service by name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ServiceConfig> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, c)| c)
    }

    /// Iterate services in configuration order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ServiceConfig)> {
        self.entries.iter().map(|(n, c)| (n.as_str(), c))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// Hand-written deserialization so entries keep document order; serde_json's
// default map type would sort keys and break default-service selection.
impl<'de> Deserialize<'de> for ServiceRegistry {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct RegistryVisitor;

        impl<'de> Visitor<'de> for RegistryVisitor {
            type Value = ServiceRegistry;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of service name to service config")
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut entries = Vec::new();
                while let Some((name, config)) = map.next_entry::<String, ServiceConfig>()? {
                    entries.push((name, config));
                }
                Ok(ServiceRegistry { entries })
            }
        }

        deserializer.deserialize_map(RegistryVisitor)
    }
}

/// HTTP timeout for backend calls, from `LLM_HTTP_TIMEOUT_SECS` or 30s default
#[must_use]
pub fn get_llm_http_timeout_secs() -> u64 {
    std::env::var("LLM_HTTP_TIMEOUT_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(30)
}

/// Stored-session retention, from `SESSION_TTL_DAYS` or 30 days default
#[must_use]
pub fn get_session_ttl_days() -> i64 {
    std::env::var("SESSION_TTL_DAYS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(30)
}

// Telegram file-operation retry policy
/// Max attempts for Telegram file operations
pub const TELEGRAM_API_MAX_RETRIES: usize = 3;
/// Initial backoff for Telegram file operations
pub const TELEGRAM_API_INITIAL_BACKOFF_MS: u64 = 500;
/// Backoff cap for Telegram file operations
pub const TELEGRAM_API_MAX_BACKOFF_MS: u64 = 4000;
