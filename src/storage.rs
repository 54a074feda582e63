//! Per-user session persistence
//!
//! Sessions live behind the narrow [`SessionStore`] trait as externally
//! owned, TTL-bearing records. The production implementation keeps one JSON
//! object per user in an R2 bucket; a record older than the configured
//! retention reads back as absent and the caller falls back to defaults.

use crate::config::{get_session_ttl_days, ServiceRegistry, Settings};
use async_trait::async_trait;
use aws_credential_types::Credentials;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::operation::get_object::GetObjectError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use aws_types::region::Region;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("S3 get error: {0}")]
    S3Get(Box<SdkError<GetObjectError>>),
    #[error("S3 put error: {0}")]
    S3Put(String),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Per-user backend/model selection
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct UserSession {
    pub current_service: String,
    pub current_model: String,
}

impl UserSession {
    /// The session a user gets before ever storing one: the registry's first
    /// service and that service's first model.
    #[must_use]
    pub fn default_for(registry: &ServiceRegistry) -> Self {
        match registry.first() {
            Some((name, config)) => Self {
                current_service: name.to_string(),
                current_model: config.models.first().cloned().unwrap_or_default(),
            },
            None => Self {
                current_service: String::new(),
                current_model: String::new(),
            },
        }
    }
}

/// Persistence envelope; `saved_at` drives the read-side expiry check
#[derive(Debug, Serialize, Deserialize)]
struct StoredSession {
    session: UserSession,
    saved_at: DateTime<Utc>,
}

impl StoredSession {
    fn is_stale(&self, ttl: Duration) -> bool {
        Utc::now() - self.saved_at > ttl
    }
}

/// Narrow get/set interface over the external session store
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self, user_id: i64) -> Result<Option<UserSession>, StorageError>;
    async fn store(&self, user_id: i64, session: &UserSession) -> Result<(), StorageError>;
}

pub struct R2Storage {
    client: Client,
    bucket: String,
    ttl: Duration,
}

impl R2Storage {
    /// Create a new R2 storage instance
    ///
    /// # Errors
    ///
    /// Returns an error if R2 configuration is missing.
    pub async fn new(settings: &Settings) -> Result<Self, StorageError> {
        let endpoint_url = settings
            .r2_endpoint_url
            .as_ref()
            .ok_or_else(|| StorageError::Config("R2_ENDPOINT_URL is missing".into()))?;
        let access_key = settings
            .r2_access_key_id
            .as_ref()
            .ok_or_else(|| StorageError::Config("R2_ACCESS_KEY_ID is missing".into()))?;
        let secret_key = settings
            .r2_secret_access_key
            .as_ref()
            .ok_or_else(|| StorageError::Config("R2_SECRET_ACCESS_KEY is missing".into()))?;
        let bucket = settings
            .r2_bucket_name
            .as_ref()
            .ok_or_else(|| StorageError::Config("R2_BUCKET_NAME is missing".into()))?;

        let credentials = Credentials::new(access_key, secret_key, None, None, "r2-storage");

        let sdk_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .credentials_provider(credentials)
            .region(Region::new("auto"))
            .load()
            .await;

        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .endpoint_url(endpoint_url)
            .force_path_style(true)
            .build();

        Ok(Self {
            client: Client::from_conf(s3_config),
            bucket: bucket.clone(),
            ttl: Duration::days(get_session_ttl_days()),
        })
    }

    /// Verify the bucket is reachable
    ///
    /// # Errors
    ///
    /// Returns an error if the bucket cannot be headed.
    pub async fn check_connection(&self) -> Result<(), StorageError> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|e| StorageError::S3Put(e.to_string()))?;
        info!("R2 Storage connection verified (bucket: {})", self.bucket);
        Ok(())
    }

    fn session_key(user_id: i64) -> String {
        format!("sessions/{user_id}.json")
    }

    async fn save_json<T: serde::Serialize + Sync>(
        &self,
        key: &str,
        data: &T,
    ) -> Result<(), StorageError> {
        let body = serde_json::to_string_pretty(data)?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body.into_bytes()))
            .content_type("application/json")
            .send()
            .await
            .map_err(|e| StorageError::S3Put(e.to_string()))?;

        Ok(())
    }

    async fn load_json<T: serde::de::DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<Option<T>, StorageError> {
        let result = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;

        match result {
            Ok(output) => {
                let data = output
                    .body
                    .collect()
                    .await
                    .map_err(|e| StorageError::Io(std::io::Error::other(e)))?;
                let json_data = serde_json::from_slice(&data.into_bytes())?;
                Ok(Some(json_data))
            }
            Err(SdkError::ServiceError(err)) if err.err().is_no_such_key() => Ok(None),
            Err(e) => Err(StorageError::S3Get(Box::new(e))),
        }
    }
}

#[async_trait]
impl SessionStore for R2Storage {
    async fn load(&self, user_id: i64) -> Result<Option<UserSession>, StorageError> {
        let key = Self::session_key(user_id);
        let Some(stored) = self.load_json::<StoredSession>(&key).await? else {
            return Ok(None);
        };
        if stored.is_stale(self.ttl) {
            debug!("Stored session for user {} expired, ignoring", user_id);
            return Ok(None);
        }
        Ok(Some(stored.session))
    }

    async fn store(&self, user_id: i64, session: &UserSession) -> Result<(), StorageError> {
        let key = Self::session_key(user_id);
        self.save_json(
            &key,
            &StoredSession {
                session: session.clone(),
                saved_at: Utc::now(),
            },
        )
        .await
    }
}

/// Read a user's session, degrading to registry defaults when the record is
/// absent or the store is unreachable. Never fails.
pub async fn get_session(
    store: &dyn SessionStore,
    user_id: i64,
    registry: &ServiceRegistry,
) -> UserSession {
    match store.load(user_id).await {
        Ok(Some(session)) => session,
        Ok(None) => UserSession::default_for(registry),
        Err(e) => {
            warn!("Session read failed for user {}: {}", user_id, e);
            UserSession::default_for(registry)
        }
    }
}

/// Write a user's session, best-effort. A failed write loses the selection
/// but must not fail the in-flight reply.
pub async fn save_session(store: &dyn SessionStore, user_id: i64, session: &UserSession) {
    if let Err(e) = store.store(user_id, session).await {
        error!("Session write failed for user {}: {}", user_id, e);
    }
}
