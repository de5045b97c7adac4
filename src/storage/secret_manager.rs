//! Google Cloud Secret Manager Backend
//!
//! [`SecretBackend`] over the Secret Manager REST API. Payloads are stored
//! base64-encoded in secret versions; the latest version wins.

use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use super::secret::SecretBackend;
use super::StoreKind;
use crate::core::{HttpRequest, HttpResponse, TransportFactory};
use crate::error::{NetworkError, StorageError};
use crate::types::StorageConfig;

/// GCE metadata server endpoint for the default service account token.
pub const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

/// Metadata tokens are refreshed this long before they expire.
const BEARER_EXPIRY_BUFFER_SECONDS: i64 = 60;

#[derive(Deserialize)]
struct AccessSecretVersionResponse {
    payload: SecretPayload,
}

#[derive(Deserialize)]
struct SecretPayload {
    #[serde(default)]
    data: String,
}

#[derive(Deserialize)]
struct MetadataTokenResponse {
    access_token: String,
    expires_in: i64,
}

struct CachedBearer {
    token: SecretString,
    expires_at: DateTime<Utc>,
}

/// Secret Manager client for one Google Cloud project.
pub struct SecretManagerBackend {
    transports: Arc<dyn TransportFactory>,
    endpoint: String,
    project_id: String,
    static_token: Option<SecretString>,
    metadata_token_url: String,
    timeout: Duration,
    cached_bearer: RwLock<Option<CachedBearer>>,
}

impl SecretManagerBackend {
    pub fn new(
        transports: Arc<dyn TransportFactory>,
        endpoint: impl Into<String>,
        project_id: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            transports,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            project_id: project_id.into(),
            static_token: None,
            metadata_token_url: METADATA_TOKEN_URL.to_string(),
            timeout,
            cached_bearer: RwLock::new(None),
        }
    }

    /// Build from storage configuration. `None` when no project is configured.
    pub fn from_config(
        config: &StorageConfig,
        transports: Arc<dyn TransportFactory>,
        timeout: Duration,
    ) -> Option<Self> {
        let project_id = config.project_id.as_ref()?;
        let mut backend = Self::new(
            transports,
            config.secret_manager_endpoint.clone(),
            project_id.clone(),
            timeout,
        );
        backend.static_token = config.secret_manager_access_token.clone();
        Some(backend)
    }

    /// Use a fixed bearer instead of the metadata server.
    pub fn with_access_token(mut self, token: SecretString) -> Self {
        self.static_token = Some(token);
        self
    }

    /// Override the metadata token URL.
    pub fn with_metadata_token_url(mut self, url: impl Into<String>) -> Self {
        self.metadata_token_url = url.into();
        self
    }

    fn secret_url(&self, name: &str) -> String {
        format!("{}/projects/{}/secrets/{}", self.endpoint, self.project_id, name)
    }

    fn unavailable(message: impl Into<String>) -> StorageError {
        StorageError::Unavailable {
            store: StoreKind::CloudSecret.to_string(),
            message: message.into(),
        }
    }

    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, StorageError> {
        let transport = self
            .transports
            .acquire()
            .map_err(|e| Self::unavailable(e.to_string()))?;
        if !transport.is_open() {
            return Err(Self::unavailable(NetworkError::TransportClosed.to_string()));
        }
        transport
            .send(request)
            .await
            .map_err(|e| Self::unavailable(e.to_string()))
    }

    async fn bearer(&self) -> Result<SecretString, StorageError> {
        if let Some(token) = &self.static_token {
            return Ok(token.clone());
        }

        {
            let cached = self.cached_bearer.read().await;
            if let Some(bearer) = cached.as_ref() {
                if Utc::now() < bearer.expires_at {
                    return Ok(bearer.token.clone());
                }
            }
        }

        let request = HttpRequest::get(&self.metadata_token_url, self.timeout)
            .header("metadata-flavor", "Google");
        let response = self.send(request).await?;
        if !response.is_success() {
            return Err(Self::unavailable(format!(
                "metadata server returned HTTP {}",
                response.status
            )));
        }

        let parsed: MetadataTokenResponse = serde_json::from_str(&response.body)
            .map_err(|e| Self::unavailable(format!("invalid metadata token response: {}", e)))?;
        let token = SecretString::new(parsed.access_token);
        let expires_at = parsed
            .expires_in
            .checked_sub(BEARER_EXPIRY_BUFFER_SECONDS)
            .and_then(ChronoDuration::try_seconds)
            .and_then(|lifetime| Utc::now().checked_add_signed(lifetime))
            .ok_or_else(|| {
                Self::unavailable(format!(
                    "metadata token expires_in out of range: {}",
                    parsed.expires_in
                ))
            })?;

        *self.cached_bearer.write().await = Some(CachedBearer {
            token: token.clone(),
            expires_at,
        });
        Ok(token)
    }

    async fn authorized(&self, request: HttpRequest) -> Result<HttpResponse, StorageError> {
        let bearer = self.bearer().await?;
        let request = request.header(
            "authorization",
            format!("Bearer {}", bearer.expose_secret()),
        );
        self.send(request).await
    }

    async fn add_version(&self, name: &str, payload: &str) -> Result<HttpResponse, StorageError> {
        let data = base64::engine::general_purpose::STANDARD.encode(payload);
        let body = serde_json::json!({ "payload": { "data": data } });
        let url = format!("{}:addVersion", self.secret_url(name));
        self.authorized(HttpRequest::json_post(url, &body, self.timeout))
            .await
    }

    async fn create_secret(&self, name: &str) -> Result<(), StorageError> {
        let url = format!(
            "{}/projects/{}/secrets?secretId={}",
            self.endpoint, self.project_id, name
        );
        let body = serde_json::json!({ "replication": { "automatic": {} } });
        let response = self
            .authorized(HttpRequest::json_post(url, &body, self.timeout))
            .await?;

        // 409: another process created it first.
        if response.is_success() || response.status == 409 {
            Ok(())
        } else {
            Err(Self::unavailable(format!(
                "creating secret {} returned HTTP {}",
                name, response.status
            )))
        }
    }
}

#[async_trait]
impl SecretBackend for SecretManagerBackend {
    fn is_configured(&self) -> bool {
        true
    }

    async fn get(&self, name: &str) -> Result<Option<String>, StorageError> {
        let url = format!("{}/versions/latest:access", self.secret_url(name));
        let response = self
            .authorized(HttpRequest::get(url, self.timeout))
            .await?;

        if response.status == 404 {
            return Ok(None);
        }
        if !response.is_success() {
            return Err(Self::unavailable(format!(
                "reading secret {} returned HTTP {}",
                name, response.status
            )));
        }

        let parsed: AccessSecretVersionResponse =
            serde_json::from_str(&response.body).map_err(|e| StorageError::Corrupted {
                message: format!("invalid secret version response: {}", e),
            })?;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(parsed.payload.data.as_bytes())
            .map_err(|e| StorageError::Corrupted {
                message: format!("invalid secret payload encoding: {}", e),
            })?;
        let payload = String::from_utf8(bytes).map_err(|e| StorageError::Corrupted {
            message: format!("secret payload is not UTF-8: {}", e),
        })?;

        Ok(Some(payload))
    }

    async fn put(&self, name: &str, payload: &str) -> Result<(), StorageError> {
        let mut response = self.add_version(name, payload).await?;
        if response.status == 404 {
            self.create_secret(name).await?;
            response = self.add_version(name, payload).await?;
        }

        if response.is_success() {
            Ok(())
        } else {
            Err(Self::unavailable(format!(
                "writing secret {} returned HTTP {}",
                name, response.status
            )))
        }
    }
}
