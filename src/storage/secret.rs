//! Secret Backend
//!
//! Durable key/value secret storage shared by every process using the
//! credential. The backend is the source of truth; the local file is a cache.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use super::{CredentialStore, StoreKind};
use crate::error::StorageError;
use crate::types::{LegacyTokenRecord, StoredCredential, TokenRecord};

/// Raw secret storage addressed by logical name.
#[async_trait]
pub trait SecretBackend: Send + Sync {
    /// An unconfigured backend is skipped entirely.
    fn is_configured(&self) -> bool;

    /// Latest value stored under `name`.
    async fn get(&self, name: &str) -> Result<Option<String>, StorageError>;

    /// Store a new value under `name`, replacing the previous one.
    async fn put(&self, name: &str, payload: &str) -> Result<(), StorageError>;
}

/// Backend used when no cloud project is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledSecretBackend;

#[async_trait]
impl SecretBackend for DisabledSecretBackend {
    fn is_configured(&self) -> bool {
        false
    }

    async fn get(&self, _name: &str) -> Result<Option<String>, StorageError> {
        Ok(None)
    }

    async fn put(&self, _name: &str, _payload: &str) -> Result<(), StorageError> {
        Ok(())
    }
}

/// Mock secret backend for testing.
#[derive(Default)]
pub struct MockSecretBackend {
    secrets: Mutex<HashMap<String, String>>,
    put_history: Mutex<Vec<(String, String)>>,
    get_history: Mutex<Vec<String>>,
    unreachable: AtomicBool,
}

impl MockSecretBackend {
    /// Create new mock secret backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a value without recording a put.
    pub fn insert(&self, name: impl Into<String>, payload: impl Into<String>) -> &Self {
        self.secrets
            .lock()
            .unwrap()
            .insert(name.into(), payload.into());
        self
    }

    /// Make every call fail with [`StorageError::Unavailable`].
    pub fn set_unreachable(&self, unreachable: bool) -> &Self {
        self.unreachable.store(unreachable, Ordering::SeqCst);
        self
    }

    /// Current value of a secret.
    pub fn value(&self, name: &str) -> Option<String> {
        self.secrets.lock().unwrap().get(name).cloned()
    }

    /// All successful puts, in order.
    pub fn get_puts(&self) -> Vec<(String, String)> {
        self.put_history.lock().unwrap().clone()
    }

    /// Names read so far, in order.
    pub fn get_reads(&self) -> Vec<String> {
        self.get_history.lock().unwrap().clone()
    }

    fn check_reachable(&self) -> Result<(), StorageError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable {
                store: StoreKind::CloudSecret.to_string(),
                message: "mock backend unreachable".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl SecretBackend for MockSecretBackend {
    fn is_configured(&self) -> bool {
        true
    }

    async fn get(&self, name: &str) -> Result<Option<String>, StorageError> {
        self.check_reachable()?;
        self.get_history.lock().unwrap().push(name.to_string());
        Ok(self.value(name))
    }

    async fn put(&self, name: &str, payload: &str) -> Result<(), StorageError> {
        self.check_reachable()?;
        self.put_history
            .lock()
            .unwrap()
            .push((name.to_string(), payload.to_string()));
        self.secrets
            .lock()
            .unwrap()
            .insert(name.to_string(), payload.to_string());
        Ok(())
    }
}

/// Credential store over a [`SecretBackend`].
///
/// The full record lives under the primary name. The bare refresh token is
/// mirrored under the secondary name for consumers that only understand the
/// legacy format.
#[derive(Clone)]
pub struct CloudSecretStore {
    backend: Arc<dyn SecretBackend>,
    record_name: String,
    refresh_token_name: String,
}

impl CloudSecretStore {
    pub fn new(
        backend: Arc<dyn SecretBackend>,
        record_name: impl Into<String>,
        refresh_token_name: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            record_name: record_name.into(),
            refresh_token_name: refresh_token_name.into(),
        }
    }

    pub fn record_name(&self) -> &str {
        &self.record_name
    }

    pub fn refresh_token_name(&self) -> &str {
        &self.refresh_token_name
    }

    /// Write the bare refresh token under the secondary name.
    pub async fn save_secondary(&self, refresh_token: &str) -> Result<(), StorageError> {
        if refresh_token.is_empty() {
            return Err(StorageError::InvalidRecord {
                message: "refresh_token is empty".to_string(),
            });
        }
        self.backend.put(&self.refresh_token_name, refresh_token).await
    }

    /// Read the bare refresh token from the secondary name.
    pub async fn load_secondary(&self) -> Result<Option<LegacyTokenRecord>, StorageError> {
        let Some(raw) = self.backend.get(&self.refresh_token_name).await? else {
            return Ok(None);
        };
        Ok(match StoredCredential::decode(&raw)? {
            StoredCredential::Legacy(legacy) => Some(legacy),
            StoredCredential::Current(record) => record
                .refresh_token
                .map(|refresh_token| LegacyTokenRecord { refresh_token }),
        })
    }
}

#[async_trait]
impl CredentialStore for CloudSecretStore {
    fn kind(&self) -> StoreKind {
        StoreKind::CloudSecret
    }

    fn is_enabled(&self) -> bool {
        self.backend.is_configured()
    }

    async fn load(&self) -> Result<Option<StoredCredential>, StorageError> {
        match self.backend.get(&self.record_name).await? {
            Some(raw) => StoredCredential::decode(&raw).map(Some),
            None => Ok(None),
        }
    }

    async fn save(&self, record: &TokenRecord) -> Result<(), StorageError> {
        record.validate()?;
        self.backend.put(&self.record_name, &record.to_json()?).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, SubsecRound, Utc};

    fn store(backend: Arc<MockSecretBackend>) -> CloudSecretStore {
        CloudSecretStore::new(backend, "fleet-tokens", "tesla-refresh-token")
    }

    fn record() -> TokenRecord {
        let now = Utc::now().trunc_subsecs(0);
        TokenRecord {
            access_token: "at".to_string(),
            refresh_token: Some("rt".to_string()),
            expires_at: now + Duration::hours(1),
            refresh_token_created_at: now,
        }
    }

    #[tokio::test]
    async fn test_save_and_load_primary() {
        let backend = Arc::new(MockSecretBackend::new());
        let store = store(backend.clone());

        let saved = record();
        store.save(&saved).await.unwrap();

        assert_eq!(
            store.load().await.unwrap(),
            Some(StoredCredential::Current(saved))
        );
        assert_eq!(backend.get_puts()[0].0, "fleet-tokens");
    }

    #[tokio::test]
    async fn test_secondary_holds_bare_token() {
        let backend = Arc::new(MockSecretBackend::new());
        let store = store(backend.clone());

        store.save_secondary("rt-bare").await.unwrap();

        assert_eq!(backend.value("tesla-refresh-token").as_deref(), Some("rt-bare"));
        assert_eq!(
            store.load_secondary().await.unwrap(),
            Some(LegacyTokenRecord {
                refresh_token: "rt-bare".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_unreachable_backend_fails() {
        let backend = Arc::new(MockSecretBackend::new());
        backend.set_unreachable(true);
        let store = store(backend.clone());

        assert!(matches!(
            store.load().await,
            Err(StorageError::Unavailable { .. })
        ));
        assert!(store.save(&record()).await.is_err());
    }

    #[tokio::test]
    async fn test_disabled_backend() {
        let store = CloudSecretStore::new(
            Arc::new(DisabledSecretBackend),
            "fleet-tokens",
            "tesla-refresh-token",
        );

        assert!(!store.is_enabled());
        assert_eq!(store.load().await.unwrap(), None);
        assert_eq!(store.load_secondary().await.unwrap(), None);
    }
}
