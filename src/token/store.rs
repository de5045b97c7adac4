//! Token Store
//!
//! Combines the local file and the cloud secret into one logical store.
//!
//! Reads prefer the secret backend, which is shared by every process. Writes
//! must reach the local file; the secret backend is written best-effort.

use std::sync::Arc;

use chrono::Utc;

use crate::error::StorageError;
use crate::storage::{CloudSecretStore, CredentialStore, LocalFileStore, StoreKind};
use crate::telemetry::{CredentialLogContext, Logger, TracingLogger};
use crate::types::{LegacyTokenRecord, StoredCredential, TokenRecord};

/// A record read from one of the stores.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedRecord {
    pub record: TokenRecord,
    /// Store the value was read from.
    pub source: StoreKind,
    /// The refresh token came from a legacy bare-token value. The record is
    /// already expired and must be refreshed before it is used.
    pub migrated: bool,
}

/// Merged view over [`LocalFileStore`] and [`CloudSecretStore`].
pub struct TokenStore {
    local: LocalFileStore,
    secret: CloudSecretStore,
    logger: Arc<dyn Logger>,
}

impl TokenStore {
    pub fn new(local: LocalFileStore, secret: CloudSecretStore) -> Self {
        Self {
            local,
            secret,
            logger: Arc::new(TracingLogger::new()),
        }
    }

    pub fn with_logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn local(&self) -> &LocalFileStore {
        &self.local
    }

    pub fn secret(&self) -> &CloudSecretStore {
        &self.secret
    }

    /// Whether the secret backend takes part in reads and writes.
    pub fn is_secret_enabled(&self) -> bool {
        self.secret.is_enabled()
    }

    fn context(operation: &str, store: StoreKind) -> CredentialLogContext {
        CredentialLogContext::new()
            .operation(operation)
            .store(store.as_str())
    }

    /// Load the freshest available record.
    ///
    /// Precedence: secret record, local record, secret bare refresh token,
    /// local legacy value. A local record whose refresh token differs from
    /// the secret's bare token yields to the secret's token. Secret backend
    /// failures degrade to the local file and local read failures count as
    /// absent. Nothing is written except the local cache when it lags behind
    /// the secret record.
    pub async fn load(&self) -> Result<LoadedRecord, StorageError> {
        let mut secret_reachable = self.secret.is_enabled();
        let mut secret_legacy: Option<LegacyTokenRecord> = None;

        if secret_reachable {
            match self.secret.load().await {
                Ok(Some(StoredCredential::Current(record))) => {
                    self.sync_local_cache(&record).await;
                    return Ok(LoadedRecord {
                        record,
                        source: StoreKind::CloudSecret,
                        migrated: false,
                    });
                }
                Ok(Some(StoredCredential::Legacy(legacy))) => secret_legacy = Some(legacy),
                Ok(None) => {}
                Err(e) => {
                    self.logger.warn(
                        &format!("Secret backend unavailable, falling back to local file: {}", e),
                        &Self::context("load", StoreKind::CloudSecret),
                    );
                    secret_reachable = false;
                }
            }
        }

        let local = match self.local.load().await {
            Ok(value) => value,
            Err(e) => {
                self.logger.warn(
                    &format!("Ignoring unreadable local token file: {}", e),
                    &Self::context("load", StoreKind::LocalFile),
                );
                None
            }
        };

        let local_legacy = match local {
            Some(StoredCredential::Current(record)) => {
                if secret_legacy.is_none() && secret_reachable {
                    secret_legacy = self.read_secondary().await;
                }
                return Ok(self.prefer_secret_refresh_token(record, secret_legacy));
            }
            Some(StoredCredential::Legacy(legacy)) => Some(legacy),
            None => None,
        };

        if secret_legacy.is_none() && secret_reachable {
            secret_legacy = self.read_secondary().await;
        }

        let (legacy, source) = match (secret_legacy, local_legacy) {
            (Some(legacy), _) => (legacy, StoreKind::CloudSecret),
            (None, Some(legacy)) => (legacy, StoreKind::LocalFile),
            (None, None) => return Err(StorageError::NotFound),
        };

        self.logger.info(
            "Found legacy refresh token, migrating to token record",
            &Self::context("migrate", source),
        );
        Ok(LoadedRecord {
            record: TokenRecord::from_legacy(legacy, Utc::now()),
            source,
            migrated: true,
        })
    }

    async fn read_secondary(&self) -> Option<LegacyTokenRecord> {
        match self.secret.load_secondary().await {
            Ok(value) => value,
            Err(e) => {
                self.logger.warn(
                    &format!("Could not read legacy refresh token secret: {}", e),
                    &Self::context("load", StoreKind::CloudSecret),
                );
                None
            }
        }
    }

    /// The secret backend's refresh token beats the local cache: a legacy
    /// consumer may have rotated it. The local access token belongs to the
    /// old refresh token, so the merged record is marked expired.
    fn prefer_secret_refresh_token(
        &self,
        local: TokenRecord,
        secret: Option<LegacyTokenRecord>,
    ) -> LoadedRecord {
        match secret {
            Some(legacy)
                if local.refresh_token.as_deref() != Some(legacy.refresh_token.as_str()) =>
            {
                self.logger.info(
                    "Secret backend holds a newer refresh token than the local file",
                    &Self::context("load", StoreKind::CloudSecret),
                );
                let migrated = TokenRecord::from_legacy(legacy, Utc::now());
                LoadedRecord {
                    record: TokenRecord {
                        access_token: local.access_token,
                        ..migrated
                    },
                    source: StoreKind::CloudSecret,
                    migrated: true,
                }
            }
            _ => LoadedRecord {
                record: local,
                source: StoreKind::LocalFile,
                migrated: false,
            },
        }
    }

    async fn sync_local_cache(&self, record: &TokenRecord) {
        if let Ok(Some(StoredCredential::Current(cached))) = self.local.load().await {
            if &cached == record {
                return;
            }
        }
        if let Err(e) = self.local.save(record).await {
            self.logger.warn(
                &format!("Could not update local token cache: {}", e),
                &Self::context("load", StoreKind::LocalFile),
            );
        }
    }

    /// Persist `record` everywhere.
    ///
    /// Fails only when the local write fails. Secret backend failures are
    /// logged.
    pub async fn save(&self, record: &TokenRecord) -> Result<(), StorageError> {
        record.validate()?;
        self.local.save(record).await?;

        if self.secret.is_enabled() {
            if let Err(e) = self.write_secrets(record).await {
                self.logger.warn(
                    &format!("Token saved locally only, secret backend write failed: {}", e),
                    &Self::context("save", StoreKind::CloudSecret),
                );
            }
        }
        Ok(())
    }

    /// Write `record` to the secret backend only.
    pub async fn publish(&self, record: &TokenRecord) -> Result<(), StorageError> {
        if !self.secret.is_enabled() {
            return Err(StorageError::Unavailable {
                store: StoreKind::CloudSecret.to_string(),
                message: "secret backend is not configured".to_string(),
            });
        }
        record.validate()?;
        self.write_secrets(record).await
    }

    async fn write_secrets(&self, record: &TokenRecord) -> Result<(), StorageError> {
        self.secret.save(record).await?;

        if let Some(refresh_token) = record.refresh_token.as_deref().filter(|t| !t.is_empty()) {
            if let Err(e) = self.secret.save_secondary(refresh_token).await {
                self.logger.warn(
                    &format!("Could not update legacy refresh token secret: {}", e),
                    &Self::context("save", StoreKind::CloudSecret),
                );
            }
        }
        Ok(())
    }
}
