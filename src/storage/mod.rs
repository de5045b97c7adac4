//! Credential Storage
//!
//! The two places a [`TokenRecord`] is persisted: a local JSON file and a
//! cloud secret store. Both decode what they read into a [`StoredCredential`]
//! so legacy values are recognized at the boundary.

use async_trait::async_trait;

use crate::error::StorageError;
use crate::types::{StoredCredential, TokenRecord};

pub mod local;
pub mod secret;
pub mod secret_manager;

pub use local::LocalFileStore;
pub use secret::{CloudSecretStore, DisabledSecretBackend, MockSecretBackend, SecretBackend};
pub use secret_manager::{SecretManagerBackend, METADATA_TOKEN_URL};

/// Which backing store a value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    LocalFile,
    CloudSecret,
}

impl StoreKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LocalFile => "local_file",
            Self::CloudSecret => "cloud_secret",
        }
    }
}

impl std::fmt::Display for StoreKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A store holding the full credential record.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Which store this is.
    fn kind(&self) -> StoreKind;

    /// Disabled stores are skipped by the token store.
    fn is_enabled(&self) -> bool {
        true
    }

    /// Read and decode the stored value. `Ok(None)` when nothing is stored.
    async fn load(&self) -> Result<Option<StoredCredential>, StorageError>;

    /// Replace the stored value with `record`.
    async fn save(&self, record: &TokenRecord) -> Result<(), StorageError>;
}
