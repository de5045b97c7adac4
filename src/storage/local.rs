//! Local File Store
//!
//! Keeps the record in a JSON file readable only by the owner. Every write
//! goes to its own sibling temp file which is then renamed over the target,
//! so readers in any process see either the old or the new record.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

use super::{CredentialStore, StoreKind};
use crate::error::StorageError;
use crate::types::{StoredCredential, TokenRecord};

/// File-backed credential store.
#[derive(Debug, Clone)]
pub struct LocalFileStore {
    path: PathBuf,
}

impl LocalFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Unique per write, so concurrent writers on the host never share one.
    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "fleet_tokens.json".into());
        name.push(format!(
            ".{}.{:016x}.tmp",
            std::process::id(),
            rand::random::<u64>()
        ));
        self.path.with_file_name(name)
    }

    fn io_error(&self, error: std::io::Error) -> StorageError {
        StorageError::Io {
            path: self.path.display().to_string(),
            message: error.to_string(),
        }
    }

    async fn write_atomic(&self, contents: &str) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.io_error(e))?;
        }

        let temp = self.temp_path();
        let written = match write_new_file(&temp, contents).await {
            Ok(()) => tokio::fs::rename(&temp, &self.path).await,
            Err(e) => Err(e),
        };

        if let Err(e) = written {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(self.io_error(e));
        }
        Ok(())
    }
}

/// Create `path` (owner-only on unix) and write `contents` to disk. Fails if
/// `path` already exists.
async fn write_new_file(path: &Path, contents: &str) -> std::io::Result<()> {
    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = options.open(path).await?;
    file.write_all(contents.as_bytes()).await?;
    file.sync_all().await
}

#[async_trait]
impl CredentialStore for LocalFileStore {
    fn kind(&self) -> StoreKind {
        StoreKind::LocalFile
    }

    async fn load(&self) -> Result<Option<StoredCredential>, StorageError> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.io_error(e)),
        };
        StoredCredential::decode(&raw).map(Some)
    }

    async fn save(&self, record: &TokenRecord) -> Result<(), StorageError> {
        record.validate()?;
        self.write_atomic(&record.to_json()?).await
    }
}
