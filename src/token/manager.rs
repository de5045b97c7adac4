//! Token Lifecycle Manager
//!
//! Decides whether the stored credential is usable, refreshes it when it is
//! not, and serializes refreshes so concurrent callers share one exchange.
//!
//! Refresh tokens may be single-use. Two concurrent refreshes with the same
//! token can invalidate each other, so every refresh happens under a
//! per-credential async mutex and waiting callers re-check the stored record
//! once they acquire it.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;

use super::refresher::TokenRefresher;
use super::store::{LoadedRecord, TokenStore};
use crate::error::{CredentialError, RefreshError, StorageError};
use crate::resilience::{RetryConfig, RetryExecutor};
use crate::storage::StoreKind;
use crate::telemetry::{CredentialLogContext, Logger, TracingLogger};
use crate::types::{AccessToken, FleetAuthConfig, TokenRecord, DEFAULT_SAFETY_MARGIN_SECS};

/// Observable state of the managed credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialState {
    /// Nothing read from storage yet.
    Unloaded,
    /// A record is held in memory.
    Loaded { valid: bool },
    /// A refresh exchange is in flight.
    Refreshing,
    /// The refresh token was rejected. Only a new authorization recovers.
    Failed,
}

/// Lifecycle manager configuration.
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// Tokens closer than this to expiry are refreshed.
    pub safety_margin: Duration,
    /// Backoff for transient refresh failures.
    pub retry: RetryConfig,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            safety_margin: Duration::from_secs(DEFAULT_SAFETY_MARGIN_SECS),
            retry: RetryConfig::default(),
        }
    }
}

impl From<&FleetAuthConfig> for LifecycleConfig {
    fn from(config: &FleetAuthConfig) -> Self {
        Self {
            safety_margin: config.safety_margin,
            retry: config.retry.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resolution {
    Cached,
    Refreshed,
}

struct Inner {
    record: Option<TokenRecord>,
    state: CredentialState,
    /// Refresh token last rejected by the token endpoint.
    rejected_refresh_token: Option<String>,
    /// `record` is newer than anything the store holds.
    unpersisted: bool,
}

/// Owns one credential for the lifetime of a process.
pub struct TokenLifecycleManager {
    store: Arc<TokenStore>,
    refresher: Arc<dyn TokenRefresher>,
    retry: RetryExecutor,
    safety_margin: chrono::Duration,
    logger: Arc<dyn Logger>,
    inner: Mutex<Inner>,
    refresh_lock: tokio::sync::Mutex<()>,
}

impl TokenLifecycleManager {
    /// Create new lifecycle manager.
    pub fn new(
        store: Arc<TokenStore>,
        refresher: Arc<dyn TokenRefresher>,
        config: LifecycleConfig,
    ) -> Self {
        let safety_margin = chrono::Duration::from_std(config.safety_margin)
            .unwrap_or_else(|_| chrono::Duration::seconds(DEFAULT_SAFETY_MARGIN_SECS as i64));

        Self {
            store,
            refresher,
            retry: RetryExecutor::new(config.retry),
            safety_margin,
            logger: Arc::new(TracingLogger::new()),
            inner: Mutex::new(Inner {
                record: None,
                state: CredentialState::Unloaded,
                rejected_refresh_token: None,
                unpersisted: false,
            }),
            refresh_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn with_logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = logger;
        self
    }

    /// Current state.
    pub fn state(&self) -> CredentialState {
        self.inner().state
    }

    /// Store backing this manager.
    pub fn store(&self) -> &TokenStore {
        &self.store
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn context(operation: &str) -> CredentialLogContext {
        CredentialLogContext::new().operation(operation)
    }

    /// In-memory token, if it is still usable.
    fn cached_token(&self) -> Option<AccessToken> {
        let inner = self.inner();
        inner
            .record
            .as_ref()
            .filter(|record| record.is_usable_at(Utc::now(), self.safety_margin))
            .map(AccessToken::from)
    }

    /// Return a usable access token, refreshing the stored credential if it
    /// expires within the safety margin.
    pub async fn ensure_valid_token(&self) -> Result<AccessToken, CredentialError> {
        if let Some(token) = self.cached_token() {
            self.logger
                .debug("Using cached access token", &Self::context("ensure_valid_token"));
            return Ok(token);
        }

        let _refresh = self.refresh_lock.lock().await;

        // Whoever held the lock before us may have refreshed already.
        if let Some(token) = self.cached_token() {
            return Ok(token);
        }

        let loaded = self.load().await?;
        let (record, _) = self.resolve(loaded, "ensure_valid_token").await?;
        Ok(AccessToken::from(&record))
    }

    /// [`ensure_valid_token`](Self::ensure_valid_token) bounded by `timeout`.
    ///
    /// On timeout the in-flight call is dropped and the refresh slot is
    /// released.
    pub async fn ensure_valid_token_within(
        &self,
        timeout: Duration,
    ) -> Result<AccessToken, CredentialError> {
        match tokio::time::timeout(timeout, self.ensure_valid_token()).await {
            Ok(result) => result,
            Err(_) => {
                self.logger.warn(
                    &format!("Gave up waiting for a valid token after {:?}", timeout),
                    &Self::context("ensure_valid_token"),
                );
                Err(CredentialError::unavailable(format!(
                    "no valid token within {:?}",
                    timeout
                )))
            }
        }
    }

    /// Like [`ensure_valid_token`](Self::ensure_valid_token), but always
    /// re-reads storage and makes sure the record in use is the one held by
    /// the secret backend, so every process converges on the same refresh
    /// token. Degrades to the local record when the backend is unreachable.
    pub async fn ensure_centralized_tokens(&self) -> Result<AccessToken, CredentialError> {
        let _refresh = self.refresh_lock.lock().await;

        let loaded = self.load().await?;
        let source = loaded.source;
        let (record, resolution) = self.resolve(loaded, "ensure_centralized_tokens").await?;

        let needs_publish = resolution == Resolution::Cached
            && source != StoreKind::CloudSecret
            && self.store.is_secret_enabled();

        if needs_publish {
            let context =
                Self::context("ensure_centralized_tokens").store(StoreKind::CloudSecret.as_str());
            match self.store.publish(&record).await {
                Ok(()) => self
                    .logger
                    .info("Published local credential to secret backend", &context),
                Err(e) => self.logger.warn(
                    &format!("Secret backend unreachable, continuing with local credential: {}", e),
                    &context,
                ),
            }
        }

        Ok(AccessToken::from(&record))
    }

    /// Persist a record obtained outside the manager, typically from an
    /// authorization-code exchange, and clear any failed state.
    ///
    /// The record is held in memory even when persisting it fails, so the
    /// single-use authorization code it came from is not wasted.
    pub async fn install(&self, record: TokenRecord) -> Result<(), StorageError> {
        let _refresh = self.refresh_lock.lock().await;

        let saved = self.store.save(&record).await;

        let valid = record.is_usable_at(Utc::now(), self.safety_margin);
        {
            let mut inner = self.inner();
            inner.record = Some(record);
            inner.state = CredentialState::Loaded { valid };
            inner.rejected_refresh_token = None;
            inner.unpersisted = saved.is_err();
        }

        match saved {
            Ok(()) => {
                self.logger
                    .info("Installed new credential", &Self::context("install"));
                Ok(())
            }
            Err(e) => {
                self.logger.error(
                    &format!("New credential held in memory only, persisting failed: {}", e),
                    &Self::context("install").store(StoreKind::LocalFile.as_str()),
                );
                Err(e)
            }
        }
    }

    async fn load(&self) -> Result<LoadedRecord, CredentialError> {
        let error = match self.store.load().await {
            Ok(loaded) => return Ok(loaded),
            Err(e) => e,
        };

        // Installed or refreshed but never persisted.
        if let Some(record) = self.inner().record.clone() {
            self.logger.warn(
                &format!("Storage has no usable credential, using in-memory record: {}", error),
                &Self::context("load"),
            );
            return Ok(LoadedRecord {
                record,
                source: StoreKind::LocalFile,
                migrated: false,
            });
        }

        match error {
            StorageError::NotFound => Err(CredentialError::reauthorization_required(
                "no stored credential, run the authorization flow",
            )),
            e => Err(CredentialError::unavailable(e.to_string())),
        }
    }

    /// Turn a loaded record into a usable one. Called with the refresh lock held.
    async fn resolve(
        &self,
        loaded: LoadedRecord,
        operation: &str,
    ) -> Result<(TokenRecord, Resolution), CredentialError> {
        let mut record = loaded.record;

        // A refreshed record whose save failed is newer than anything stored.
        {
            let inner = self.inner();
            if let Some(held) = inner.record.as_ref().filter(|_| inner.unpersisted) {
                if held.expires_at > record.expires_at {
                    record = held.clone();
                }
            }
        }

        if record.is_usable_at(Utc::now(), self.safety_margin) {
            {
                let mut inner = self.inner();
                inner.record = Some(record.clone());
                inner.state = CredentialState::Loaded { valid: true };
            }
            self.logger.debug(
                "Stored credential still valid",
                &Self::context(operation)
                    .store(loaded.source.as_str())
                    .extra("expires_at", record.expires_at.to_rfc3339()),
            );
            return Ok((record, Resolution::Cached));
        }

        {
            let mut inner = self.inner();
            if inner.state == CredentialState::Failed
                && inner.rejected_refresh_token.is_some()
                && inner.rejected_refresh_token == record.refresh_token
            {
                return Err(CredentialError::reauthorization_required(
                    "stored refresh token was rejected, run the authorization flow",
                ));
            }
            if inner.state != CredentialState::Failed {
                inner.state = CredentialState::Loaded { valid: false };
            }
        }

        let Some(refresh_token) = record.refresh_token.clone().filter(|t| !t.is_empty()) else {
            self.inner().state = CredentialState::Failed;
            return Err(CredentialError::reauthorization_required(
                "stored credential has no refresh token",
            ));
        };

        if loaded.migrated {
            self.logger.info(
                "Refreshing migrated legacy credential",
                &Self::context(operation).store(loaded.source.as_str()),
            );
        }

        let record = self.refresh(&record, &refresh_token, operation).await?;
        Ok((record, Resolution::Refreshed))
    }

    async fn refresh(
        &self,
        previous: &TokenRecord,
        refresh_token: &str,
        operation: &str,
    ) -> Result<TokenRecord, CredentialError> {
        let slot = RefreshSlot::enter(self);
        self.logger
            .info("Refreshing access token", &Self::context(operation));

        let refresher = &self.refresher;
        let logger = &self.logger;
        let result = self
            .retry
            .execute(move |attempt| async move {
                if attempt > 0 {
                    logger.warn(
                        "Retrying token refresh after transient failure",
                        &Self::context("refresh").extra("attempt", attempt + 1),
                    );
                }
                refresher.refresh(refresh_token).await
            })
            .await;

        match result {
            Ok(fresh) => {
                let record = fresh.inherit_refresh_token(previous);
                let saved = self.store.save(&record).await;

                {
                    let mut inner = self.inner();
                    inner.record = Some(record.clone());
                    inner.rejected_refresh_token = None;
                    inner.unpersisted = saved.is_err();
                }
                slot.finish(CredentialState::Loaded { valid: true });

                match saved {
                    Ok(()) => {
                        self.logger.info(
                            "Access token refreshed",
                            &Self::context(operation).extra("expires_at", record.expires_at),
                        );
                        Ok(record)
                    }
                    Err(e) => {
                        self.logger.error(
                            &format!("Refreshed credential could not be persisted: {}", e),
                            &Self::context(operation).store(StoreKind::LocalFile.as_str()),
                        );
                        Err(CredentialError::unavailable(format!(
                            "refreshed credential could not be persisted: {}",
                            e
                        )))
                    }
                }
            }
            Err(error @ RefreshError::Expired { .. }) => {
                self.inner().rejected_refresh_token = Some(refresh_token.to_string());
                slot.finish(CredentialState::Failed);
                self.logger.error(
                    &format!("Refresh token rejected, re-authorization required: {}", error),
                    &Self::context(operation),
                );
                Err(error.into())
            }
            Err(error) => {
                self.logger.warn(
                    &format!("Token refresh failed, giving up for now: {}", error),
                    &Self::context(operation),
                );
                Err(error.into())
            }
        }
    }
}

/// Marks the credential as refreshing until dropped.
///
/// Dropping without [`finish`](Self::finish), including when the caller's
/// future is cancelled, restores the pre-refresh state.
struct RefreshSlot<'a> {
    manager: &'a TokenLifecycleManager,
    previous: CredentialState,
    outcome: Option<CredentialState>,
}

impl<'a> RefreshSlot<'a> {
    fn enter(manager: &'a TokenLifecycleManager) -> Self {
        let mut inner = manager.inner();
        let previous = inner.state;
        inner.state = CredentialState::Refreshing;
        drop(inner);

        Self {
            manager,
            previous,
            outcome: None,
        }
    }

    fn finish(mut self, state: CredentialState) {
        self.outcome = Some(state);
    }
}

impl Drop for RefreshSlot<'_> {
    fn drop(&mut self) {
        let state = self.outcome.unwrap_or(self.previous);
        self.manager.inner().state = state;
    }
}
