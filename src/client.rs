//! Fleet Auth Client
//!
//! High-level client wiring configuration, stores, refresher and lifecycle
//! manager together.

use std::sync::Arc;

use crate::builders::FleetAuthConfigBuilder;
use crate::core::{ReqwestTransportFactory, TransportFactory};
use crate::error::{CredentialError, FleetAuthResult};
use crate::flows::build_authorization_url;
use crate::storage::{
    CloudSecretStore, DisabledSecretBackend, LocalFileStore, SecretBackend, SecretManagerBackend,
};
use crate::telemetry::{Logger, TracingLogger};
use crate::token::{
    DefaultTokenRefresher, LifecycleConfig, TokenLifecycleManager, TokenRefresher, TokenStore,
};
use crate::types::{AccessToken, AuthorizationParams, AuthorizationUrl, FleetAuthConfig};

/// Fleet API credential client. One instance per process and credential.
pub struct FleetAuthClient {
    config: FleetAuthConfig,
    refresher: Arc<dyn TokenRefresher>,
    manager: Arc<TokenLifecycleManager>,
}

impl FleetAuthClient {
    /// Create a client with the default reqwest transport and, when a cloud
    /// project is configured, the Secret Manager backend.
    pub fn new(config: FleetAuthConfig) -> Self {
        let transports: Arc<dyn TransportFactory> =
            Arc::new(ReqwestTransportFactory::new(config.timeout));

        let secret_backend: Arc<dyn SecretBackend> = match SecretManagerBackend::from_config(
            &config.storage,
            transports.clone(),
            config.timeout,
        ) {
            Some(backend) => Arc::new(backend),
            None => Arc::new(DisabledSecretBackend),
        };
        let refresher = Arc::new(DefaultTokenRefresher::new(config.clone(), transports));

        Self::with_components(config, refresher, secret_backend, Arc::new(TracingLogger::new()))
    }

    /// Create a client from the process environment.
    pub fn from_env() -> FleetAuthResult<Self> {
        let config = FleetAuthConfigBuilder::from_env().build()?;
        Ok(Self::new(config))
    }

    /// Create a client with custom components.
    pub fn with_components(
        config: FleetAuthConfig,
        refresher: Arc<dyn TokenRefresher>,
        secret_backend: Arc<dyn SecretBackend>,
        logger: Arc<dyn Logger>,
    ) -> Self {
        let store = TokenStore::new(
            LocalFileStore::new(config.storage.token_file.clone()),
            CloudSecretStore::new(
                secret_backend,
                config.storage.record_secret_name.clone(),
                config.storage.refresh_token_secret_name.clone(),
            ),
        )
        .with_logger(logger.clone());

        let manager = TokenLifecycleManager::new(
            Arc::new(store),
            refresher.clone(),
            LifecycleConfig::from(&config),
        )
        .with_logger(logger);

        Self {
            config,
            refresher,
            manager: Arc::new(manager),
        }
    }

    /// Get the configuration.
    pub fn config(&self) -> &FleetAuthConfig {
        &self.config
    }

    /// Lifecycle manager, shareable across tasks.
    pub fn manager(&self) -> Arc<TokenLifecycleManager> {
        self.manager.clone()
    }

    /// URL an operator opens to authorize the application.
    pub fn authorization_url(&self, params: AuthorizationParams) -> AuthorizationUrl {
        build_authorization_url(&self.config, params)
    }

    /// Exchange the code from the authorization redirect and persist the
    /// resulting credential.
    ///
    /// A storage error means the credential is in use by this client but was
    /// not persisted.
    pub async fn exchange_code(&self, code: &str) -> FleetAuthResult<AccessToken> {
        let record = self.refresher.exchange_code(code).await?;
        let token = AccessToken::from(&record);
        self.manager.install(record).await?;
        Ok(token)
    }

    /// See [`TokenLifecycleManager::ensure_valid_token`].
    pub async fn ensure_valid_token(&self) -> Result<AccessToken, CredentialError> {
        self.manager.ensure_valid_token().await
    }

    /// See [`TokenLifecycleManager::ensure_centralized_tokens`].
    pub async fn ensure_centralized_tokens(&self) -> Result<AccessToken, CredentialError> {
        self.manager.ensure_centralized_tokens().await
    }
}

/// Create a client with default components.
pub fn fleet_auth_client(config: FleetAuthConfig) -> FleetAuthClient {
    FleetAuthClient::new(config)
}
