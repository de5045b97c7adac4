//! Fleet API Credential Lifecycle
//!
//! Keeps the OAuth2 credential for the vehicle Fleet API valid across
//! restarts and across the processes sharing it.
//!
//! # Features
//!
//! - Authorization URL generation and authorization-code exchange
//! - Proactive refresh with a safety margin before expiry
//! - Single-flight refresh per credential, shared by concurrent callers
//! - Persistence to a local file and Google Cloud Secret Manager
//! - Migration of the legacy bare refresh-token format
//!
//! # Example
//!
//! ```rust,ignore
//! use fleet_auth_integration::{FleetAuthClient, CredentialErrorKind};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // CLIENT_ID, CLIENT_SECRET, DOMAIN and optionally CLOUD_PROJECT_ID
//!     let client = FleetAuthClient::from_env()?;
//!
//!     match client.ensure_valid_token().await {
//!         Ok(token) => println!("Authorization: {}", token.authorization_header()),
//!         Err(e) if e.kind() == CredentialErrorKind::ReauthorizationRequired => {
//!             let auth_url = client.authorization_url(Default::default());
//!             println!("Re-authorize at: {}", auth_url.url);
//!         }
//!         Err(e) => return Err(e.into()),
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - `types`: token record, legacy format, configuration types
//! - `error`: error hierarchy; callers of the manager only see `CredentialError`
//! - `core`: HTTP transport and per-attempt transport acquisition
//! - `storage`: local file store and secret backends
//! - `token`: token endpoint client, merged token store, lifecycle manager
//! - `flows`: authorization URL construction
//! - `resilience`: backoff for transient refresh failures
//! - `telemetry`: structured logging
//! - `builders`: configuration builder and environment loading
//! - `client`: high-level client combining all of the above

pub mod builders;
pub mod client;
pub mod core;
pub mod error;
pub mod flows;
pub mod resilience;
pub mod storage;
pub mod telemetry;
pub mod token;
pub mod types;

// Re-export main client
pub use client::{fleet_auth_client, FleetAuthClient};

// Re-export builders
pub use builders::{fleet_auth_config, FleetAuthConfigBuilder};

// Re-export errors
pub use error::{
    get_user_message, map_refresh_status, parse_error_response, AuthExchangeError,
    ConfigurationError, CredentialError, CredentialErrorKind, FleetAuthError, FleetAuthResult,
    NetworkError, OAuth2ErrorResponse, ProtocolError, RefreshError, StorageError,
    TransportError,
};

// Re-export types
pub use types::{
    // Config
    redirect_uri_for_domain, ClientCredentials, FleetAuthConfig, GrantType, ProviderConfig,
    StorageConfig,
    // Token
    AccessToken, LegacyTokenRecord, StoredCredential, TokenRecord, TokenResponse,
    // Auth
    AuthorizationParams, AuthorizationUrl,
};

// Re-export core components
pub use crate::core::{
    HttpMethod, HttpRequest, HttpResponse, HttpTransport, MockHttpTransport,
    MockTransportFactory, ReqwestHttpTransport, ReqwestTransportFactory, SharedTransportFactory,
    TransportFactory,
};

// Re-export storage
pub use storage::{
    CloudSecretStore, CredentialStore, DisabledSecretBackend, LocalFileStore, MockSecretBackend,
    SecretBackend, SecretManagerBackend, StoreKind,
};

// Re-export token management
pub use token::{
    CredentialState, DefaultTokenRefresher, LifecycleConfig, LoadedRecord, MockTokenRefresher,
    TokenLifecycleManager, TokenRefresher, TokenStore,
};

// Re-export resilience
pub use resilience::{RetryConfig, RetryExecutor};

// Re-export telemetry
pub use telemetry::{CredentialLogContext, InMemoryLogger, LogLevel, Logger, TracingLogger};
