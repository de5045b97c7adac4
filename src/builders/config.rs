//! Configuration Builder
//!
//! Fluent builder for [`FleetAuthConfig`], optionally seeded from the
//! process environment.

use secrecy::SecretString;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{ConfigurationError, FleetAuthError};
use crate::resilience::RetryConfig;
use crate::types::{
    redirect_uri_for_domain, ClientCredentials, FleetAuthConfig, ProviderConfig, StorageConfig,
    DEFAULT_SAFETY_MARGIN_SECS, DEFAULT_SCOPES, DEFAULT_TIMEOUT_MS,
};

/// Environment variables read by [`FleetAuthConfigBuilder::from_env`].
pub mod env {
    pub const CLIENT_ID: &str = "CLIENT_ID";
    pub const CLIENT_SECRET: &str = "CLIENT_SECRET";
    pub const DOMAIN: &str = "DOMAIN";
    pub const CLOUD_PROJECT_ID: &str = "CLOUD_PROJECT_ID";
    pub const TOKEN_FILE: &str = "TOKEN_FILE";
    pub const AUTH_URL: &str = "FLEET_AUTH_URL";
    pub const TOKEN_URL: &str = "FLEET_TOKEN_URL";
    pub const AUDIENCE: &str = "FLEET_AUDIENCE";
    pub const SCOPES: &str = "FLEET_SCOPES";
    pub const SECRET_MANAGER_ACCESS_TOKEN: &str = "GOOGLE_OAUTH_ACCESS_TOKEN";
}

/// Fleet API credential configuration builder.
#[derive(Default)]
pub struct FleetAuthConfigBuilder {
    client_id: Option<String>,
    client_secret: Option<SecretString>,
    domain: Option<String>,
    redirect_uri: Option<String>,
    provider: ProviderConfig,
    scopes: Option<Vec<String>>,
    storage: StorageConfig,
    timeout: Option<Duration>,
    safety_margin: Option<Duration>,
    retry: RetryConfig,
}

impl FleetAuthConfigBuilder {
    /// Create new configuration builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the builder from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Seed the builder from an arbitrary key lookup. Empty values count as
    /// unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let mut builder = Self::new();
        if let Some(v) = get(env::CLIENT_ID) {
            builder = builder.client_id(v);
        }
        if let Some(v) = get(env::CLIENT_SECRET) {
            builder = builder.client_secret(v);
        }
        if let Some(v) = get(env::DOMAIN) {
            builder = builder.domain(v);
        }
        if let Some(v) = get(env::CLOUD_PROJECT_ID) {
            builder = builder.project_id(v);
        }
        if let Some(v) = get(env::TOKEN_FILE) {
            builder = builder.token_file(v);
        }
        if let Some(v) = get(env::AUTH_URL) {
            builder = builder.authorization_endpoint(v);
        }
        if let Some(v) = get(env::TOKEN_URL) {
            builder = builder.token_endpoint(v);
        }
        if let Some(v) = get(env::AUDIENCE) {
            builder = builder.audience(v);
        }
        if let Some(v) = get(env::SCOPES) {
            builder = builder.scopes(
                v.split(|c: char| c == ',' || c.is_whitespace())
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect(),
            );
        }
        if let Some(v) = get(env::SECRET_MANAGER_ACCESS_TOKEN) {
            builder = builder.secret_manager_access_token(v);
        }
        builder
    }

    /// Set client ID.
    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Set client secret.
    pub fn client_secret(mut self, client_secret: impl Into<String>) -> Self {
        self.client_secret = Some(SecretString::new(client_secret.into()));
        self
    }

    /// Set the public domain; the redirect URI is derived from it.
    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    /// Set an explicit redirect URI, overriding the domain-derived one.
    pub fn redirect_uri(mut self, redirect_uri: impl Into<String>) -> Self {
        self.redirect_uri = Some(redirect_uri.into());
        self
    }

    /// Set authorization endpoint.
    pub fn authorization_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.provider.authorization_endpoint = endpoint.into();
        self
    }

    /// Set token endpoint.
    pub fn token_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.provider.token_endpoint = endpoint.into();
        self
    }

    /// Set audience.
    pub fn audience(mut self, audience: impl Into<String>) -> Self {
        self.provider.audience = audience.into();
        self
    }

    /// Set requested scopes.
    pub fn scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = Some(scopes);
        self
    }

    /// Set the local record file.
    pub fn token_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.storage.token_file = path.into();
        self
    }

    /// Enable the secret backend for a Google Cloud project.
    pub fn project_id(mut self, project_id: impl Into<String>) -> Self {
        self.storage.project_id = Some(project_id.into());
        self
    }

    /// Set the Secret Manager API base URL.
    pub fn secret_manager_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.storage.secret_manager_endpoint = endpoint.into();
        self
    }

    /// Use a fixed Secret Manager bearer instead of the metadata server.
    pub fn secret_manager_access_token(mut self, token: impl Into<String>) -> Self {
        self.storage.secret_manager_access_token = Some(SecretString::new(token.into()));
        self
    }

    /// Set the secret names for the full record and the bare refresh token.
    pub fn secret_names(
        mut self,
        record: impl Into<String>,
        refresh_token: impl Into<String>,
    ) -> Self {
        self.storage.record_secret_name = record.into();
        self.storage.refresh_token_secret_name = refresh_token.into();
        self
    }

    /// Set request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set how long before expiry tokens are refreshed.
    pub fn safety_margin(mut self, margin: Duration) -> Self {
        self.safety_margin = Some(margin);
        self
    }

    /// Set retry policy for transient refresh failures.
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> Result<FleetAuthConfig, FleetAuthError> {
        let client_id = self.client_id.ok_or_else(|| missing("client_id"))?;
        let client_secret = self.client_secret.ok_or_else(|| missing("client_secret"))?;

        let redirect_uri = match (self.redirect_uri, self.domain) {
            (Some(uri), _) => uri,
            (None, Some(domain)) => redirect_uri_for_domain(&domain),
            (None, None) => return Err(missing("domain")),
        };

        for endpoint in [
            &self.provider.authorization_endpoint,
            &self.provider.token_endpoint,
            &redirect_uri,
            &self.storage.secret_manager_endpoint,
        ] {
            validate_endpoint(endpoint)?;
        }

        let timeout = self
            .timeout
            .unwrap_or(Duration::from_millis(DEFAULT_TIMEOUT_MS));
        if timeout.is_zero() {
            return Err(invalid("timeout must be greater than zero"));
        }
        if self.retry.max_attempts == 0 {
            return Err(invalid("retry.max_attempts must be at least 1"));
        }

        let scopes = self
            .scopes
            .unwrap_or_else(|| DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect());

        Ok(FleetAuthConfig {
            provider: self.provider,
            credentials: ClientCredentials {
                client_id,
                client_secret,
            },
            redirect_uri,
            scopes,
            storage: self.storage,
            timeout,
            safety_margin: self
                .safety_margin
                .unwrap_or(Duration::from_secs(DEFAULT_SAFETY_MARGIN_SECS)),
            retry: self.retry,
        })
    }
}

fn missing(field: &str) -> FleetAuthError {
    ConfigurationError::MissingRequired {
        field: field.to_string(),
    }
    .into()
}

fn invalid(message: &str) -> FleetAuthError {
    ConfigurationError::InvalidConfig {
        message: message.to_string(),
    }
    .into()
}

fn validate_endpoint(endpoint: &str) -> Result<(), FleetAuthError> {
    match url::Url::parse(endpoint) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(()),
        _ => Err(ConfigurationError::InvalidEndpoint {
            url: endpoint.to_string(),
        }
        .into()),
    }
}

/// Create a new configuration builder.
pub fn fleet_auth_config() -> FleetAuthConfigBuilder {
    FleetAuthConfigBuilder::new()
}
