//! Configuration Types
//!
//! Fleet API client configuration types.

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::resilience::RetryConfig;

/// Default Fleet API authorization endpoint.
pub const DEFAULT_AUTHORIZATION_ENDPOINT: &str = "https://auth.tesla.com/oauth2/v3/authorize";
/// Default Fleet API token endpoint.
pub const DEFAULT_TOKEN_ENDPOINT: &str =
    "https://fleet-auth.prd.vn.cloud.tesla.com/oauth2/v3/token";
/// Default audience sent with authorization-code grants.
pub const DEFAULT_AUDIENCE: &str = "https://fleet-api.prd.na.vn.cloud.tesla.com";
/// Default scopes requested by the authorization URL.
pub const DEFAULT_SCOPES: &[&str] = &[
    "openid",
    "offline_access",
    "vehicle_device_data",
    "vehicle_cmds",
    "vehicle_charging_cmds",
];
/// Default Google Cloud Secret Manager API base URL.
pub const DEFAULT_SECRET_MANAGER_ENDPOINT: &str = "https://secretmanager.googleapis.com/v1";
/// Secret holding the full serialized token record.
pub const DEFAULT_RECORD_SECRET_NAME: &str = "fleet-tokens";
/// Secret holding the bare refresh token for legacy consumers.
pub const DEFAULT_REFRESH_TOKEN_SECRET_NAME: &str = "tesla-refresh-token";
/// Default local record path.
pub const DEFAULT_TOKEN_FILE: &str = "fleet_tokens.json";

pub const DEFAULT_TIMEOUT_MS: u64 = 30000;
pub const DEFAULT_SAFETY_MARGIN_SECS: u64 = 300;

/// Fleet API credential configuration.
#[derive(Clone, Debug)]
pub struct FleetAuthConfig {
    /// Provider endpoints.
    pub provider: ProviderConfig,
    /// Client credentials.
    pub credentials: ClientCredentials,
    /// Redirect URI registered for the application.
    pub redirect_uri: String,
    /// Scopes requested in the authorization URL.
    pub scopes: Vec<String>,
    /// Where tokens are persisted.
    pub storage: StorageConfig,
    /// Timeout applied to every network call.
    pub timeout: Duration,
    /// Access tokens are refreshed this long before `expires_at`.
    pub safety_margin: Duration,
    /// Backoff policy for transient refresh failures.
    pub retry: RetryConfig,
}

/// OAuth2 provider endpoint configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Authorization endpoint URL.
    pub authorization_endpoint: String,
    /// Token endpoint URL.
    pub token_endpoint: String,
    /// Audience for authorization-code grants.
    pub audience: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            authorization_endpoint: DEFAULT_AUTHORIZATION_ENDPOINT.to_string(),
            token_endpoint: DEFAULT_TOKEN_ENDPOINT.to_string(),
            audience: DEFAULT_AUDIENCE.to_string(),
        }
    }
}

/// Client credentials, always sent in the form body.
#[derive(Clone)]
pub struct ClientCredentials {
    /// Client identifier.
    pub client_id: String,
    /// Client secret.
    pub client_secret: SecretString,
}

impl std::fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .finish()
    }
}

/// Persistence configuration.
#[derive(Clone)]
pub struct StorageConfig {
    /// Local record file.
    pub token_file: PathBuf,
    /// Google Cloud project; `None` disables the secret backend.
    pub project_id: Option<String>,
    /// Secret Manager API base URL.
    pub secret_manager_endpoint: String,
    /// Static bearer for Secret Manager; the metadata server is used when absent.
    pub secret_manager_access_token: Option<SecretString>,
    /// Secret holding the full record.
    pub record_secret_name: String,
    /// Secret holding the bare refresh token.
    pub refresh_token_secret_name: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            token_file: PathBuf::from(DEFAULT_TOKEN_FILE),
            project_id: None,
            secret_manager_endpoint: DEFAULT_SECRET_MANAGER_ENDPOINT.to_string(),
            secret_manager_access_token: None,
            record_secret_name: DEFAULT_RECORD_SECRET_NAME.to_string(),
            refresh_token_secret_name: DEFAULT_REFRESH_TOKEN_SECRET_NAME.to_string(),
        }
    }
}

impl std::fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageConfig")
            .field("token_file", &self.token_file)
            .field("project_id", &self.project_id)
            .field("secret_manager_endpoint", &self.secret_manager_endpoint)
            .field(
                "secret_manager_access_token",
                &self.secret_manager_access_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("record_secret_name", &self.record_secret_name)
            .field("refresh_token_secret_name", &self.refresh_token_secret_name)
            .finish()
    }
}

/// Grant type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum GrantType {
    #[serde(rename = "authorization_code")]
    AuthorizationCode,
    #[serde(rename = "refresh_token")]
    RefreshToken,
}

impl GrantType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthorizationCode => "authorization_code",
            Self::RefreshToken => "refresh_token",
        }
    }
}

/// Redirect URI for a public domain.
pub fn redirect_uri_for_domain(domain: &str) -> String {
    let domain = domain
        .trim()
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_end_matches('/');
    format!("https://{}/auth/callback", domain)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grant_type_as_str() {
        assert_eq!(GrantType::AuthorizationCode.as_str(), "authorization_code");
        assert_eq!(GrantType::RefreshToken.as_str(), "refresh_token");
    }

    #[test]
    fn test_redirect_uri_for_domain() {
        assert_eq!(
            redirect_uri_for_domain("scout.example.com"),
            "https://scout.example.com/auth/callback"
        );
        assert_eq!(
            redirect_uri_for_domain("https://scout.example.com/"),
            "https://scout.example.com/auth/callback"
        );
    }

    #[test]
    fn test_storage_config_debug_redacts_token() {
        let config = StorageConfig {
            secret_manager_access_token: Some(SecretString::new("ya29.secret".to_string())),
            ..Default::default()
        };
        assert!(!format!("{:?}", config).contains("ya29.secret"));
    }
}
