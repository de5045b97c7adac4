//! Fleet Auth Error Types
//!
//! Error hierarchy for the credential lifecycle. Transport and storage errors
//! stay inside the crate; callers of the lifecycle manager only ever observe
//! [`CredentialError`].

use std::time::Duration;
use thiserror::Error;

/// Root error type for facade operations (configuration, code exchange, storage).
#[derive(Error, Debug)]
pub enum FleetAuthError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Authorization code exchange failed: {0}")]
    Exchange(#[from] AuthExchangeError),

    #[error("Credential error: {0}")]
    Credential(#[from] CredentialError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl FleetAuthError {
    /// Get error code for telemetry.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "FLEET_AUTH_CONFIG",
            Self::Exchange(_) => "FLEET_AUTH_EXCHANGE",
            Self::Credential(_) => "FLEET_AUTH_CREDENTIAL",
            Self::Storage(_) => "FLEET_AUTH_STORAGE",
        }
    }

    /// Check if error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Credential(e) => e.kind() == CredentialErrorKind::Unavailable,
            Self::Storage(StorageError::Unavailable { .. }) => true,
            _ => false,
        }
    }

    /// Check if error requires an operator to re-run the interactive login.
    pub fn needs_reauth(&self) -> bool {
        match self {
            Self::Credential(e) => e.kind() == CredentialErrorKind::ReauthorizationRequired,
            Self::Exchange(AuthExchangeError::Rejected { .. }) => true,
            _ => false,
        }
    }
}

/// Configuration error.
#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Missing required field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid endpoint URL: {url}")]
    InvalidEndpoint { url: String },
}

/// Network/transport error.
#[derive(Error, Debug, Clone)]
pub enum NetworkError {
    #[error("Connection failed: {message}")]
    ConnectionFailed { message: String },

    #[error("Request timeout after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("Transport handle is closed")]
    TransportClosed,

    #[error("Transport could not be created: {message}")]
    TransportUnavailable { message: String },
}

/// Protocol/response parsing error.
#[derive(Error, Debug, Clone)]
pub enum ProtocolError {
    #[error("Invalid response: {message}")]
    InvalidResponse { message: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Unexpected redirect to: {location}")]
    UnexpectedRedirect { location: String },

    #[error("Response too large: {size} bytes")]
    ResponseTooLarge { size: usize },

    #[error("Invalid JSON: {message}")]
    InvalidJson { message: String },
}

/// Error raised by an [`HttpTransport`](crate::core::HttpTransport).
#[derive(Error, Debug, Clone)]
pub enum TransportError {
    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Authorization-code exchange failure. Terminal for the code; never retried.
#[derive(Error, Debug)]
pub enum AuthExchangeError {
    #[error("Token endpoint rejected the authorization code with HTTP {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Transport failure: {0}")]
    Transport(#[from] TransportError),

    #[error("Invalid token response: {message}")]
    InvalidResponse { message: String },
}

/// Refresh-token exchange failure.
#[derive(Error, Debug, Clone)]
pub enum RefreshError {
    /// Network failure, timeout or 5xx. The caller may retry with backoff.
    #[error("Transient refresh failure: {reason}")]
    Transient { reason: String },

    /// The refresh token itself was rejected.
    #[error("Refresh token rejected with HTTP {status}: {reason}")]
    Expired { status: u16, reason: String },
}

impl RefreshError {
    pub fn transient(reason: impl Into<String>) -> Self {
        Self::Transient {
            reason: reason.into(),
        }
    }

    /// Check if error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

impl From<TransportError> for RefreshError {
    fn from(error: TransportError) -> Self {
        Self::transient(error.to_string())
    }
}

/// Storage error for the local file and the secret backend.
#[derive(Error, Debug, Clone)]
pub enum StorageError {
    #[error("No stored credential found")]
    NotFound,

    #[error("I/O failure on {path}: {message}")]
    Io { path: String, message: String },

    #[error("Corrupted data: {message}")]
    Corrupted { message: String },

    #[error("Refusing to persist invalid record: {message}")]
    InvalidRecord { message: String },

    #[error("{store} unavailable: {message}")]
    Unavailable { store: String, message: String },
}

/// Kind of a [`CredentialError`], for matching without inspecting messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialErrorKind {
    Unavailable,
    ReauthorizationRequired,
}

/// The only error observed by callers of the lifecycle manager.
#[derive(Error, Debug, Clone)]
pub enum CredentialError {
    /// Temporary failure; retry later.
    #[error("Credential temporarily unavailable: {reason}")]
    Unavailable { reason: String },

    /// The refresh token is no longer accepted. An operator must re-run the
    /// interactive authorization flow.
    #[error("Re-authorization required: {reason}")]
    ReauthorizationRequired { reason: String },
}

impl CredentialError {
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }

    pub fn reauthorization_required(reason: impl Into<String>) -> Self {
        Self::ReauthorizationRequired {
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> CredentialErrorKind {
        match self {
            Self::Unavailable { .. } => CredentialErrorKind::Unavailable,
            Self::ReauthorizationRequired { .. } => CredentialErrorKind::ReauthorizationRequired,
        }
    }
}

impl From<RefreshError> for CredentialError {
    fn from(error: RefreshError) -> Self {
        match error {
            RefreshError::Transient { reason } => Self::Unavailable { reason },
            RefreshError::Expired { status, reason } => Self::ReauthorizationRequired {
                reason: format!("HTTP {}: {}", status, reason),
            },
        }
    }
}

/// Result type for facade operations.
pub type FleetAuthResult<T> = Result<T, FleetAuthError>;

/// OAuth2 error response from the token endpoint.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct OAuth2ErrorResponse {
    pub error: String,
    #[serde(default)]
    pub error_description: Option<String>,
}

/// Parse error response from HTTP body.
pub fn parse_error_response(body: &str) -> Option<OAuth2ErrorResponse> {
    serde_json::from_str(body).ok()
}

/// Map a non-2xx refresh response to a [`RefreshError`].
///
/// 408, 429 and 5xx are transient. Every other status means the refresh token
/// will not be accepted again.
pub fn map_refresh_status(status: u16, body: &str) -> RefreshError {
    let reason = parse_error_response(body)
        .map(|r| match r.error_description {
            Some(description) => format!("{}: {}", r.error, description),
            None => r.error,
        })
        .unwrap_or_else(|| format!("HTTP {}", status));

    match status {
        408 | 429 | 500..=599 => RefreshError::Transient { reason },
        _ => RefreshError::Expired { status, reason },
    }
}

/// Get user-friendly error message.
pub fn get_user_message(error: &CredentialError) -> String {
    match error.kind() {
        CredentialErrorKind::Unavailable => {
            "The Fleet API token service is temporarily unavailable. Please try again later."
                .to_string()
        }
        CredentialErrorKind::ReauthorizationRequired => {
            "The stored Fleet API authorization is no longer valid. Please re-run the authorization flow."
                .to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_refresh_status() {
        assert!(map_refresh_status(503, "").is_retryable());
        assert!(map_refresh_status(429, "").is_retryable());
        assert!(map_refresh_status(408, "").is_retryable());
        assert!(!map_refresh_status(401, "").is_retryable());
        assert!(!map_refresh_status(403, "").is_retryable());

        let body = r#"{"error":"invalid_grant","error_description":"refresh token revoked"}"#;
        match map_refresh_status(400, body) {
            RefreshError::Expired { status, reason } => {
                assert_eq!(status, 400);
                assert!(reason.starts_with("invalid_grant"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_refresh_error_to_credential_error() {
        let error: CredentialError = RefreshError::transient("connection reset").into();
        assert_eq!(error.kind(), CredentialErrorKind::Unavailable);

        let error: CredentialError = RefreshError::Expired {
            status: 401,
            reason: "unauthorized".to_string(),
        }
        .into();
        assert_eq!(error.kind(), CredentialErrorKind::ReauthorizationRequired);
    }

    #[test]
    fn test_root_error_predicates() {
        let error = FleetAuthError::from(CredentialError::unavailable("down"));
        assert!(error.is_retryable());
        assert!(!error.needs_reauth());
        assert_eq!(error.error_code(), "FLEET_AUTH_CREDENTIAL");

        let error = FleetAuthError::from(AuthExchangeError::Rejected {
            status: 400,
            body: "{}".to_string(),
        });
        assert!(error.needs_reauth());
        assert!(!error.is_retryable());
    }

    #[test]
    fn test_transport_error_is_transient() {
        let error: RefreshError = TransportError::from(NetworkError::TransportClosed).into();
        assert!(error.is_retryable());
    }
}
