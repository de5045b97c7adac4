//! Authorization Types
//!
//! Types for the authorization-code flow.

use std::collections::HashMap;

/// Parameters for authorization URL generation.
#[derive(Clone, Debug, Default)]
pub struct AuthorizationParams {
    /// Redirect URI (overrides the configured one).
    pub redirect_uri: Option<String>,
    /// Requested scopes (overrides the configured ones).
    pub scopes: Option<Vec<String>>,
    /// Custom state value (auto-generated if not provided).
    pub state: Option<String>,
    /// Additional parameters.
    pub extra_params: HashMap<String, String>,
}

/// Result of authorization URL generation.
#[derive(Clone, Debug)]
pub struct AuthorizationUrl {
    /// The authorization URL an operator opens in a browser.
    pub url: String,
    /// State parameter for CSRF validation.
    pub state: String,
}
