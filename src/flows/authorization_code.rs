//! Authorization Code Flow
//!
//! Builds the URL an operator opens to grant the application access. The
//! returned code is exchanged by [`TokenRefresher::exchange_code`](crate::token::TokenRefresher::exchange_code).

use base64::Engine;
use rand::RngCore;

use crate::types::{AuthorizationParams, AuthorizationUrl, FleetAuthConfig};

const STATE_BYTES: usize = 32;

/// Generate a random URL-safe state value.
pub fn generate_state() -> String {
    let mut bytes = [0u8; STATE_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// Build the authorization URL for the configured client.
///
/// `params` may override the redirect URI and scopes; a state value is
/// generated when none is given.
pub fn build_authorization_url(
    config: &FleetAuthConfig,
    params: AuthorizationParams,
) -> AuthorizationUrl {
    let state = params.state.unwrap_or_else(generate_state);
    let redirect_uri = params
        .redirect_uri
        .unwrap_or_else(|| config.redirect_uri.clone());
    let scopes = params.scopes.unwrap_or_else(|| config.scopes.clone());

    let mut query = url::form_urlencoded::Serializer::new(String::new());
    query
        .append_pair("client_id", &config.credentials.client_id)
        .append_pair("redirect_uri", &redirect_uri)
        .append_pair("response_type", "code");
    if !scopes.is_empty() {
        query.append_pair("scope", &scopes.join(" "));
    }
    query.append_pair("state", &state);

    let mut extra: Vec<_> = params.extra_params.iter().collect();
    extra.sort();
    for (key, value) in extra {
        query.append_pair(key, value);
    }

    let separator = if config.provider.authorization_endpoint.contains('?') {
        '&'
    } else {
        '?'
    };
    let url = format!(
        "{}{}{}",
        config.provider.authorization_endpoint,
        separator,
        query.finish()
    );

    AuthorizationUrl { url, state }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builders::FleetAuthConfigBuilder;
    use std::collections::HashMap;

    fn config() -> FleetAuthConfig {
        FleetAuthConfigBuilder::new()
            .client_id("client-123")
            .client_secret("secret")
            .domain("scout.example.com")
            .build()
            .unwrap()
    }

    fn query_of(url: &str) -> HashMap<String, String> {
        url::Url::parse(url)
            .unwrap()
            .query_pairs()
            .into_owned()
            .collect()
    }

    #[test]
    fn test_authorization_url_parameters() {
        let auth_url = build_authorization_url(&config(), AuthorizationParams::default());
        let query = query_of(&auth_url.url);

        assert!(auth_url
            .url
            .starts_with("https://auth.tesla.com/oauth2/v3/authorize?"));
        assert_eq!(query["client_id"], "client-123");
        assert_eq!(query["redirect_uri"], "https://scout.example.com/auth/callback");
        assert_eq!(query["response_type"], "code");
        assert!(query["scope"].contains("offline_access"));
        assert_eq!(query["state"], auth_url.state);
    }

    #[test]
    fn test_authorization_url_overrides() {
        let params = AuthorizationParams {
            redirect_uri: Some("https://other.example.com/cb".to_string()),
            scopes: Some(vec!["openid".to_string()]),
            state: Some("fixed-state".to_string()),
            extra_params: [("prompt".to_string(), "login".to_string())]
                .into_iter()
                .collect(),
        };

        let auth_url = build_authorization_url(&config(), params);
        let query = query_of(&auth_url.url);

        assert_eq!(auth_url.state, "fixed-state");
        assert_eq!(query["redirect_uri"], "https://other.example.com/cb");
        assert_eq!(query["scope"], "openid");
        assert_eq!(query["prompt"], "login");
    }

    #[test]
    fn test_generated_states_are_unique_and_url_safe() {
        let a = generate_state();
        let b = generate_state();

        assert_ne!(a, b);
        assert_eq!(a.len(), 43);
        assert!(a
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }
}
