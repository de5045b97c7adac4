//! Shared helpers for WireMock-driven integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use fleet_auth_integration::{
    DefaultTokenRefresher, FleetAuthClient, FleetAuthConfig, FleetAuthConfigBuilder, Logger,
    ReqwestTransportFactory, RetryConfig, SecretBackend, TokenRecord,
};
use serde_json::json;
use tempfile::TempDir;
use wiremock::{MockServer, ResponseTemplate};

pub const TOKEN_PATH: &str = "/oauth2/v3/token";

/// Helper to create a mock token endpoint
pub async fn setup_mock_server() -> MockServer {
    MockServer::start().await
}

pub fn fast_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 3,
        initial_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(20),
        multiplier: 2.0,
        jitter: 0.0,
    }
}

pub fn config(server: &MockServer, dir: &TempDir) -> FleetAuthConfig {
    FleetAuthConfigBuilder::new()
        .client_id("test-client")
        .client_secret("test-secret")
        .domain("scout.example.com")
        .token_endpoint(format!("{}{}", server.uri(), TOKEN_PATH))
        .token_file(dir.path().join("fleet_tokens.json"))
        .timeout(Duration::from_secs(2))
        .retry(fast_retry())
        .build()
        .expect("valid test config")
}

/// Client talking to the mock token endpoint over reqwest.
pub fn client(
    config: FleetAuthConfig,
    backend: Arc<dyn SecretBackend>,
    logger: Arc<dyn Logger>,
) -> FleetAuthClient {
    let refresher = Arc::new(DefaultTokenRefresher::new(
        config.clone(),
        Arc::new(ReqwestTransportFactory::new(config.timeout)),
    ));
    FleetAuthClient::with_components(config, refresher, backend, logger)
}

/// Helper to create a token endpoint success response
pub fn token_response(
    access_token: &str,
    refresh_token: Option<&str>,
    expires_in: u64,
) -> ResponseTemplate {
    let mut body = json!({
        "access_token": access_token,
        "token_type": "Bearer",
        "expires_in": expires_in,
    });
    if let Some(refresh_token) = refresh_token {
        body["refresh_token"] = json!(refresh_token);
    }
    ResponseTemplate::new(200).set_body_json(body)
}

/// Helper to create error response templates
pub fn error_response(status: u16, error: &str) -> ResponseTemplate {
    ResponseTemplate::new(status).set_body_json(json!({
        "error": error,
        "error_description": format!("{} from mock", error),
    }))
}

pub fn record(access_token: &str, refresh_token: &str, expires_in_secs: i64) -> TokenRecord {
    let now = Utc::now();
    TokenRecord {
        access_token: access_token.to_string(),
        refresh_token: Some(refresh_token.to_string()),
        expires_at: now + chrono::Duration::seconds(expires_in_secs),
        refresh_token_created_at: now - chrono::Duration::days(2),
    }
}
