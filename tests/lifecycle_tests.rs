//! End-to-end lifecycle scenarios over a mock token endpoint.

mod common;

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use common::*;
use fleet_auth_integration::{
    CredentialErrorKind, CredentialState, DisabledSecretBackend, FleetAuthClient, InMemoryLogger,
    LogLevel, MockSecretBackend, ReqwestTransportFactory, SecretManagerBackend, TokenRecord,
};
use futures::future::join_all;
use secrecy::SecretString;
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn write_local(dir: &TempDir, contents: &str) {
    std::fs::write(dir.path().join("fleet_tokens.json"), contents).unwrap();
}

fn read_local(dir: &TempDir) -> String {
    std::fs::read_to_string(dir.path().join("fleet_tokens.json")).unwrap()
}

fn local_record(dir: &TempDir) -> TokenRecord {
    serde_json::from_str(&read_local(dir)).unwrap()
}

fn setup(
    server: &MockServer,
    dir: &TempDir,
) -> (FleetAuthClient, Arc<MockSecretBackend>, Arc<InMemoryLogger>) {
    let backend = Arc::new(MockSecretBackend::new());
    let logger = Arc::new(InMemoryLogger::new());
    let client = client(config(server, dir), backend.clone(), logger.clone());
    (client, backend, logger)
}

#[tokio::test]
async fn test_valid_record_needs_no_network() {
    let server = setup_mock_server().await;
    let dir = TempDir::new().unwrap();
    Mock::given(method("POST"))
        .respond_with(token_response("unused", Some("unused"), 3600))
        .expect(0)
        .mount(&server)
        .await;
    write_local(&dir, &record("at-1", "rt-1", 3600).to_json().unwrap());
    let (client, _, _) = setup(&server, &dir);

    let token = client.ensure_valid_token().await.unwrap();

    assert_eq!(token.secret(), "at-1");
    assert_eq!(client.manager().state(), CredentialState::Loaded { valid: true });
}

#[tokio::test]
async fn test_expiring_record_is_refreshed_and_persisted() {
    let server = setup_mock_server().await;
    let dir = TempDir::new().unwrap();
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(body_string_contains("refresh_token=rt-1"))
        .respond_with(token_response("at-2", Some("rt-2"), 28800))
        .expect(1)
        .mount(&server)
        .await;
    write_local(&dir, &record("at-1", "rt-1", 120).to_json().unwrap());
    let (client, backend, _) = setup(&server, &dir);

    let token = client.ensure_valid_token().await.unwrap();

    assert_eq!(token.secret(), "at-2");
    let stored = local_record(&dir);
    assert_eq!(stored.access_token, "at-2");
    assert_eq!(stored.refresh_token.as_deref(), Some("rt-2"));
    assert!(backend.value("fleet-tokens").unwrap().contains("at-2"));
    assert_eq!(backend.value("tesla-refresh-token").as_deref(), Some("rt-2"));
}

#[tokio::test]
async fn test_concurrent_callers_share_one_refresh() {
    let server = setup_mock_server().await;
    let dir = TempDir::new().unwrap();
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(
            token_response("at-2", Some("rt-2"), 28800).set_delay(Duration::from_millis(200)),
        )
        .expect(1)
        .mount(&server)
        .await;
    write_local(&dir, &record("at-1", "rt-1", -60).to_json().unwrap());
    let (client, _, _) = setup(&server, &dir);

    let results = join_all((0..10).map(|_| client.ensure_valid_token())).await;

    for result in results {
        assert_eq!(result.unwrap().secret(), "at-2");
    }
}

#[tokio::test]
async fn test_rejected_refresh_requires_reauthorization_and_keeps_store() {
    let server = setup_mock_server().await;
    let dir = TempDir::new().unwrap();
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(error_response(401, "invalid_token"))
        .expect(1)
        .mount(&server)
        .await;
    write_local(&dir, &record("at-1", "rt-revoked", -60).to_json().unwrap());
    let before = read_local(&dir);
    let (client, backend, logger) = setup(&server, &dir);

    let error = client.ensure_valid_token().await.unwrap_err();

    assert_eq!(error.kind(), CredentialErrorKind::ReauthorizationRequired);
    assert_eq!(client.manager().state(), CredentialState::Failed);
    assert_eq!(read_local(&dir), before);
    assert!(backend.get_puts().is_empty());
    assert!(!logger.get_entries_by_level(LogLevel::Error).is_empty());

    // Same revoked token: no second request.
    let again = client.ensure_valid_token().await.unwrap_err();
    assert_eq!(again.kind(), CredentialErrorKind::ReauthorizationRequired);
}

#[tokio::test]
async fn test_persistent_server_errors_are_unavailable() {
    let server = setup_mock_server().await;
    let dir = TempDir::new().unwrap();
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(error_response(503, "temporarily_unavailable"))
        .expect(3)
        .mount(&server)
        .await;
    write_local(&dir, &record("at-1", "rt-1", -60).to_json().unwrap());
    let before = read_local(&dir);
    let (client, _, _) = setup(&server, &dir);

    let error = client.ensure_valid_token().await.unwrap_err();

    assert_eq!(error.kind(), CredentialErrorKind::Unavailable);
    assert_ne!(client.manager().state(), CredentialState::Failed);
    assert_eq!(read_local(&dir), before);
}

#[tokio::test]
async fn test_server_error_then_success_recovers() {
    let server = setup_mock_server().await;
    let dir = TempDir::new().unwrap();
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(error_response(502, "bad_gateway"))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(token_response("at-2", None, 28800))
        .expect(1)
        .mount(&server)
        .await;
    write_local(&dir, &record("at-1", "rt-1", -60).to_json().unwrap());
    let (client, _, _) = setup(&server, &dir);

    let token = client.ensure_valid_token().await.unwrap();

    assert_eq!(token.secret(), "at-2");
    // Not rotated: the previous refresh token is kept.
    assert_eq!(local_record(&dir).refresh_token.as_deref(), Some("rt-1"));
}

#[tokio::test]
async fn test_legacy_local_file_is_migrated() {
    let server = setup_mock_server().await;
    let dir = TempDir::new().unwrap();
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(body_string_contains("refresh_token=abc123"))
        .respond_with(token_response("at-new", Some("rt-new"), 28800))
        .expect(1)
        .mount(&server)
        .await;
    write_local(&dir, "{\"refresh_token\": \"abc123\"}");
    let (client, _, _) = setup(&server, &dir);

    let token = client.ensure_valid_token().await.unwrap();

    assert_eq!(token.secret(), "at-new");
    let stored = local_record(&dir);
    assert_eq!(stored.access_token, "at-new");
    assert_eq!(stored.refresh_token.as_deref(), Some("rt-new"));
    assert!(stored.expires_at > chrono::Utc::now() + chrono::Duration::hours(7));
}

#[tokio::test]
async fn test_rotated_secret_refresh_token_beats_local_record() {
    let server = setup_mock_server().await;
    let dir = TempDir::new().unwrap();
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(body_string_contains("refresh_token=rt-new"))
        .respond_with(token_response("at-next", Some("rt-next"), 28800))
        .expect(1)
        .mount(&server)
        .await;
    write_local(&dir, &record("at-old", "rt-old", -60).to_json().unwrap());
    let (client, backend, _) = setup(&server, &dir);
    backend.insert("tesla-refresh-token", "rt-new");

    let token = client.ensure_valid_token().await.unwrap();

    assert_eq!(token.secret(), "at-next");
    let stored = local_record(&dir);
    assert_eq!(stored.refresh_token.as_deref(), Some("rt-next"));
    assert_eq!(backend.value("tesla-refresh-token").as_deref(), Some("rt-next"));
}

#[tokio::test]
async fn test_nothing_stored_requires_reauthorization() {
    let server = setup_mock_server().await;
    let dir = TempDir::new().unwrap();
    Mock::given(method("POST"))
        .respond_with(token_response("unused", None, 3600))
        .expect(0)
        .mount(&server)
        .await;
    let (client, _, _) = setup(&server, &dir);

    let error = client.ensure_valid_token().await.unwrap_err();

    assert_eq!(error.kind(), CredentialErrorKind::ReauthorizationRequired);
}

#[tokio::test]
async fn test_deadline_expiry_releases_refresh() {
    let server = setup_mock_server().await;
    let dir = TempDir::new().unwrap();
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(
            token_response("at-slow", Some("rt-2"), 28800).set_delay(Duration::from_millis(800)),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(token_response("at-2", Some("rt-2"), 28800))
        .mount(&server)
        .await;
    write_local(&dir, &record("at-1", "rt-1", -60).to_json().unwrap());
    let (client, _, _) = setup(&server, &dir);
    let manager = client.manager();

    let error = manager
        .ensure_valid_token_within(Duration::from_millis(100))
        .await
        .unwrap_err();

    assert_eq!(error.kind(), CredentialErrorKind::Unavailable);
    assert_ne!(manager.state(), CredentialState::Refreshing);
    assert!(manager.ensure_valid_token().await.is_ok());
}

#[tokio::test]
async fn test_unreachable_secret_backend_falls_back_to_local() {
    let server = setup_mock_server().await;
    let dir = TempDir::new().unwrap();
    Mock::given(method("POST"))
        .respond_with(token_response("unused", None, 3600))
        .expect(0)
        .mount(&server)
        .await;
    write_local(&dir, &record("at-local", "rt-1", 3600).to_json().unwrap());

    let config = config(&server, &dir);
    let backend = Arc::new(
        SecretManagerBackend::new(
            Arc::new(ReqwestTransportFactory::new(config.timeout)),
            "http://127.0.0.1:1/v1",
            "fleet-proj",
            Duration::from_secs(1),
        )
        .with_access_token(SecretString::new("ya29.test".to_string())),
    );
    let logger = Arc::new(InMemoryLogger::new());
    let client = client(config, backend, logger.clone());

    let token = client.ensure_valid_token().await.unwrap();

    assert_eq!(token.secret(), "at-local");
    assert!(!logger.get_entries_by_level(LogLevel::Warn).is_empty());
}

#[tokio::test]
async fn test_worker_reads_record_published_by_scout() {
    let server = setup_mock_server().await;
    let scout_dir = TempDir::new().unwrap();
    let worker_dir = TempDir::new().unwrap();
    let published = record("at-shared", "rt-shared", 3600);
    let payload = base64::engine::general_purpose::STANDARD.encode(published.to_json().unwrap());

    Mock::given(method("GET"))
        .and(path("/v1/projects/fleet-proj/secrets/fleet-tokens/versions/latest:access"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "payload": { "data": payload }
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(token_response("unused", None, 3600))
        .expect(0)
        .mount(&server)
        .await;

    let config = config(&server, &worker_dir);
    let backend = Arc::new(
        SecretManagerBackend::new(
            Arc::new(ReqwestTransportFactory::new(config.timeout)),
            format!("{}/v1", server.uri()),
            "fleet-proj",
            Duration::from_secs(2),
        )
        .with_access_token(SecretString::new("ya29.test".to_string())),
    );
    let worker = client(config, backend, Arc::new(InMemoryLogger::new()));

    let token = worker.ensure_valid_token().await.unwrap();

    assert_eq!(token.secret(), "at-shared");
    assert_eq!(local_record(&worker_dir).access_token, "at-shared");
    assert!(!scout_dir.path().join("fleet_tokens.json").exists());
}

#[tokio::test]
async fn test_centralize_publishes_local_record() {
    let server = setup_mock_server().await;
    let dir = TempDir::new().unwrap();
    write_local(&dir, &record("at-1", "rt-1", 3600).to_json().unwrap());
    let (client, backend, _) = setup(&server, &dir);

    let token = client.ensure_centralized_tokens().await.unwrap();

    assert_eq!(token.secret(), "at-1");
    assert!(backend.value("fleet-tokens").unwrap().contains("at-1"));
    assert_eq!(backend.value("tesla-refresh-token").as_deref(), Some("rt-1"));
}

#[tokio::test]
async fn test_centralize_without_backend_still_returns_token() {
    let server = setup_mock_server().await;
    let dir = TempDir::new().unwrap();
    write_local(&dir, &record("at-1", "rt-1", 3600).to_json().unwrap());
    let client = client(
        config(&server, &dir),
        Arc::new(DisabledSecretBackend),
        Arc::new(InMemoryLogger::new()),
    );

    let token = client.ensure_centralized_tokens().await.unwrap();

    assert_eq!(token.secret(), "at-1");
}
