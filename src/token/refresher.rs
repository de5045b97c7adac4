//! Token Refresher
//!
//! Talks to the Fleet API token endpoint: authorization-code exchange and
//! refresh-token exchange. No persistence side effects and no retries.

use async_trait::async_trait;
use chrono::Utc;
use secrecy::ExposeSecret;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::core::{HttpRequest, HttpResponse, TransportFactory};
use crate::error::{
    map_refresh_status, AuthExchangeError, NetworkError, ProtocolError, RefreshError,
    TransportError,
};
use crate::types::{FleetAuthConfig, GrantType, TokenRecord, TokenResponse};

/// Token endpoint client.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    /// Exchange an authorization code for a full record.
    async fn exchange_code(&self, code: &str) -> Result<TokenRecord, AuthExchangeError>;

    /// Exchange a refresh token for a new record.
    ///
    /// `refresh_token` is `None` in the result when the server did not
    /// rotate it.
    async fn refresh(&self, refresh_token: &str) -> Result<TokenRecord, RefreshError>;
}

/// Default token refresher over a [`TransportFactory`].
pub struct DefaultTokenRefresher {
    config: FleetAuthConfig,
    transports: Arc<dyn TransportFactory>,
}

impl DefaultTokenRefresher {
    /// Create new token refresher.
    pub fn new(config: FleetAuthConfig, transports: Arc<dyn TransportFactory>) -> Self {
        Self { config, transports }
    }

    fn build_request(&self, params: &[(&str, &str)]) -> HttpRequest {
        HttpRequest::form_post(
            self.config.provider.token_endpoint.as_str(),
            params,
            self.config.timeout,
        )
    }

    /// Send on a freshly acquired transport, bounded by the request timeout.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let transport = self.transports.acquire()?;
        if !transport.is_open() {
            return Err(NetworkError::TransportClosed.into());
        }

        let timeout = self.config.timeout;
        match tokio::time::timeout(timeout, transport.send(request)).await {
            Ok(result) => result,
            Err(_) => Err(NetworkError::Timeout { timeout }.into()),
        }
    }

    fn parse_record(body: &str) -> Result<TokenRecord, ProtocolError> {
        let response: TokenResponse =
            serde_json::from_str(body).map_err(|e| ProtocolError::InvalidJson {
                message: e.to_string(),
            })?;
        TokenRecord::from_response(&response, Utc::now())
    }
}

#[async_trait]
impl TokenRefresher for DefaultTokenRefresher {
    async fn exchange_code(&self, code: &str) -> Result<TokenRecord, AuthExchangeError> {
        let client_secret = self.config.credentials.client_secret.expose_secret();
        let request = self.build_request(&[
            ("grant_type", GrantType::AuthorizationCode.as_str()),
            ("client_id", self.config.credentials.client_id.as_str()),
            ("client_secret", client_secret.as_str()),
            ("code", code),
            ("audience", self.config.provider.audience.as_str()),
            ("redirect_uri", self.config.redirect_uri.as_str()),
        ]);

        let response = self.send(request).await?;
        if !response.is_success() {
            return Err(AuthExchangeError::Rejected {
                status: response.status,
                body: response.body,
            });
        }

        Self::parse_record(&response.body).map_err(|e| AuthExchangeError::InvalidResponse {
            message: e.to_string(),
        })
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenRecord, RefreshError> {
        let client_secret = self.config.credentials.client_secret.expose_secret();
        let request = self.build_request(&[
            ("grant_type", GrantType::RefreshToken.as_str()),
            ("client_id", self.config.credentials.client_id.as_str()),
            ("client_secret", client_secret.as_str()),
            ("refresh_token", refresh_token),
        ]);

        let response = self.send(request).await?;
        if !response.is_success() {
            return Err(map_refresh_status(response.status, &response.body));
        }

        // A malformed success body says nothing about the refresh token.
        Self::parse_record(&response.body)
            .map_err(|e| RefreshError::transient(format!("malformed token response: {}", e)))
    }
}

/// Mock token refresher for testing.
#[derive(Default)]
pub struct MockTokenRefresher {
    refresh_results: Mutex<VecDeque<Result<TokenRecord, RefreshError>>>,
    default_refresh: Mutex<Option<Result<TokenRecord, RefreshError>>>,
    exchange_results: Mutex<VecDeque<Result<TokenRecord, AuthExchangeError>>>,
    refresh_history: Mutex<Vec<String>>,
    exchange_history: Mutex<Vec<String>>,
    delay: Mutex<Option<Duration>>,
}

impl MockTokenRefresher {
    /// Create new mock token refresher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the result of the next `refresh` call.
    pub fn queue_refresh(&self, result: Result<TokenRecord, RefreshError>) -> &Self {
        self.refresh_results.lock().unwrap().push_back(result);
        self
    }

    /// Result returned once the refresh queue is empty.
    pub fn set_default_refresh(&self, result: Result<TokenRecord, RefreshError>) -> &Self {
        *self.default_refresh.lock().unwrap() = Some(result);
        self
    }

    /// Queue the result of the next `exchange_code` call.
    pub fn queue_exchange(&self, result: Result<TokenRecord, AuthExchangeError>) -> &Self {
        self.exchange_results.lock().unwrap().push_back(result);
        self
    }

    /// Delay every call.
    pub fn set_delay(&self, delay: Duration) -> &Self {
        *self.delay.lock().unwrap() = Some(delay);
        self
    }

    /// Refresh tokens presented so far.
    pub fn get_refresh_history(&self) -> Vec<String> {
        self.refresh_history.lock().unwrap().clone()
    }

    /// Codes presented so far.
    pub fn get_exchange_history(&self) -> Vec<String> {
        self.exchange_history.lock().unwrap().clone()
    }

    /// Number of refresh calls.
    pub fn refresh_count(&self) -> usize {
        self.refresh_history.lock().unwrap().len()
    }

    async fn pause(&self) {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl TokenRefresher for MockTokenRefresher {
    async fn exchange_code(&self, code: &str) -> Result<TokenRecord, AuthExchangeError> {
        self.exchange_history.lock().unwrap().push(code.to_string());
        self.pause().await;

        let next = self.exchange_results.lock().unwrap().pop_front();
        next.unwrap_or_else(|| {
            Err(AuthExchangeError::Rejected {
                status: 400,
                body: "no mock exchange result".to_string(),
            })
        })
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenRecord, RefreshError> {
        self.refresh_history
            .lock()
            .unwrap()
            .push(refresh_token.to_string());
        self.pause().await;

        let next = self.refresh_results.lock().unwrap().pop_front();
        match next {
            Some(result) => result,
            None => self
                .default_refresh
                .lock()
                .unwrap()
                .clone()
                .unwrap_or_else(|| Err(RefreshError::transient("no mock refresh result"))),
        }
    }
}

/// Create mock token refresher for testing.
pub fn create_mock_token_refresher() -> MockTokenRefresher {
    MockTokenRefresher::new()
}
