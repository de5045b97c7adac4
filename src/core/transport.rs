//! HTTP Transport
//!
//! HTTP client interface and implementations for token endpoint and secret
//! store requests.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{NetworkError, ProtocolError, TransportError};

const DEFAULT_MAX_RESPONSE_SIZE: usize = 1_048_576;

/// HTTP request definition.
#[derive(Clone, Debug)]
pub struct HttpRequest {
    /// HTTP method.
    pub method: HttpMethod,
    /// Request URL.
    pub url: String,
    /// Request headers.
    pub headers: HashMap<String, String>,
    /// Request body.
    pub body: Option<String>,
    /// Request timeout.
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    /// Form-encoded POST, as expected by OAuth2 token endpoints.
    pub fn form_post(url: impl Into<String>, params: &[(&str, &str)], timeout: Duration) -> Self {
        let body = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(params.iter())
            .finish();

        let mut headers = HashMap::new();
        headers.insert(
            "content-type".to_string(),
            "application/x-www-form-urlencoded".to_string(),
        );
        headers.insert("accept".to_string(), "application/json".to_string());

        Self {
            method: HttpMethod::Post,
            url: url.into(),
            headers,
            body: Some(body),
            timeout: Some(timeout),
        }
    }

    /// GET request.
    pub fn get(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            method: HttpMethod::Get,
            url: url.into(),
            headers: HashMap::new(),
            body: None,
            timeout: Some(timeout),
        }
    }

    /// JSON-encoded POST.
    pub fn json_post(url: impl Into<String>, body: &serde_json::Value, timeout: Duration) -> Self {
        let mut headers = HashMap::new();
        headers.insert("content-type".to_string(), "application/json".to_string());

        Self {
            method: HttpMethod::Post,
            url: url.into(),
            headers,
            body: Some(body.to_string()),
            timeout: Some(timeout),
        }
    }

    /// Add a header.
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Decode the form body back into pairs.
    pub fn form_params(&self) -> HashMap<String, String> {
        self.body
            .as_deref()
            .map(|body| {
                url::form_urlencoded::parse(body.as_bytes())
                    .into_owned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// HTTP method.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
        }
    }
}

/// HTTP response definition.
#[derive(Clone, Debug)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers.
    pub headers: HashMap<String, String>,
    /// Response body.
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// HTTP transport interface (for dependency injection).
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Send an HTTP request.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;

    /// Whether the handle can still carry requests.
    fn is_open(&self) -> bool {
        true
    }
}

/// Hands out transports for individual request attempts.
///
/// Callers acquire a transport per attempt and must check [`HttpTransport::is_open`]
/// before use.
pub trait TransportFactory: Send + Sync {
    fn acquire(&self) -> Result<Arc<dyn HttpTransport>, TransportError>;
}

/// Default reqwest-based HTTP transport.
pub struct ReqwestHttpTransport {
    client: reqwest::Client,
    default_timeout: Duration,
    max_response_size: usize,
}

impl ReqwestHttpTransport {
    /// Create new transport with default settings.
    pub fn new() -> Result<Self, TransportError> {
        Self::with_options(
            Duration::from_millis(crate::types::DEFAULT_TIMEOUT_MS),
            DEFAULT_MAX_RESPONSE_SIZE,
        )
    }

    /// Create transport with custom options.
    pub fn with_options(
        timeout: Duration,
        max_response_size: usize,
    ) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| NetworkError::TransportUnavailable {
                message: e.to_string(),
            })?;

        Ok(Self {
            client,
            default_timeout: timeout,
            max_response_size,
        })
    }
}

#[async_trait]
impl HttpTransport for ReqwestHttpTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let timeout = request.timeout.unwrap_or(self.default_timeout);

        let mut req_builder = match request.method {
            HttpMethod::Get => self.client.get(&request.url),
            HttpMethod::Post => self.client.post(&request.url),
        };

        for (key, value) in &request.headers {
            req_builder = req_builder.header(key, value);
        }

        if let Some(body) = request.body {
            req_builder = req_builder.body(body);
        }

        let response = req_builder.timeout(timeout).send().await.map_err(|e| {
            if e.is_timeout() {
                NetworkError::Timeout { timeout }
            } else {
                NetworkError::ConnectionFailed {
                    message: e.to_string(),
                }
            }
        })?;

        let status = response.status().as_u16();

        if (300..400).contains(&status) {
            let location = response
                .headers()
                .get("location")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_string();
            return Err(ProtocolError::UnexpectedRedirect { location }.into());
        }

        let mut headers = HashMap::new();
        for (key, value) in response.headers() {
            if let Ok(v) = value.to_str() {
                headers.insert(key.to_string().to_lowercase(), v.to_string());
            }
        }

        if let Some(len) = response.content_length() {
            if len as usize > self.max_response_size {
                return Err(ProtocolError::ResponseTooLarge { size: len as usize }.into());
            }
        }

        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::from(NetworkError::Timeout { timeout })
            } else {
                TransportError::from(ProtocolError::InvalidResponse {
                    message: e.to_string(),
                })
            }
        })?;

        if body.len() > self.max_response_size {
            return Err(ProtocolError::ResponseTooLarge { size: body.len() }.into());
        }

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

/// Builds a fresh [`ReqwestHttpTransport`] for every acquisition.
#[derive(Debug, Clone)]
pub struct ReqwestTransportFactory {
    timeout: Duration,
    max_response_size: usize,
}

impl ReqwestTransportFactory {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            max_response_size: DEFAULT_MAX_RESPONSE_SIZE,
        }
    }
}

impl TransportFactory for ReqwestTransportFactory {
    fn acquire(&self) -> Result<Arc<dyn HttpTransport>, TransportError> {
        let transport = ReqwestHttpTransport::with_options(self.timeout, self.max_response_size)?;
        Ok(Arc::new(transport))
    }
}

/// Hands out one shared transport. Acquisition fails once it is closed.
pub struct SharedTransportFactory {
    transport: Arc<dyn HttpTransport>,
}

impl SharedTransportFactory {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self { transport }
    }
}

impl TransportFactory for SharedTransportFactory {
    fn acquire(&self) -> Result<Arc<dyn HttpTransport>, TransportError> {
        if !self.transport.is_open() {
            return Err(NetworkError::TransportClosed.into());
        }
        Ok(self.transport.clone())
    }
}

/// Mock HTTP transport for testing.
#[derive(Default)]
pub struct MockHttpTransport {
    responses: Mutex<VecDeque<Result<HttpResponse, TransportError>>>,
    request_history: Mutex<Vec<HttpRequest>>,
    default_response: Mutex<Option<HttpResponse>>,
    delay: Mutex<Option<Duration>>,
    closed: AtomicBool,
}

impl MockHttpTransport {
    /// Create new mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response to return (FIFO).
    pub fn queue_response(&self, response: HttpResponse) -> &Self {
        self.responses.lock().unwrap().push_back(Ok(response));
        self
    }

    /// Queue a transport failure.
    pub fn queue_error(&self, error: TransportError) -> &Self {
        self.responses.lock().unwrap().push_back(Err(error));
        self
    }

    /// Queue a JSON response.
    pub fn queue_json_response<T: serde::Serialize>(&self, status: u16, body: &T) -> &Self {
        let response = HttpResponse {
            status,
            headers: [("content-type".to_string(), "application/json".to_string())]
                .into_iter()
                .collect(),
            body: serde_json::to_string(body).unwrap(),
        };
        self.queue_response(response)
    }

    /// Set default response when queue is empty.
    pub fn set_default_response(&self, response: HttpResponse) -> &Self {
        *self.default_response.lock().unwrap() = Some(response);
        self
    }

    /// Delay every response.
    pub fn set_delay(&self, delay: Duration) -> &Self {
        *self.delay.lock().unwrap() = Some(delay);
        self
    }

    /// Simulate a defunct handle.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Get request history.
    pub fn get_requests(&self) -> Vec<HttpRequest> {
        self.request_history.lock().unwrap().clone()
    }

    /// Get last request.
    pub fn get_last_request(&self) -> Option<HttpRequest> {
        self.request_history.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl HttpTransport for MockHttpTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        if !self.is_open() {
            return Err(NetworkError::TransportClosed.into());
        }

        self.request_history.lock().unwrap().push(request);

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let next = self.responses.lock().unwrap().pop_front();
        match next {
            Some(result) => result,
            None => self.default_response.lock().unwrap().clone().ok_or_else(|| {
                NetworkError::ConnectionFailed {
                    message: "No mock response available".to_string(),
                }
                .into()
            }),
        }
    }

    fn is_open(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }
}

/// Mock transport factory handing out a scripted sequence of transports.
///
/// The last transport is repeated once the sequence is exhausted.
pub struct MockTransportFactory {
    transports: Vec<Arc<dyn HttpTransport>>,
    acquisitions: AtomicUsize,
}

impl MockTransportFactory {
    pub fn new(transports: Vec<Arc<dyn HttpTransport>>) -> Self {
        Self {
            transports,
            acquisitions: AtomicUsize::new(0),
        }
    }

    /// Number of `acquire` calls so far.
    pub fn acquisitions(&self) -> usize {
        self.acquisitions.load(Ordering::SeqCst)
    }
}

impl TransportFactory for MockTransportFactory {
    fn acquire(&self) -> Result<Arc<dyn HttpTransport>, TransportError> {
        let index = self.acquisitions.fetch_add(1, Ordering::SeqCst);
        self.transports
            .get(index)
            .or_else(|| self.transports.last())
            .cloned()
            .ok_or_else(|| {
                NetworkError::TransportUnavailable {
                    message: "No mock transport available".to_string(),
                }
                .into()
            })
    }
}

/// Create mock HTTP transport for testing.
pub fn create_mock_transport() -> MockHttpTransport {
    MockHttpTransport::new()
}
