//! HTTP transport for the client half. Requests and responses are plain data
//! so the coordinator can be driven by an in-process transport in tests.
//!
//! `HttpTransport` keeps a cookie jar: the refresh carrier set by the server
//! lives there and is never visible to callers. `forget_carrier` swaps the
//! jar for an empty one.

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::Method;
use serde::de::DeserializeOwned;
use std::{fmt, sync::Arc, time::Duration};
use tracing::debug;

use super::{config::ClientConfig, error::ClientError};
use crate::APP_USER_AGENT;

/// Maximum number of error body characters surfaced to callers.
const MAX_ERROR_CHARS: usize = 200;

#[derive(Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub bearer: Option<String>,
    pub body: Option<serde_json::Value>,
}

impl ApiRequest {
    #[must_use]
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    #[must_use]
    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    #[must_use]
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            bearer: None,
            body: None,
        }
    }

    #[must_use]
    pub fn with_json(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    #[must_use]
    pub fn with_bearer(mut self, token: impl Into<String>) -> Self {
        self.bearer = Some(token.into());
        self
    }

    /// Path without query string, used for endpoint matching.
    #[must_use]
    pub fn route(&self) -> &str {
        self.path.split(['?', '#']).next().unwrap_or_default()
    }
}

// Keep the bearer out of logs.
impl fmt::Debug for ApiRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiRequest")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("bearer", &self.bearer.as_ref().map(|_| "<redacted>"))
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Debug)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl ApiResponse {
    #[must_use]
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Decode a JSON body.
    ///
    /// # Errors
    ///
    /// [`ClientError::Parse`] when the body is not the expected JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ClientError> {
        serde_json::from_slice(&self.body)
            .map_err(|err| ClientError::Parse(format!("Failed to decode response: {err}")))
    }

    /// Turn a non-success response into [`ClientError::Http`].
    #[must_use]
    pub fn into_http_error(self) -> ClientError {
        ClientError::Http {
            status: self.status,
            message: sanitize_body(&String::from_utf8_lossy(&self.body)),
        }
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one request. Non-2xx answers are `Ok`; only failures to get an
    /// answer at all are errors.
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ClientError>;

    /// Drop the refresh carrier held on the client side, whatever the server
    /// answered last.
    ///
    /// # Errors
    ///
    /// [`ClientError::Config`] if a fresh carrier store cannot be set up.
    fn forget_carrier(&self) -> Result<(), ClientError>;
}

/// reqwest-backed transport with a cookie store and a fixed request timeout.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: Arc<RwLock<reqwest::Client>>,
    base_url: String,
    timeout: Duration,
}

impl HttpTransport {
    /// # Errors
    ///
    /// [`ClientError::Config`] if the base URL is empty or the HTTP client
    /// cannot be built.
    pub fn new(config: &ClientConfig) -> Result<Self, ClientError> {
        let base_url = config.base_url().trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(ClientError::Config("API base URL is empty".to_string()));
        }
        let timeout = config.request_timeout();
        Ok(Self {
            client: Arc::new(RwLock::new(build_client(timeout)?)),
            base_url,
            timeout,
        })
    }
}

fn build_client(timeout: Duration) -> Result<reqwest::Client, ClientError> {
    reqwest::Client::builder()
        .user_agent(APP_USER_AGENT)
        .cookie_store(true)
        .timeout(timeout)
        .build()
        .map_err(|err| ClientError::Config(format!("Failed to build HTTP client: {err}")))
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ClientError> {
        let url = build_url_with_base(&self.base_url, &request.path);
        debug!(method = %request.method, %url, "sending request");

        let client = self.client.read().clone();
        let mut builder = client.request(request.method, &url);
        if let Some(token) = &request.bearer {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(map_request_error)?;
        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(map_request_error)?;
        Ok(ApiResponse::new(status, body.to_vec()))
    }

    fn forget_carrier(&self) -> Result<(), ClientError> {
        let fresh = build_client(self.timeout)?;
        *self.client.write() = fresh;
        debug!("cookie jar dropped");
        Ok(())
    }
}

/// Builds a URL from an explicit base URL and the provided path.
fn build_url_with_base(base_url: &str, path: &str) -> String {
    let base = base_url.trim().trim_end_matches('/');
    let path = path.trim();

    if base.is_empty() {
        path.to_string()
    } else {
        format!("{}/{}", base, path.trim_start_matches('/'))
    }
}

/// Maps reqwest failures into `ClientError` variants with timeout detection.
fn map_request_error(err: reqwest::Error) -> ClientError {
    if err.is_timeout() {
        ClientError::Timeout("Request timed out. Please try again.".to_string())
    } else {
        ClientError::Network(format!("Unable to reach the server: {err}"))
    }
}

/// Trims and truncates HTTP error bodies for caller-facing messages.
fn sanitize_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        "Request failed.".to_string()
    } else {
        trimmed.chars().take(MAX_ERROR_CHARS).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_url_joins_slashes() {
        assert_eq!(
            build_url_with_base("http://localhost:8080/", "/auth/me"),
            "http://localhost:8080/auth/me"
        );
        assert_eq!(build_url_with_base("", "/auth/me"), "/auth/me");
    }

    #[test]
    fn sanitize_body_truncates_and_defaults() {
        assert_eq!(sanitize_body("   "), "Request failed.");
        assert_eq!(sanitize_body(&"x".repeat(500)).len(), MAX_ERROR_CHARS);
    }

    #[test]
    fn route_strips_query() {
        assert_eq!(ApiRequest::get("/auth/me?x=1").route(), "/auth/me");
        assert_eq!(ApiRequest::post("/auth/refresh").route(), "/auth/refresh");
    }

    #[test]
    fn debug_redacts_bearer() {
        let request = ApiRequest::get("/auth/me").with_bearer("secret-token");
        assert!(!format!("{request:?}").contains("secret-token"));
    }

    #[test]
    fn response_helpers() {
        let ok = ApiResponse::new(200, br#"{"accessToken":"t"}"#.to_vec());
        assert!(ok.is_success());
        let value: serde_json::Value = ok.json().unwrap_or_default();
        assert_eq!(value.get("accessToken").and_then(|v| v.as_str()), Some("t"));

        let err = ApiResponse::new(503, b"  unavailable ".to_vec()).into_http_error();
        assert_eq!(
            err,
            ClientError::Http {
                status: 503,
                message: "unavailable".to_string()
            }
        );
    }

    #[test]
    fn empty_base_url_is_config_error() {
        assert!(matches!(
            HttpTransport::new(&ClientConfig::new("  ")),
            Err(ClientError::Config(_))
        ));
    }
}
