//! HTTP transport for webhook attempts.

use crate::error::{DeliveryError, SentinelError};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

/// Header names used on every notification.
pub mod headers {
    pub const CONTENT_TYPE: &str = "Content-Type";
    pub const SIGNATURE: &str = "X-Signature";
    pub const TIMESTAMP: &str = "X-Timestamp";
}

/// Default per-attempt HTTP timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// A fully built webhook request, reused unchanged across retries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookRequest {
    pub url: String,
    pub headers: Vec<(&'static str, String)>,
    pub body: Vec<u8>,
}

impl WebhookRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Sends a single delivery attempt.
///
/// Returns the HTTP status for any response; transport failures (connect,
/// timeout, TLS) are `Err`. Status interpretation is left to the caller.
#[async_trait]
pub trait WebhookTransport: Send + Sync {
    async fn send(&self, request: &WebhookRequest) -> Result<u16, DeliveryError>;
}

/// reqwest-backed transport with a bounded per-request timeout.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, SentinelError> {
        // A redirect is a non-2xx answer, not a success
        let client = Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(concat!("door-sentinel/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SentinelError::HttpClient(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl WebhookTransport for HttpTransport {
    async fn send(&self, request: &WebhookRequest) -> Result<u16, DeliveryError> {
        let mut builder = self.client.post(&request.url);
        for (name, value) in &request.headers {
            builder = builder.header(*name, value);
        }

        let response = builder
            .body(request.body.clone())
            .send()
            .await
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;
        Ok(response.status().as_u16())
    }
}
