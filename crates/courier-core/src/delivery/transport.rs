//! Outbound HTTP for webhook deliveries.

use async_trait::async_trait;
use reqwest::{redirect, Client};
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::error::{CourierError, CourierResult, ErrorCode};

/// User agent sent with every delivery.
pub const USER_AGENT: &str = concat!("courier-webhooks/", env!("CARGO_PKG_VERSION"));

/// A signed delivery ready to send.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    /// Exact bytes the signature was computed over.
    pub body: Vec<u8>,
}

/// What the endpoint answered.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    /// Response body, truncated for logging.
    pub body: String,
    pub duration: Duration,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// No response was received.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("request failed: {0}")]
    Request(String),
}

impl From<TransportError> for CourierError {
    fn from(err: TransportError) -> Self {
        let code = match err {
            TransportError::Timeout(_) => ErrorCode::NetTimeout,
            TransportError::Connect(_) => ErrorCode::NetConnectionFailed,
            TransportError::Request(_) => ErrorCode::NetRequestFailed,
        };
        CourierError::network(code, err.to_string())
    }
}

/// Sends one HTTP POST per call. Implementations never retry.
#[async_trait]
pub trait WebhookTransport: Send + Sync {
    async fn post(&self, request: TransportRequest) -> Result<TransportResponse, TransportError>;
}

/// [`WebhookTransport`] over a shared reqwest client.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: Client,
    timeout: Duration,
    max_body_bytes: usize,
}

impl ReqwestTransport {
    /// Build a transport with a per-request timeout.
    ///
    /// Redirects are not followed: a 3xx is reported as the endpoint's
    /// answer.
    pub fn new(timeout: Duration, max_body_bytes: usize) -> CourierResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .redirect(redirect::Policy::none())
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| CourierError::internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            timeout,
            max_body_bytes,
        })
    }

    fn classify(&self, err: reqwest::Error) -> TransportError {
        if err.is_timeout() {
            TransportError::Timeout(self.timeout)
        } else if err.is_connect() {
            TransportError::Connect(err.to_string())
        } else {
            TransportError::Request(err.to_string())
        }
    }

    async fn read_truncated(&self, mut response: reqwest::Response) -> String {
        let mut buf = Vec::new();
        loop {
            match response.chunk().await {
                Ok(Some(chunk)) => {
                    let room = self.max_body_bytes.saturating_sub(buf.len());
                    buf.extend_from_slice(&chunk[..chunk.len().min(room)]);
                    if buf.len() >= self.max_body_bytes {
                        break;
                    }
                }
                Ok(None) => break,
                // The status is already known; a broken body only loses log detail.
                Err(_) => break,
            }
        }
        String::from_utf8_lossy(&buf).into_owned()
    }
}

#[async_trait]
impl WebhookTransport for ReqwestTransport {
    async fn post(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        let started = Instant::now();

        let mut builder = self
            .client
            .post(&request.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder
            .body(request.body)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status().as_u16();
        let body = self.read_truncated(response).await;

        Ok(TransportResponse {
            status,
            body,
            duration: started.elapsed(),
        })
    }
}
