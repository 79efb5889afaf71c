//! Probe module for endpoint monitoring.
//!
//! The [`Prober`] turns one HTTP exchange into a [`CheckResult`]. Every
//! failure mode (timeout, transport error, bad status) comes back as data.

mod http;

pub use http::*;

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

use crate::clock::Clock;
use crate::db::{CheckResult, CheckStatus, Endpoint, HttpMethod};

/// Upper bound of the random delay before dispatch.
const MAX_JITTER_MS: u64 = 100;

/// Transport-level failures, before any response was received.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("request failed: {0}")]
    Request(String),
}

/// A fully resolved HTTP request for one probe.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
}

impl HttpRequest {
    /// Build the request an endpoint describes. Bodies ride only on POST, PUT and PATCH.
    pub fn for_endpoint(endpoint: &Endpoint) -> Self {
        Self {
            method: endpoint.method,
            url: endpoint.url.clone(),
            headers: endpoint.headers.clone(),
            body: if endpoint.method.sends_body() {
                endpoint.body.clone()
            } else {
                None
            },
        }
    }
}

/// What came back from the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status_code: u16,
    pub reason: Option<String>,
    pub body_len: usize,
}

/// Sends a single HTTP request.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &HttpRequest, timeout: Duration) -> Result<HttpResponse, TransportError>;
}

/// Executes one check against an endpoint under a time bound.
pub struct Prober {
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    timeout: Duration,
    jitter: bool,
}

impl Prober {
    pub fn new(transport: Arc<dyn Transport>, clock: Arc<dyn Clock>, timeout: Duration) -> Self {
        Self {
            transport,
            clock,
            timeout,
            jitter: true,
        }
    }

    /// Dispatch immediately instead of after a random delay.
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Probe the endpoint. Never fails: every outcome is captured in the result.
    pub async fn probe(&self, endpoint: &Endpoint) -> CheckResult {
        // Stamped before the jitter so the due rule sees the tick time
        let checked_at = self.clock.now();
        if self.jitter {
            // Spread out a large batch
            let jitter = rand::random::<u64>() % MAX_JITTER_MS;
            tokio::time::sleep(Duration::from_millis(jitter)).await;
        }

        let request = HttpRequest::for_endpoint(endpoint);
        let start = Instant::now();

        let outcome = tokio::time::timeout(self.timeout, self.transport.send(&request, self.timeout)).await;
        let response_time = i64::try_from(start.elapsed().as_millis()).unwrap_or(i64::MAX);

        let mut result = CheckResult {
            id: 0,
            endpoint_id: endpoint.id,
            status: CheckStatus::Success,
            status_code: None,
            response_time,
            response_size: 0,
            error_message: None,
            checked_at,
        };

        match outcome {
            Err(_) | Ok(Err(TransportError::Timeout(_))) => {
                result.status = CheckStatus::Timeout;
                result.error_message = Some("Request timeout".to_string());
            }
            Ok(Err(e)) => {
                result.status = CheckStatus::Error;
                result.error_message = Some(e.to_string());
            }
            Ok(Ok(response)) => {
                result.status_code = Some(response.status_code);
                result.response_size = i64::try_from(response.body_len).unwrap_or(i64::MAX);
                if (200..400).contains(&response.status_code) {
                    result.status = CheckStatus::Success;
                } else {
                    result.status = CheckStatus::Failure;
                    result.error_message = Some(format!(
                        "HTTP {}: {}",
                        response.status_code,
                        response.reason.as_deref().unwrap_or("Unknown Status")
                    ));
                }
            }
        }

        tracing::debug!(
            endpoint_id = endpoint.id,
            status = %result.status,
            response_time = result.response_time,
            "Probed {} {}",
            request.method,
            request.url
        );

        result
    }
}
