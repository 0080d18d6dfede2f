//! Plain-HTTP transport shared by the control-plane and backup clients.
//!
//! The typed clients only see [`HttpTransport`]; [`HyperTransport`] is the
//! production implementation and `mock::MockTransport` replays
//! scripted responses in tests.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::header::{ACCEPT, CONTENT_TYPE};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use tracing::trace;

pub use hyper::Method;

use crate::error::{OrchestratorError, Result};

/// Status and raw body of a completed exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body as text, lossy. Used for diagnostics and substring checks.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Decode the body as JSON, attributing failures to `endpoint`.
    pub fn json<T: serde::de::DeserializeOwned>(&self, endpoint: &str) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(|source| OrchestratorError::Decode {
            endpoint: endpoint.to_string(),
            source,
        })
    }
}

/// One HTTP request/response exchange.
///
/// Implementations map connection failures and timeouts to
/// [`OrchestratorError::Unavailable`] with no status. Any received response,
/// whatever its status, is returned as `Ok`.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, method: Method, url: &str, body: Option<Bytes>) -> Result<HttpResponse>;
}

/// hyper-based transport for plain HTTP endpoints.
#[derive(Clone)]
pub struct HyperTransport {
    client: Client<HttpConnector, Full<Bytes>>,
    timeout: Duration,
}

impl HyperTransport {
    pub fn new(timeout: Duration) -> Self {
        let client = Client::builder(TokioExecutor::new()).build_http();
        Self { client, timeout }
    }
}

impl std::fmt::Debug for HyperTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HyperTransport")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

fn unavailable(url: &str, reason: impl std::fmt::Display) -> OrchestratorError {
    OrchestratorError::Unavailable {
        operation: "http request",
        endpoint: url.to_string(),
        status: None,
        reason: reason.to_string(),
    }
}

#[async_trait]
impl HttpTransport for HyperTransport {
    async fn send(&self, method: Method, url: &str, body: Option<Bytes>) -> Result<HttpResponse> {
        let mut builder = hyper::Request::builder()
            .method(method.clone())
            .uri(url)
            .header(ACCEPT, "application/json");
        if body.is_some() {
            builder = builder.header(CONTENT_TYPE, "application/json");
        }
        let request = builder
            .body(Full::new(body.unwrap_or_default()))
            .map_err(|e| OrchestratorError::InvalidRequest(format!("cannot build request for {url}: {e}")))?;

        let exchange = async {
            let response = self
                .client
                .request(request)
                .await
                .map_err(|e| unavailable(url, e))?;
            let status = response.status().as_u16();
            let body = response
                .into_body()
                .collect()
                .await
                .map_err(|e| unavailable(url, e))?
                .to_bytes();
            Ok::<_, OrchestratorError>(HttpResponse { status, body })
        };

        let response = tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| unavailable(url, format!("timed out after {:?}", self.timeout)))??;
        trace!(%method, url, status = response.status, bytes = response.body.len(), "HTTP exchange");
        Ok(response)
    }
}
