//! HTTP transport abstraction.
//!
//! [`Transport`] is the seam between the API client and the network. It uses
//! `#[async_trait]` so it can be held as `Arc<dyn Transport>`.
//! [`ReqwestTransport`] is the production implementation.

use std::fmt;

use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};

use crate::error::{ControlError, ControlResult};

/// An outgoing HTTP request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// Request method.
    pub method: Method,
    /// Absolute request URL.
    pub url: String,
    /// Request headers.
    pub headers: HeaderMap,
    /// Request body, if any.
    pub body: Option<Bytes>,
}

/// A received HTTP response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// Response status.
    pub status: StatusCode,
    /// Response body.
    pub body: Bytes,
}

impl HttpResponse {
    /// A response with the given status and body.
    #[must_use]
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Whether the status is 2xx.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// The canonical reason phrase of the status, e.g. `Forbidden`.
    #[must_use]
    pub fn status_text(&self) -> &'static str {
        self.status.canonical_reason().unwrap_or("Unknown status")
    }
}

/// Sends HTTP requests.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Send `request` and return the full response.
    ///
    /// Non-2xx statuses are returned as responses, not errors.
    async fn send(&self, request: HttpRequest) -> ControlResult<HttpResponse>;
}

/// [`Transport`] backed by a shared `reqwest::Client`.
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// A transport with a default client.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport using the given client.
    #[must_use]
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> ControlResult<HttpResponse> {
        let HttpRequest {
            method,
            url,
            headers,
            body,
        } = request;

        let mut builder = self.client.request(method, &url).headers(headers);
        if let Some(body) = body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(|e| ControlError::Transport {
            url: url.clone(),
            source: Box::new(e),
        })?;
        let status = response.status();
        let body = response.bytes().await.map_err(|e| ControlError::Transport {
            url,
            source: Box::new(e),
        })?;
        Ok(HttpResponse { status, body })
    }
}
