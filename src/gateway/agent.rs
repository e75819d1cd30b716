//! Downstream chat agent seam
//!
//! [`TrustGate`](super::trust::TrustGate) hands every verified request to an
//! [`Agent`]. The gateway ships two: [`UpstreamAgent`] forwards to an HTTP
//! service, [`UnconfiguredAgent`] answers 503.

use std::time::Duration;

use async_trait::async_trait;
use axum::{
    Json,
    body::Body,
    http::{HeaderMap, HeaderName, StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use serde_json::json;
use tracing::{debug, warn};
use url::Url;

use crate::{Error, Result};

/// A request that passed signature verification.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    /// Correlates logs and error bodies.
    pub request_id: String,
    /// Raw body exactly as signed.
    pub body: Bytes,
    /// Inbound headers, signature headers included.
    pub headers: HeaderMap,
}

/// Chat-completion logic behind the trust boundary.
#[async_trait]
pub trait Agent: Send + Sync + 'static {
    /// Handle a verified request.
    async fn handle(&self, request: InboundRequest) -> Response;
}

/// Used when no upstream is configured.
#[derive(Debug, Default)]
pub struct UnconfiguredAgent;

#[async_trait]
impl Agent for UnconfiguredAgent {
    async fn handle(&self, request: InboundRequest) -> Response {
        warn!(request_id = %request.request_id, "Verified request dropped: no agent upstream configured");
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "error": "Agent unavailable",
                "request_id": request.request_id
            })),
        )
            .into_response()
    }
}

/// Connection-scoped headers that must not cross a proxy hop.
const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    header::HOST,
    header::CONTENT_LENGTH,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
];

fn forwardable(headers: &HeaderMap) -> HeaderMap {
    let mut out = headers.clone();
    for name in &HOP_BY_HOP {
        out.remove(name);
    }
    out.remove(header::UPGRADE);
    out.remove("keep-alive");
    out
}

/// Forwards verified requests to an HTTP upstream and streams the reply back.
#[derive(Debug)]
pub struct UpstreamAgent {
    client: reqwest::Client,
    url: Url,
}

impl UpstreamAgent {
    /// Create an agent forwarding to `url`.
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let url = Url::parse(url).map_err(|e| Error::Config(format!("agent.upstream_url: {e}")))?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Internal(format!("Failed to build agent HTTP client: {e}")))?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl Agent for UpstreamAgent {
    async fn handle(&self, request: InboundRequest) -> Response {
        let result = self
            .client
            .post(self.url.clone())
            .headers(forwardable(&request.headers))
            .body(request.body)
            .send()
            .await;

        let upstream = match result {
            Ok(response) => response,
            Err(e) => {
                warn!(request_id = %request.request_id, error = %e.without_url(), "Agent upstream request failed");
                return (
                    StatusCode::BAD_GATEWAY,
                    Json(json!({
                        "error": "Agent upstream failed",
                        "request_id": request.request_id
                    })),
                )
                    .into_response();
            }
        };

        let status = upstream.status();
        debug!(request_id = %request.request_id, status = %status, "Agent upstream responded");

        let headers = forwardable(upstream.headers());
        let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        response
    }
}
