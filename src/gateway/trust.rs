//! Verify-before-trust sequencing for the protected entry point
//!
//! The body is buffered once as [`Bytes`]; the same bytes are verified and,
//! only on [`Verdict::Trusted`], handed to the [`Agent`]. The signature header
//! is decoded before the key cache is consulted, so a malformed request never
//! causes a key fetch. A stale verdict gets one retry against a freshly
//! fetched key.

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
};
use serde_json::json;
use tracing::{debug, info, warn};

use super::agent::{Agent, InboundRequest};
use crate::keys::{KeyCache, KeyError, SigningKey};
use crate::signature::{self, KEY_ID_HEADER, Pass, SIGNATURE_HEADER, Signature, Verdict};

/// Protected chat endpoint.
pub const AGENT_PATH: &str = "/agent";

/// Rejection produced before the agent is reached.
#[derive(Debug)]
pub enum Rejection {
    /// No key material; no trust decision is possible.
    KeyUnavailable(KeyError),
    /// The request failed verification.
    Denied(Verdict),
}

/// Wraps the [`Agent`] so it only ever sees verified requests.
pub struct TrustGate {
    keys: Arc<KeyCache>,
    agent: Arc<dyn Agent>,
}

impl TrustGate {
    /// Gate `agent` behind signature checks against `keys`.
    #[must_use]
    pub fn new(keys: Arc<KeyCache>, agent: Arc<dyn Agent>) -> Self {
        Self { keys, agent }
    }

    /// The key cache consulted on every request.
    #[must_use]
    pub fn keys(&self) -> &Arc<KeyCache> {
        &self.keys
    }

    /// Decide whether `body` carries a valid signature.
    ///
    /// Returns the terminal verdict (`Trusted`, `Untrusted` or `Malformed`)
    /// or [`Rejection::KeyUnavailable`] when no key could be obtained.
    pub async fn admit(&self, request_id: &str, body: &[u8], headers: &HeaderMap) -> Result<(), Rejection> {
        let header = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());
        let Some(signature) = signature::decode_header(header) else {
            return Err(Rejection::Denied(Verdict::Malformed));
        };

        let key = self.keys.load().await.map_err(Rejection::KeyUnavailable)?;
        log_key_hint(request_id, headers, &key);

        let verdict = match signature::check(body, &signature, &key, Pass::First) {
            Verdict::KeyStale => self.retry_with_fresh_key(request_id, body, &signature, &key).await,
            other => other,
        };

        match verdict {
            Verdict::Trusted => Ok(()),
            other => Err(Rejection::Denied(other)),
        }
    }

    async fn retry_with_fresh_key(
        &self,
        request_id: &str,
        body: &[u8],
        signature: &Signature,
        stale: &SigningKey,
    ) -> Verdict {
        // A concurrent request may already have rotated the cache.
        let fresh = match self.keys.get() {
            Some(current) if current.fingerprint() != stale.fingerprint() => Ok(current),
            _ => self.keys.refresh_for_rotation().await,
        };

        match fresh {
            Ok(key) => signature::check(body, signature, &key, Pass::AfterRefresh),
            Err(KeyError::Cooldown { elapsed, .. }) => {
                debug!(request_id, key_age = ?elapsed, "Skipped key refresh: cooldown");
                Verdict::Untrusted
            }
            Err(e) => {
                warn!(request_id, error = %e, "Key refresh after failed verification failed");
                Verdict::Untrusted
            }
        }
    }
}

fn log_key_hint(request_id: &str, headers: &HeaderMap, key: &SigningKey) {
    let hinted = headers.get(KEY_ID_HEADER).and_then(|v| v.to_str().ok());
    if let (Some(hinted), Some(cached)) = (hinted, key.identifier()) {
        if hinted != cached {
            debug!(request_id, hinted, cached, "Request names a different signing key");
        }
    }
}

/// Route for the protected endpoint, carrying its own state.
pub fn routes(gate: Arc<TrustGate>) -> Router {
    Router::new().route(AGENT_PATH, post(agent_handler)).with_state(gate)
}

async fn agent_handler(State(gate): State<Arc<TrustGate>>, headers: HeaderMap, body: Bytes) -> Response {
    let request_id = uuid::Uuid::new_v4().to_string();

    match gate.admit(&request_id, &body, &headers).await {
        Ok(()) => {
            info!(request_id = %request_id, verdict = %Verdict::Trusted, body_len = body.len(), "Request verified");
            gate.agent
                .handle(InboundRequest {
                    request_id,
                    body,
                    headers,
                })
                .await
        }
        Err(Rejection::KeyUnavailable(e)) => {
            warn!(request_id = %request_id, error = %e, "No signing key available");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "error": "Signing key unavailable",
                    "request_id": request_id
                })),
            )
                .into_response()
        }
        Err(Rejection::Denied(verdict)) => {
            warn!(request_id = %request_id, verdict = %verdict, "Request signature rejected");
            (
                StatusCode::UNAUTHORIZED,
                Json(json!({
                    "error": "Invalid signature",
                    "request_id": request_id
                })),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use p256::ecdsa::{Signature, signature::Signer};
    use parking_lot::Mutex;

    use super::*;
    use crate::keys::KeySource;

    const BODY: &[u8] = br#"{"messages":[]}"#;

    fn signer(seed: u8) -> p256::ecdsa::SigningKey {
        p256::ecdsa::SigningKey::from_slice(&[seed; 32]).unwrap()
    }

    fn public(seed: u8) -> SigningKey {
        SigningKey::from_verifying_key(*signer(seed).verifying_key(), Some(format!("k{seed}")), true).unwrap()
    }

    fn signed_headers(seed: u8, body: &[u8]) -> HeaderMap {
        let signature: Signature = signer(seed).sign(body);
        let mut headers = HeaderMap::new();
        headers.insert(
            SIGNATURE_HEADER,
            STANDARD.encode(signature.to_der().as_bytes()).parse().unwrap(),
        );
        headers
    }

    /// Serves the seeds in order, repeating the last one.
    struct Rotating {
        seeds: Mutex<Vec<u8>>,
        calls: AtomicUsize,
    }

    impl Rotating {
        fn new(seeds: &[u8]) -> Arc<Self> {
            Arc::new(Self {
                seeds: Mutex::new(seeds.to_vec()),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl KeySource for Rotating {
        async fn fetch(&self) -> Result<SigningKey, KeyError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut seeds = self.seeds.lock();
            let seed = if seeds.len() > 1 { seeds.remove(0) } else { seeds[0] };
            Ok(public(seed))
        }
    }

    struct Failing;

    #[async_trait]
    impl KeySource for Failing {
        async fn fetch(&self) -> Result<SigningKey, KeyError> {
            Err(KeyError::Unavailable("HTTP 500".into()))
        }
    }

    #[derive(Default)]
    struct Counting(AtomicUsize);

    #[async_trait]
    impl Agent for Counting {
        async fn handle(&self, _request: InboundRequest) -> Response {
            self.0.fetch_add(1, Ordering::SeqCst);
            StatusCode::OK.into_response()
        }
    }

    fn gate(source: Arc<dyn KeySource>, cooldown: Duration) -> TrustGate {
        TrustGate::new(Arc::new(KeyCache::new(source, cooldown)), Arc::new(Counting::default()))
    }

    #[tokio::test]
    async fn trusts_and_lazily_populates_the_cache() {
        let source = Rotating::new(&[1]);
        let gate = gate(source.clone(), Duration::ZERO);

        gate.admit("r", BODY, &signed_headers(1, BODY)).await.unwrap();

        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert!(gate.keys().get().is_some());
    }

    #[tokio::test]
    async fn follows_a_key_rotation() {
        // GIVEN: the cache holds key 1, the platform has moved to key 2
        let source = Rotating::new(&[1, 2]);
        let gate = gate(source.clone(), Duration::ZERO);
        gate.keys().refresh().await.unwrap();

        // WHEN: a request signed with key 2 arrives
        let result = gate.admit("r", BODY, &signed_headers(2, BODY)).await;

        // THEN: one refresh picks up key 2 and the request is trusted
        assert!(result.is_ok());
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn foreign_signature_is_untrusted_after_one_refresh() {
        let source = Rotating::new(&[1]);
        let gate = gate(source.clone(), Duration::ZERO);
        gate.keys().refresh().await.unwrap();

        let result = gate.admit("r", BODY, &signed_headers(9, BODY)).await;

        assert!(matches!(result, Err(Rejection::Denied(Verdict::Untrusted))));
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn cooldown_suppresses_refresh() {
        let source = Rotating::new(&[1]);
        let gate = gate(source.clone(), Duration::from_secs(3600));
        gate.keys().refresh().await.unwrap();

        let result = gate.admit("r", BODY, &signed_headers(9, BODY)).await;

        assert!(matches!(result, Err(Rejection::Denied(Verdict::Untrusted))));
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn malformed_header_never_refreshes() {
        let source = Rotating::new(&[1]);
        let gate = gate(source.clone(), Duration::ZERO);
        gate.keys().refresh().await.unwrap();

        let result = gate.admit("r", BODY, &HeaderMap::new()).await;

        assert!(matches!(result, Err(Rejection::Denied(Verdict::Malformed))));
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    /// Serves key 1 once, then fails every fetch.
    #[derive(Default)]
    struct FailsAfterFirst(AtomicUsize);

    #[async_trait]
    impl KeySource for FailsAfterFirst {
        async fn fetch(&self) -> Result<SigningKey, KeyError> {
            match self.0.fetch_add(1, Ordering::SeqCst) {
                0 => Ok(public(1)),
                _ => Err(KeyError::Unavailable("HTTP 500".into())),
            }
        }
    }

    /// Counts fetches, all of which fail.
    #[derive(Default)]
    struct CountingFailure(AtomicUsize);

    #[async_trait]
    impl KeySource for CountingFailure {
        async fn fetch(&self) -> Result<SigningKey, KeyError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Err(KeyError::Unavailable("HTTP 500".into()))
        }
    }

    #[tokio::test]
    async fn refresh_error_during_retry_is_untrusted_and_keeps_the_key() {
        // GIVEN: key 1 cached and a key endpoint that now fails
        let source = Arc::new(FailsAfterFirst::default());
        let gate = gate(source.clone(), Duration::ZERO);
        gate.keys().refresh().await.unwrap();

        // WHEN: a request signed with an unknown key triggers the retry
        let result = gate.admit("r", BODY, &signed_headers(9, BODY)).await;

        // THEN: a trust verdict, not an availability error, and key 1 survives
        assert!(matches!(result, Err(Rejection::Denied(Verdict::Untrusted))));
        assert_eq!(source.0.load(Ordering::SeqCst), 2);
        assert_eq!(gate.keys().get().unwrap().identifier(), Some("k1"));
    }

    #[tokio::test]
    async fn malformed_requests_never_touch_an_empty_cache() {
        let source = Arc::new(CountingFailure::default());
        let gate = gate(source.clone(), Duration::from_secs(3600));

        let mut garbage = HeaderMap::new();
        garbage.insert(SIGNATURE_HEADER, "not base64!!".parse().unwrap());
        for headers in [HeaderMap::new(), garbage] {
            let result = gate.admit("r", BODY, &headers).await;
            assert!(matches!(result, Err(Rejection::Denied(Verdict::Malformed))));
        }

        assert_eq!(source.0.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failing_key_endpoint_is_asked_once_per_cooldown() {
        // GIVEN: an empty cache and a key endpoint that always fails
        let source = Arc::new(CountingFailure::default());
        let gate = gate(source.clone(), Duration::from_secs(3600));

        // WHEN: several well-formed requests arrive
        for _ in 0..5 {
            let result = gate.admit("r", BODY, &signed_headers(1, BODY)).await;
            assert!(matches!(result, Err(Rejection::KeyUnavailable(_))));
        }

        // THEN: only the first one reached the endpoint
        assert_eq!(source.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn missing_key_is_unavailable() {
        let gate = gate(Arc::new(Failing), Duration::ZERO);

        let result = gate.admit("r", BODY, &signed_headers(1, BODY)).await;

        assert!(matches!(result, Err(Rejection::KeyUnavailable(KeyError::Unavailable(_)))));
    }
}
