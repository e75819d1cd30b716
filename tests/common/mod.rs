//! Shared fixtures for the integration tests

#![allow(dead_code)]

use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, Response};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use copilot_trust_gateway::config::Config;
use p256::ecdsa::{Signature, SigningKey, signature::Signer};
use p256::pkcs8::{EncodePublicKey, LineEnding};
use serde_json::{Value, json};

pub const KEYS_PATH: &str = "/meta/public_keys/copilot_api";
pub const TOKEN_PATH: &str = "/login/oauth/access_token";
pub const UPSTREAM_PATH: &str = "/chat";

/// Deterministic P-256 key built from a fixed scalar.
pub fn signer(seed: u8) -> SigningKey {
    SigningKey::from_slice(&[seed; 32]).unwrap()
}

pub fn public_pem(seed: u8) -> String {
    signer(seed)
        .verifying_key()
        .to_public_key_pem(LineEnding::LF)
        .unwrap()
}

/// Key-listing document with one current key and one retired key.
pub fn key_listing(current: u8) -> Value {
    json!({
        "public_keys": [
            {
                "key_identifier": format!("retired-{}", current.wrapping_add(100)),
                "key": public_pem(current.wrapping_add(100)),
                "is_current": false
            },
            {
                "key_identifier": format!("key-{current}"),
                "key": public_pem(current),
                "is_current": true
            }
        ]
    })
}

/// Base64 DER signature over `body`, as the platform sends it.
pub fn sign(seed: u8, body: &[u8]) -> String {
    let signature: Signature = signer(seed).sign(body);
    STANDARD.encode(signature.to_der().as_bytes())
}

/// Valid config pointing every outbound call at mock servers.
pub fn config(keys_base: &str, oauth_base: &str, upstream_base: Option<&str>) -> Config {
    let mut config = Config::default();
    config.server.port = 8080;
    config.server.public_url = Some("https://gw.test".to_string());
    config.keys.url = format!("{keys_base}{KEYS_PATH}");
    config.keys.refresh_cooldown = Duration::ZERO;
    config.oauth.client_id = "Iv1.test".to_string();
    config.oauth.client_secret = "client-secret-value".to_string();
    config.oauth.authorize_url = format!("{oauth_base}/login/oauth/authorize");
    config.oauth.token_url = format!("{oauth_base}{TOKEN_PATH}");
    config.agent.upstream_url = upstream_base.map(|base| format!("{base}{UPSTREAM_PATH}"));
    config
}

pub fn signed_post(body: &'static [u8], signature: &str) -> Request<Body> {
    Request::post("/agent")
        .header("content-type", "application/json")
        .header("github-public-key-signature", signature)
        .body(Body::from(body))
        .unwrap()
}

pub fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

pub fn get_with_cookie(uri: &str, cookie: &str) -> Request<Body> {
    Request::get(uri)
        .header("cookie", cookie)
        .body(Body::empty())
        .unwrap()
}

pub async fn body_string(response: Response<Body>) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

pub async fn body_json(response: Response<Body>) -> Value {
    serde_json::from_str(&body_string(response).await).unwrap()
}
