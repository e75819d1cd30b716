//! Key-listing retrieval and decoding.
//!
//! The platform publishes its keys as
//! `{"public_keys": [{"key": "<PEM>", "key_identifier": "...", "is_current": true}]}`
//! with the PEM newlines escaped as a literal `\n`. Only the entry flagged
//! `is_current` is ever turned into a [`SigningKey`].

use std::fmt;
use std::time::{Duration, SystemTime};

use p256::ecdsa::VerifyingKey;
use p256::pkcs8::{DecodePublicKey, EncodePublicKey};
use reqwest::header::ACCEPT;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::config::KeysConfig;

/// GitHub's published Copilot API signing keys.
pub const DEFAULT_KEYS_URL: &str = "https://api.github.com/meta/public_keys/copilot_api";

/// Failures while acquiring signing key material.
#[derive(Debug, Clone, thiserror::Error)]
pub enum KeyError {
    /// The key endpoint could not be reached or answered with a non-200 status.
    #[error("Signing key endpoint unavailable: {0}")]
    Unavailable(String),

    /// The listing was not JSON or no entry was marked current.
    #[error("Key listing malformed: {0}")]
    Format(String),

    /// The current entry is not a PEM-wrapped ECDSA P-256 public key.
    #[error("Signing key could not be decoded: {0}")]
    Decode(String),

    /// A rotation refresh was requested too soon after the last install.
    #[error("Key refresh skipped: last install {elapsed:?} ago, cooldown {cooldown:?}")]
    Cooldown {
        /// Time since the cached key was installed.
        elapsed: Duration,
        /// Configured minimum interval between rotation refreshes.
        cooldown: Duration,
    },
}

/// Signature scheme bound to a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAlgorithm {
    /// ECDSA over NIST P-256 with SHA-256 message digest.
    EcdsaP256Sha256,
}

impl KeyAlgorithm {
    /// Stable identifier used in logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::EcdsaP256Sha256 => "ecdsa-p256-sha256",
        }
    }
}

impl fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded platform public key.
///
/// Never mutated after construction; a refresh builds a new one.
#[derive(Debug, Clone)]
pub struct SigningKey {
    algorithm: KeyAlgorithm,
    verifying_key: VerifyingKey,
    identifier: Option<String>,
    fingerprint: String,
    is_active: bool,
    fetched_at: SystemTime,
}

impl SigningKey {
    /// Decode a PEM `PUBLIC KEY` block.
    ///
    /// Keys of any family other than ECDSA P-256 are rejected.
    pub fn from_pem(pem: &str, identifier: Option<String>, is_active: bool) -> Result<Self, KeyError> {
        let verifying_key = VerifyingKey::from_public_key_pem(pem.trim())
            .map_err(|e| KeyError::Decode(format!("not an ECDSA P-256 public key: {e}")))?;
        Self::from_verifying_key(verifying_key, identifier, is_active)
    }

    /// Wrap an already-decoded verifying key.
    pub fn from_verifying_key(
        verifying_key: VerifyingKey,
        identifier: Option<String>,
        is_active: bool,
    ) -> Result<Self, KeyError> {
        let der = verifying_key
            .to_public_key_der()
            .map_err(|e| KeyError::Decode(format!("cannot re-encode key: {e}")))?;
        let fingerprint = hex::encode(Sha256::digest(der.as_bytes()));

        Ok(Self {
            algorithm: KeyAlgorithm::EcdsaP256Sha256,
            verifying_key,
            identifier,
            fingerprint,
            is_active,
            fetched_at: SystemTime::now(),
        })
    }

    /// Signature scheme of this key.
    #[must_use]
    pub fn algorithm(&self) -> KeyAlgorithm {
        self.algorithm
    }

    /// Raw key material.
    #[must_use]
    pub fn verifying_key(&self) -> &VerifyingKey {
        &self.verifying_key
    }

    /// Platform key identifier, when the listing carried one.
    #[must_use]
    pub fn identifier(&self) -> Option<&str> {
        self.identifier.as_deref()
    }

    /// Hex SHA-256 of the SPKI DER encoding.
    #[must_use]
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Whether the platform marked this key as current.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.is_active
    }

    /// When the key was retrieved.
    #[must_use]
    pub fn fetched_at(&self) -> SystemTime {
        self.fetched_at
    }
}

#[derive(Debug, Deserialize)]
struct KeyListing {
    public_keys: Vec<ListedKey>,
}

#[derive(Debug, Deserialize)]
struct ListedKey {
    key: String,
    #[serde(default)]
    key_identifier: Option<String>,
    #[serde(default)]
    is_current: bool,
}

/// Parse a key-listing document and decode the entry marked current.
pub fn parse_key_listing(body: &[u8]) -> Result<SigningKey, KeyError> {
    let listing: KeyListing =
        serde_json::from_slice(body).map_err(|e| KeyError::Format(format!("invalid JSON: {e}")))?;

    let current_count = listing.public_keys.iter().filter(|k| k.is_current).count();
    if current_count > 1 {
        warn!(count = current_count, "Key listing marks several keys current, using the first");
    }

    let current = listing
        .public_keys
        .into_iter()
        .find(|k| k.is_current)
        .ok_or_else(|| KeyError::Format("no key marked is_current".to_string()))?;

    let pem = current.key.replace("\\n", "\n");
    SigningKey::from_pem(&pem, current.key_identifier, true)
}

/// Anything that can produce the platform's current signing key.
#[async_trait::async_trait]
pub trait KeySource: Send + Sync + 'static {
    /// Fetch and decode the current key. Must not touch any cache.
    async fn fetch(&self) -> Result<SigningKey, KeyError>;
}

/// HTTPS client for the key-listing endpoint.
pub struct KeyFetcher {
    http: reqwest::Client,
    url: String,
    bearer_token: Option<String>,
}

impl KeyFetcher {
    /// Build a fetcher from the `keys` configuration section.
    pub fn new(config: &KeysConfig) -> Result<Self, KeyError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| KeyError::Unavailable(format!("cannot build HTTP client: {e}")))?;

        Ok(Self {
            http,
            url: config.url.clone(),
            bearer_token: config.resolve_bearer_token(),
        })
    }

    /// Key-listing URL this fetcher reads.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl fmt::Debug for KeyFetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyFetcher")
            .field("url", &self.url)
            .field("bearer_token", &self.bearer_token.as_ref().map(|_| "<redacted>"))
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl KeySource for KeyFetcher {
    async fn fetch(&self) -> Result<SigningKey, KeyError> {
        debug!(url = %self.url, authenticated = self.bearer_token.is_some(), "Fetching signing keys");

        let mut request = self.http.get(&self.url).header(ACCEPT, "application/json");
        if let Some(ref token) = self.bearer_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| KeyError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(KeyError::Unavailable(format!("HTTP {status}")));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| KeyError::Unavailable(format!("failed to read body: {e}")))?;

        let key = parse_key_listing(&body)?;
        info!(
            key_id = key.identifier().unwrap_or("-"),
            fingerprint = %key.fingerprint(),
            algorithm = %key.algorithm(),
            "Fetched current signing key"
        );
        Ok(key)
    }
}
