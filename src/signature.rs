//! Request signature verification
//!
//! The platform signs the exact request body with ECDSA P-256 over SHA-256
//! and sends the ASN.1 DER signature, base64 encoded, in the
//! `Github-Public-Key-Signature` header. Verification runs on the raw bytes
//! as received; any re-serialization would change the digest.

use std::fmt;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use p256::ecdsa::signature::Verifier;
pub use p256::ecdsa::Signature;

use crate::keys::SigningKey;

/// Header carrying the base64 DER signature.
pub const SIGNATURE_HEADER: &str = "github-public-key-signature";

/// Header naming the key the platform signed with.
pub const KEY_ID_HEADER: &str = "github-public-key-identifier";

/// Longest base64 text that can hold a 72-byte DER signature, plus padding slack.
const MAX_ENCODED_LEN: usize = 100;

/// Shortest and longest DER encodings of a P-256 signature.
const DER_LEN: std::ops::RangeInclusive<usize> = 8..=72;

/// Trust verdict for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The signature verifies against the current key.
    Trusted,
    /// A well-formed signature did not verify, even after a key refresh.
    Untrusted,
    /// The header was absent, not base64, or not a DER signature.
    Malformed,
    /// Verification failed on the first pass; the key may have rotated.
    KeyStale,
}

impl Verdict {
    /// Stable identifier used in logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Trusted => "trusted",
            Self::Untrusted => "untrusted",
            Self::Malformed => "malformed",
            Self::KeyStale => "key_stale",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which verification attempt this is for the current request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pass {
    /// First attempt with the cached key.
    First,
    /// Retry with a key fetched after the first attempt failed.
    AfterRefresh,
}

/// Verify `body` against the signature header value using `key`.
///
/// A mismatch yields [`Verdict::KeyStale`] on [`Pass::First`] and
/// [`Verdict::Untrusted`] on [`Pass::AfterRefresh`]. Malformed input is
/// reported as such on either pass.
#[must_use]
pub fn verify(body: &[u8], signature: Option<&str>, key: &SigningKey, pass: Pass) -> Verdict {
    match decode_header(signature) {
        Some(signature) => check(body, &signature, key, pass),
        None => Verdict::Malformed,
    }
}

/// Verify an already decoded signature.
#[must_use]
pub fn check(body: &[u8], signature: &Signature, key: &SigningKey, pass: Pass) -> Verdict {
    if key.verifying_key().verify(body, signature).is_ok() {
        return Verdict::Trusted;
    }

    match pass {
        Pass::First => Verdict::KeyStale,
        Pass::AfterRefresh => Verdict::Untrusted,
    }
}

/// Decode the signature header value, or `None` if it is absent or malformed.
///
/// Needs no key, so callers can reject malformed requests before any key lookup.
#[must_use]
pub fn decode_header(header: Option<&str>) -> Option<Signature> {
    let header = header?.trim();
    if header.is_empty() || header.len() > MAX_ENCODED_LEN {
        return None;
    }

    let der = STANDARD.decode(header).ok()?;
    if !DER_LEN.contains(&der.len()) {
        return None;
    }

    Signature::from_der(&der).ok()
}
