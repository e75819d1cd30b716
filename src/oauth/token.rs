//! OAuth token value types

use std::fmt;
use std::time::{Duration, Instant};

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::RngExt;
use serde::Deserialize;

use super::flow::OAuthError;

/// Upper bound on a platform-stated `expires_in`.
const MAX_TOKEN_LIFETIME_SECS: u64 = 366 * 24 * 60 * 60;

/// Opaque identifier of a browser session, sent back as a cookie.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    /// Generate a fresh random session id (256 bits).
    #[must_use]
    pub fn generate() -> Self {
        let bytes: [u8; 32] = rand::rng().random();
        Self(URL_SAFE_NO_PAD.encode(bytes))
    }

    /// Wrap a value taken from a request cookie.
    #[must_use]
    pub fn from_cookie(value: &str) -> Self {
        Self(value.to_string())
    }

    /// The cookie value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionId(<redacted>)")
    }
}

/// Token endpoint response body.
///
/// The platform answers some failures with HTTP 200 and an `error` field,
/// so every field is optional here and checked in [`OAuthToken::from_response`].
#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    access_token: Option<String>,
    token_type: Option<String>,
    expires_in: Option<u64>,
    scope: Option<String>,
    error: Option<String>,
}

/// Access token bound to a browser session.
///
/// `Debug` never prints the token.
#[derive(Clone)]
pub struct OAuthToken {
    access_token: String,
    token_type: String,
    scope: Option<String>,
    expires_at: Instant,
    session: SessionId,
}

impl OAuthToken {
    /// Build a token for `session`.
    #[must_use]
    pub fn new(access_token: String, token_type: String, lifetime: Duration, session: SessionId) -> Self {
        Self {
            access_token,
            token_type,
            scope: None,
            expires_at: Instant::now() + lifetime,
            session,
        }
    }

    /// Validate a token endpoint response.
    ///
    /// `default_lifetime` applies when the platform gives no `expires_in`.
    pub(crate) fn from_response(
        response: TokenResponse,
        session: SessionId,
        default_lifetime: Duration,
    ) -> Result<Self, OAuthError> {
        if let Some(error) = response.error {
            return Err(OAuthError::ExchangeFailed(format!("token endpoint error: {error}")));
        }

        let access_token = response
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| OAuthError::ExchangeFailed("response has no access_token".to_string()))?;

        let lifetime = response
            .expires_in
            .filter(|secs| *secs > 0)
            .map_or(default_lifetime, |secs| {
                Duration::from_secs(secs.min(MAX_TOKEN_LIFETIME_SECS))
            });

        let mut token = Self::new(
            access_token,
            response.token_type.unwrap_or_else(|| "bearer".to_string()),
            lifetime,
            session,
        );
        token.scope = response.scope.filter(|s| !s.is_empty());
        Ok(token)
    }

    /// The access token, for downstream API calls only.
    #[must_use]
    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    /// Token type as returned by the platform (usually `bearer`).
    #[must_use]
    pub fn token_type(&self) -> &str {
        &self.token_type
    }

    /// Granted scopes.
    #[must_use]
    pub fn scope(&self) -> Option<&str> {
        self.scope.as_deref()
    }

    /// Session this token belongs to.
    #[must_use]
    pub fn session(&self) -> &SessionId {
        &self.session
    }

    /// Whether the token has passed its expiry.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }

    /// Time until expiration
    #[must_use]
    pub fn time_until_expiry(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }
}

impl fmt::Debug for OAuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthToken")
            .field("access_token", &"<redacted>")
            .field("token_type", &self.token_type)
            .field("scope", &self.scope)
            .field("expires_in", &self.time_until_expiry())
            .finish_non_exhaustive()
    }
}
