//! Authorization-code flow
//!
//! `Idle → PendingCallback` on [`OAuthFlow::begin`], then
//! `PendingCallback → Authorized | Failed` on [`OAuthFlow::complete`].
//! A failed flow is terminal; the browser restarts at the pre-auth endpoint.
//!
//! Each attempt is bound to the browser that started it: `begin` hands out a
//! nonce for a short-lived cookie, and `complete` only accepts the state
//! alongside that nonce.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::RngExt;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info, warn};
use url::Url;

use super::session::{AuthorizationAttempt, SessionStore};
use super::token::{OAuthToken, SessionId, TokenResponse};
use crate::config::OAuthConfig;

/// OAuth layer errors.
///
/// Messages carry no secret material; the browser only ever sees a generic
/// page, whichever variant occurred.
#[derive(Debug, thiserror::Error)]
pub enum OAuthError {
    /// Unknown, replayed, expired, or foreign state token.
    #[error("state token does not match a live authorization attempt")]
    StateMismatch,
    /// The platform refused the code or returned an unusable token.
    #[error("code exchange failed: {0}")]
    ExchangeFailed(String),
    /// The configured authorization endpoint is not a usable URL.
    #[error("invalid authorization endpoint: {0}")]
    Redirect(String),
}

/// Position of one authorization attempt in the flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    /// No attempt recorded yet.
    Idle,
    /// Redirected to the platform, waiting for the callback.
    PendingCallback,
    /// Token obtained and stored.
    Authorized,
    /// Callback rejected or exchange failed.
    Failed,
}

impl FlowState {
    /// State reached by a completed callback.
    #[must_use]
    pub fn after<T>(outcome: &Result<T, OAuthError>) -> Self {
        if outcome.is_ok() { Self::Authorized } else { Self::Failed }
    }

}

impl fmt::Display for FlowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::PendingCallback => "pending_callback",
            Self::Authorized => "authorized",
            Self::Failed => "failed",
        })
    }
}

/// Query parameters of the callback redirect.
#[derive(Debug, Default, Deserialize)]
pub struct CallbackParams {
    /// Authorization code (on success)
    pub code: Option<String>,
    /// State parameter for CSRF protection
    pub state: Option<String>,
    /// Error code (on failure)
    pub error: Option<String>,
    /// Error description (on failure)
    pub error_description: Option<String>,
}

/// Result of the pre-auth step.
#[derive(Debug)]
pub struct PendingAuthorization {
    redirect_url: Url,
    state: String,
    browser_nonce: String,
}

impl PendingAuthorization {
    /// Platform authorize URL the browser is sent to.
    #[must_use]
    pub fn redirect_url(&self) -> &Url {
        &self.redirect_url
    }

    /// The state token recorded for this attempt.
    #[must_use]
    pub fn state(&self) -> &str {
        &self.state
    }

    /// Nonce the browser must present on the callback.
    #[must_use]
    pub fn browser_nonce(&self) -> &str {
        &self.browser_nonce
    }
}

/// Result of a successful callback.
#[derive(Debug)]
pub struct Authorized {
    /// The issued token, already stored under its session.
    pub token: OAuthToken,
    /// Same-origin path the browser asked to return to.
    pub redirect_to: Option<String>,
}

/// OAuth client for the extension's end users.
pub struct OAuthFlow {
    http: Client,
    client_id: String,
    client_secret: String,
    authorize_url: Url,
    token_url: Url,
    redirect_uri: Url,
    scope: Option<String>,
    sessions: Arc<SessionStore>,
    session_ttl: Duration,
}

impl OAuthFlow {
    /// Build the flow from config.
    ///
    /// `redirect_uri` is the absolute callback address registered with the platform.
    pub fn new(config: &OAuthConfig, redirect_uri: Url, sessions: Arc<SessionStore>) -> Result<Self, OAuthError> {
        let authorize_url =
            Url::parse(&config.authorize_url).map_err(|e| OAuthError::Redirect(format!("authorize_url: {e}")))?;
        let token_url = Url::parse(&config.token_url).map_err(|e| OAuthError::Redirect(format!("token_url: {e}")))?;

        let http = Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("copilot-trust-gateway/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| OAuthError::Redirect(format!("HTTP client: {e}")))?;

        Ok(Self {
            http,
            client_id: config.client_id.clone(),
            client_secret: config.resolve_client_secret(),
            authorize_url,
            token_url,
            redirect_uri,
            scope: config.scope.clone().filter(|s| !s.is_empty()),
            sessions,
            session_ttl: config.session_ttl,
        })
    }

    /// The session store backing this flow.
    #[must_use]
    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    /// Pre-auth step: record a fresh attempt and build the authorize redirect.
    ///
    /// `redirect_to` is kept only if it is a same-origin relative path.
    pub fn begin(&self, redirect_to: Option<&str>) -> PendingAuthorization {
        let state = random_token();
        let browser_nonce = random_token();
        let redirect_to = redirect_to.and_then(sanitize_redirect);

        let mut redirect_url = self.authorize_url.clone();
        {
            let mut query = redirect_url.query_pairs_mut();
            query
                .append_pair("client_id", &self.client_id)
                .append_pair("redirect_uri", self.redirect_uri.as_str())
                .append_pair("state", &state);
            if let Some(scope) = &self.scope {
                query.append_pair("scope", scope);
            }
        }

        self.sessions
            .insert_attempt(AuthorizationAttempt::new(state.clone(), &browser_nonce, redirect_to));
        debug!(from = %FlowState::Idle, to = %FlowState::PendingCallback, "Authorization attempt started");

        PendingAuthorization {
            redirect_url,
            state,
            browser_nonce,
        }
    }

    /// Callback step: consume the attempt, exchange the code, store the token.
    ///
    /// `browser_nonce` is the value of the binding cookie set at pre-auth.
    /// The attempt is removed before any network I/O so a failed exchange
    /// cannot be retried with the same state.
    pub async fn complete(&self, params: CallbackParams, browser_nonce: Option<&str>) -> Result<Authorized, OAuthError> {
        let attempt = params
            .state
            .as_deref()
            .and_then(|state| self.sessions.take_attempt(state, browser_nonce))
            .ok_or(OAuthError::StateMismatch)?;

        if let Some(error) = params.error {
            warn!(
                error = %error,
                description = params.error_description.as_deref().unwrap_or("-"),
                "Platform reported an authorization error"
            );
            return Err(OAuthError::ExchangeFailed(format!("authorization denied: {error}")));
        }

        let code = params
            .code
            .filter(|c| !c.is_empty())
            .ok_or_else(|| OAuthError::ExchangeFailed("callback has no code".to_string()))?;

        let token = self.exchange_code(&code).await?;
        info!(
            token_type = token.token_type(),
            expires_in = ?token.time_until_expiry(),
            "Authorization completed"
        );
        self.sessions.store_token(token.clone());

        Ok(Authorized {
            token,
            redirect_to: attempt.redirect_to().map(str::to_string),
        })
    }

    /// Exchange authorization code for an access token
    async fn exchange_code(&self, code: &str) -> Result<OAuthToken, OAuthError> {
        let params = [
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("code", code),
            ("redirect_uri", self.redirect_uri.as_str()),
        ];

        let response = self
            .http
            .post(self.token_url.clone())
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&params)
            .send()
            .await
            .map_err(|e| OAuthError::ExchangeFailed(format!("token request failed: {}", e.without_url())))?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            // The body may echo the code; keep it out of the error.
            return Err(OAuthError::ExchangeFailed(format!("HTTP {status}")));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|_| OAuthError::ExchangeFailed("malformed token response".to_string()))?;

        OAuthToken::from_response(body, SessionId::generate(), self.session_ttl)
    }
}

impl fmt::Debug for OAuthFlow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthFlow")
            .field("client_id", &self.client_id)
            .field("authorize_url", &self.authorize_url.as_str())
            .field("token_url", &self.token_url.as_str())
            .field("redirect_uri", &self.redirect_uri.as_str())
            .finish_non_exhaustive()
    }
}

/// Random 256-bit URL-safe token, used for state and browser nonces.
fn random_token() -> String {
    let bytes: [u8; 32] = rand::rng().random();
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Keep only same-origin absolute-path targets such as `/chat?x=1`.
fn sanitize_redirect(target: &str) -> Option<String> {
    let target = target.trim();
    let valid = target.starts_with('/')
        && !target.starts_with("//")
        && !target.contains('\\')
        && !target.chars().any(char::is_control);
    valid.then(|| target.to_string())
}
