//! In-memory session store
//!
//! Two `DashMap` indices:
//!
//! - `attempts`: state token → [`AuthorizationAttempt`] (single use)
//! - `tokens`:   session id  → [`OAuthToken`]
//!
//! Each attempt is bound to the browser that started it through a nonce
//! cookie; only the SHA-256 of the nonce is stored. Consuming an attempt is a
//! single `DashMap::remove_if` on a matching binding, so the check and the
//! delete are one atomic step and two callbacks racing on the same state
//! cannot both win. Expired entries are evicted lazily on lookup and by the
//! background reaper.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use sha2::{Digest, Sha256};
use tokio::task::JoinHandle;
use tracing::debug;

use super::token::{OAuthToken, SessionId};

/// A pending authorization-code flow.
#[derive(Clone)]
pub struct AuthorizationAttempt {
    state: String,
    browser: [u8; 32],
    created_at: Instant,
    redirect_to: Option<String>,
}

impl AuthorizationAttempt {
    /// Record a new attempt keyed by `state`, bound to `browser_nonce`.
    #[must_use]
    pub fn new(state: String, browser_nonce: &str, redirect_to: Option<String>) -> Self {
        Self {
            state,
            browser: binding_digest(browser_nonce),
            created_at: Instant::now(),
            redirect_to,
        }
    }

    /// The CSRF state token.
    #[must_use]
    pub fn state(&self) -> &str {
        &self.state
    }

    /// Where to send the browser after success.
    #[must_use]
    pub fn redirect_to(&self) -> Option<&str> {
        self.redirect_to.as_deref()
    }

    fn is_expired(&self, ttl: Duration) -> bool {
        self.created_at.elapsed() >= ttl
    }
}

impl std::fmt::Debug for AuthorizationAttempt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationAttempt")
            .field("age", &self.created_at.elapsed())
            .field("redirect_to", &self.redirect_to)
            .finish_non_exhaustive()
    }
}

/// Pending attempts and issued session tokens.
pub struct SessionStore {
    attempts: DashMap<String, AuthorizationAttempt>,
    tokens: DashMap<SessionId, OAuthToken>,
    attempt_ttl: Duration,
}

impl SessionStore {
    /// Create an empty store whose attempts expire after `attempt_ttl`.
    #[must_use]
    pub fn new(attempt_ttl: Duration) -> Self {
        Self {
            attempts: DashMap::new(),
            tokens: DashMap::new(),
            attempt_ttl,
        }
    }

    /// Record a pending attempt.
    pub fn insert_attempt(&self, attempt: AuthorizationAttempt) {
        self.attempts.insert(attempt.state.clone(), attempt);
    }

    /// Lifetime of a pending attempt.
    #[must_use]
    pub fn attempt_ttl(&self) -> Duration {
        self.attempt_ttl
    }

    /// Consume the attempt for `state` if `browser_nonce` matches its binding.
    ///
    /// Returns `None` for unknown, already consumed, expired, or foreign
    /// state; callers cannot tell these apart. A binding mismatch leaves the
    /// attempt in place for the browser that owns it.
    pub fn take_attempt(&self, state: &str, browser_nonce: Option<&str>) -> Option<AuthorizationAttempt> {
        let presented = binding_digest(browser_nonce?);
        let Some((_, attempt)) = self.attempts.remove_if(state, |_, attempt| attempt.browser == presented) else {
            if self.attempts.contains_key(state) {
                debug!("Authorization attempt presented by a different browser");
            }
            return None;
        };
        if attempt.is_expired(self.attempt_ttl) {
            debug!(age = ?attempt.created_at.elapsed(), "Discarded expired authorization attempt");
            return None;
        }
        Some(attempt)
    }

    /// Bind a token to its session, replacing any previous one.
    pub fn store_token(&self, token: OAuthToken) {
        self.tokens.insert(token.session().clone(), token);
    }

    /// The live token for `session`, if any.
    pub fn token(&self, session: &SessionId) -> Option<OAuthToken> {
        let entry = self.tokens.get(session)?;
        let token = entry.clone();
        drop(entry);

        if token.is_expired() {
            // Lazy eviction: remove on access
            self.tokens.remove_if(session, |_, t| t.is_expired());
            debug!("Lazy-evicted expired session token");
            return None;
        }

        Some(token)
    }

    /// Number of attempts awaiting a callback, expired ones included until reaped.
    #[must_use]
    pub fn pending_attempts(&self) -> usize {
        self.attempts.len()
    }

    /// Number of stored session tokens, expired ones included until reaped.
    #[must_use]
    pub fn active_sessions(&self) -> usize {
        self.tokens.len()
    }

    /// Remove expired attempts and tokens. Returns `(attempts, tokens)` removed.
    pub fn reap_expired(&self) -> (usize, usize) {
        let ttl = self.attempt_ttl;

        let before = self.attempts.len();
        self.attempts.retain(|_, attempt| !attempt.is_expired(ttl));
        let attempts = before.saturating_sub(self.attempts.len());

        let before = self.tokens.len();
        self.tokens.retain(|_, token| !token.is_expired());
        let tokens = before.saturating_sub(self.tokens.len());

        (attempts, tokens)
    }
}

fn binding_digest(nonce: &str) -> [u8; 32] {
    Sha256::digest(nonce.as_bytes()).into()
}

/// Spawn a background task that reaps expired entries every `interval`.
///
/// The task exits when the `shutdown` receiver fires.
pub fn spawn_reaper(
    store: Arc<SessionStore>,
    interval: Duration,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let (attempts, tokens) = store.reap_expired();
                    if attempts + tokens > 0 {
                        debug!(attempts, tokens, "Reaped expired sessions");
                    }
                }
                _ = shutdown.recv() => {
                    debug!("Session reaper shutting down");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(lifetime: Duration) -> OAuthToken {
        OAuthToken::new("tok".into(), "bearer".into(), lifetime, SessionId::generate())
    }

    #[test]
    fn attempt_is_consumed_exactly_once() {
        // GIVEN: one pending attempt
        let store = SessionStore::new(Duration::from_secs(600));
        store.insert_attempt(AuthorizationAttempt::new("s1".into(), "n1", Some("/done".into())));

        // WHEN: the state is presented twice
        let first = store.take_attempt("s1", Some("n1"));
        let second = store.take_attempt("s1", Some("n1"));

        // THEN: only the first succeeds
        assert_eq!(first.unwrap().redirect_to(), Some("/done"));
        assert!(second.is_none());
        assert_eq!(store.pending_attempts(), 0);
    }

    #[test]
    fn unknown_state_is_rejected() {
        let store = SessionStore::new(Duration::from_secs(600));
        assert!(store.take_attempt("forged", Some("n1")).is_none());
    }

    #[test]
    fn attempt_only_yields_to_the_browser_that_started_it() {
        // GIVEN: an attempt bound to nonce n1
        let store = SessionStore::new(Duration::from_secs(600));
        store.insert_attempt(AuthorizationAttempt::new("s1".into(), "n1", None));

        // WHEN: another browser presents the state, with and without a nonce
        assert!(store.take_attempt("s1", Some("n2")).is_none());
        assert!(store.take_attempt("s1", None).is_none());

        // THEN: the attempt is still there for its owner
        assert_eq!(store.pending_attempts(), 1);
        assert!(store.take_attempt("s1", Some("n1")).is_some());
    }

    #[test]
    fn expired_attempt_is_rejected_and_removed() {
        // GIVEN: a store whose attempts expire immediately
        let store = SessionStore::new(Duration::ZERO);
        store.insert_attempt(AuthorizationAttempt::new("s1".into(), "n1", None));

        // THEN: the well-formed state is still refused, and not kept around
        assert!(store.take_attempt("s1", Some("n1")).is_none());
        assert_eq!(store.pending_attempts(), 0);
    }

    #[test]
    fn concurrent_takes_have_one_winner() {
        let store = Arc::new(SessionStore::new(Duration::from_secs(600)));
        store.insert_attempt(AuthorizationAttempt::new("race".into(), "n1", None));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || store.take_attempt("race", Some("n1")).is_some())
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }

    #[test]
    fn token_lookup_by_session() {
        let store = SessionStore::new(Duration::from_secs(600));
        let issued = token(Duration::from_secs(60));
        let session = issued.session().clone();
        store.store_token(issued);

        assert_eq!(store.token(&session).unwrap().access_token(), "tok");
        assert!(store.token(&SessionId::generate()).is_none());
    }

    #[test]
    fn expired_token_is_evicted_on_lookup() {
        let store = SessionStore::new(Duration::from_secs(600));
        let issued = token(Duration::ZERO);
        let session = issued.session().clone();
        store.store_token(issued);

        assert!(store.token(&session).is_none());
        assert_eq!(store.active_sessions(), 0);
    }

    #[test]
    fn reaper_sweeps_only_expired_entries() {
        // GIVEN: one live and one expired token, plus an expired attempt
        let store = SessionStore::new(Duration::ZERO);
        store.insert_attempt(AuthorizationAttempt::new("old".into(), "n1", None));
        store.store_token(token(Duration::ZERO));
        store.store_token(token(Duration::from_secs(60)));

        // WHEN: swept
        let (attempts, tokens) = store.reap_expired();

        // THEN: the live token survives
        assert_eq!((attempts, tokens), (1, 1));
        assert_eq!(store.active_sessions(), 1);
    }

    #[tokio::test]
    async fn reaper_task_stops_on_shutdown() {
        let store = Arc::new(SessionStore::new(Duration::ZERO));
        store.insert_attempt(AuthorizationAttempt::new("old".into(), "n1", None));
        let (tx, rx) = tokio::sync::broadcast::channel(1);

        let handle = spawn_reaper(Arc::clone(&store), Duration::from_millis(5), rx);
        tokio::time::sleep(Duration::from_millis(30)).await;
        tx.send(()).unwrap();
        handle.await.unwrap();

        assert_eq!(store.pending_attempts(), 0);
    }
}
