//! Active signing key cache.
//!
//! Readers take a short `parking_lot` read lock and clone an `Arc`; they never
//! wait on network I/O. Refreshes are serialized by a separate async gate so
//! the fetch itself runs outside the key lock and only the swap is locked.
//! A caller that queued behind an in-flight refresh receives that refresh's
//! outcome instead of fetching again.
//!
//! The cooldown bounds fetches in both directions: a verification failure
//! against a young key does not refetch, and a miss on an empty cache shortly
//! after a failed fetch returns that failure.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::fetcher::{KeyError, KeySource, SigningKey};

struct Installed {
    key: Arc<SigningKey>,
    installed_at: Instant,
}

/// Outcome of the most recent completed refresh, shared with queued callers.
#[derive(Default)]
struct RefreshGate {
    last: Option<Result<Arc<SigningKey>, KeyError>>,
}

/// Holds at most one active [`SigningKey`].
pub struct KeyCache {
    source: Arc<dyn KeySource>,
    current: RwLock<Option<Installed>>,
    gate: Mutex<RefreshGate>,
    completed: AtomicU64,
    last_failure: parking_lot::Mutex<Option<(Instant, KeyError)>>,
    rotation_cooldown: Duration,
}

impl KeyCache {
    /// Create an empty cache backed by `source`.
    ///
    /// `rotation_cooldown` is the minimum age of the cached key before a
    /// verification failure may trigger another fetch, and the backoff after
    /// a failed fetch.
    #[must_use]
    pub fn new(source: Arc<dyn KeySource>, rotation_cooldown: Duration) -> Self {
        Self {
            source,
            current: RwLock::new(None),
            gate: Mutex::new(RefreshGate::default()),
            completed: AtomicU64::new(0),
            last_failure: parking_lot::Mutex::new(None),
            rotation_cooldown,
        }
    }

    /// The currently cached key, if one has been installed.
    #[must_use]
    pub fn get(&self) -> Option<Arc<SigningKey>> {
        self.current.read().as_ref().map(|slot| Arc::clone(&slot.key))
    }

    /// Age of the cached key.
    #[must_use]
    pub fn age(&self) -> Option<Duration> {
        self.current.read().as_ref().map(|slot| slot.installed_at.elapsed())
    }

    /// The cached key, fetching one on a miss.
    ///
    /// Within the cooldown after a failed fetch, a miss returns that failure
    /// without contacting the key endpoint.
    pub async fn load(&self) -> Result<Arc<SigningKey>, KeyError> {
        if let Some(key) = self.get() {
            return Ok(key);
        }

        let ticket = self.completed.load(Ordering::Acquire);
        if let Some((failed_at, error)) = self.last_failure.lock().as_ref() {
            if failed_at.elapsed() < self.rotation_cooldown {
                debug!(since = ?failed_at.elapsed(), "Key fetch backing off after failure");
                return Err(error.clone());
            }
        }

        self.refresh_from(ticket).await
    }

    /// Fetch a fresh key and swap it in.
    ///
    /// On failure the previous key stays in place and the error is returned.
    pub async fn refresh(&self) -> Result<Arc<SigningKey>, KeyError> {
        let ticket = self.completed.load(Ordering::Acquire);
        self.refresh_from(ticket).await
    }

    /// Refresh because a signature failed to verify against the cached key.
    ///
    /// Returns [`KeyError::Cooldown`] without fetching when the cached key is
    /// younger than the rotation cooldown.
    pub async fn refresh_for_rotation(&self) -> Result<Arc<SigningKey>, KeyError> {
        let ticket = self.completed.load(Ordering::Acquire);

        if let Some(elapsed) = self.age() {
            if elapsed < self.rotation_cooldown {
                return Err(KeyError::Cooldown {
                    elapsed,
                    cooldown: self.rotation_cooldown,
                });
            }
        }

        self.refresh_from(ticket).await
    }

    async fn refresh_from(&self, ticket: u64) -> Result<Arc<SigningKey>, KeyError> {
        let mut gate = self.gate.lock().await;

        // Another refresh completed while we queued: share its result
        if self.completed.load(Ordering::Acquire) != ticket {
            if let Some(ref last) = gate.last {
                debug!("Coalesced onto concurrent key refresh");
                return last.clone();
            }
        }

        let outcome = match self.source.fetch().await {
            Ok(key) => self.install(key),
            Err(e) => Err(e),
        };

        *self.last_failure.lock() = outcome.as_ref().err().map(|e| (Instant::now(), e.clone()));
        gate.last = Some(outcome.clone());
        self.completed.fetch_add(1, Ordering::Release);
        outcome
    }

    fn install(&self, key: SigningKey) -> Result<Arc<SigningKey>, KeyError> {
        if !key.is_active() {
            return Err(KeyError::Format(
                "refusing to install a key not marked current".to_string(),
            ));
        }

        let key = Arc::new(key);
        let previous = self.current.write().replace(Installed {
            key: Arc::clone(&key),
            installed_at: Instant::now(),
        });

        let rotated = previous.is_some_and(|p| p.key.fingerprint() != key.fingerprint());
        info!(
            key_id = key.identifier().unwrap_or("-"),
            fingerprint = %key.fingerprint(),
            rotated,
            "Installed signing key"
        );
        Ok(key)
    }
}
