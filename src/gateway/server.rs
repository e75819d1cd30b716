//! Gateway server

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};

use super::agent::{Agent, UnconfiguredAgent, UpstreamAgent};
use super::router::{AppState, create_router};
use super::trust::{AGENT_PATH, TrustGate};
use crate::config::Config;
use crate::keys::{KeyCache, KeyFetcher};
use crate::oauth::{AUTHORIZATION_PATH, CALLBACK_PATH, OAuthFlow, SessionStore, spawn_reaper};
use crate::{Error, Result};

/// Extension trust gateway
pub struct Gateway {
    /// Configuration
    config: Config,
    keys: Arc<KeyCache>,
    sessions: Arc<SessionStore>,
    gate: Arc<TrustGate>,
    flow: Arc<OAuthFlow>,
}

impl Gateway {
    /// Wire up the components from a validated config.
    pub fn new(config: Config) -> Result<Self> {
        let fetcher = KeyFetcher::new(&config.keys)?;
        let keys = Arc::new(KeyCache::new(Arc::new(fetcher), config.keys.refresh_cooldown));

        let agent: Arc<dyn Agent> = match &config.agent.upstream_url {
            Some(url) => Arc::new(UpstreamAgent::new(url, config.agent.timeout)?),
            None => Arc::new(UnconfiguredAgent),
        };
        let gate = Arc::new(TrustGate::new(Arc::clone(&keys), agent));

        let sessions = Arc::new(SessionStore::new(config.oauth.attempt_ttl));
        let flow = OAuthFlow::new(&config.oauth, config.callback_url()?, Arc::clone(&sessions))
            .map_err(|e| Error::Config(e.to_string()))?;

        Ok(Self {
            config,
            keys,
            sessions,
            gate,
            flow: Arc::new(flow),
        })
    }

    /// The signing key cache.
    #[must_use]
    pub fn keys(&self) -> &Arc<KeyCache> {
        &self.keys
    }

    /// The OAuth session store.
    #[must_use]
    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    /// The full HTTP surface, with layers.
    #[must_use]
    pub fn router(&self) -> Router {
        let state = Arc::new(AppState {
            keys: Arc::clone(&self.keys),
        });
        create_router(state, Arc::clone(&self.gate), Arc::clone(&self.flow), &self.config.server)
    }

    /// Run the gateway
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.config.server.port,
        );

        // Create shutdown channel
        let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);

        // A failed warm-up is not fatal: the first protected request retries.
        match self.keys.refresh().await {
            Ok(key) => info!(key_id = key.identifier().unwrap_or("-"), "Signing key loaded"),
            Err(e) => warn!(error = %e, "Initial signing key fetch failed, will retry on demand"),
        }

        let reaper = spawn_reaper(
            Arc::clone(&self.sessions),
            self.config.oauth.reap_interval,
            shutdown_tx.subscribe(),
        );

        let app = self.router();

        // Bind listener
        let listener = TcpListener::bind(addr).await?;
        let public_url = self.config.public_url()?;

        info!("============================================================");
        info!("COPILOT TRUST GATEWAY v{}", env!("CARGO_PKG_VERSION"));
        info!("============================================================");
        info!(host = %self.config.server.host, port = %self.config.server.port, "Listening");
        info!(public_url = %public_url, "Public address");
        info!("  POST {AGENT_PATH}  (signed chat requests)");
        info!("  GET  {AUTHORIZATION_PATH}  (sign-in)");
        info!("  GET  {CALLBACK_PATH}  (OAuth callback)");
        if self.config.agent.upstream_url.is_none() {
            warn!("No agent upstream configured - verified requests will get 503");
        }
        info!("============================================================");

        // Run server with graceful shutdown
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal(shutdown_tx))
            .await
            .map_err(|e| Error::Internal(e.to_string()))?;

        if tokio::time::timeout(self.config.server.shutdown_timeout, reaper)
            .await
            .is_err()
        {
            warn!("Session reaper did not stop within the shutdown timeout");
        }
        info!("Gateway stopped");

        Ok(())
    }
}

/// Shutdown signal handler
async fn shutdown_signal(shutdown_tx: tokio::sync::broadcast::Sender<()>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
    let _ = shutdown_tx.send(());
}
