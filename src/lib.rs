//! Copilot Trust Gateway Library
//!
//! Trust boundary for a webhook-driven chat extension.
//!
//! # Features
//!
//! - **Signing keys**: fetches and caches the platform's current ECDSA P-256 key,
//!   refreshing once on suspected rotation
//! - **Signature verification**: every `POST /agent` body is checked against the
//!   `Github-Public-Key-Signature` header before anything downstream sees it
//! - **OAuth**: authorization-code flow with single-use, expiring state tokens
//!   and cookie-bound session tokens held in memory
//! - **Production Ready**: structured logging, request timeouts, graceful shutdown

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod config;
pub mod error;
pub mod gateway;
pub mod keys;
pub mod oauth;
pub mod signature;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
///
/// `RUST_LOG` takes precedence over `level`. `format` is `text` (default) or `json`.
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => subscriber
            .with(fmt::layer().json())
            .try_init()
            .map_err(|e| Error::Internal(format!("tracing already initialised: {e}")))?,
        _ => subscriber
            .with(fmt::layer())
            .try_init()
            .map_err(|e| Error::Internal(format!("tracing already initialised: {e}")))?,
    }

    Ok(())
}
