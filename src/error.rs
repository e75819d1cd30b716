//! Error types for the trust gateway
//!
//! Layer-specific failures live next to the code that raises them
//! ([`crate::keys::KeyError`], [`crate::oauth::OAuthError`]). This enum covers
//! startup and server plumbing.

use std::io;

use thiserror::Error;

/// Result type alias for the trust gateway
pub type Result<T> = std::result::Result<T, Error>;

/// Trust gateway errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Signing key acquisition failed
    #[error(transparent)]
    Key(#[from] crate::keys::KeyError),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Process exit code for a failure surfaced from `main`
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Config(_) => 78, // EX_CONFIG
            Self::Key(_) => 69, // EX_UNAVAILABLE
            _ => 1,
        }
    }
}
