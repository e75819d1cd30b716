//! OAuth 2.0 authorization-code flow for the extension's end users
//!
//! - [`OAuthFlow`] issues the authorize redirect and exchanges the callback code
//! - [`SessionStore`] holds single-use [`AuthorizationAttempt`]s and the
//!   resulting [`OAuthToken`]s, in memory only
//! - [`handler`] exposes the two browser-facing endpoints

mod flow;
pub mod handler;
mod pages;
mod session;
mod token;

pub use flow::{Authorized, CallbackParams, FlowState, OAuthError, OAuthFlow, PendingAuthorization};
pub use session::{AuthorizationAttempt, SessionStore, spawn_reaper};
pub use token::{OAuthToken, SessionId};

/// Pre-auth endpoint: starts a flow and redirects to the platform.
pub const AUTHORIZATION_PATH: &str = "/auth/authorization";

/// Callback endpoint the platform redirects back to.
pub const CALLBACK_PATH: &str = "/auth/callback";

/// Cookie binding the browser to its stored token.
pub const SESSION_COOKIE: &str = "copilot_gateway_session";

/// Short-lived cookie tying a pending attempt to the browser that started it.
pub const BINDING_COOKIE: &str = "copilot_gateway_auth";
