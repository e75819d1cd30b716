//! HTTP router and handlers

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use serde_json::json;
use tower::ServiceBuilder;
use tower_http::{
    catch_panic::CatchPanicLayer, limit::RequestBodyLimitLayer, timeout::TimeoutLayer, trace::TraceLayer,
};

use super::trust::{self, TrustGate};
use crate::config::ServerConfig;
use crate::keys::KeyCache;
use crate::oauth::{OAuthFlow, handler as oauth_handler};

/// Shared application state
pub struct AppState {
    /// Signing key cache, reported by `/health`
    pub keys: Arc<KeyCache>,
}

/// Create the router
///
/// The protected endpoint and the OAuth endpoints carry their own state and
/// are merged in; the layers apply to all of them. The body limit sits
/// outside the timeout.
pub fn create_router(state: Arc<AppState>, gate: Arc<TrustGate>, flow: Arc<OAuthFlow>, server: &ServerConfig) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .with_state(state)
        .merge(trust::routes(gate))
        .merge(oauth_handler::routes(flow))
        .layer(DefaultBodyLimit::disable())
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CatchPanicLayer::new())
                .layer(RequestBodyLimitLayer::new(server.max_body_size))
                .layer(TimeoutLayer::with_status_code(
                    StatusCode::REQUEST_TIMEOUT,
                    server.request_timeout,
                )),
        )
}

/// Health check handler
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "signing_key": state.keys.get().is_some(),
        "version": env!("CARGO_PKG_VERSION")
    }))
}
