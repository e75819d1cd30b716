//! Browser-facing OAuth endpoints
//!
//! - `GET /auth/authorization[?redirect=/path]` → 303 to the platform, plus
//!   the browser binding cookie
//! - `GET /auth/callback?code=..&state=..` → session cookie plus success page
//!   or redirect, or a generic 400 page

use std::sync::Arc;

use axum::{
    Router,
    extract::{Query, State},
    http::{HeaderValue, StatusCode, header},
    response::{Html, IntoResponse, Redirect, Response},
    routing::get,
};
use axum_extra::extract::CookieJar;
use cookie::{Cookie, CookieBuilder, SameSite};
use serde::Deserialize;
use tracing::{info, warn};

use super::flow::{Authorized, CallbackParams, FlowState, OAuthError, OAuthFlow};
use super::pages::{error_page, success_page};
use super::{AUTHORIZATION_PATH, BINDING_COOKIE, CALLBACK_PATH, SESSION_COOKIE};

/// Pre-auth query parameters
#[derive(Debug, Default, Deserialize)]
pub struct PreAuthParams {
    /// Same-origin path to return to after sign-in
    pub redirect: Option<String>,
}

/// Routes for both endpoints, carrying their own state.
pub fn routes(flow: Arc<OAuthFlow>) -> Router {
    Router::new()
        .route(AUTHORIZATION_PATH, get(pre_auth))
        .route(CALLBACK_PATH, get(callback))
        .with_state(flow)
}

async fn pre_auth(
    State(flow): State<Arc<OAuthFlow>>,
    jar: CookieJar,
    Query(params): Query<PreAuthParams>,
) -> Response {
    let pending = flow.begin(params.redirect.as_deref());
    let ttl = flow.sessions().attempt_ttl();

    let binding = secure_cookie(BINDING_COOKIE, pending.browser_nonce().to_string(), CALLBACK_PATH)
        .max_age(time::Duration::seconds(i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX)))
        .build();

    no_store((jar.add(binding), Redirect::to(pending.redirect_url().as_str())).into_response())
}

async fn callback(
    State(flow): State<Arc<OAuthFlow>>,
    jar: CookieJar,
    Query(params): Query<CallbackParams>,
) -> Response {
    let nonce = jar.get(BINDING_COOKIE).map(|c| c.value().to_string());
    let outcome = flow.complete(params, nonce.as_deref()).await;
    let state = FlowState::after(&outcome);

    match outcome {
        Ok(authorized) => {
            info!(state = %state, redirect = authorized.redirect_to.is_some(), "OAuth callback succeeded");
            authorized_response(jar, &authorized)
        }
        Err(e) => {
            match &e {
                OAuthError::StateMismatch => warn!(state = %state, "OAuth callback rejected: state mismatch"),
                other => warn!(state = %state, error = %other, "OAuth callback failed"),
            }
            no_store((StatusCode::BAD_REQUEST, Html(error_page())).into_response())
        }
    }
}

fn authorized_response(jar: CookieJar, authorized: &Authorized) -> Response {
    let lifetime = authorized.token.time_until_expiry().as_secs();
    let session = secure_cookie(SESSION_COOKIE, authorized.token.session().as_str().to_string(), "/")
        .max_age(time::Duration::seconds(i64::try_from(lifetime).unwrap_or(i64::MAX)))
        .build();
    let jar = jar
        .remove(Cookie::build(BINDING_COOKIE).path(CALLBACK_PATH))
        .add(session);

    let response = match &authorized.redirect_to {
        Some(target) => (jar, Redirect::to(target)).into_response(),
        None => (jar, Html(success_page())).into_response(),
    };
    no_store(response)
}

fn secure_cookie(
    name: &'static str,
    value: String,
    path: &'static str,
) -> CookieBuilder<'static> {
    Cookie::build((name, value))
        .path(path)
        .http_only(true)
        .secure(true)
        .same_site(SameSite::Lax)
}

fn no_store(mut response: Response) -> Response {
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}
