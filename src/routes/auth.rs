//! Broker routes.
//!
//! - `/auth/login` - Starts a federated login (real or emulated IdP)
//! - `/auth/local/login` - Local login form (GET) and submission (POST)
//! - `/auth/idp/authorize` - Federated callback; reconciles the returned attributes
//! - `/auth/logout` - Clears the session and picks the matching logout

use std::collections::HashMap;

use axum::{
    Form, Router,
    extract::{Request, State},
    response::Response,
    routing::get,
};
use tower_cookies::{
    Cookie, Cookies,
    cookie::{SameSite as CookieSameSite, time::Duration as CookieDuration},
};
use uuid::Uuid;

use super::views::respond;
use crate::{
    AppState,
    auth::{AuthError, CALLBACK_PATH, CallbackContext, emulator::SP_COOKIE},
    config::{SameSite, SessionConfig},
};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/auth/login", get(login))
        .route("/auth/local/login", get(local_login_page).post(local_login))
        .route(CALLBACK_PATH, get(idp_authorize))
        .route("/auth/logout", get(logout))
}

// ─────────────────────────────────────────────────────────────────────────────
// Cookies
// ─────────────────────────────────────────────────────────────────────────────

/// Build an HTTP-only cookie with the session's security attributes.
pub(crate) fn build_cookie(
    session_config: &SessionConfig,
    name: &str,
    value: String,
    max_age: CookieDuration,
) -> Cookie<'static> {
    let same_site = match session_config.same_site {
        SameSite::Strict => CookieSameSite::Strict,
        SameSite::Lax => CookieSameSite::Lax,
        SameSite::None => CookieSameSite::None,
    };
    Cookie::build((name.to_string(), value))
        .path("/")
        .http_only(true)
        .secure(session_config.secure)
        .same_site(same_site)
        .max_age(max_age)
        .build()
}

/// Build a removal cookie with the same security attributes as the original.
pub(crate) fn build_removal_cookie(session_config: &SessionConfig, name: &str) -> Cookie<'static> {
    build_cookie(session_config, name, String::new(), CookieDuration::ZERO)
}

/// The browser session id, issuing a new one if the cookie is missing or invalid.
fn browser_session(cookies: &Cookies, session_config: &SessionConfig) -> Uuid {
    if let Some(id) = cookies
        .get(&session_config.cookie_name)
        .and_then(|c| Uuid::parse_str(c.value()).ok())
    {
        return id;
    }

    let id = Uuid::new_v4();
    cookies.add(build_cookie(
        session_config,
        &session_config.cookie_name,
        id.to_string(),
        CookieDuration::seconds(session_config.duration_secs as i64),
    ));
    tracing::debug!(session = %id, "Issued browser session");
    id
}

/// Address of the connecting peer, when the server recorded it.
fn peer_ip(req: &Request) -> Option<std::net::IpAddr> {
    #[cfg(feature = "server")]
    {
        use axum::extract::ConnectInfo;
        return req
            .extensions()
            .get::<ConnectInfo<std::net::SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());
    }
    #[cfg(not(feature = "server"))]
    {
        let _ = req;
        None
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// Start a federated login.
#[tracing::instrument(name = "auth.login", skip(state))]
pub async fn login(State(state): State<AppState>) -> Response {
    respond(state.views.as_ref(), state.broker.start_federated_login())
}

/// Show the local login destination.
#[tracing::instrument(name = "auth.local_create", skip(state))]
pub async fn local_login_page(State(state): State<AppState>) -> Response {
    respond(state.views.as_ref(), state.broker.local_create())
}

/// Local login form submission. Field names come from `[local]`.
#[tracing::instrument(name = "auth.local_login", skip_all)]
pub async fn local_login(
    State(state): State<AppState>,
    cookies: Cookies,
    Form(form): Form<HashMap<String, String>>,
) -> Result<Response, AuthError> {
    let local = &state.config.local;
    let email = form.get(&local.user_field).map(String::as_str).unwrap_or_default();
    let password = form.get(&local.pass_field).map(String::as_str).unwrap_or_default();

    let session = browser_session(&cookies, &state.config.session);
    let transition = state.broker.local_login(session, email, password).await?;
    Ok(respond(state.views.as_ref(), transition))
}

/// Federated callback.
#[tracing::instrument(name = "auth.idp_authorize", skip_all)]
pub async fn idp_authorize(
    State(state): State<AppState>,
    cookies: Cookies,
    req: Request,
) -> Result<Response, AuthError> {
    let sp_token = cookies.get(SP_COOKIE).map(|c| c.value().to_string());
    let ctx = CallbackContext {
        headers: req.headers(),
        peer: peer_ip(&req),
        sp_token: sp_token.as_deref(),
    };

    let session = browser_session(&cookies, &state.config.session);
    let transition = state.broker.complete_federated_auth(session, &ctx).await?;

    // The pending token is single-use either way
    if sp_token.is_some() {
        cookies.remove(build_removal_cookie(&state.config.session, SP_COOKIE));
    }
    Ok(respond(state.views.as_ref(), transition))
}

/// Log out of whichever login established the session.
#[tracing::instrument(name = "auth.logout", skip_all)]
pub async fn logout(
    State(state): State<AppState>,
    cookies: Cookies,
) -> Result<Response, AuthError> {
    let session = browser_session(&cookies, &state.config.session);
    let transition = state.broker.logout(session).await?;
    Ok(respond(state.views.as_ref(), transition))
}
