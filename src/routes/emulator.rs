//! Endpoints of the embedded IdP emulator. Mounted only when
//! `federation.emulate_idp` is set.

use axum::{
    Form, Router,
    extract::{Query, State},
    http::{HeaderMap, header},
    response::{Html, IntoResponse, Redirect, Response},
    routing::get,
};
use serde::Deserialize;
use tower_cookies::{Cookies, cookie::time::Duration as CookieDuration};

use super::auth::{build_cookie, build_removal_cookie};
use crate::{
    AppState,
    auth::{
        AuthError, EMULATOR_LOGIN_PATH, EMULATOR_LOGOUT_PATH, Emulator,
        emulator::{IDP_PATH, SP_COOKIE},
    },
};

const RETRY_PROMPT: &str = "Sorry. You failed to authenticate. Try again";

pub fn routes() -> Router<AppState> {
    Router::new()
        .route(EMULATOR_LOGIN_PATH, get(sp_login))
        .route(IDP_PATH, get(idp_form).post(idp_submit))
        .route(EMULATOR_LOGOUT_PATH, get(sp_logout))
}

fn emulator(state: &AppState) -> Result<&Emulator, AuthError> {
    state
        .emulator
        .as_ref()
        .ok_or_else(|| AuthError::Internal("IdP emulator is not enabled".to_string()))
}

#[derive(Debug, Deserialize)]
pub struct LoginQuery {
    pub target: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct IdpQuery {
    pub token: Option<String>,
}

#[derive(Deserialize)]
pub struct IdpCredentials {
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

/// SP entry point: register a pending login and hand the browser to the IdP.
#[tracing::instrument(name = "emulator.sp_login", skip(state, cookies, headers))]
pub async fn sp_login(
    State(state): State<AppState>,
    cookies: Cookies,
    headers: HeaderMap,
    Query(query): Query<LoginQuery>,
) -> Result<Response, AuthError> {
    let emulator = emulator(&state)?;
    let referer = headers
        .get(header::REFERER)
        .and_then(|v| v.to_str().ok());

    let initiation = emulator.sp.initiate(query.target.as_deref(), referer).await?;
    cookies.add(build_cookie(
        &state.config.session,
        SP_COOKIE,
        initiation.token,
        CookieDuration::seconds(state.config.federation.pending_state_ttl_secs as i64),
    ));
    Ok(Redirect::to(&initiation.redirect).into_response())
}

/// IdP login form. The token comes from the query string or the SP cookie.
#[tracing::instrument(name = "emulator.idp_form", skip_all)]
pub async fn idp_form(
    State(state): State<AppState>,
    cookies: Cookies,
    Query(query): Query<IdpQuery>,
) -> Result<Response, AuthError> {
    let emulator = emulator(&state)?;
    let token = query
        .token
        .or_else(|| cookies.get(SP_COOKIE).map(|c| c.value().to_string()))
        .ok_or(AuthError::UnknownToken)?;

    // Reject stale links before showing a form that cannot succeed
    emulator.idp.redirect_target(&token).await?;
    Ok(login_form(&token, None).into_response())
}

/// IdP credential submission.
#[tracing::instrument(name = "emulator.idp_submit", skip_all)]
pub async fn idp_submit(
    State(state): State<AppState>,
    Form(form): Form<IdpCredentials>,
) -> Result<Response, AuthError> {
    let emulator = emulator(&state)?;
    match emulator
        .idp
        .login(&form.token, &form.username, &form.password)
        .await
    {
        Ok(target) => Ok(Redirect::to(&target).into_response()),
        Err(AuthError::InvalidCredentials) => {
            Ok(login_form(&form.token, Some(RETRY_PROMPT)).into_response())
        }
        Err(e) => Err(e),
    }
}

/// SP logout: drop any pending login and say goodbye.
#[tracing::instrument(name = "emulator.sp_logout", skip_all)]
pub async fn sp_logout(
    State(state): State<AppState>,
    cookies: Cookies,
    headers: HeaderMap,
) -> Result<Response, AuthError> {
    let emulator = emulator(&state)?;
    let token = cookies.get(SP_COOKIE).map(|c| c.value().to_string());
    emulator.sp.logout(token.as_deref()).await?;
    if token.is_some() {
        cookies.remove(build_removal_cookie(&state.config.session, SP_COOKIE));
    }

    let back = headers
        .get(header::REFERER)
        .and_then(|v| v.to_str().ok())
        .filter(|r| {
            r.starts_with("http://")
                || r.starts_with("https://")
                || (r.starts_with('/') && !r.starts_with("//"))
        })
        .unwrap_or("/");
    Ok(goodbye_page(back).into_response())
}

fn login_form(token: &str, error: Option<&str>) -> Html<String> {
    let error = error
        .map(|e| format!("<p class=\"error\">{}</p>\n", escape_html(e)))
        .unwrap_or_default();
    Html(format!(
        "<!DOCTYPE html>\n<html>\n<head><title>Emulated IdP</title></head>\n<body>\n\
         <h1>Emulated IdP login</h1>\n{error}\
         <form method=\"post\" action=\"{IDP_PATH}\">\n\
         <input type=\"hidden\" name=\"token\" value=\"{token}\">\n\
         <label>Username <input type=\"text\" name=\"username\" autofocus></label>\n\
         <label>Password <input type=\"password\" name=\"password\"></label>\n\
         <button type=\"submit\">Log in</button>\n\
         </form>\n</body>\n</html>\n",
        token = escape_html(token),
    ))
}

fn goodbye_page(back: &str) -> Html<String> {
    Html(format!(
        "<!DOCTYPE html>\n<html>\n<head><title>Goodbye</title></head>\n<body>\n\
         <h1>Goodbye</h1>\n<p>You have been logged out.</p>\n\
         <p><a href=\"{}\">Return</a></p>\n</body>\n</html>\n",
        escape_html(back)
    ))
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}
