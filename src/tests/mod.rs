//! Router-level tests that drive whole login flows through `build_app`.

use std::collections::HashMap;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
    response::Response,
};
use http_body_util::BodyExt;
use tower::ServiceExt;

use crate::{
    AppState,
    auth::password::hash_password,
    build_app,
    config::BrokerConfig,
    db::{AccountRepo, GroupRepo},
    models::{AccountType, CreateGroup, CreatePrincipal},
};

/// Header transport, no provisioning.
pub(crate) const MINIMAL_CONFIG: &str = "[federation]\nadd_new_users = false\n";

const EMULATOR_CONFIG: &str = r#"
[federation]
emulate_idp = true
default_group = "new-users"

[emulator.users.jdoe]
mail = "jdoe@example.edu"
givenName = "Jane"
sn = "Doe"

[emulator.users.nomail]
givenName = "No"
"#;

pub(crate) async fn test_state(config: &str) -> AppState {
    let config = BrokerConfig::from_str(config).expect("test config should parse");
    AppState::new(config)
        .await
        .expect("test state should initialize")
}

pub(crate) async fn test_app(config: &str) -> Router {
    let state = test_state(config).await;
    build_app(&state.config.clone(), state)
}

fn location(response: &Response) -> &str {
    response.headers()[header::LOCATION].to_str().unwrap()
}

async fn body_text(response: Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

/// A cookie jar in front of the router.
struct Browser {
    app: Router,
    cookies: HashMap<String, String>,
}

impl Browser {
    fn new(state: &AppState) -> Self {
        Self {
            app: build_app(&state.config.clone(), state.clone()),
            cookies: HashMap::new(),
        }
    }

    async fn send(&mut self, mut request: Request<Body>) -> Response {
        if !self.cookies.is_empty() {
            let jar = self
                .cookies
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join("; ");
            request
                .headers_mut()
                .insert(header::COOKIE, jar.parse().unwrap());
        }

        let response = self.app.clone().oneshot(request).await.unwrap();
        for set_cookie in response.headers().get_all(header::SET_COOKIE) {
            let set_cookie = set_cookie.to_str().unwrap();
            let pair = set_cookie.split(';').next().unwrap();
            let (name, value) = pair.split_once('=').unwrap();
            if set_cookie.contains("Max-Age=0") {
                self.cookies.remove(name);
            } else {
                self.cookies.insert(name.to_string(), value.to_string());
            }
        }
        response
    }

    async fn get(&mut self, uri: &str) -> Response {
        self.send(Request::get(uri).body(Body::empty()).unwrap())
            .await
    }

    async fn post_form(&mut self, uri: &str, form: &str) -> Response {
        self.send(
            Request::post(uri)
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from(form.to_string()))
                .unwrap(),
        )
        .await
    }

    /// Walk the emulated login up to the broker callback, returning the
    /// callback response.
    async fn emulated_login(&mut self, username: &str, password: &str) -> Response {
        let response = self.get("/auth/login").await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        let sp = location(&response).to_string();
        assert!(sp.starts_with("/auth/emulator/login?target="));

        let response = self.get(&sp).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        let idp = location(&response).to_string();
        let token = idp
            .split_once("token=")
            .map(|(_, t)| t.to_string())
            .unwrap();
        assert_eq!(self.cookies.get("fedauth_sp"), Some(&token));

        let form = self.get(&idp).await;
        assert_eq!(form.status(), StatusCode::OK);
        assert!(body_text(form).await.contains(&token));

        let response = self
            .post_form(
                "/auth/emulator/idp",
                &format!("token={token}&username={username}&password={password}"),
            )
            .await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        let callback = location(&response).to_string();
        assert_eq!(callback, "/auth/idp/authorize");

        self.get(&callback).await
    }
}

async fn seed_group(state: &AppState, name: &str) {
    state
        .db
        .groups()
        .create(CreateGroup {
            name: name.to_string(),
        })
        .await
        .unwrap();
}

async fn seed_local_account(state: &AppState, email: &str, password: &str) {
    state
        .db
        .accounts()
        .create(CreatePrincipal {
            email: email.to_string(),
            first_name: Some("Local".to_string()),
            last_name: None,
            account_type: AccountType::Local,
            enabled: true,
            password_hash: Some(hash_password(password).unwrap()),
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn test_emulated_login_provisions_then_authenticates() {
    let state = test_state(EMULATOR_CONFIG).await;
    seed_group(&state, "new-users").await;
    let mut browser = Browser::new(&state);

    // First pass: unknown user is provisioned and sent back to the IdP
    let response = browser.emulated_login("jdoe", "jdoe").await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert!(location(&response).starts_with("/auth/emulator/login"));
    assert!(!browser.cookies.contains_key("fedauth_sp"));

    let principal = state
        .db
        .accounts()
        .find_by_email("jdoe@example.edu")
        .await
        .unwrap()
        .expect("account should be provisioned");
    assert_eq!(principal.first_name.as_deref(), Some("Jane"));
    assert_eq!(principal.account_type, AccountType::Federated);
    assert!(!principal.enabled);
    let groups = state
        .db
        .groups()
        .list_for_principal(principal.id)
        .await
        .unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].name, "new-users");

    // Second pass: the account exists, the session is written
    let response = browser.emulated_login("jdoe", "jdoe").await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/");
    assert!(browser.cookies.contains_key("fedauth_session"));

    // Federated sessions log out through the SP
    let response = browser.get("/auth/logout").await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/auth/emulator/logout");

    let response = browser.get("/auth/emulator/logout").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_text(response).await.contains("Goodbye"));
}

#[tokio::test]
async fn test_emulated_idp_rejects_mismatched_credentials() {
    let state = test_state(EMULATOR_CONFIG).await;
    let mut browser = Browser::new(&state);

    browser.get("/auth/emulator/login").await;
    let token = browser.cookies.get("fedauth_sp").cloned().unwrap();

    let response = browser
        .post_form(
            "/auth/emulator/idp",
            &format!("token={token}&username=jdoe&password=wrong"),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_text(response).await;
    assert!(body.contains("Sorry. You failed to authenticate. Try again"));
    assert!(body.contains(&token));

    // Unknown usernames get the same answer
    let response = browser
        .post_form(
            "/auth/emulator/idp",
            &format!("token={token}&username=ghost&password=ghost"),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_text(response).await.contains("Try again"));

    // Without an authenticated token the callback is a login failure
    let response = browser.get("/auth/idp/authorize").await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/login-failed");
}

#[tokio::test]
async fn test_emulated_idp_form_rejects_unknown_token() {
    let app = test_app(EMULATOR_CONFIG).await;
    let response = app
        .oneshot(
            Request::get("/auth/emulator/idp?token=bogus")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_emulated_user_without_email_fails_login() {
    let state = test_state(EMULATOR_CONFIG).await;
    seed_group(&state, "new-users").await;
    let mut browser = Browser::new(&state);

    let response = browser.emulated_login("nomail", "nomail").await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/login-failed");
}

#[tokio::test]
async fn test_emulator_routes_absent_without_emulation() {
    let app = test_app(MINIMAL_CONFIG).await;
    let response = app
        .oneshot(
            Request::get("/auth/emulator/login")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_header_transport_login_and_logout() {
    let state = test_state(MINIMAL_CONFIG).await;
    seed_local_account(&state, "jdoe@example.edu", "unused").await;
    let mut browser = Browser::new(&state);

    let response = browser.get("/auth/login").await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert!(location(&response).starts_with("https://localhost:443/Shibboleth.sso/Login?target="));

    let response = browser
        .send(
            Request::get("/auth/idp/authorize")
                .header("REDIRECT_mail", "jdoe@example.edu")
                .header("sn", "Doe")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/");

    let principal = state
        .db
        .accounts()
        .find_by_email("jdoe@example.edu")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(principal.first_name.as_deref(), Some("Local"));
    assert_eq!(principal.last_name.as_deref(), Some("Doe"));

    let response = browser.get("/auth/logout").await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "https://localhost/Shibboleth.sso/Logout");
}

#[tokio::test]
async fn test_header_transport_unknown_user_is_unauthorized() {
    let mut browser = Browser::new(&test_state(MINIMAL_CONFIG).await);
    let response = browser
        .send(
            Request::get("/auth/idp/authorize")
                .header("mail", "stranger@example.edu")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/unauthorized");
}

#[cfg(feature = "server")]
#[tokio::test]
async fn test_header_transport_ignores_untrusted_peer() {
    use std::net::SocketAddr;

    use axum::extract::ConnectInfo;

    let config = format!(
        "{MINIMAL_CONFIG}\n[server.trusted_proxies]\ncidrs = [\"10.0.0.0/8\"]\n"
    );
    let state = test_state(&config).await;
    seed_local_account(&state, "jdoe@example.edu", "unused").await;
    let mut browser = Browser::new(&state);

    let request = |peer: &str| {
        let mut request = Request::get("/auth/idp/authorize")
            .header("mail", "jdoe@example.edu")
            .body(Body::empty())
            .unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo(peer.parse::<SocketAddr>().unwrap()));
        request
    };

    let response = browser.send(request("192.0.2.1:4000")).await;
    assert_eq!(location(&response), "/login-failed");

    let response = browser.send(request("10.1.2.3:4000")).await;
    assert_eq!(location(&response), "/");
}

#[tokio::test]
async fn test_local_login_flow() {
    let state = test_state(MINIMAL_CONFIG).await;
    seed_local_account(&state, "admin@example.edu", "correct horse").await;
    let mut browser = Browser::new(&state);

    // Without a view directory the login destination is a redirect
    let response = browser.get("/auth/local/login").await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "login");

    let response = browser
        .post_form(
            "/auth/local/login",
            "email=admin%40example.edu&password=wrong",
        )
        .await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/auth/local/login");

    let response = browser
        .post_form(
            "/auth/local/login",
            "email=admin%40example.edu&password=correct+horse",
        )
        .await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/");

    // Local sessions log out to the local destination
    let response = browser.get("/auth/logout").await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/");
}

#[tokio::test]
async fn test_local_login_renders_configured_views() {
    let dir = tempfile::TempDir::new().unwrap();
    std::fs::write(dir.path().join("login.html"), "<form>sign in</form>").unwrap();
    let config = format!("{MINIMAL_CONFIG}\n[views]\ndir = {:?}\n", dir.path());

    let app = test_app(&config).await;
    let response = app
        .oneshot(Request::get("/auth/local/login").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "<form>sign in</form>");
}

#[tokio::test]
async fn test_invalid_session_cookie_is_replaced() {
    let state = test_state(MINIMAL_CONFIG).await;
    let mut browser = Browser::new(&state);
    browser
        .cookies
        .insert("fedauth_session".to_string(), "not-a-uuid".to_string());

    browser.get("/auth/logout").await;
    let session = browser.cookies.get("fedauth_session").unwrap();
    assert!(uuid::Uuid::parse_str(session).is_ok());
}

#[tokio::test]
async fn test_responses_carry_request_id() {
    let app = test_app(MINIMAL_CONFIG).await;
    let response = app
        .oneshot(Request::get("/health/live").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert!(response.headers().contains_key("x-request-id"));
}
