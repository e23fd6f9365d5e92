use std::sync::Arc;

use super::{AttributeStore, IDP_PATH};
use crate::{
    auth::{AttributeNames, AuthAttributes, AuthError, StateManager, attributes::CALLBACK_PATH},
    observability::metrics,
};

/// Cookie binding a pending emulated login to the browser.
pub const SP_COOKIE: &str = "fedauth_sp";

/// Result of starting an emulated login.
#[derive(Debug, Clone)]
pub struct Initiation {
    /// Pending token, to be stored in the [`SP_COOKIE`]
    pub token: String,
    /// Where to send the browser (the emulated IdP form)
    pub redirect: String,
}

/// The emulated service provider.
#[derive(Clone)]
pub struct EmulatedSp {
    state: StateManager,
    store: Arc<AttributeStore>,
    names: AttributeNames,
}

impl EmulatedSp {
    pub fn new(state: StateManager, store: Arc<AttributeStore>, names: AttributeNames) -> Self {
        Self {
            state,
            store,
            names,
        }
    }

    /// Register a pending login and point the browser at the IdP.
    ///
    /// The return target is the `target` parameter, else the referring page,
    /// else the broker callback. Only same-site relative paths are accepted.
    pub async fn initiate(
        &self,
        target: Option<&str>,
        referer: Option<&str>,
    ) -> Result<Initiation, AuthError> {
        let target = target
            .and_then(relative_target)
            .or_else(|| referer.and_then(referer_target))
            .unwrap_or_else(|| CALLBACK_PATH.to_string());

        let token = self.state.create(&target).await?;
        tracing::debug!(target = %target, "Emulated SP issued authentication request");

        Ok(Initiation {
            redirect: format!("{IDP_PATH}?token={token}"),
            token,
        })
    }

    /// Resolve the browser's pending login into attributes.
    ///
    /// The token is consumed; a second call with the same token fails.
    pub async fn complete(&self, token: Option<&str>) -> Result<AuthAttributes, AuthError> {
        let token = token.ok_or(AuthError::SessionNotEstablished)?;
        let identity = match self.state.resolve(token).await {
            Ok(identity) => identity,
            Err(e) => {
                return match AuthError::from(e) {
                    AuthError::StateNotFound => Err(AuthError::SessionNotEstablished),
                    other => Err(other),
                };
            }
        };

        let Some(values) = self.store.fetch(&identity) else {
            tracing::warn!(identity = %identity, "Authenticated identity missing from attribute store");
            return Err(AuthError::SessionNotEstablished);
        };
        metrics::record_auth_outcome("emulator", "resolved");
        Ok(AuthAttributes::from_map(&self.names, values))
    }

    /// Close the SP-local session, dropping any pending login.
    pub async fn logout(&self, token: Option<&str>) -> Result<(), AuthError> {
        if let Some(token) = token {
            self.state.discard(token).await?;
        }
        Ok(())
    }
}

/// Accept `candidate` only if it is a path on this site.
fn relative_target(candidate: &str) -> Option<String> {
    let candidate = candidate.trim();
    let same_site = candidate.starts_with('/')
        && !candidate.starts_with("//")
        && !candidate.contains('\\')
        && !candidate.chars().any(char::is_control);
    same_site.then(|| candidate.to_string())
}

/// The path and query of a `Referer` header.
fn referer_target(referer: &str) -> Option<String> {
    if referer.starts_with('/') {
        return relative_target(referer);
    }
    let url = url::Url::parse(referer).ok()?;
    let path = match url.query() {
        Some(query) => format!("{}?{}", url.path(), query),
        None => url.path().to_string(),
    };
    relative_target(&path)
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, time::Duration};

    use rstest::rstest;

    use super::*;
    use crate::{
        auth::{emulator::EmulatedIdp, state::MemoryStateStore},
        config::FederationConfig,
    };

    fn setup() -> (EmulatedSp, EmulatedIdp) {
        let state = StateManager::new(Arc::new(MemoryStateStore::new()), Duration::from_secs(60));
        let store = Arc::new(AttributeStore::new(HashMap::from([(
            "jdoe".to_string(),
            HashMap::from([
                ("mail".to_string(), "jdoe@example.edu".to_string()),
                ("sn".to_string(), "Doe".to_string()),
            ]),
        )])));
        let names = AttributeNames::from(&FederationConfig::default());
        (
            EmulatedSp::new(state.clone(), store.clone(), names.clone()),
            EmulatedIdp::new(state, store, names),
        )
    }

    #[rstest]
    #[case("/dashboard", Some("/dashboard"))]
    #[case("/auth/idp/authorize?x=1", Some("/auth/idp/authorize?x=1"))]
    #[case("https://evil.example.com/", None)]
    #[case("//evil.example.com/", None)]
    #[case("/\\evil.example.com", None)]
    #[case("javascript:alert(1)", None)]
    #[case("", None)]
    fn test_relative_target(#[case] input: &str, #[case] expected: Option<&str>) {
        assert_eq!(relative_target(input).as_deref(), expected);
    }

    #[rstest]
    #[case("https://app.example.edu/courses?id=4", Some("/courses?id=4"))]
    #[case("/home", Some("/home"))]
    #[case("not a url", None)]
    fn test_referer_target(#[case] input: &str, #[case] expected: Option<&str>) {
        assert_eq!(referer_target(input).as_deref(), expected);
    }

    #[tokio::test]
    async fn test_full_exchange() {
        let (sp, idp) = setup();

        let init = sp.initiate(Some("/auth/idp/authorize"), None).await.unwrap();
        assert_eq!(init.redirect, format!("{IDP_PATH}?token={}", init.token));

        let target = idp.login(&init.token, "jdoe", "jdoe").await.unwrap();
        assert_eq!(target, "/auth/idp/authorize");

        let attrs = sp.complete(Some(&init.token)).await.unwrap();
        assert_eq!(attrs.email.as_deref(), Some("jdoe@example.edu"));
        assert_eq!(attrs.last_name.as_deref(), Some("Doe"));

        // Consumed
        assert!(matches!(
            sp.complete(Some(&init.token)).await,
            Err(AuthError::SessionNotEstablished)
        ));
    }

    #[tokio::test]
    async fn test_target_falls_back_to_referer_then_callback() {
        let (sp, idp) = setup();

        let init = sp
            .initiate(Some("https://evil.example.com"), Some("https://app/prev"))
            .await
            .unwrap();
        assert_eq!(idp.redirect_target(&init.token).await.unwrap(), "/prev");

        let init = sp.initiate(None, None).await.unwrap();
        assert_eq!(
            idp.redirect_target(&init.token).await.unwrap(),
            CALLBACK_PATH
        );
    }

    #[tokio::test]
    async fn test_complete_without_session() {
        let (sp, _) = setup();
        assert!(matches!(
            sp.complete(None).await,
            Err(AuthError::SessionNotEstablished)
        ));

        // Pending but never authenticated at the IdP
        let init = sp.initiate(None, None).await.unwrap();
        assert!(matches!(
            sp.complete(Some(&init.token)).await,
            Err(AuthError::SessionNotEstablished)
        ));
    }

    #[tokio::test]
    async fn test_logout_discards_pending_login() {
        let (sp, idp) = setup();
        let init = sp.initiate(None, None).await.unwrap();

        sp.logout(Some(&init.token)).await.unwrap();
        assert!(matches!(
            idp.login(&init.token, "jdoe", "jdoe").await,
            Err(AuthError::UnknownToken)
        ));
        sp.logout(None).await.unwrap();
    }
}
