use std::sync::Arc;

use subtle::ConstantTimeEq;

use super::AttributeStore;
use crate::{
    auth::{AttributeNames, AuthAttributes, AuthError, StateManager},
    observability::metrics,
};

/// Login form of the emulated IdP.
pub const IDP_PATH: &str = "/auth/emulator/idp";

/// The emulated identity provider.
///
/// Accepts a username/password pair only when both are identical and the
/// username is a known emulated user.
#[derive(Clone)]
pub struct EmulatedIdp {
    state: StateManager,
    store: Arc<AttributeStore>,
    names: AttributeNames,
}

impl EmulatedIdp {
    pub fn new(state: StateManager, store: Arc<AttributeStore>, names: AttributeNames) -> Self {
        Self {
            state,
            store,
            names,
        }
    }

    /// Attributes of a known emulated user.
    pub fn fetch_attributes(&self, identity: &str) -> Option<AuthAttributes> {
        self.store
            .fetch(identity)
            .map(|values| AuthAttributes::from_map(&self.names, values))
    }

    pub async fn mark_authenticated(&self, token: &str, identity: &str) -> Result<(), AuthError> {
        Ok(self.state.mark_authenticated(token, identity).await?)
    }

    /// Where the browser returns once `token` is authenticated.
    pub async fn redirect_target(&self, token: &str) -> Result<String, AuthError> {
        Ok(self.state.target(token).await?)
    }

    /// Check a submitted credential pair and, on success, authenticate the
    /// pending login. Returns the URL to send the browser to.
    #[tracing::instrument(skip(self, token, password))]
    pub async fn login(
        &self,
        token: &str,
        username: &str,
        password: &str,
    ) -> Result<String, AuthError> {
        let matches: bool = username.as_bytes().ct_eq(password.as_bytes()).into();
        if !matches || username.is_empty() || self.store.fetch(username).is_none() {
            tracing::info!("Emulated IdP rejected credentials");
            metrics::record_auth_outcome("emulator", "invalid_credentials");
            return Err(AuthError::InvalidCredentials);
        }

        let target = self.redirect_target(token).await?;
        self.mark_authenticated(token, username).await?;

        tracing::info!("Emulated IdP authenticated user");
        metrics::record_auth_outcome("emulator", "authenticated");
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, time::Duration};

    use super::*;
    use crate::{
        auth::state::{MemoryStateStore, StateError},
        config::FederationConfig,
    };

    fn setup() -> (EmulatedIdp, StateManager) {
        let state = StateManager::new(Arc::new(MemoryStateStore::new()), Duration::from_secs(60));
        let store = AttributeStore::new(HashMap::from([(
            "jdoe".to_string(),
            HashMap::from([
                ("mail".to_string(), "jdoe@example.edu".to_string()),
                ("givenName".to_string(), "Jane".to_string()),
            ]),
        )]));
        let idp = EmulatedIdp::new(
            state.clone(),
            Arc::new(store),
            AttributeNames::from(&FederationConfig::default()),
        );
        (idp, state)
    }

    #[tokio::test]
    async fn test_matching_pair_authenticates() {
        let (idp, state) = setup();
        let token = state.create("/auth/idp/authorize").await.unwrap();

        let target = idp.login(&token, "jdoe", "jdoe").await.unwrap();
        assert_eq!(target, "/auth/idp/authorize");
        assert_eq!(state.resolve(&token).await.unwrap(), "jdoe");

        let attrs = idp.fetch_attributes("jdoe").unwrap();
        assert_eq!(attrs.email.as_deref(), Some("jdoe@example.edu"));
        assert_eq!(attrs.first_name.as_deref(), Some("Jane"));
        assert!(attrs.last_name.is_none());
    }

    #[tokio::test]
    async fn test_mismatched_pair_marks_nothing() {
        let (idp, state) = setup();
        let token = state.create("/cb").await.unwrap();

        let result = idp.login(&token, "jdoe", "wrong").await;
        assert!(matches!(result, Err(AuthError::InvalidCredentials)));
        assert!(matches!(
            state.resolve(&token).await,
            Err(StateError::NotFound)
        ));

        // The pending login is still usable
        idp.login(&token, "jdoe", "jdoe").await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_user_is_indistinguishable() {
        let (idp, state) = setup();
        let token = state.create("/cb").await.unwrap();

        let result = idp.login(&token, "mallory", "mallory").await;
        assert!(matches!(result, Err(AuthError::InvalidCredentials)));

        let result = idp.login(&token, "", "").await;
        assert!(matches!(result, Err(AuthError::InvalidCredentials)));
    }

    #[tokio::test]
    async fn test_unknown_token() {
        let (idp, _) = setup();
        assert!(matches!(
            idp.login("bogus", "jdoe", "jdoe").await,
            Err(AuthError::UnknownToken)
        ));
        assert!(matches!(
            idp.redirect_target("bogus").await,
            Err(AuthError::UnknownToken)
        ));
    }
}
