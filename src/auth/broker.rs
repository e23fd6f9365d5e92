//! Authentication orchestration.
//!
//! The broker drives both login paths to a terminal outcome:
//!
//! ```text
//! federated:    Anonymous -> PendingExternalAuth -> Authenticated
//! provisioning: Anonymous -> Provisioning -> PendingExternalAuth -> Authenticated
//! local:        Anonymous -> Authenticated
//! any path:     ... -> Rejected
//! ```
//!
//! Every operation returns a [`Transition`] naming the state reached and
//! where the browser goes next. Authentication decisions are transitions;
//! only infrastructure failures surface as [`AuthError`].

use std::sync::Arc;

use uuid::Uuid;

use super::{
    AttributeSource, AuthError, CallbackContext,
    password::{verify_dummy, verify_password},
    session_store::{AuthType, SessionRecord, SharedSessionStore},
};
use crate::{
    config::{BrokerConfig, DestinationsConfig},
    db::{AccountRepo, DbError, GroupRepo},
    models::{CreatePrincipal, GroupRef, Principal},
    observability::metrics,
};

/// States of a login.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Anonymous,
    /// Waiting for the IdP to send the browser back
    PendingExternalAuth,
    Authenticated,
    /// A federated account was just created; the login restarts
    Provisioning,
    Rejected,
}

/// Where the browser goes after a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Next {
    /// A URL outside the broker's destinations (IdP, SP logout)
    Redirect(String),
    /// A configured destination: a view name or a URL
    Destination(String),
}

/// Outcome of a broker operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub state: AuthState,
    pub next: Next,
}

impl Transition {
    fn redirect(state: AuthState, url: impl Into<String>) -> Self {
        Self {
            state,
            next: Next::Redirect(url.into()),
        }
    }

    fn destination(state: AuthState, destination: &str) -> Self {
        Self {
            state,
            next: Next::Destination(destination.to_string()),
        }
    }
}

/// Orchestrates federated and local logins against the account repository.
pub struct AuthenticationBroker {
    accounts: Arc<dyn AccountRepo>,
    groups: Arc<dyn GroupRepo>,
    sessions: SharedSessionStore,
    source: Arc<dyn AttributeSource>,
    destinations: DestinationsConfig,
    login_view: String,
    add_new_users: bool,
    default_group: Option<String>,
}

impl AuthenticationBroker {
    pub fn new(
        config: &BrokerConfig,
        accounts: Arc<dyn AccountRepo>,
        groups: Arc<dyn GroupRepo>,
        sessions: SharedSessionStore,
        source: Arc<dyn AttributeSource>,
    ) -> Self {
        tracing::info!(source = source.name(), "Federated attribute source selected");
        Self {
            accounts,
            groups,
            sessions,
            source,
            destinations: config.destinations.clone(),
            login_view: config.local.login_view.clone(),
            add_new_users: config.federation.add_new_users,
            default_group: config.federation.default_group.clone(),
        }
    }

    /// Send the browser to the IdP (real or emulated).
    pub fn start_federated_login(&self) -> Transition {
        metrics::record_auth_outcome("federated", "started");
        Transition::redirect(AuthState::PendingExternalAuth, self.source.login_url())
    }

    /// Show the local login destination.
    pub fn local_create(&self) -> Transition {
        Transition::destination(AuthState::Anonymous, &self.login_view)
    }

    /// Authenticate with a local email and password.
    #[tracing::instrument(skip(self, password), fields(session = %session))]
    pub async fn local_login(
        &self,
        session: Uuid,
        email: &str,
        password: &str,
    ) -> Result<Transition, AuthError> {
        let principal = self.accounts.find_by_email(email).await?;
        let password = password.to_string();

        let verified = match principal
            .as_ref()
            .and_then(|p| p.password_hash.clone())
        {
            Some(hash) => {
                tokio::task::spawn_blocking(move || verify_password(&password, &hash))
                    .await
                    .map_err(|e| AuthError::Internal(format!("Password check failed: {e}")))?
            }
            None => {
                tokio::task::spawn_blocking(move || verify_dummy(&password))
                    .await
                    .map_err(|e| AuthError::Internal(format!("Password check failed: {e}")))?;
                false
            }
        };

        let Some(principal) = principal.filter(|_| verified) else {
            tracing::info!("Local login rejected");
            metrics::record_auth_outcome("local", "rejected");
            return Ok(Transition::destination(
                AuthState::Rejected,
                &self.destinations.local_unauthorized,
            ));
        };

        let mut record = SessionRecord::for_principal(&principal, AuthType::Local);
        match self.groups.find_by_member_email(&principal.email).await {
            Ok(Some(group)) => record = record.with_primary_group(&GroupRef::from(&group)),
            Ok(None) => tracing::debug!("Local principal has no group"),
            Err(e) => {
                let err = AuthError::GroupResolution(e.to_string());
                tracing::warn!(error = %err, "Falling back to undefined group");
            }
        }
        record.write(self.sessions.as_ref(), session).await?;

        tracing::info!(principal_id = %principal.id, "Local login succeeded");
        metrics::record_auth_outcome("local", "authenticated");
        Ok(Transition::destination(
            AuthState::Authenticated,
            &self.destinations.local_authorized,
        ))
    }

    /// Handle the IdP callback: reconcile the returned attributes with the
    /// account repository and write the session.
    #[tracing::instrument(skip(self, ctx), fields(session = %session, source = self.source.name()))]
    pub async fn complete_federated_auth(
        &self,
        session: Uuid,
        ctx: &CallbackContext<'_>,
    ) -> Result<Transition, AuthError> {
        let attributes = self.source.extract(ctx).await?.unwrap_or_default();
        let Some(email) = attributes.email.as_deref() else {
            tracing::info!(error = %AuthError::MissingAttributes, "Federated callback without email");
            metrics::record_auth_outcome("federated", "missing_attributes");
            return Ok(Transition::destination(
                AuthState::Rejected,
                &self.destinations.login_failure,
            ));
        };

        if let Some(mut principal) = self.accounts.find_by_email(email).await? {
            principal.overlay_names(
                attributes.first_name.as_deref(),
                attributes.last_name.as_deref(),
            );
            let principal = self.accounts.save(&principal).await?;
            self.authenticated_session(&principal)
                .await
                .write(self.sessions.as_ref(), session)
                .await?;

            tracing::info!(principal_id = %principal.id, "Federated login succeeded");
            metrics::record_auth_outcome("federated", "authenticated");
            return Ok(Transition::destination(
                AuthState::Authenticated,
                &self.destinations.idp_authenticated,
            ));
        }

        if !self.add_new_users {
            SessionRecord::no_user()
                .write(self.sessions.as_ref(), session)
                .await?;

            tracing::info!("Federated user unknown and provisioning disabled");
            metrics::record_auth_outcome("federated", "no_user");
            return Ok(Transition::destination(
                AuthState::Rejected,
                &self.destinations.idp_unauthorized,
            ));
        }

        self.provision(email, attributes.first_name, attributes.last_name)
            .await?;
        metrics::record_auth_outcome("federated", "provisioned");
        Ok(Transition::redirect(
            AuthState::Provisioning,
            self.source.login_url(),
        ))
    }

    /// Flush the session and send the browser to the matching logout.
    #[tracing::instrument(skip(self), fields(session = %session))]
    pub async fn logout(&self, session: Uuid) -> Result<Transition, AuthError> {
        let prior = self
            .sessions
            .get(session, "auth_type")
            .await?
            .and_then(|v| v.as_str().and_then(AuthType::from_str));
        self.sessions.flush(session).await?;

        tracing::info!(prior = ?prior, "Session cleared");
        metrics::record_auth_outcome("logout", prior.map_or("anonymous", |t| t.as_str()));
        if prior == Some(AuthType::Idp) {
            Ok(Transition::redirect(
                AuthState::Anonymous,
                self.source.logout_url(),
            ))
        } else {
            Ok(Transition::destination(
                AuthState::Anonymous,
                &self.destinations.local_logout,
            ))
        }
    }

    pub fn source(&self) -> &dyn AttributeSource {
        self.source.as_ref()
    }

    /// Session contents for a federated principal, with every group.
    async fn authenticated_session(&self, principal: &Principal) -> SessionRecord {
        let record = SessionRecord::for_principal(principal, AuthType::Idp);
        match self.groups.list_for_principal(principal.id).await {
            Ok(groups) => record.with_groups(groups.iter().map(GroupRef::from).collect()),
            Err(e) => {
                let err = AuthError::GroupResolution(e.to_string());
                tracing::warn!(error = %err, "Falling back to undefined group");
                record
            }
        }
    }

    /// Create a disabled federated account in the default group.
    async fn provision(
        &self,
        email: &str,
        first_name: Option<String>,
        last_name: Option<String>,
    ) -> Result<(), AuthError> {
        let key = self.default_group.as_deref().unwrap_or_default();
        let Some(group) = self.groups.get_by_id_or_name(key).await? else {
            tracing::error!(default_group = %key, "Default group for new federated users not found");
            return Err(AuthError::Repository(DbError::NotFound));
        };

        let input = CreatePrincipal::federated(email, first_name, last_name);
        match self.accounts.create_with_group(input, group.id).await {
            Ok(principal) => {
                tracing::info!(
                    principal_id = %principal.id,
                    group = %group.name,
                    "Provisioned federated account"
                );
                Ok(())
            }
            // Created by a concurrent callback; the restarted login finds it
            Err(DbError::Conflict(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
