//! Pending authentication state shared by the emulated SP and IdP.
//!
//! The SP registers a target URL and receives an opaque token; the IdP marks
//! the token authenticated for an identity; the SP then resolves the token
//! exactly once to learn who logged in.
//!
//! Storage backends:
//! - `MemoryStateStore`: In-memory storage (single-node only)
//! - `CacheStateStore`: Uses the Cache infrastructure (Redis/Memory)

use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::{
    cache::{Cache, CacheError, CacheExt},
    observability::metrics,
};

/// Errors that can occur during pending-state operations.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// Resolution of a token that is unknown, consumed, expired or not yet authenticated.
    #[error("Pending authentication state not found")]
    NotFound,

    /// An IdP-side operation on a token that is unknown, expired or already authenticated.
    #[error("Unknown authentication token")]
    UnknownToken,

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),
}

pub type StateResult<T> = Result<T, StateError>;

/// A login in flight between the emulated SP and IdP.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingAuthState {
    /// Where the IdP sends the browser once the user is authenticated
    pub target: String,

    /// When this state was created
    pub created_at: DateTime<Utc>,

    /// Set once by the IdP when the credentials check passes
    #[serde(default)]
    pub identity: Option<String>,
}

impl PendingAuthState {
    fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            created_at: Utc::now(),
            identity: None,
        }
    }

    /// Check if the state has outlived `ttl`.
    pub fn is_expired(&self, ttl: Duration) -> bool {
        self.remaining(ttl).is_none()
    }

    fn remaining(&self, ttl: Duration) -> Option<Duration> {
        let age = (Utc::now() - self.created_at).to_std().unwrap_or_default();
        ttl.checked_sub(age).filter(|d| !d.is_zero())
    }
}

/// Trait for pending-state storage.
///
/// Implementations must be thread-safe; `take` must be atomic so that two
/// concurrent callers can never both receive the same state.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn put(&self, token: &str, state: &PendingAuthState, ttl: Duration) -> StateResult<()>;

    /// Get a state without removing it.
    async fn get(&self, token: &str) -> StateResult<Option<PendingAuthState>>;

    /// Get and remove a state.
    async fn take(&self, token: &str) -> StateResult<Option<PendingAuthState>>;

    async fn delete(&self, token: &str) -> StateResult<()>;
}

/// Shared state store type.
pub type SharedStateStore = Arc<dyn StateStore>;

// ─────────────────────────────────────────────────────────────────────────────
// Memory State Store
// ─────────────────────────────────────────────────────────────────────────────

/// In-memory state store.
///
/// Suitable for development and single-node deployments.
#[derive(Default)]
pub struct MemoryStateStore {
    pending: RwLock<HashMap<String, (PendingAuthState, Instant)>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn put(&self, token: &str, state: &PendingAuthState, ttl: Duration) -> StateResult<()> {
        let now = Instant::now();
        let mut pending = self.pending.write().await;
        pending.retain(|_, (_, expires_at)| *expires_at > now);
        pending.insert(token.to_string(), (state.clone(), now + ttl));
        Ok(())
    }

    async fn get(&self, token: &str) -> StateResult<Option<PendingAuthState>> {
        let pending = self.pending.read().await;
        Ok(pending
            .get(token)
            .filter(|(_, expires_at)| *expires_at > Instant::now())
            .map(|(state, _)| state.clone()))
    }

    async fn take(&self, token: &str) -> StateResult<Option<PendingAuthState>> {
        let mut pending = self.pending.write().await;
        Ok(pending
            .remove(token)
            .filter(|(_, expires_at)| *expires_at > Instant::now())
            .map(|(state, _)| state))
    }

    async fn delete(&self, token: &str) -> StateResult<()> {
        let mut pending = self.pending.write().await;
        pending.remove(token);
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Cache State Store
// ─────────────────────────────────────────────────────────────────────────────

/// Cache-backed state store.
///
/// Works with Redis (multi-node) or the in-memory cache (single-node).
pub struct CacheStateStore {
    cache: Arc<dyn Cache>,
    key_prefix: String,
}

impl CacheStateStore {
    pub fn new(cache: Arc<dyn Cache>) -> Self {
        Self {
            cache,
            key_prefix: "auth_state:".to_string(),
        }
    }

    fn key(&self, token: &str) -> String {
        format!("{}{}", self.key_prefix, token)
    }
}

#[async_trait]
impl StateStore for CacheStateStore {
    async fn put(&self, token: &str, state: &PendingAuthState, ttl: Duration) -> StateResult<()> {
        self.cache
            .set_json(&self.key(token), state, ttl)
            .await
            .inspect(|_| metrics::record_cache_operation("auth_state", "set", "success"))
            .inspect_err(|_| metrics::record_cache_operation("auth_state", "set", "error"))?;
        Ok(())
    }

    async fn get(&self, token: &str) -> StateResult<Option<PendingAuthState>> {
        Ok(self.cache.get_json(&self.key(token)).await?)
    }

    async fn take(&self, token: &str) -> StateResult<Option<PendingAuthState>> {
        Ok(self.cache.take_json(&self.key(token)).await?)
    }

    async fn delete(&self, token: &str) -> StateResult<()> {
        Ok(self.cache.delete(&self.key(token)).await?)
    }
}

/// Create a state store based on available infrastructure.
pub fn create_state_store(cache: Option<Arc<dyn Cache>>) -> SharedStateStore {
    match cache {
        Some(cache) => {
            tracing::info!("Using cache-backed store for pending authentication state");
            Arc::new(CacheStateStore::new(cache))
        }
        None => {
            tracing::warn!(
                "Using in-memory store for pending authentication state. \
                 Logins in flight are lost on restart and not shared across nodes."
            );
            Arc::new(MemoryStateStore::new())
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// State Manager
// ─────────────────────────────────────────────────────────────────────────────

/// Generate a 256-bit random token, base64url encoded.
fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    use rand::RngCore;
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Correlates a pending authentication request to its eventual callback.
#[derive(Clone)]
pub struct StateManager {
    store: SharedStateStore,
    ttl: Duration,
}

impl StateManager {
    pub fn new(store: SharedStateStore, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Register a pending login that should return to `target`.
    pub async fn create(&self, target: &str) -> StateResult<String> {
        let token = generate_token();
        self.store
            .put(&token, &PendingAuthState::new(target), self.ttl)
            .await?;
        metrics::record_pending_state_operation("create", "ok");
        Ok(token)
    }

    /// Look up a live state, treating expired entries as absent.
    async fn live(&self, token: &str) -> StateResult<Option<PendingAuthState>> {
        match self.store.get(token).await? {
            Some(state) if state.is_expired(self.ttl) => {
                self.store.delete(token).await?;
                Ok(None)
            }
            other => Ok(other),
        }
    }

    /// Target URL registered for `token`, without consuming it.
    pub async fn target(&self, token: &str) -> StateResult<String> {
        self.live(token)
            .await?
            .map(|s| s.target)
            .ok_or(StateError::UnknownToken)
    }

    /// Record that the IdP authenticated `identity` for this token.
    ///
    /// A state is marked at most once; marking an unknown, expired or already
    /// authenticated token fails with [`StateError::UnknownToken`].
    pub async fn mark_authenticated(&self, token: &str, identity: &str) -> StateResult<()> {
        let Some(mut state) = self.live(token).await? else {
            metrics::record_pending_state_operation("mark", "unknown");
            return Err(StateError::UnknownToken);
        };
        if state.identity.is_some() {
            metrics::record_pending_state_operation("mark", "already_marked");
            return Err(StateError::UnknownToken);
        }
        let Some(remaining) = state.remaining(self.ttl) else {
            return Err(StateError::UnknownToken);
        };

        state.identity = Some(identity.to_string());
        self.store.put(token, &state, remaining).await?;
        metrics::record_pending_state_operation("mark", "ok");
        Ok(())
    }

    /// Consume an authenticated token and return its identity.
    ///
    /// Fails with [`StateError::NotFound`] if the token is unknown, consumed,
    /// expired, or not yet authenticated; in the last case the state is left
    /// in place so the IdP can still complete it.
    pub async fn resolve(&self, token: &str) -> StateResult<String> {
        match self.live(token).await? {
            Some(state) if state.identity.is_some() => {}
            _ => {
                metrics::record_pending_state_operation("resolve", "not_found");
                return Err(StateError::NotFound);
            }
        }

        // Another request may have consumed it since the peek
        let identity = self
            .store
            .take(token)
            .await?
            .filter(|s| !s.is_expired(self.ttl))
            .and_then(|s| s.identity);

        match identity {
            Some(identity) => {
                metrics::record_pending_state_operation("resolve", "ok");
                Ok(identity)
            }
            None => {
                metrics::record_pending_state_operation("resolve", "not_found");
                Err(StateError::NotFound)
            }
        }
    }

    /// Drop a pending state, if any.
    pub async fn discard(&self, token: &str) -> StateResult<()> {
        self.store.delete(token).await?;
        metrics::record_pending_state_operation("discard", "ok");
        Ok(())
    }
}
