//! Browser session storage.
//!
//! A browser session is an opaque key-value map identified by the UUID held
//! in the session cookie. The broker only ever replaces a session wholesale
//! with a [`SessionRecord`], in a single store write.
//!
//! Storage backends:
//! - `MemorySessionStore`: In-memory storage (single-node only)
//! - `CacheSessionStore`: Uses the Cache infrastructure (Redis/Memory)

use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{
    cache::{Cache, CacheExt},
    models::{GroupRef, Principal},
    observability::metrics,
};

/// Result type for session store operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// Errors that can occur during session operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Session contents, keyed by field name.
pub type SessionData = Map<String, Value>;

/// Trait for browser session storage.
///
/// Implementations must be thread-safe and handle concurrent access.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Set one key, creating the session if needed.
    async fn put(&self, session: Uuid, key: &str, value: Value) -> SessionResult<()>;

    /// Read one key.
    async fn get(&self, session: Uuid, key: &str) -> SessionResult<Option<Value>>;

    /// Remove every key of the session.
    async fn flush(&self, session: Uuid) -> SessionResult<()>;

    /// Read the whole session.
    async fn load(&self, session: Uuid) -> SessionResult<SessionData>;

    /// Swap the whole session for `data` in one write. On error the previous
    /// contents are left as they were.
    async fn replace(&self, session: Uuid, data: SessionData) -> SessionResult<()>;
}

/// Shared session store type.
pub type SharedSessionStore = Arc<dyn SessionStore>;

// ─────────────────────────────────────────────────────────────────────────────
// Memory Session Store
// ─────────────────────────────────────────────────────────────────────────────

/// In-memory session store.
///
/// Suitable for development and single-node deployments.
/// Sessions are lost on restart and not shared across nodes.
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<Uuid, (SessionData, Instant)>>,
    ttl: Duration,
}

impl MemorySessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            ttl,
        }
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn put(&self, session: Uuid, key: &str, value: Value) -> SessionResult<()> {
        let now = Instant::now();
        let mut sessions = self.sessions.write().await;
        sessions.retain(|_, (_, expires_at)| *expires_at > now);

        let (data, expires_at) = sessions
            .entry(session)
            .or_insert_with(|| (SessionData::new(), now));
        data.insert(key.to_string(), value);
        *expires_at = now + self.ttl;
        Ok(())
    }

    async fn get(&self, session: Uuid, key: &str) -> SessionResult<Option<Value>> {
        Ok(self.load(session).await?.remove(key))
    }

    async fn flush(&self, session: Uuid) -> SessionResult<()> {
        let mut sessions = self.sessions.write().await;
        sessions.remove(&session);
        Ok(())
    }

    async fn load(&self, session: Uuid) -> SessionResult<SessionData> {
        let sessions = self.sessions.read().await;
        Ok(sessions
            .get(&session)
            .filter(|(_, expires_at)| *expires_at > Instant::now())
            .map(|(data, _)| data.clone())
            .unwrap_or_default())
    }

    async fn replace(&self, session: Uuid, data: SessionData) -> SessionResult<()> {
        let now = Instant::now();
        let mut sessions = self.sessions.write().await;
        sessions.retain(|_, (_, expires_at)| *expires_at > now);
        sessions.insert(session, (data, now + self.ttl));
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Cache Session Store (Redis/Memory via Cache trait)
// ─────────────────────────────────────────────────────────────────────────────

/// Session store backed by the Cache infrastructure (Redis or Memory cache).
///
/// Each session is stored as one JSON object with a sliding TTL. Suitable
/// for multi-node deployments when using Redis as the cache backend.
pub struct CacheSessionStore {
    cache: Arc<dyn Cache>,
    key_prefix: String,
    ttl: Duration,
}

impl CacheSessionStore {
    pub fn new(cache: Arc<dyn Cache>, ttl: Duration) -> Self {
        Self {
            cache,
            key_prefix: "session:".to_string(),
            ttl,
        }
    }

    fn session_key(&self, session: Uuid) -> String {
        format!("{}{}", self.key_prefix, session)
    }
}

#[async_trait]
impl SessionStore for CacheSessionStore {
    async fn put(&self, session: Uuid, key: &str, value: Value) -> SessionResult<()> {
        let mut data = self.load(session).await?;
        data.insert(key.to_string(), value);
        self.replace(session, data).await
    }

    async fn get(&self, session: Uuid, key: &str) -> SessionResult<Option<Value>> {
        Ok(self.load(session).await?.remove(key))
    }

    async fn flush(&self, session: Uuid) -> SessionResult<()> {
        self.cache
            .delete(&self.session_key(session))
            .await
            .map_err(|e| SessionError::Cache(e.to_string()))
    }

    async fn load(&self, session: Uuid) -> SessionResult<SessionData> {
        match self.cache.get_json(&self.session_key(session)).await {
            Ok(Some(data)) => {
                metrics::record_cache_operation("session", "get", "hit");
                Ok(data)
            }
            Ok(None) => {
                metrics::record_cache_operation("session", "get", "miss");
                Ok(SessionData::new())
            }
            Err(e) => {
                metrics::record_cache_operation("session", "get", "error");
                Err(SessionError::Cache(e.to_string()))
            }
        }
    }

    async fn replace(&self, session: Uuid, data: SessionData) -> SessionResult<()> {
        match self
            .cache
            .set_json(&self.session_key(session), &data, self.ttl)
            .await
        {
            Ok(()) => {
                metrics::record_cache_operation("session", "set", "success");
                Ok(())
            }
            Err(e) => {
                metrics::record_cache_operation("session", "set", "error");
                Err(SessionError::Cache(e.to_string()))
            }
        }
    }
}

/// Create a session store based on available infrastructure.
pub fn create_session_store(cache: Option<Arc<dyn Cache>>, ttl: Duration) -> SharedSessionStore {
    match cache {
        Some(cache) => {
            tracing::info!("Using cache-backed store for browser sessions");
            Arc::new(CacheSessionStore::new(cache, ttl))
        }
        None => {
            tracing::warn!(
                "Using in-memory store for browser sessions. \
                 Sessions will be lost on restart and not shared across nodes."
            );
            Arc::new(MemorySessionStore::new(ttl))
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Session Record
// ─────────────────────────────────────────────────────────────────────────────

/// Session value for principals without any group.
pub const UNDEFINED_GROUP: &str = "undefined";

/// How the current browser session was established.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthType {
    Local,
    Idp,
    /// Authenticated by the IdP but unknown here and not provisioned
    NoUser,
}

impl AuthType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthType::Local => "local",
            AuthType::Idp => "idp",
            AuthType::NoUser => "no_user",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "local" => Some(AuthType::Local),
            "idp" => Some(AuthType::Idp),
            "no_user" => Some(AuthType::NoUser),
            _ => None,
        }
    }
}

/// The broker's output for one browser session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub id: Option<Uuid>,
    pub email: Option<String>,
    pub first: Option<String>,
    pub last: Option<String>,
    pub auth_type: AuthType,
    /// Legacy single-group field; `"undefined"` without a group
    pub group: String,
    pub group_id: Option<Uuid>,
    pub group_name: Option<String>,
    /// Every group, primary first. Only federated logins populate it.
    pub groups: Option<Vec<GroupRef>>,
}

impl SessionRecord {
    /// A record for an authenticated principal, with no group information yet.
    pub fn for_principal(principal: &Principal, auth_type: AuthType) -> Self {
        Self {
            id: Some(principal.id),
            email: Some(principal.email.clone()),
            first: principal.first_name.clone(),
            last: principal.last_name.clone(),
            auth_type,
            group: UNDEFINED_GROUP.to_string(),
            group_id: None,
            group_name: None,
            groups: None,
        }
    }

    /// The record written when the IdP vouched for someone we will not admit.
    pub fn no_user() -> Self {
        Self {
            id: None,
            email: None,
            first: None,
            last: None,
            auth_type: AuthType::NoUser,
            group: UNDEFINED_GROUP.to_string(),
            group_id: None,
            group_name: None,
            groups: None,
        }
    }

    /// Make `primary` the principal's group.
    pub fn with_primary_group(mut self, primary: &GroupRef) -> Self {
        self.group = primary.name.clone();
        self.group_id = Some(primary.id);
        self.group_name = Some(primary.name.clone());
        self
    }

    /// Record the full group list; the first entry becomes the primary group.
    pub fn with_groups(self, groups: Vec<GroupRef>) -> Self {
        let mut record = match groups.first() {
            Some(primary) => self.with_primary_group(primary),
            None => self,
        };
        record.groups = Some(groups);
        record
    }

    /// Key/value pairs as written to the session store. Absent values are skipped.
    pub fn entries(&self) -> SessionResult<Vec<(&'static str, Value)>> {
        let mut entries = Vec::with_capacity(9);
        if let Some(id) = self.id {
            entries.push(("id", Value::String(id.to_string())));
        }
        if let Some(email) = &self.email {
            entries.push(("email", Value::String(email.clone())));
        }
        if let Some(first) = &self.first {
            entries.push(("first", Value::String(first.clone())));
        }
        if let Some(last) = &self.last {
            entries.push(("last", Value::String(last.clone())));
        }
        entries.push(("auth_type", Value::String(self.auth_type.as_str().into())));
        if let Some(groups) = &self.groups {
            let groups = serde_json::to_value(groups)
                .map_err(|e| SessionError::Serialization(e.to_string()))?;
            entries.push(("groups", groups));
        }
        if let Some(group_id) = self.group_id {
            entries.push(("group_id", Value::String(group_id.to_string())));
        }
        if let Some(group_name) = &self.group_name {
            entries.push(("group_name", Value::String(group_name.clone())));
        }
        entries.push(("group", Value::String(self.group.clone())));
        Ok(entries)
    }

    /// Replace the browser session with this record.
    pub async fn write(&self, store: &dyn SessionStore, session: Uuid) -> SessionResult<()> {
        let data = self
            .entries()?
            .into_iter()
            .map(|(key, value)| (key.to_string(), value))
            .collect();
        store.replace(session, data).await
    }

    /// Rebuild a record from stored session data, if it holds one.
    pub fn from_data(data: &SessionData) -> Option<Self> {
        let auth_type = data
            .get("auth_type")
            .and_then(Value::as_str)
            .and_then(AuthType::from_str)?;
        let string = |key: &str| data.get(key).and_then(Value::as_str).map(str::to_string);
        let uuid = |key: &str| {
            data.get(key)
                .and_then(Value::as_str)
                .and_then(|s| Uuid::parse_str(s).ok())
        };

        Some(Self {
            id: uuid("id"),
            email: string("email"),
            first: string("first"),
            last: string("last"),
            auth_type,
            group: string("group").unwrap_or_else(|| UNDEFINED_GROUP.to_string()),
            group_id: uuid("group_id"),
            group_name: string("group_name"),
            groups: data
                .get("groups")
                .and_then(|v| serde_json::from_value(v.clone()).ok()),
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::json;

    use super::*;
    use crate::{cache::MemoryCache, config::MemoryCacheConfig, models::AccountType};

    fn stores() -> Vec<SharedSessionStore> {
        let cache = Arc::new(MemoryCache::new(&MemoryCacheConfig::default()));
        vec![
            Arc::new(MemorySessionStore::new(Duration::from_secs(60))),
            Arc::new(CacheSessionStore::new(cache, Duration::from_secs(60))),
        ]
    }

    fn principal() -> Principal {
        let now = Utc::now();
        Principal {
            id: Uuid::new_v4(),
            email: "jdoe@example.edu".into(),
            first_name: Some("Jane".into()),
            last_name: None,
            account_type: AccountType::Federated,
            enabled: false,
            password_hash: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_put_get_flush() {
        for store in stores() {
            let session = Uuid::new_v4();
            store.put(session, "email", json!("a@b.c")).await.unwrap();
            store.put(session, "auth_type", json!("idp")).await.unwrap();

            assert_eq!(
                store.get(session, "email").await.unwrap(),
                Some(json!("a@b.c"))
            );
            assert_eq!(store.load(session).await.unwrap().len(), 2);

            store.flush(session).await.unwrap();
            assert!(store.get(session, "email").await.unwrap().is_none());
            assert!(store.load(session).await.unwrap().is_empty());
        }
    }

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        for store in stores() {
            let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
            store.put(a, "email", json!("a@example.edu")).await.unwrap();
            store.flush(b).await.unwrap();

            assert!(store.get(b, "email").await.unwrap().is_none());
            assert_eq!(
                store.get(a, "email").await.unwrap(),
                Some(json!("a@example.edu"))
            );
        }
    }

    #[tokio::test]
    async fn test_memory_session_expires() {
        let store = MemorySessionStore::new(Duration::from_millis(20));
        let session = Uuid::new_v4();
        store.put(session, "email", json!("x")).await.unwrap();

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(store.get(session, "email").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_write_replaces_previous_contents() {
        for store in stores() {
            let session = Uuid::new_v4();
            store.put(session, "stale", json!(true)).await.unwrap();

            let record = SessionRecord::no_user();
            record.write(store.as_ref(), session).await.unwrap();

            let data = store.load(session).await.unwrap();
            assert!(!data.contains_key("stale"));
            assert_eq!(data["auth_type"], json!("no_user"));
            assert_eq!(data["group"], json!("undefined"));
            assert_eq!(SessionRecord::from_data(&data), Some(record));
        }
    }

    /// Memory store whose writes start failing once a budget is spent.
    struct FailingStore {
        inner: MemorySessionStore,
        writes_left: std::sync::atomic::AtomicUsize,
    }

    impl FailingStore {
        fn spend_write(&self) -> SessionResult<()> {
            use std::sync::atomic::Ordering;
            self.writes_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .map(|_| ())
                .map_err(|_| SessionError::Cache("connection reset".into()))
        }
    }

    #[async_trait]
    impl SessionStore for FailingStore {
        async fn put(&self, session: Uuid, key: &str, value: Value) -> SessionResult<()> {
            self.spend_write()?;
            self.inner.put(session, key, value).await
        }

        async fn get(&self, session: Uuid, key: &str) -> SessionResult<Option<Value>> {
            self.inner.get(session, key).await
        }

        async fn flush(&self, session: Uuid) -> SessionResult<()> {
            self.inner.flush(session).await
        }

        async fn load(&self, session: Uuid) -> SessionResult<SessionData> {
            self.inner.load(session).await
        }

        async fn replace(&self, session: Uuid, data: SessionData) -> SessionResult<()> {
            self.spend_write()?;
            self.inner.replace(session, data).await
        }
    }

    #[tokio::test]
    async fn test_failed_write_keeps_previous_session() {
        let store = FailingStore {
            inner: MemorySessionStore::new(Duration::from_secs(60)),
            writes_left: std::sync::atomic::AtomicUsize::new(1),
        };
        let session = Uuid::new_v4();

        let previous = SessionRecord::for_principal(&principal(), AuthType::Idp);
        previous.write(&store, session).await.unwrap();

        let mut other = principal();
        other.email = "asmith@example.edu".into();
        let next = SessionRecord::for_principal(&other, AuthType::Local);
        assert!(next.write(&store, session).await.is_err());

        let data = store.load(session).await.unwrap();
        assert_eq!(SessionRecord::from_data(&data), Some(previous));
    }

    #[tokio::test]
    async fn test_write_is_a_single_store_call() {
        let store = FailingStore {
            inner: MemorySessionStore::new(Duration::from_secs(60)),
            writes_left: std::sync::atomic::AtomicUsize::new(1),
        };
        let session = Uuid::new_v4();

        let record = SessionRecord::for_principal(&principal(), AuthType::Idp)
            .with_groups(vec![GroupRef {
                id: Uuid::new_v4(),
                name: "staff".into(),
            }]);
        record.write(&store, session).await.unwrap();

        let data = store.load(session).await.unwrap();
        assert_eq!(SessionRecord::from_data(&data), Some(record));
    }

    #[test]
    fn test_groups_set_primary() {
        let first = GroupRef {
            id: Uuid::new_v4(),
            name: "staff".into(),
        };
        let second = GroupRef {
            id: Uuid::new_v4(),
            name: "faculty".into(),
        };

        let record = SessionRecord::for_principal(&principal(), AuthType::Idp)
            .with_groups(vec![first.clone(), second]);
        assert_eq!(record.group, "staff");
        assert_eq!(record.group_id, Some(first.id));
        assert_eq!(record.group_name.as_deref(), Some("staff"));
        assert_eq!(record.groups.as_ref().map(Vec::len), Some(2));
    }

    #[test]
    fn test_no_groups_is_undefined() {
        let record = SessionRecord::for_principal(&principal(), AuthType::Idp).with_groups(vec![]);
        assert_eq!(record.group, UNDEFINED_GROUP);
        assert!(record.group_id.is_none());
        assert_eq!(record.groups, Some(vec![]));
    }

    #[test]
    fn test_entries_skip_absent_values() {
        let record = SessionRecord::for_principal(&principal(), AuthType::Local);
        let keys: Vec<_> = record.entries().unwrap().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["id", "email", "first", "auth_type", "group"]);
    }

    #[test]
    fn test_from_data_without_auth_type() {
        assert!(SessionRecord::from_data(&SessionData::new()).is_none());
    }
}
