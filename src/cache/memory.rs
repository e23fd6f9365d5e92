use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use dashmap::DashMap;

use super::{error::CacheResult, traits::Cache};
use crate::{config::MemoryCacheConfig, observability::metrics};

struct CacheEntry {
    data: Vec<u8>,
    expires_at: Option<Instant>,
    inserted_at: Instant,
}

impl CacheEntry {
    fn new(data: Vec<u8>, expires_at: Option<Instant>) -> Self {
        Self {
            data,
            expires_at,
            inserted_at: Instant::now(),
        }
    }

    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|exp| Instant::now() > exp)
    }
}

/// In-memory cache implementation using DashMap for concurrent access.
///
/// # Multi-Node Deployments
///
/// **WARNING**: This cache is NOT suitable for multi-node deployments.
///
/// Each node maintains its own independent cache, so a pending emulated
/// login started on one node cannot be completed on another, and a browser
/// session only exists on the node that wrote it.
///
/// See [`CacheConfig::Redis`](crate::config::CacheConfig::Redis) in the configuration.
pub struct MemoryCache {
    data: Arc<DashMap<String, CacheEntry>>,
    max_entries: usize,
    eviction_batch_size: usize,
}

impl MemoryCache {
    pub fn new(config: &MemoryCacheConfig) -> Self {
        Self {
            data: Arc::new(DashMap::new()),
            max_entries: config.max_entries,
            eviction_batch_size: config.eviction_batch_size.max(1),
        }
    }

    fn evict_if_needed(&self) {
        if self.data.len() < self.max_entries {
            return;
        }

        // First pass: remove all expired entries
        self.data.retain(|_, entry| !entry.is_expired());

        let current_len = self.data.len();
        if current_len < self.max_entries {
            return;
        }

        let target_size = self.max_entries.saturating_sub(self.eviction_batch_size);
        let to_evict = current_len.saturating_sub(target_size);
        if to_evict == 0 {
            return;
        }

        // Oldest entries first
        let mut entries: Vec<_> = self
            .data
            .iter()
            .map(|entry| (entry.key().clone(), entry.inserted_at))
            .collect();
        entries.sort_by_key(|(_, inserted_at)| *inserted_at);

        for (key, _) in entries.into_iter().take(to_evict) {
            self.data.remove(&key);
        }
        metrics::record_cache_operation("memory", "evict", "ok");
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get_bytes(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        if let Some(entry) = self.data.get(key) {
            if entry.is_expired() {
                drop(entry);
                self.data.remove_if(key, |_, e| e.is_expired());
                return Ok(None);
            }
            Ok(Some(entry.data.clone()))
        } else {
            Ok(None)
        }
    }

    async fn set_bytes(&self, key: &str, value: &[u8], ttl: Duration) -> CacheResult<()> {
        self.evict_if_needed();

        let expires_at = if !ttl.is_zero() {
            Some(Instant::now() + ttl)
        } else {
            None
        };

        self.data
            .insert(key.to_string(), CacheEntry::new(value.to_vec(), expires_at));

        Ok(())
    }

    async fn take_bytes(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        // DashMap::remove holds the shard lock, so only one caller gets the entry
        match self.data.remove(key) {
            Some((_, entry)) if !entry.is_expired() => Ok(Some(entry.data)),
            _ => Ok(None),
        }
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        self.data.remove(key);
        Ok(())
    }
}
