use std::time::Duration;

use async_trait::async_trait;

use super::error::CacheResult;

/// Byte-oriented key/value cache with per-entry expiry.
///
/// Shared by every node of a deployment when backed by Redis, which is what
/// lets a pending authentication started on one node complete on another.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Get raw bytes from cache
    async fn get_bytes(&self, key: &str) -> CacheResult<Option<Vec<u8>>>;

    /// Set raw bytes in cache with TTL. A zero TTL means no expiry.
    async fn set_bytes(&self, key: &str, value: &[u8], ttl: Duration) -> CacheResult<()>;

    /// Atomically get and remove a value.
    ///
    /// Of any number of concurrent callers for the same key, at most one
    /// receives `Some`.
    async fn take_bytes(&self, key: &str) -> CacheResult<Option<Vec<u8>>>;

    /// Delete a value from cache
    async fn delete(&self, key: &str) -> CacheResult<()>;
}

// Helper extension trait for working with JSON
pub trait CacheExt: Cache {
    async fn get_json<T: serde::de::DeserializeOwned>(&self, key: &str) -> CacheResult<Option<T>> {
        match self.get_bytes(key).await? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn take_json<T: serde::de::DeserializeOwned>(
        &self,
        key: &str,
    ) -> CacheResult<Option<T>> {
        match self.take_bytes(key).await? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn set_json<T: serde::Serialize + Sync>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> CacheResult<()> {
        use super::error::CacheError;
        let bytes =
            serde_json::to_vec(value).map_err(|e| CacheError::Serialization(e.to_string()))?;
        self.set_bytes(key, &bytes, ttl).await
    }
}

fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> CacheResult<T> {
    use super::error::CacheError;
    serde_json::from_slice(bytes).map_err(|e| CacheError::Deserialization(e.to_string()))
}

// Blanket implementation for all Cache types
impl<T: Cache + ?Sized> CacheExt for T {}
