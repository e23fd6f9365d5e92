use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;

use super::{
    error::{CacheError, CacheResult},
    traits::Cache,
};
use crate::{config::RedisCacheConfig, observability::metrics};

/// Redis-backed cache.
///
/// Holds one multiplexed connection; each operation works on a cheap clone
/// of it, so concurrent requests pipeline over the same socket.
pub struct RedisCache {
    connection: MultiplexedConnection,
    key_prefix: String,
}

impl RedisCache {
    pub async fn from_config(config: &RedisCacheConfig) -> CacheResult<Self> {
        let client = redis::Client::open(config.url.as_str())?;

        let connection = tokio::time::timeout(
            Duration::from_secs(config.connect_timeout_secs),
            client.get_multiplexed_async_connection(),
        )
        .await
        .map_err(|_| {
            CacheError::Internal(format!(
                "Timed out connecting to Redis after {}s",
                config.connect_timeout_secs
            ))
        })??;

        Ok(Self {
            connection,
            key_prefix: config.key_prefix.clone(),
        })
    }

    fn prefixed_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    fn conn(&self) -> MultiplexedConnection {
        self.connection.clone()
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn get_bytes(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let mut conn = self.conn();
        let full_key = self.prefixed_key(key);

        let data: Option<Vec<u8>> = redis::cmd("GET")
            .arg(&full_key)
            .query_async(&mut conn)
            .await?;

        Ok(data)
    }

    async fn set_bytes(&self, key: &str, value: &[u8], ttl: Duration) -> CacheResult<()> {
        let mut conn = self.conn();
        let full_key = self.prefixed_key(key);

        let ttl_ms = ttl.as_millis() as u64;
        if ttl_ms > 0 {
            let _: () = redis::cmd("SET")
                .arg(&full_key)
                .arg(value)
                .arg("PX")
                .arg(ttl_ms)
                .query_async(&mut conn)
                .await?;
        } else {
            let _: () = redis::cmd("SET")
                .arg(&full_key)
                .arg(value)
                .query_async(&mut conn)
                .await?;
        }

        Ok(())
    }

    async fn take_bytes(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let mut conn = self.conn();
        let full_key = self.prefixed_key(key);

        // GETDEL (Redis >= 6.2) is atomic: only one client observes the value
        let data: Option<Vec<u8>> = redis::cmd("GETDEL")
            .arg(&full_key)
            .query_async(&mut conn)
            .await
            .inspect_err(|_| metrics::record_cache_operation("redis", "take", "error"))?;

        Ok(data)
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        let mut conn = self.conn();
        let full_key = self.prefixed_key(key);

        let _: () = redis::cmd("DEL")
            .arg(&full_key)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }
}
