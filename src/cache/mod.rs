mod error;
mod memory;
#[cfg(feature = "redis")]
mod redis;
mod traits;

use std::sync::Arc;

pub use error::{CacheError, CacheResult};
pub use memory::MemoryCache;
#[cfg(feature = "redis")]
pub use redis::RedisCache;
pub use traits::{Cache, CacheExt};

use crate::config::CacheConfig;

/// Build the configured cache backend, or `None` when no cache is configured.
pub async fn create_cache(config: &CacheConfig) -> CacheResult<Option<Arc<dyn Cache>>> {
    match config {
        CacheConfig::None => Ok(None),
        CacheConfig::Memory(c) => {
            tracing::info!(max_entries = c.max_entries, "Using in-memory cache");
            Ok(Some(Arc::new(MemoryCache::new(c))))
        }
        #[cfg(feature = "redis")]
        CacheConfig::Redis(c) => {
            tracing::info!("Connecting to Redis cache");
            Ok(Some(Arc::new(RedisCache::from_config(c).await?)))
        }
        #[cfg(not(feature = "redis"))]
        CacheConfig::Redis(_) => Err(CacheError::NotConfigured(
            "Redis cache requested but the 'redis' feature is not compiled".into(),
        )),
    }
}
