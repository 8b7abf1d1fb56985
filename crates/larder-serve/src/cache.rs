//! In-memory response caching with moka.
//!
//! Only viewer-independent data may be cached: the everything-feed skeleton
//! and aggregate lookups. Anything scoped to a viewer (timelines, viewer
//! state) bypasses this entirely.
//!
//! ## Cache Key Strategy
//!
//! Cache keys should include the endpoint name and all query parameters
//! that affect the response.

use std::future::Future;
use std::time::Duration;

use moka::future::Cache;
use serde::{de::DeserializeOwned, Serialize};

use crate::error::Error;

/// Default cache capacity (number of entries).
pub const DEFAULT_CACHE_CAPACITY: u64 = 1000;

/// Default TTL for cached entries.
pub const DEFAULT_TTL: Duration = Duration::from_secs(30);

/// Cached response with metadata.
#[derive(Clone, Debug)]
pub struct CachedEntry {
    /// Serialized JSON response.
    pub json: String,
}

/// Type alias for the response cache.
pub type ResponseCache = Cache<String, CachedEntry>;

/// Create a new response cache with default settings.
pub fn new_cache() -> ResponseCache {
    Cache::builder()
        .max_capacity(DEFAULT_CACHE_CAPACITY)
        .time_to_live(DEFAULT_TTL)
        .build()
}

/// Get a cached value or compute and cache it.
///
/// Checks for a valid cached entry, deserializes and returns it on a hit;
/// otherwise calls the compute function, caches the result, and returns it.
pub async fn get_or_compute<T, F, Fut>(
    cache: &ResponseCache,
    key: &str,
    compute: F,
) -> Result<T, Error>
where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    if let Some(entry) = cache.get(key).await {
        match serde_json::from_str(&entry.json) {
            Ok(value) => {
                tracing::debug!(key = %key, "cache hit");
                return Ok(value);
            }
            Err(e) => {
                // Corrupted cache entry - log and continue to recompute
                tracing::warn!(key = %key, error = %e, "failed to deserialize cached entry");
            }
        }
    }

    tracing::debug!(key = %key, "cache miss, computing");
    let value = compute().await?;

    match serde_json::to_string(&value) {
        Ok(json) => {
            cache.insert(key.to_string(), CachedEntry { json }).await;
            larder_core::metrics::set_gauge("feed_cache_entries", cache.entry_count() as f64);
        }
        Err(e) => {
            // Failed to serialize - log but still return the value
            tracing::warn!(key = %key, error = %e, "failed to serialize for cache");
        }
    }

    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cache_hit() {
        let cache = new_cache();
        let key = "test_key";

        // First call - cache miss
        let result: i32 = get_or_compute(&cache, key, || async { Ok(42) })
            .await
            .unwrap();
        assert_eq!(result, 42);

        // Second call - cache hit (compute should not be called)
        let result: i32 = get_or_compute(&cache, key, || async {
            panic!("compute should not be called on cache hit")
        })
        .await
        .unwrap();
        assert_eq!(result, 42);
    }

    #[tokio::test]
    async fn test_cache_different_keys() {
        let cache = new_cache();

        let result1: i32 = get_or_compute(&cache, "key1", || async { Ok(1) })
            .await
            .unwrap();
        let result2: i32 = get_or_compute(&cache, "key2", || async { Ok(2) })
            .await
            .unwrap();

        assert_eq!(result1, 1);
        assert_eq!(result2, 2);
    }

    #[tokio::test]
    async fn test_compute_error_not_cached() {
        let cache = new_cache();
        let result: Result<i32, Error> = get_or_compute(&cache, "k", || async {
            Err(Error::BadRequest("nope".into()))
        })
        .await;
        assert!(result.is_err());

        // A later successful compute goes through.
        let result: i32 = get_or_compute(&cache, "k", || async { Ok(7) })
            .await
            .unwrap();
        assert_eq!(result, 7);
    }
}
