//! Resolver metadata cache
//!
//! The cache backend is a collaborator, not part of the core: resolvers see
//! it only as get/set with a per-entry TTL. Keys are namespaced by resolver
//! and entity kind (`yt:song:<id>`, `sc:playlist:<id>`, ...). Values are
//! JSON strings so a networked key-value store can implement the same trait
//! without knowing the model types.

use std::time::{Duration, Instant};

use async_trait::async_trait;

/// Get/set view of a key-value store with per-entry TTL.
#[async_trait]
pub trait SongCache: Send + Sync {
    /// Fetch a value; `None` for missing or expired keys.
    async fn get(&self, key: &str) -> Option<String>;

    /// Store a value that expires after `ttl`.
    async fn set(&self, key: &str, value: String, ttl: Duration);
}

#[derive(Clone)]
struct Entry {
    value: String,
    ttl: Duration,
}

struct PerEntryTtl;

impl moka::Expiry<String, Entry> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        entry: &Entry,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(entry.ttl)
    }
}

/// In-process cache for single-node deployments and tests.
pub struct MemoryCache {
    inner: moka::future::Cache<String, Entry>,
}

impl MemoryCache {
    pub fn new(max_capacity: u64) -> Self {
        let inner = moka::future::Cache::builder()
            .max_capacity(max_capacity)
            .expire_after(PerEntryTtl)
            .build();
        Self { inner }
    }
}

#[async_trait]
impl SongCache for MemoryCache {
    async fn get(&self, key: &str) -> Option<String> {
        self.inner.get(key).await.map(|entry| entry.value)
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) {
        self.inner
            .insert(key.to_string(), Entry { value, ttl })
            .await;
    }
}
