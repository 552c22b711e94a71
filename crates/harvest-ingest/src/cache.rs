//! Key-value cache stores with expiry
//!
//! [`RedisCacheStore`] is the shared production store. [`MemoryCacheStore`] keeps
//! entries in process and is used when no Redis URL is configured.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::instrument;

use crate::error::{IngestError, Result};

/// Byte-valued cache with per-entry expiry
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    async fn set_with_expiry(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()>;
}

fn scoped_key(prefix: Option<&str>, key: &str) -> String {
    match prefix.map(str::trim).filter(|p| !p.is_empty()) {
        Some(p) => format!("{}:{}", p, key),
        None => key.to_string(),
    }
}

/// Redis-backed cache using a reconnecting connection manager
#[derive(Clone)]
pub struct RedisCacheStore {
    manager: ConnectionManager,
    prefix: Option<String>,
}

impl RedisCacheStore {
    #[instrument(level = "debug", skip(prefix))]
    pub async fn connect(url: &str, prefix: Option<String>) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| IngestError::cache(format!("redis client open: {}", e)))?;
        let manager = ConnectionManager::new(client)
            .await
            .map_err(|e| IngestError::cache(format!("redis connect: {}", e)))?;

        Ok(Self { manager, prefix })
    }
}

#[async_trait]
impl CacheStore for RedisCacheStore {
    #[instrument(level = "debug", skip(self))]
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.manager.clone();
        conn.get(scoped_key(self.prefix.as_deref(), key))
            .await
            .map_err(|e| IngestError::cache(format!("redis get: {}", e)))
    }

    #[instrument(level = "debug", skip(self, value))]
    async fn set_with_expiry(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()> {
        let mut conn = self.manager.clone();
        let _: () = conn
            .set_ex(scoped_key(self.prefix.as_deref(), key), value, ttl.as_secs().max(1))
            .await
            .map_err(|e| IngestError::cache(format!("redis set_ex: {}", e)))?;
        Ok(())
    }
}

/// Process-local cache; expired entries are dropped on read
#[derive(Default)]
pub struct MemoryCacheStore {
    entries: RwLock<HashMap<String, (Vec<u8>, Instant)>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .await
            .values()
            .filter(|(_, expires)| *expires > now)
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let now = Instant::now();
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some((value, expires)) if *expires > now => return Ok(Some(value.clone())),
                Some(_) => {}
                None => return Ok(None),
            }
        }

        self.entries.write().await.remove(key);
        Ok(None)
    }

    async fn set_with_expiry(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()> {
        let expires = Instant::now() + ttl;
        self.entries
            .write()
            .await
            .insert(key.to_string(), (value, expires));
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_scoped_key() {
        assert_eq!(scoped_key(None, "mp-1"), "mp-1");
        assert_eq!(scoped_key(Some("episode"), "mp-1"), "episode:mp-1");
        assert_eq!(scoped_key(Some("  "), "mp-1"), "mp-1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_memory_store_expires_entries() {
        let store = MemoryCacheStore::new();
        store
            .set_with_expiry("mp-1", b"{}".to_vec(), Duration::from_secs(30))
            .await
            .unwrap();

        assert_eq!(store.get("mp-1").await.unwrap(), Some(b"{}".to_vec()));

        tokio::time::advance(Duration::from_secs(31)).await;

        assert_eq!(store.get("mp-1").await.unwrap(), None);
        assert!(store.is_empty().await);
    }
}
