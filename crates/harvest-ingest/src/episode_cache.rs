//! TTL-bounded episode metadata lookup
//!
//! Hits are parsed from the cached raw document and marked [`Provenance::Cache`].
//! Misses go to the [`EpisodeSource`] and the raw document is written back with
//! the configured TTL. Concurrent misses for the same id may both write; the
//! last writer wins.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::cache::CacheStore;
use crate::error::Result;
use crate::models::{EpisodeMetadata, Provenance, RawEpisode};
use crate::upstream::EpisodeSource;

pub struct MetadataCache {
    store: Arc<dyn CacheStore>,
    source: Arc<dyn EpisodeSource>,
    ttl: Duration,
}

impl MetadataCache {
    pub fn new(store: Arc<dyn CacheStore>, source: Arc<dyn EpisodeSource>, ttl: Duration) -> Self {
        Self { store, source, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Look up metadata for `mpid`.
    ///
    /// An unreadable or failing cache entry is treated as a miss. Upstream
    /// failures are returned to the caller.
    pub async fn get(&self, mpid: &str) -> Result<Option<EpisodeMetadata>> {
        if let Some(meta) = self.cached(mpid).await {
            debug!(mpid = %mpid, "Episode cache hit");
            return Ok(Some(meta));
        }

        debug!(mpid = %mpid, "Episode cache miss");
        let Some(raw) = self.source.fetch_episode(mpid).await? else {
            return Ok(None);
        };

        let meta = EpisodeMetadata::from_raw(&raw, Provenance::Upstream)?;

        match serde_json::to_vec(&raw) {
            Ok(bytes) => {
                if let Err(e) = self.store.set_with_expiry(mpid, bytes, self.ttl).await {
                    warn!(mpid = %mpid, error = %e, "Failed to cache episode");
                }
            }
            Err(e) => warn!(mpid = %mpid, error = %e, "Failed to serialize episode"),
        }

        Ok(Some(meta))
    }

    async fn cached(&self, mpid: &str) -> Option<EpisodeMetadata> {
        let bytes = match self.store.get(mpid).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                warn!(mpid = %mpid, error = %e, "Episode cache read failed");
                return None;
            }
        };

        let parsed = serde_json::from_slice::<RawEpisode>(&bytes)
            .and_then(|raw| EpisodeMetadata::from_raw(&raw, Provenance::Cache));

        match parsed {
            Ok(meta) => Some(meta),
            Err(e) => {
                warn!(mpid = %mpid, error = %e, "Discarding unreadable cached episode");
                None
            }
        }
    }
}
