//! Enrich-and-publish batch handler

use async_trait::async_trait;
use harvest_common::Watermark;
use tracing::{error, warn};

use crate::controller::{BatchHandler, BatchOutcome};
use crate::episode_cache::MetadataCache;
use crate::error::Result;
use crate::models::{ActionRecord, EpisodeMetadata};
use crate::publish::Publisher;
use crate::transform::transform;

/// Looks up episode metadata, transforms and publishes each record in order.
///
/// A transform or publish failure is counted against the record and the batch
/// continues. Metadata failures only degrade the record.
pub struct EnrichPipeline {
    episodes: MetadataCache,
    publisher: Publisher,
}

impl EnrichPipeline {
    pub fn new(episodes: MetadataCache, publisher: Publisher) -> Self {
        Self {
            episodes,
            publisher,
        }
    }

    async fn episode(&self, mpid: &str) -> Option<EpisodeMetadata> {
        match self.episodes.get(mpid).await {
            Ok(meta) => meta,
            Err(e) => {
                warn!(mpid = %mpid, error = %e, "Episode lookup failed");
                None
            }
        }
    }

    async fn process(&mut self, action: &ActionRecord) -> Result<Watermark> {
        action.check_required()?;
        let episode = self.episode(&action.mediapackage_id).await;
        let record = transform(action, episode.as_ref())?;
        self.publisher.publish(&record).await?;
        Ok(record.watermark)
    }
}

#[async_trait]
impl BatchHandler for EnrichPipeline {
    async fn handle(&mut self, batch: &[ActionRecord]) -> Result<BatchOutcome> {
        let mut outcome = BatchOutcome::default();

        for action in batch {
            match self.process(action).await {
                Ok(watermark) => outcome.record_success(watermark),
                Err(e) => {
                    error!(action_id = action.id, error = %e, "Exception during rec creation");
                    outcome.record_failure();
                }
            }
        }

        Ok(outcome)
    }
}
