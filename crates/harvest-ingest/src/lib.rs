//! Harvest Ingest Library
//!
//! Incrementally harvests user actions from the engage API, enriches each one
//! with cached episode metadata and publishes the result to a queue or a JSON
//! line stream. Progress is kept as a watermark in a checkpoint store.
//!
//! # Components
//!
//! - **Controller**: windowed, offset-paginated fetch loop ([`controller`])
//! - **Metadata cache**: TTL-bounded episode lookup ([`episode_cache`], [`cache`])
//! - **Checkpoint**: watermark persistence ([`checkpoint`])
//! - **Transformer**: action + episode to enriched record ([`transform`])
//! - **Publisher**: queue or stream sink ([`publish`])
//! - **Dispatch**: per-record HTTP events with a bounded worker pool ([`dispatch`])
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use harvest_ingest::{
//!     cache::MemoryCacheStore,
//!     config::{ControllerConfig, EngageConfig},
//!     controller::HarvestController,
//!     episode_cache::MetadataCache,
//!     pipeline::EnrichPipeline,
//!     publish::Publisher,
//!     upstream::EngageClient,
//! };
//!
//! #[tokio::main]
//! async fn main() -> harvest_ingest::Result<()> {
//!     let client = Arc::new(EngageClient::new(EngageConfig::new(
//!         "engage.example.edu",
//!         "harvester",
//!         "secret",
//!     ))?);
//!
//!     let episodes = MetadataCache::new(
//!         Arc::new(MemoryCacheStore::new()),
//!         client.clone(),
//!         Duration::from_secs(1800),
//!     );
//!     let mut pipeline = EnrichPipeline::new(episodes, Publisher::stdout());
//!
//!     let controller = HarvestController::new(client, ControllerConfig::default());
//!     let window = controller.resolve_window(None, None).await?;
//!     let summary = controller.run(window, &mut pipeline).await?;
//!     println!("{} actions", summary.actions);
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod cache;
pub mod checkpoint;
pub mod config;
pub mod controller;
pub mod dispatch;
pub mod episode_cache;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod publish;
pub mod transform;
pub mod upstream;

pub use error::{IngestError, Result, TransformError};
pub use harvest_common::Watermark;
