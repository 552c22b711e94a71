//! Upstream capabilities
//!
//! The controller and the metadata cache only see these traits. [`EngageClient`]
//! is the HTTP implementation; tests substitute in-memory fakes.

pub mod engage;

pub use engage::EngageClient;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::Result;
use crate::models::{ActionQuery, ActionRecord, RawEpisode};

/// Paginated, time-windowed read of activity records
#[async_trait]
pub trait ActionSource: Send + Sync {
    /// Fetch one page. An empty vector ends the window.
    async fn fetch_actions(&self, query: &ActionQuery) -> Result<Vec<ActionRecord>>;
}

/// Read-by-id of reference episode metadata
#[async_trait]
pub trait EpisodeSource: Send + Sync {
    /// Fetch the raw episode document, `None` when the id is unknown
    async fn fetch_episode(&self, mpid: &str) -> Result<Option<RawEpisode>>;
}

/// JSON envelopes that hold one object, a list, or nothing under the same key.
///
/// `Many` is tried first so that `OneOrMany<Value>` does not swallow arrays.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> OneOrMany<T> {
    pub(crate) fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::Many(items) => items,
            OneOrMany::One(item) => vec![item],
        }
    }
}

impl<T> Default for OneOrMany<T> {
    fn default() -> Self {
        OneOrMany::Many(Vec::new())
    }
}
