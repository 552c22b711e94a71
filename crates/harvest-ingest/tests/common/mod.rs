//! Shared fakes for integration tests
#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use harvest_ingest::cache::MemoryCacheStore;
use harvest_ingest::checkpoint::{Checkpoint, CheckpointStore};
use harvest_ingest::episode_cache::MetadataCache;
use harvest_ingest::models::{ActionQuery, ActionRecord, PlayState, RawEpisode, SessionInfo};
use harvest_ingest::publish::QueueSink;
use harvest_ingest::upstream::{ActionSource, EpisodeSource};
use harvest_ingest::{IngestError, Result, Watermark};
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn mark(s: &str) -> Watermark {
    Watermark::parse(s).unwrap()
}

/// An action created at `2024-01-01T00:MM:SS+00:00` where `id = MM * 60 + SS`
pub fn action(id: i64) -> ActionRecord {
    ActionRecord {
        id,
        created: format!("2024-01-01T00:{:02}:{:02}+00:00", (id / 60) % 60, id % 60),
        mediapackage_id: "mp-1".to_string(),
        session: SessionInfo {
            session_id: Some(format!("sess-{}", id)),
            user_id: Some("12345".to_string()),
            user_agent: Some("Mozilla/5.0".to_string()),
            user_ip: Some("10.0.0.1, 10.0.0.2".to_string()),
        },
        action_type: "HEARTBEAT".to_string(),
        inpoint: Some(0),
        outpoint: Some(5),
        length: None,
        play_state: PlayState::PlayingVod,
    }
}

pub fn actions(ids: std::ops::Range<i64>) -> Vec<ActionRecord> {
    ids.map(action).collect()
}

pub enum Step {
    Batch(Vec<ActionRecord>),
    Fail,
}

/// Serves scripted pages and records every query it receives
#[derive(Default)]
pub struct FakeActionSource {
    steps: Mutex<VecDeque<Step>>,
    queries: Mutex<Vec<ActionQuery>>,
}

impl FakeActionSource {
    pub fn new(steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into()),
            queries: Mutex::new(Vec::new()),
        })
    }

    pub fn batches(batches: Vec<Vec<ActionRecord>>) -> Arc<Self> {
        Self::new(batches.into_iter().map(Step::Batch).collect())
    }

    pub fn queries(&self) -> Vec<ActionQuery> {
        self.queries.lock().unwrap().clone()
    }

    pub fn offsets(&self) -> Vec<u64> {
        self.queries().iter().map(|q| q.offset).collect()
    }
}

#[async_trait]
impl ActionSource for FakeActionSource {
    async fn fetch_actions(&self, query: &ActionQuery) -> Result<Vec<ActionRecord>> {
        self.queries.lock().unwrap().push(query.clone());
        match self.steps.lock().unwrap().pop_front() {
            Some(Step::Batch(batch)) => Ok(batch),
            Some(Step::Fail) => Err(IngestError::UpstreamStatus {
                status: 502,
                url: "http://engage/usertracking/actions.json".to_string(),
            }),
            None => Ok(Vec::new()),
        }
    }
}

/// Returns the same episode for every id
pub struct FakeEpisodeSource;

#[async_trait]
impl EpisodeSource for FakeEpisodeSource {
    async fn fetch_episode(&self, mpid: &str) -> Result<Option<RawEpisode>> {
        Ok(Some(RawEpisode {
            episode: json!({
                "id": mpid,
                "dcType": "L01",
                "mediapackage": {
                    "id": mpid,
                    "title": "Lecture 1",
                    "duration": 3600000,
                    "start": "2024-01-01T00:00:00Z",
                    "series": "20240112345",
                    "seriestitle": "Intro to Things"
                }
            }),
            workflow: None,
        }))
    }
}

pub fn metadata_cache() -> MetadataCache {
    MetadataCache::new(
        Arc::new(MemoryCacheStore::new()),
        Arc::new(FakeEpisodeSource),
        Duration::from_secs(1800),
    )
}

/// In-memory checkpoint store with optional write failures
#[derive(Default)]
pub struct MemoryCheckpointStore {
    values: Mutex<HashMap<String, String>>,
    puts: Mutex<Vec<String>>,
    fail_puts: bool,
}

impl MemoryCheckpointStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail_puts: true,
            ..Default::default()
        })
    }

    pub fn with_value(key: &str, value: &str) -> Arc<Self> {
        let store = Self::default();
        store
            .values
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Arc::new(store)
    }

    pub fn value(&self, key: &str) -> Option<String> {
        self.values.lock().unwrap().get(key).cloned()
    }

    pub fn puts(&self) -> Vec<String> {
        self.puts.lock().unwrap().clone()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.value(key))
    }

    async fn put(&self, key: &str, value: &str) -> Result<()> {
        if self.fail_puts {
            return Err(IngestError::checkpoint("bucket unavailable"));
        }
        self.puts.lock().unwrap().push(value.to_string());
        self.values
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

pub const CHECKPOINT_KEY: &str = "last-action-ts";

pub fn checkpoint(store: &Arc<MemoryCheckpointStore>) -> Checkpoint {
    Checkpoint::new(store.clone(), CHECKPOINT_KEY)
}

/// Queue sink that fails sends for the listed action ids
#[derive(Default)]
pub struct FakeQueueSink {
    fail_ids: Vec<i64>,
    sent: Mutex<Vec<serde_json::Value>>,
}

impl FakeQueueSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing_for(ids: &[i64]) -> Arc<Self> {
        Arc::new(Self {
            fail_ids: ids.to_vec(),
            ..Default::default()
        })
    }

    pub fn sent(&self) -> Vec<serde_json::Value> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_ids(&self) -> Vec<i64> {
        self.sent()
            .iter()
            .map(|v| v["action_id"].as_i64().unwrap())
            .collect()
    }
}

#[async_trait]
impl QueueSink for FakeQueueSink {
    async fn get_or_create(&self, name: &str) -> Result<String> {
        Ok(format!("https://sqs.local/000000000000/{}", name))
    }

    async fn send(&self, _queue: &str, body: String) -> Result<()> {
        let value: serde_json::Value = serde_json::from_str(&body)?;
        let id = value["action_id"].as_i64().unwrap_or_default();
        if self.fail_ids.contains(&id) {
            return Err(IngestError::queue("service unavailable"));
        }
        self.sent.lock().unwrap().push(value);
        Ok(())
    }
}

/// Cloneable in-memory writer for stream-mode output
#[derive(Clone, Default)]
pub struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl SharedBuf {
    pub fn text(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }

    pub fn lines(&self) -> Vec<serde_json::Value> {
        self.text()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }
}

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
