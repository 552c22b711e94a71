//! Data models for upstream actions, episode metadata and enriched records

use harvest_common::Watermark;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

use crate::error::TransformError;

/// Parameters of one paginated action request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionQuery {
    pub start: Watermark,
    pub end: Watermark,
    pub limit: u32,
    pub offset: u64,
}

/// Playback state reported with an action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlayState {
    #[default]
    NotPlaying,
    PlayingVod,
    PlayingLive,
}

impl PlayState {
    /// Map the upstream tri-state value: `2` is live, positive values are VOD
    pub fn from_raw(value: i64) -> Self {
        match value {
            2 => PlayState::PlayingLive,
            v if v > 0 => PlayState::PlayingVod,
            _ => PlayState::NotPlaying,
        }
    }

    pub fn as_raw(self) -> i64 {
        match self {
            PlayState::NotPlaying => 0,
            PlayState::PlayingVod => 1,
            PlayState::PlayingLive => 2,
        }
    }

    pub fn is_playing(self) -> bool {
        self != PlayState::NotPlaying
    }

    pub fn is_live(self) -> bool {
        self == PlayState::PlayingLive
    }
}

impl<'de> Deserialize<'de> for PlayState {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Flag(bool),
            Int(i64),
            Text(String),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Flag(true) => PlayState::PlayingVod,
            Raw::Flag(false) => PlayState::NotPlaying,
            Raw::Int(v) => PlayState::from_raw(v),
            Raw::Text(s) => match s.trim() {
                "true" => PlayState::PlayingVod,
                other => PlayState::from_raw(other.parse().unwrap_or(0)),
            },
        })
    }
}

/// Session descriptor attached to an action
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SessionInfo {
    #[serde(rename = "sessionId", default)]
    pub session_id: Option<String>,
    #[serde(rename = "userId", default, deserialize_with = "lenient::opt_string")]
    pub user_id: Option<String>,
    #[serde(rename = "userAgent", default)]
    pub user_agent: Option<String>,
    /// Comma-joined client IP chain, client first
    #[serde(rename = "userIp", default)]
    pub user_ip: Option<String>,
}

/// One upstream activity event.
///
/// Required fields left out by upstream decode as empty strings so that the
/// record fails on its own in [`ActionRecord::check_required`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ActionRecord {
    #[serde(default, deserialize_with = "lenient::i64")]
    pub id: i64,
    #[serde(default)]
    pub created: String,
    #[serde(rename = "mediapackageId", default)]
    pub mediapackage_id: String,
    #[serde(rename = "sessionId", default)]
    pub session: SessionInfo,
    #[serde(rename = "type", default)]
    pub action_type: String,
    #[serde(default, deserialize_with = "lenient::opt_i64")]
    pub inpoint: Option<i64>,
    #[serde(default, deserialize_with = "lenient::opt_i64")]
    pub outpoint: Option<i64>,
    #[serde(default, deserialize_with = "lenient::opt_i64")]
    pub length: Option<i64>,
    #[serde(rename = "isPlaying", default)]
    pub play_state: PlayState,
}

impl ActionRecord {
    /// Placeholder for an upstream item that could not be decoded at all
    pub fn malformed(id: i64) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }

    pub fn check_required(&self) -> Result<(), TransformError> {
        let missing = if self.mediapackage_id.is_empty() {
            Some("mediapackage id")
        } else if self.action_type.is_empty() {
            Some("type")
        } else if self.created.trim().is_empty() {
            Some("creation time")
        } else {
            None
        };

        match missing {
            Some(field) => Err(TransformError::MissingField {
                action_id: self.id,
                field,
            }),
            None => Ok(()),
        }
    }
}

/// Where an [`EpisodeMetadata`] value came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provenance {
    Cache,
    Upstream,
}

/// Live-capture and retraction timing from the archive workflow (epoch millis)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowTiming {
    pub capture_started_ms: Option<i64>,
    pub capture_completed_ms: Option<i64>,
    pub retract_completed_ms: Option<i64>,
}

impl WorkflowTiming {
    pub fn live_capture(&self) -> Option<(i64, i64)> {
        self.capture_started_ms.zip(self.capture_completed_ms)
    }
}

/// Raw upstream episode document plus optional workflow timing.
///
/// This is the value stored in the episode cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEpisode {
    pub episode: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow: Option<WorkflowTiming>,
}

/// Reference metadata for one media package
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpisodeMetadata {
    pub id: String,
    pub title: String,
    /// Duration in milliseconds
    pub duration: i64,
    pub start: String,
    /// Fixed-width series code: year (0..4), term (4..6), course/section (6..11)
    pub series: Option<String>,
    pub series_title: Option<String>,
    pub dc_type: Option<String>,
    pub description: Option<String>,
    pub workflow: Option<WorkflowTiming>,
    pub provenance: Provenance,
}

#[derive(Deserialize)]
struct SearchEpisodeDoc {
    #[serde(default)]
    id: Option<String>,
    #[serde(rename = "dcType", default)]
    dc_type: Option<String>,
    #[serde(rename = "dcDescription", default)]
    dc_description: Option<String>,
    mediapackage: MediaPackageDoc,
}

#[derive(Deserialize)]
struct MediaPackageDoc {
    #[serde(default)]
    id: Option<String>,
    title: String,
    #[serde(deserialize_with = "lenient::i64")]
    duration: i64,
    start: String,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    series: Option<String>,
    #[serde(default)]
    seriestitle: Option<String>,
}

impl EpisodeMetadata {
    /// Parse a raw episode document.
    ///
    /// Title, duration and start are required; everything else is optional.
    pub fn from_raw(raw: &RawEpisode, provenance: Provenance) -> serde_json::Result<Self> {
        let doc = SearchEpisodeDoc::deserialize(&raw.episode)?;
        let id = doc
            .mediapackage
            .id
            .or(doc.id)
            .unwrap_or_default();

        Ok(Self {
            id,
            title: doc.mediapackage.title,
            duration: doc.mediapackage.duration,
            start: doc.mediapackage.start,
            series: doc.mediapackage.series,
            series_title: doc.mediapackage.seriestitle,
            dc_type: doc.dc_type,
            description: doc.dc_description,
            workflow: raw.workflow.clone(),
            provenance,
        })
    }

    pub fn is_cached(&self) -> bool {
        self.provenance == Provenance::Cache
    }
}

/// Playback fields of an enriched record
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionFields {
    #[serde(rename = "type")]
    pub action_type: String,
    pub inpoint: Option<i64>,
    pub outpoint: Option<i64>,
    pub length: Option<i64>,
    pub is_playing: bool,
}

/// Episode sub-object of an enriched record; empty when metadata was unavailable
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EpisodeFields {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub series_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub series: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub term: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub course: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub dc_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub live_stream: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub live_start: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub live_end: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub live_duration: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub available: Option<String>,
}

impl EpisodeFields {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Canonical output record
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnrichedRecord {
    pub action_id: i64,
    /// Creation time in UTC, RFC 3339
    pub timestamp: String,
    pub mpid: String,
    pub session_id: String,
    pub huid: String,
    pub useragent: Option<String>,
    pub action: ActionFields,
    pub ip: String,
    /// `proxy1`, `proxy2`, ... in chain order
    #[serde(flatten)]
    pub proxies: BTreeMap<String, String>,
    pub is_live: u8,
    pub episode: EpisodeFields,
    /// Creation time in watermark form; not part of the published record
    #[serde(skip)]
    pub watermark: Watermark,
}

/// Serde helpers for upstream fields that arrive as either numbers or strings
pub(crate) mod lenient {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumOrText {
        Int(i64),
        Float(f64),
        Text(String),
    }

    fn to_i64<E: Error>(value: NumOrText) -> Result<i64, E> {
        match value {
            NumOrText::Int(v) => Ok(v),
            NumOrText::Float(v) => Ok(v as i64),
            NumOrText::Text(s) => s
                .trim()
                .parse::<f64>()
                .map(|v| v as i64)
                .map_err(|_| E::custom(format!("expected a number, got '{}'", s))),
        }
    }

    pub fn i64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
        to_i64(NumOrText::deserialize(deserializer)?)
    }

    pub fn opt_i64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<i64>, D::Error> {
        match Option::<NumOrText>::deserialize(deserializer)? {
            None => Ok(None),
            Some(NumOrText::Text(s)) if s.trim().is_empty() => Ok(None),
            Some(v) => to_i64(v).map(Some),
        }
    }

    pub fn opt_string<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<String>, D::Error> {
        Ok(match Option::<NumOrText>::deserialize(deserializer)? {
            None => None,
            Some(NumOrText::Int(v)) => Some(v.to_string()),
            Some(NumOrText::Float(v)) => Some(v.to_string()),
            Some(NumOrText::Text(s)) => Some(s),
        })
    }
}
