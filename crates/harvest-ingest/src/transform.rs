//! Action + episode metadata -> enriched record

use chrono::{DateTime, Utc};
use harvest_common::Watermark;
use std::collections::BTreeMap;
use tracing::warn;

use crate::error::TransformError;
use crate::models::{ActionFields, ActionRecord, EnrichedRecord, EpisodeFields, EpisodeMetadata};

/// Minimum length of a series code that can be sliced into year/term/course
pub const SERIES_CODE_LEN: usize = 11;

/// Build the enriched record for `action`.
///
/// Missing optional metadata never fails the record. A missing required action
/// field, session id or IP chain does, as does an unreadable creation time.
pub fn transform(
    action: &ActionRecord,
    episode: Option<&EpisodeMetadata>,
) -> Result<EnrichedRecord, TransformError> {
    action.check_required()?;

    let session_id = action
        .session
        .session_id
        .clone()
        .filter(|s| !s.is_empty())
        .ok_or(TransformError::MissingField {
            action_id: action.id,
            field: "session id",
        })?;

    let (ip, proxies) = split_ip_chain(action.session.user_ip.as_deref().unwrap_or_default())
        .ok_or(TransformError::MissingField {
            action_id: action.id,
            field: "user ip",
        })?;

    let created = DateTime::parse_from_rfc3339(action.created.trim()).map_err(|_| {
        TransformError::InvalidCreated {
            action_id: action.id,
            value: action.created.clone(),
        }
    })?;

    let episode = match episode {
        Some(meta) => episode_fields(meta),
        None => {
            warn!(action_id = action.id, mpid = %action.mediapackage_id, "Missing episode for action");
            EpisodeFields::default()
        }
    };

    Ok(EnrichedRecord {
        action_id: action.id,
        timestamp: created.with_timezone(&Utc).to_rfc3339(),
        mpid: action.mediapackage_id.clone(),
        session_id,
        huid: action.session.user_id.clone().unwrap_or_default(),
        useragent: action.session.user_agent.clone(),
        action: ActionFields {
            action_type: action.action_type.clone(),
            inpoint: action.inpoint,
            outpoint: action.outpoint,
            length: action.length,
            is_playing: action.play_state.is_playing(),
        },
        ip,
        proxies,
        is_live: u8::from(action.play_state.is_live()),
        episode,
        watermark: Watermark::from_datetime(&created),
    })
}

/// Split a comma-joined IP chain into the client address and `proxyN` entries.
///
/// Every later position keeps its number, empty entries included.
pub fn split_ip_chain(chain: &str) -> Option<(String, BTreeMap<String, String>)> {
    let mut parts = chain.split(',').map(str::trim);
    let ip = parts.next().filter(|ip| !ip.is_empty())?.to_string();

    let proxies = parts
        .enumerate()
        .map(|(idx, p)| (format!("proxy{}", idx + 1), p.to_string()))
        .collect();

    Some((ip, proxies))
}

/// Year, term, course and the full code, or four empty strings when the code is short
pub fn slice_series_code(code: &str) -> (String, String, String, String) {
    let chars: Vec<char> = code.chars().collect();
    if chars.len() < SERIES_CODE_LEN {
        return Default::default();
    }

    let slice = |from: usize, to: usize| chars[from..to].iter().collect::<String>();
    (slice(0, 4), slice(4, 6), slice(6, 11), code.to_string())
}

fn millis_to_rfc3339(ms: i64) -> Option<String> {
    DateTime::<Utc>::from_timestamp_millis(ms).map(|dt| dt.to_rfc3339())
}

fn episode_fields(meta: &EpisodeMetadata) -> EpisodeFields {
    let mut fields = EpisodeFields {
        title: Some(meta.title.clone()),
        duration: Some(meta.duration),
        start: Some(meta.start.clone()),
        series_title: meta.series_title.clone(),
        ..Default::default()
    };

    match meta.series.as_deref() {
        Some(code) => {
            let (year, term, course, series) = slice_series_code(code);
            if series.is_empty() {
                warn!(mpid = %meta.id, series = %code, "Series code too short to slice");
            }
            fields.year = Some(year);
            fields.term = Some(term);
            fields.course = Some(course);
            fields.series = Some(series);
        }
        None => warn!(mpid = %meta.id, "Missing series for episode"),
    }

    match meta.dc_type.as_deref() {
        Some(t) => fields.dc_type = Some(t.to_string()),
        None => warn!(mpid = %meta.id, "Missing type for episode"),
    }
    match meta.description.as_deref() {
        Some(d) => fields.description = Some(d.to_string()),
        None => warn!(mpid = %meta.id, "Missing description for episode"),
    }

    if let Some(workflow) = &meta.workflow {
        match workflow.live_capture() {
            Some((started, completed)) => {
                fields.live_stream = Some(1);
                fields.live_start = millis_to_rfc3339(started);
                fields.live_end = millis_to_rfc3339(completed);
                fields.live_duration = Some(completed - started);
            }
            None => fields.live_stream = Some(0),
        }
        fields.available = workflow.retract_completed_ms.and_then(millis_to_rfc3339);
    }

    fields
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::models::{PlayState, Provenance, SessionInfo, WorkflowTiming};

    fn action(play_state: PlayState) -> ActionRecord {
        ActionRecord {
            id: 7,
            created: "2017-10-16T14:02:34-04:00".to_string(),
            mediapackage_id: "mp-1".to_string(),
            session: SessionInfo {
                session_id: Some("sess-1".to_string()),
                user_id: Some("12345".to_string()),
                user_agent: Some("Mozilla/5.0".to_string()),
                user_ip: Some("10.0.0.1, 172.16.0.1,192.168.0.1".to_string()),
            },
            action_type: "HEARTBEAT".to_string(),
            inpoint: Some(10),
            outpoint: Some(20),
            length: None,
            play_state,
        }
    }

    fn metadata(series: Option<&str>) -> EpisodeMetadata {
        EpisodeMetadata {
            id: "mp-1".to_string(),
            title: "Lecture 1".to_string(),
            duration: 3_600_000,
            start: "2017-09-01T10:00:00Z".to_string(),
            series: series.map(str::to_string),
            series_title: Some("Intro to Things".to_string()),
            dc_type: Some("L01".to_string()),
            description: None,
            workflow: None,
            provenance: Provenance::Upstream,
        }
    }

    #[test]
    fn test_basic_fields() {
        let rec = transform(&action(PlayState::PlayingVod), Some(&metadata(None))).unwrap();

        assert_eq!(rec.action_id, 7);
        assert_eq!(rec.timestamp, "2017-10-16T18:02:34+00:00");
        assert_eq!(rec.watermark.to_string(), "20171016140234");
        assert_eq!(rec.session_id, "sess-1");
        assert_eq!(rec.huid, "12345");
        assert!(rec.action.is_playing);
        assert_eq!(rec.is_live, 0);
        assert_eq!(rec.episode.title.as_deref(), Some("Lecture 1"));
        assert_eq!(rec.episode.description, None);
        assert_eq!(rec.episode.series, None);
    }

    #[test]
    fn test_ip_chain_split() {
        let rec = transform(&action(PlayState::NotPlaying), None).unwrap();

        assert_eq!(rec.ip, "10.0.0.1");
        assert_eq!(rec.proxies.len(), 2);
        assert_eq!(rec.proxies["proxy1"], "172.16.0.1");
        assert_eq!(rec.proxies["proxy2"], "192.168.0.1");
        assert!(rec.episode.is_empty());
    }

    #[test]
    fn test_ip_chain_keeps_empty_positions() {
        let (ip, proxies) = split_ip_chain("10.0.0.1,,10.0.0.3").unwrap();

        assert_eq!(ip, "10.0.0.1");
        assert_eq!(proxies.len(), 2);
        assert_eq!(proxies["proxy1"], "");
        assert_eq!(proxies["proxy2"], "10.0.0.3");
        assert!(split_ip_chain(",10.0.0.2").is_none());
    }

    #[test]
    fn test_live_discriminator() {
        assert_eq!(transform(&action(PlayState::PlayingLive), None).unwrap().is_live, 1);
        assert_eq!(transform(&action(PlayState::PlayingVod), None).unwrap().is_live, 0);
        assert_eq!(transform(&action(PlayState::NotPlaying), None).unwrap().is_live, 0);
    }

    #[test]
    fn test_series_code_slicing() {
        let rec = transform(&action(PlayState::PlayingVod), Some(&metadata(Some("20180112345")))).unwrap();

        assert_eq!(rec.episode.year.as_deref(), Some("2018"));
        assert_eq!(rec.episode.term.as_deref(), Some("01"));
        assert_eq!(rec.episode.course.as_deref(), Some("12345"));
        assert_eq!(rec.episode.series.as_deref(), Some("20180112345"));
        assert_eq!(rec.episode.series_title.as_deref(), Some("Intro to Things"));
    }

    #[test]
    fn test_short_series_code_yields_empty_fields() {
        let rec = transform(&action(PlayState::PlayingVod), Some(&metadata(Some("2018")))).unwrap();

        assert_eq!(rec.episode.year.as_deref(), Some(""));
        assert_eq!(rec.episode.term.as_deref(), Some(""));
        assert_eq!(rec.episode.course.as_deref(), Some(""));
        assert_eq!(rec.episode.series.as_deref(), Some(""));
    }

    #[test]
    fn test_workflow_timing() {
        let mut meta = metadata(None);
        meta.workflow = Some(WorkflowTiming {
            capture_started_ms: Some(1_504_260_000_000),
            capture_completed_ms: Some(1_504_263_600_000),
            retract_completed_ms: None,
        });

        let rec = transform(&action(PlayState::PlayingVod), Some(&meta)).unwrap();
        assert_eq!(rec.episode.live_stream, Some(1));
        assert_eq!(rec.episode.live_start.as_deref(), Some("2017-09-01T10:00:00+00:00"));
        assert_eq!(rec.episode.live_duration, Some(3_600_000));
        assert_eq!(rec.episode.available, None);

        meta.workflow = Some(WorkflowTiming::default());
        let rec = transform(&action(PlayState::PlayingVod), Some(&meta)).unwrap();
        assert_eq!(rec.episode.live_stream, Some(0));
        assert_eq!(rec.episode.live_start, None);
    }

    #[test]
    fn test_missing_session_id_fails() {
        let mut a = action(PlayState::PlayingVod);
        a.session.session_id = None;

        assert_eq!(
            transform(&a, None).unwrap_err(),
            TransformError::MissingField {
                action_id: 7,
                field: "session id"
            }
        );
    }

    #[test]
    fn test_missing_action_type_fails() {
        let mut a = action(PlayState::PlayingVod);
        a.action_type.clear();

        assert_eq!(
            transform(&a, None).unwrap_err(),
            TransformError::MissingField {
                action_id: 7,
                field: "type"
            }
        );
    }

    #[test]
    fn test_missing_ip_chain_fails() {
        let mut a = action(PlayState::PlayingVod);
        a.session.user_ip = Some("  ".to_string());
        assert!(transform(&a, None).is_err());
    }

    #[test]
    fn test_unreadable_created_fails() {
        let mut a = action(PlayState::PlayingVod);
        a.created = "last tuesday".to_string();

        assert!(matches!(
            transform(&a, None),
            Err(TransformError::InvalidCreated { action_id: 7, .. })
        ));
    }
}
