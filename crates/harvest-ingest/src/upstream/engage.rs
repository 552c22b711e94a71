//! HTTP client for the engage (actions, episode search) and admin (workflow) APIs

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use super::{ActionSource, EpisodeSource, OneOrMany};
use crate::config::EngageConfig;
use crate::error::{IngestError, Result};
use crate::models::{lenient, ActionQuery, ActionRecord, RawEpisode, WorkflowTiming};

const ACTIONS_PATH: &str = "/usertracking/actions.json";
const EPISODE_PATH: &str = "/search/episode.json";
const WORKFLOWS_PATH: &str = "/workflow/instances.json";

const CAPTURE_OPERATION: &str = "capture";
const RETRACT_OPERATION: &str = "retract-element";

#[derive(Deserialize)]
struct ActionsEnvelope {
    actions: ActionsPage,
}

#[derive(Deserialize, Default)]
struct ActionsPage {
    #[serde(default)]
    action: Option<OneOrMany<Value>>,
}

#[derive(Deserialize)]
struct SearchEnvelope {
    #[serde(rename = "search-results")]
    results: SearchResults,
}

#[derive(Deserialize)]
struct SearchResults {
    #[serde(default)]
    result: Option<OneOrMany<Value>>,
}

#[derive(Deserialize)]
struct WorkflowsEnvelope {
    workflows: WorkflowList,
}

#[derive(Deserialize)]
struct WorkflowList {
    #[serde(default)]
    workflow: Option<OneOrMany<WorkflowDoc>>,
}

#[derive(Deserialize)]
struct WorkflowDoc {
    #[serde(deserialize_with = "lenient::i64")]
    id: i64,
    #[serde(default)]
    operations: Option<OperationList>,
}

#[derive(Deserialize)]
struct OperationList {
    #[serde(default)]
    operation: Option<OneOrMany<OperationDoc>>,
}

#[derive(Deserialize)]
struct OperationDoc {
    id: String,
    #[serde(default, deserialize_with = "lenient::opt_i64")]
    started: Option<i64>,
    #[serde(default, deserialize_with = "lenient::opt_i64")]
    completed: Option<i64>,
}

/// Engage/admin REST client using basic auth
pub struct EngageClient {
    client: Client,
    config: EngageConfig,
}

impl EngageClient {
    pub fn new(config: EngageConfig) -> Result<Self> {
        config.validate()?;

        let client = Client::builder()
            .timeout(config.timeout())
            .user_agent(concat!("harvest/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &EngageConfig {
        &self.config
    }

    async fn get(&self, url: &str, query: &[(&str, String)]) -> Result<Response> {
        let response = self
            .client
            .get(url)
            .basic_auth(&self.config.user, Some(&self.config.password))
            .query(query)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(IngestError::UpstreamStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        Ok(response)
    }

    /// Look up live-capture and retraction timing from the most recent
    /// succeeded archive workflow of `mpid`
    #[instrument(skip(self))]
    pub async fn fetch_workflow_timing(&self, mpid: &str) -> Result<Option<WorkflowTiming>> {
        let Some(admin_url) = self.config.admin_url.as_deref() else {
            return Ok(None);
        };

        let url = format!("{}{}", admin_url, WORKFLOWS_PATH);
        let envelope: WorkflowsEnvelope = self
            .get(
                &url,
                &[
                    ("mp", mpid.to_string()),
                    ("state", "SUCCEEDED".to_string()),
                    ("workflowdefinition", self.config.workflow_definition.clone()),
                ],
            )
            .await?
            .json()
            .await?;

        let latest = envelope
            .workflows
            .workflow
            .unwrap_or_default()
            .into_vec()
            .into_iter()
            .max_by_key(|wf| wf.id);

        let Some(workflow) = latest else {
            debug!(mpid = %mpid, "No finished workflow found");
            return Ok(None);
        };

        let operations = workflow
            .operations
            .and_then(|ops| ops.operation)
            .unwrap_or_default()
            .into_vec();

        let mut timing = WorkflowTiming::default();
        if let Some(capture) = operations.iter().find(|op| op.id == CAPTURE_OPERATION) {
            timing.capture_started_ms = capture.started;
            timing.capture_completed_ms = capture.completed;
        }
        if let Some(retract) = operations.iter().find(|op| op.id == RETRACT_OPERATION) {
            timing.retract_completed_ms = retract.completed;
        }

        Ok(Some(timing))
    }
}

/// Decode one page item. An undecodable item stays in the batch as a
/// placeholder so it is counted as a failed record instead of failing the page.
fn decode_action(value: Value) -> ActionRecord {
    let id = value
        .get("id")
        .cloned()
        .and_then(|id| lenient::i64(id).ok())
        .unwrap_or_default();

    match serde_json::from_value(value) {
        Ok(action) => action,
        Err(e) => {
            warn!(action_id = id, error = %e, "Undecodable action");
            ActionRecord::malformed(id)
        }
    }
}

#[async_trait]
impl ActionSource for EngageClient {
    #[instrument(skip(self), fields(offset = query.offset, limit = query.limit))]
    async fn fetch_actions(&self, query: &ActionQuery) -> Result<Vec<ActionRecord>> {
        let url = format!("{}{}", self.config.engage_url, ACTIONS_PATH);
        let envelope: ActionsEnvelope = self
            .get(
                &url,
                &[
                    ("start", query.start.to_string()),
                    ("end", query.end.to_string()),
                    ("limit", query.limit.to_string()),
                    ("offset", query.offset.to_string()),
                ],
            )
            .await?
            .json()
            .await?;

        let actions: Vec<ActionRecord> = envelope
            .actions
            .action
            .unwrap_or_default()
            .into_vec()
            .into_iter()
            .map(decode_action)
            .collect();

        debug!(count = actions.len(), "Fetched actions");
        Ok(actions)
    }
}

#[async_trait]
impl EpisodeSource for EngageClient {
    #[instrument(skip(self))]
    async fn fetch_episode(&self, mpid: &str) -> Result<Option<RawEpisode>> {
        let url = format!("{}{}", self.config.engage_url, EPISODE_PATH);
        let envelope: SearchEnvelope = self
            .get(
                &url,
                &[("id", mpid.to_string()), ("includeDeleted", "true".to_string())],
            )
            .await?
            .json()
            .await?;

        let Some(episode) = envelope
            .results
            .result
            .unwrap_or_default()
            .into_vec()
            .into_iter()
            .next()
        else {
            return Ok(None);
        };

        let workflow = match self.fetch_workflow_timing(mpid).await {
            Ok(timing) => timing,
            Err(e) => {
                warn!(mpid = %mpid, error = %e, "Failed extracting workflow data");
                None
            }
        };

        Ok(Some(RawEpisode { episode, workflow }))
    }
}
