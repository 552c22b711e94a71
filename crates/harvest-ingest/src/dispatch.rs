//! Per-record HTTP event dispatch with a bounded worker pool
//!
//! Every action of a batch becomes one GET request against the stream endpoint.
//! At most `workers` requests are in flight; the batch completes only when all
//! of them have. Any non-success response aborts the run.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use harvest_common::cipher::TokenCipher;
use harvest_common::Watermark;
use reqwest::header::{COOKIE, USER_AGENT};
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::controller::{BatchHandler, BatchOutcome};
use crate::error::{IngestError, Result};
use crate::models::ActionRecord;
use crate::publish::Publisher;

/// Identity tag stored next to the hashed subject in the `acid` token
pub const HASHED_HUID_TYPE: &str = "HASHED_HUID";

/// Issues `JSESSIONID=...; acid=...` cookies for outbound events
#[derive(Clone)]
pub struct CookieFactory {
    cipher: TokenCipher,
    secret: String,
}

impl CookieFactory {
    pub fn new(secret: &str) -> Result<Self> {
        Ok(Self {
            cipher: TokenCipher::new(secret)?,
            secret: secret.to_string(),
        })
    }

    /// Hex MD5 of the secret followed by the subject id
    pub fn hash_subject(&self, subject: &str) -> String {
        format!("{:x}", md5::compute(format!("{}{}", self.secret, subject)))
    }

    pub fn acid_token(&self, subject: &str) -> Result<String> {
        let pairs = vec![
            ("huid".to_string(), self.hash_subject(subject)),
            ("type".to_string(), HASHED_HUID_TYPE.to_string()),
        ];
        Ok(self.cipher.encrypt(&pairs)?)
    }

    pub fn cookie(&self, session_id: &str, subject: &str) -> Result<String> {
        Ok(format!(
            "JSESSIONID={}; acid={}",
            session_id,
            self.acid_token(subject)?
        ))
    }

    pub fn cipher(&self) -> &TokenCipher {
        &self.cipher
    }
}

/// Query parameters of one outbound event
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventParams {
    pub id: String,
    #[serde(rename = "type")]
    pub action_type: String,
    #[serde(rename = "in", skip_serializing_if = "Option::is_none")]
    pub inpoint: Option<i64>,
    #[serde(rename = "out", skip_serializing_if = "Option::is_none")]
    pub outpoint: Option<i64>,
    pub playing: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventHeaders {
    #[serde(rename = "Cookie")]
    pub cookie: String,
    #[serde(rename = "User-Agent", skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

/// One outbound event; serialized as-is in stream mode
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchEvent {
    pub event_params: EventParams,
    pub headers: EventHeaders,
}

impl DispatchEvent {
    pub fn from_action(action: &ActionRecord, cookies: &CookieFactory) -> Result<Self> {
        action.check_required()?;
        let session = &action.session;
        let cookie = cookies.cookie(
            session.session_id.as_deref().unwrap_or_default(),
            session.user_id.as_deref().unwrap_or_default(),
        )?;

        Ok(Self {
            event_params: EventParams {
                id: action.mediapackage_id.clone(),
                action_type: action.action_type.clone(),
                inpoint: action.inpoint,
                outpoint: action.outpoint,
                playing: action.play_state.as_raw(),
                ip: session.user_ip.clone(),
            },
            headers: EventHeaders {
                cookie,
                user_agent: session.user_agent.clone(),
            },
        })
    }
}

/// Where dispatched events go
pub enum DispatchTarget {
    Endpoint(String),
    Stream(Publisher),
}

pub struct EventDispatcher {
    client: Client,
    cookies: CookieFactory,
    target: DispatchTarget,
    workers: usize,
}

impl EventDispatcher {
    pub fn new(
        cookies: CookieFactory,
        target: DispatchTarget,
        workers: usize,
        timeout: Duration,
    ) -> Result<Self> {
        if workers == 0 {
            return Err(IngestError::config("Worker count must be greater than 0"));
        }

        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            cookies,
            target,
            workers,
        })
    }
}

async fn send_event(client: &Client, endpoint: &str, event: &DispatchEvent) -> Result<()> {
    let mut request = client
        .get(endpoint)
        .query(&event.event_params)
        .header(COOKIE, &event.headers.cookie);
    if let Some(ua) = &event.headers.user_agent {
        request = request.header(USER_AGENT, ua);
    }

    let response = request.send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(IngestError::Dispatch {
            status: status.as_u16(),
            url: endpoint.to_string(),
        });
    }

    debug!(mpid = %event.event_params.id, status = status.as_u16(), "Dispatched event");
    Ok(())
}

#[async_trait]
impl BatchHandler for EventDispatcher {
    async fn handle(&mut self, batch: &[ActionRecord]) -> Result<BatchOutcome> {
        let mut outcome = BatchOutcome::default();
        let mut events = Vec::with_capacity(batch.len());

        for action in batch {
            match DispatchEvent::from_action(action, &self.cookies) {
                Ok(event) => events.push((action, event)),
                Err(e) => {
                    error!(action_id = action.id, error = %e, "Exception during event creation");
                    outcome.record_failure();
                }
            }
        }

        match &mut self.target {
            DispatchTarget::Endpoint(endpoint) => {
                let requests: Vec<_> = events
                    .iter()
                    .map(|(_, event)| {
                        let client = self.client.clone();
                        let endpoint = endpoint.clone();
                        let event = event.clone();
                        async move { send_event(&client, &endpoint, &event).await }
                    })
                    .collect();

                let results: Vec<Result<()>> = stream::iter(requests)
                    .buffer_unordered(self.workers)
                    .collect()
                    .await;

                if let Some(err) = results.into_iter().find_map(|r| r.err()) {
                    error!(error = %err, "Event dispatch failed");
                    return Err(err);
                }
            }
            DispatchTarget::Stream(publisher) => {
                for (_, event) in &events {
                    publisher.emit(event).await?;
                }
            }
        }

        for (action, _) in &events {
            match Watermark::from_rfc3339(&action.created) {
                Ok(mark) => outcome.record_success(mark),
                Err(e) => {
                    warn!(action_id = action.id, error = %e, "Dispatched action has unreadable creation time");
                    outcome.succeeded += 1;
                }
            }
        }

        Ok(outcome)
    }
}
