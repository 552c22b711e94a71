//! Windowed, offset-paginated harvest loop
//!
//! # Window
//!
//! The start of a run is resolved in this order:
//!
//! 1. an explicit start given by the caller
//! 2. the watermark stored in the [`Checkpoint`]
//! 3. `now - default_interval`
//!
//! The end is the explicit end or `now`. When a maximum span is configured
//! and the window is wider, the run aborts before any fetch.
//!
//! # Loop
//!
//! Batches are requested at `offset = 0, batch_size, 2 * batch_size, ...` until
//! the upstream returns an empty page. A fetch failure is fatal. Each non-empty
//! batch is handed to a [`BatchHandler`], which isolates record-local failures
//! and reports them in its [`BatchOutcome`]. The controller sleeps for the
//! configured wait between batches.
//!
//! # Watermark
//!
//! After the loop ends normally the new watermark is:
//!
//! - the window end, if no actions were fetched
//! - otherwise the creation time of the last successful record of the most
//!   recent batch that had one
//! - otherwise (every record failed) the window start
//!
//! A failed checkpoint write is logged and does not fail the run. A cancelled
//! run returns [`IngestError::Cancelled`] and writes nothing.

use async_trait::async_trait;
use chrono::{Local, NaiveDateTime, SubsecRound};
use harvest_common::Watermark;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::checkpoint::Checkpoint;
use crate::config::ControllerConfig;
use crate::error::{IngestError, Result};
use crate::models::{ActionQuery, ActionRecord};
use crate::upstream::ActionSource;

/// The `[start, end]` range requested in one run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub start: Watermark,
    pub end: Watermark,
}

impl Window {
    pub fn new(start: Watermark, end: Watermark) -> Self {
        Self { start, end }
    }

    pub fn span(&self) -> chrono::Duration {
        self.end.since(&self.start)
    }

    /// Fail with [`IngestError::WindowTooWide`] if the span exceeds `max`
    pub fn check_span(&self, max: chrono::Duration) -> Result<()> {
        let span = self.span();
        if span > max {
            return Err(IngestError::WindowTooWide {
                span_secs: span.num_seconds(),
                max_secs: max.num_seconds(),
            });
        }
        Ok(())
    }
}

/// Result of processing one batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub succeeded: usize,
    pub failed: usize,
    /// Creation time of the last record that was fully processed
    pub last_success: Option<Watermark>,
}

impl BatchOutcome {
    pub fn record_success(&mut self, watermark: Watermark) {
        self.succeeded += 1;
        self.last_success = Some(watermark);
    }

    pub fn record_failure(&mut self) {
        self.failed += 1;
    }
}

/// Consumer of fetched batches.
///
/// Record-local failures belong in the returned outcome; an `Err` aborts the run.
#[async_trait]
pub trait BatchHandler: Send {
    async fn handle(&mut self, batch: &[ActionRecord]) -> Result<BatchOutcome>;
}

/// Totals reported at the end of a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub window: Window,
    pub actions: usize,
    pub batches: usize,
    pub failures: usize,
    /// Watermark computed at run end (persisted when a checkpoint is configured)
    pub watermark: Watermark,
}

pub struct HarvestController {
    source: Arc<dyn ActionSource>,
    checkpoint: Option<Checkpoint>,
    config: ControllerConfig,
    cancel: CancellationToken,
}

impl HarvestController {
    pub fn new(source: Arc<dyn ActionSource>, config: ControllerConfig) -> Self {
        Self {
            source,
            checkpoint: None,
            config,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_checkpoint(mut self, checkpoint: Checkpoint) -> Self {
        self.checkpoint = Some(checkpoint);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Resolve the run window relative to the local clock
    pub async fn resolve_window(
        &self,
        start: Option<Watermark>,
        end: Option<Watermark>,
    ) -> Result<Window> {
        self.resolve_window_at(start, end, Local::now().naive_local().trunc_subsecs(0))
            .await
    }

    /// Resolve the run window relative to `now`
    pub async fn resolve_window_at(
        &self,
        start: Option<Watermark>,
        end: Option<Watermark>,
        now: NaiveDateTime,
    ) -> Result<Window> {
        let now = Watermark::from_naive(now);
        let end = end.unwrap_or(now);

        let start = match start {
            Some(start) => start,
            None => match self.stored_watermark().await? {
                Some(stored) => stored,
                None => now.checked_sub(self.config.default_interval).unwrap_or(now),
            },
        };

        Ok(Window::new(start, end))
    }

    async fn stored_watermark(&self) -> Result<Option<Watermark>> {
        match &self.checkpoint {
            Some(checkpoint) => checkpoint.load().await,
            None => Ok(None),
        }
    }

    /// Drive the pagination loop over `window`, feeding each batch to `handler`
    pub async fn run<H: BatchHandler>(&self, window: Window, handler: &mut H) -> Result<RunSummary> {
        info!(start = %window.start, end = %window.end, "Fetching user actions");

        let span = window.span();
        info!(start_end_span_seconds = span.num_seconds(), "Start-end time span");

        if let Some(max) = self.config.max_window_span {
            if self.config.disable_span_check {
                warn!("Start-end span check disabled");
            } else if let Err(e) = window.check_span(max) {
                error!(error = %e, "Aborting harvest");
                return Err(e);
            }
        }

        let mut offset: u64 = 0;
        let mut batches = 0usize;
        let mut actions = 0usize;
        let mut failures = 0usize;
        let mut last_success: Option<Watermark> = None;

        loop {
            let query = ActionQuery {
                start: window.start,
                end: window.end,
                limit: self.config.batch_size,
                offset,
            };

            let fetched = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(self.cancelled()),
                result = self.source.fetch_actions(&query) => result,
            };

            let batch = match fetched {
                Ok(batch) => batch,
                Err(e) => {
                    error!(offset = offset, error = %e, "API request failed");
                    return Err(e);
                }
            };

            if batch.is_empty() {
                info!("No more actions");
                break;
            }

            batches += 1;
            actions += batch.len();
            info!(batch = batches, actions = batch.len(), offset = offset, "Fetched batch");

            let outcome = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(self.cancelled()),
                result = handler.handle(&batch) => result?,
            };

            failures += outcome.failed;
            if let Some(mark) = outcome.last_success {
                last_success = Some(mark);
                if self.config.checkpoint_every_batch {
                    self.persist(&mark).await;
                }
            }

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(self.cancelled()),
                _ = tokio::time::sleep(self.config.wait) => {}
            }

            offset += u64::from(self.config.batch_size);
        }

        info!(
            actions = actions,
            batches = batches,
            failures = failures,
            "Total actions: {}, total batches: {}, total failed: {}",
            actions,
            batches,
            failures
        );

        let watermark = if actions == 0 {
            window.end
        } else {
            last_success.unwrap_or(window.start)
        };
        self.persist(&watermark).await;

        Ok(RunSummary {
            window,
            actions,
            batches,
            failures,
            watermark,
        })
    }

    async fn persist(&self, watermark: &Watermark) {
        let Some(checkpoint) = &self.checkpoint else {
            return;
        };

        match checkpoint.save(watermark).await {
            Ok(()) => info!(key = %checkpoint.key(), watermark = %watermark, "Setting last action timestamp"),
            Err(e) => error!(key = %checkpoint.key(), error = %e, "Failed setting last action timestamp"),
        }
    }

    fn cancelled(&self) -> IngestError {
        warn!("Harvest cancelled; checkpoint not written");
        IngestError::Cancelled
    }
}
