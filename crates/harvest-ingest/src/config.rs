//! Harvest configuration
//!
//! Settings for the upstream clients, the pagination controller and the external
//! stores. CLI options carry most values; store settings are read from the
//! environment the same way the deployment scripts provide them.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{IngestError, Result};

// ============================================================================
// Defaults
// ============================================================================

/// Default look-back when neither a start nor a checkpoint is available.
pub const DEFAULT_INTERVAL_MINUTES: i64 = 2;

/// Default number of actions per upstream request for the queue/stream harvest.
pub const DEFAULT_BATCH_SIZE: u32 = 1000;

/// Default number of actions per upstream request for the dispatch path.
pub const DEFAULT_DISPATCH_BATCH_SIZE: u32 = 100;

/// Default pause between batch requests in seconds.
pub const DEFAULT_WAIT_SECS: u64 = 1;

/// Default number of concurrent dispatch requests.
pub const DEFAULT_WORKERS: usize = 8;

/// Default upstream HTTP timeout in seconds.
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

/// Default episode cache TTL in seconds.
pub const DEFAULT_EPISODE_CACHE_TTL_SECS: u64 = 1800;

/// Workflow definition whose operations carry live-capture and retraction timing.
pub const DEFAULT_WORKFLOW_DEFINITION: &str = "DCE-archive-publish-external";

/// Default object key of the last-action watermark.
pub const DEFAULT_CHECKPOINT_KEY: &str = "last-action-ts";

/// Default AWS region for the checkpoint bucket and record queue.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Prepend `http://` to bare host names
pub fn normalize_base_url(host: &str) -> String {
    let trimmed = host.trim().trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("http://{}", trimmed)
    }
}

/// Upstream engage/admin API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngageConfig {
    /// Engage node base URL (actions and episode search)
    pub engage_url: String,
    /// Admin node base URL (workflow lookups); workflow timing is skipped without it
    pub admin_url: Option<String>,
    pub user: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub timeout_secs: u64,
    pub workflow_definition: String,
}

impl EngageConfig {
    pub fn new(
        engage_host: &str,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            engage_url: normalize_base_url(engage_host),
            admin_url: None,
            user: user.into(),
            password: password.into(),
            timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
            workflow_definition: DEFAULT_WORKFLOW_DEFINITION.to_string(),
        }
    }

    pub fn with_admin_host(mut self, admin_host: Option<&str>) -> Self {
        self.admin_url = admin_host.map(normalize_base_url);
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.engage_url.trim_start_matches("http://").is_empty() {
            return Err(IngestError::config("Engage host cannot be empty"));
        }
        if self.user.is_empty() {
            return Err(IngestError::config("Upstream REST user cannot be empty"));
        }
        if self.timeout_secs == 0 {
            return Err(IngestError::config("HTTP timeout must be greater than 0"));
        }
        Ok(())
    }
}

/// Pagination controller settings
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Actions per upstream request; also the offset increment
    pub batch_size: u32,
    /// Pause after each non-empty batch
    pub wait: Duration,
    /// Look-back used when no start or checkpoint is available
    pub default_interval: chrono::Duration,
    /// Largest allowed `end - start`; unlimited when `None`
    pub max_window_span: Option<chrono::Duration>,
    /// Skip the window span guard
    pub disable_span_check: bool,
    /// Persist the watermark after every batch, not only at run end
    pub checkpoint_every_batch: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            wait: Duration::from_secs(DEFAULT_WAIT_SECS),
            default_interval: chrono::Duration::minutes(DEFAULT_INTERVAL_MINUTES),
            max_window_span: None,
            disable_span_check: false,
            checkpoint_every_batch: false,
        }
    }
}

impl ControllerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(IngestError::config("Batch size must be greater than 0"));
        }
        if self.default_interval <= chrono::Duration::zero() {
            return Err(IngestError::config("Default interval must be positive"));
        }
        if let Some(max) = self.max_window_span {
            if max <= chrono::Duration::zero() {
                return Err(IngestError::config("Max start-end span must be positive"));
            }
        }
        Ok(())
    }
}

/// Checkpoint (watermark) bucket settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointConfig {
    pub bucket: String,
    pub key: String,
    pub region: String,
    /// Custom endpoint, e.g. a local MinIO
    pub endpoint: Option<String>,
    pub path_style: bool,
    /// Static credentials; the default AWS provider chain is used when unset
    pub access_key: Option<String>,
    #[serde(skip_serializing)]
    pub secret_key: Option<String>,
}

impl CheckpointConfig {
    /// Load from the environment.
    ///
    /// Returns `None` when `S3_HARVEST_TS_BUCKET` is unset; the harvest then runs
    /// without a persisted watermark.
    pub fn from_env() -> Option<Self> {
        let bucket = std::env::var("S3_HARVEST_TS_BUCKET")
            .ok()
            .filter(|b| !b.trim().is_empty())?;

        Some(Self {
            bucket,
            key: std::env::var("S3_LAST_ACTION_TS_KEY")
                .unwrap_or_else(|_| DEFAULT_CHECKPOINT_KEY.to_string()),
            region: std::env::var("S3_REGION")
                .or_else(|_| std::env::var("AWS_REGION"))
                .unwrap_or_else(|_| DEFAULT_REGION.to_string()),
            endpoint: std::env::var("S3_ENDPOINT").ok(),
            path_style: std::env::var("S3_PATH_STYLE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(false),
            access_key: std::env::var("S3_ACCESS_KEY").ok(),
            secret_key: std::env::var("S3_SECRET_KEY").ok(),
        })
    }
}

/// Episode cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Redis URL; a process-local cache is used when unset
    pub redis_url: Option<String>,
    pub ttl_secs: u64,
    pub key_prefix: Option<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            ttl_secs: DEFAULT_EPISODE_CACHE_TTL_SECS,
            key_prefix: None,
        }
    }
}

impl CacheConfig {
    pub fn from_env() -> Self {
        Self {
            redis_url: std::env::var("REDIS_URL").ok().filter(|u| !u.is_empty()),
            ttl_secs: std::env::var("EPISODE_CACHE_EXPIRE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_EPISODE_CACHE_TTL_SECS),
            key_prefix: std::env::var("EPISODE_CACHE_PREFIX").ok(),
        }
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs.max(1))
    }
}
