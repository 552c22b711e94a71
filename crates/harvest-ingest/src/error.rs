//! Error types for the harvest pipeline

use harvest_common::cipher::CipherError;
use harvest_common::HarvestError;

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, IngestError>;

/// Error types for harvesting, enrichment and publishing
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("Upstream request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Upstream returned HTTP {status} for {url}")]
    UpstreamStatus { status: u16, url: String },

    #[error("Start-end time span of {span_secs}s is larger than the allowed {max_secs}s")]
    WindowTooWide { span_secs: i64, max_secs: i64 },

    #[error("Event dispatch to {url} failed with HTTP {status}")]
    Dispatch { status: u16, url: String },

    #[error("Checkpoint store error: {0}")]
    Checkpoint(String),

    #[error("Cache store error: {0}")]
    Cache(String),

    #[error("Queue error: {0}")]
    Queue(String),

    #[error("Transform error: {0}")]
    Transform(#[from] TransformError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Token cipher error: {0}")]
    Cipher(#[from] CipherError),

    #[error(transparent)]
    Common(#[from] HarvestError),

    #[error("Run cancelled")]
    Cancelled,
}

impl IngestError {
    pub fn checkpoint(msg: impl Into<String>) -> Self {
        Self::Checkpoint(msg.into())
    }

    pub fn cache(msg: impl Into<String>) -> Self {
        Self::Cache(msg.into())
    }

    pub fn queue(msg: impl Into<String>) -> Self {
        Self::Queue(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

/// Record-local transform failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransformError {
    #[error("action {action_id} has no {field}")]
    MissingField {
        action_id: i64,
        field: &'static str,
    },

    #[error("action {action_id} has an unreadable creation time '{value}'")]
    InvalidCreated { action_id: i64, value: String },
}
