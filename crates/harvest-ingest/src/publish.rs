//! Record sinks: a durable queue or a line-delimited JSON stream

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_sqs::{config::Region, Client as SqsClient};
use serde::Serialize;
use serde_jsonlines::JsonLinesWriter;
use std::io::Write;
use std::sync::Arc;
use tracing::{debug, info, instrument};

use crate::error::{IngestError, Result};
use crate::models::EnrichedRecord;

/// Named message queue
#[async_trait]
pub trait QueueSink: Send + Sync {
    /// Resolve the queue handle for `name`, creating the queue if absent
    async fn get_or_create(&self, name: &str) -> Result<String>;

    async fn send(&self, queue: &str, body: String) -> Result<()>;
}

/// SQS-backed queue sink
#[derive(Clone)]
pub struct SqsQueueSink {
    client: SqsClient,
}

impl SqsQueueSink {
    pub fn new(client: SqsClient) -> Self {
        Self { client }
    }

    /// Build a client from the default AWS provider chain
    pub async fn connect(region: &str) -> Self {
        let shared = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .load()
            .await;
        Self::new(SqsClient::new(&shared))
    }
}

#[async_trait]
impl QueueSink for SqsQueueSink {
    #[instrument(level = "debug", skip(self))]
    async fn get_or_create(&self, name: &str) -> Result<String> {
        match self.client.get_queue_url().queue_name(name).send().await {
            Ok(output) => {
                if let Some(url) = output.queue_url {
                    return Ok(url);
                }
            }
            Err(e) => debug!(queue = %name, error = %e.into_service_error(), "Queue lookup failed"),
        }

        info!(queue = %name, "Creating queue");
        let created = self
            .client
            .create_queue()
            .queue_name(name)
            .send()
            .await
            .map_err(|e| IngestError::queue(format!("sqs create_queue {}: {}", name, e.into_service_error())))?;

        created
            .queue_url
            .ok_or_else(|| IngestError::queue(format!("sqs returned no url for queue {}", name)))
    }

    #[instrument(level = "debug", skip(self, body))]
    async fn send(&self, queue: &str, body: String) -> Result<()> {
        self.client
            .send_message()
            .queue_url(queue)
            .message_body(body)
            .send()
            .await
            .map_err(|e| IngestError::queue(format!("sqs send: {}", e.into_service_error())))?;
        Ok(())
    }
}

/// Dual-mode record publisher.
///
/// Queue mode resolves the queue once at construction; send failures surface
/// to the caller for per-record accounting.
pub enum Publisher {
    Queue {
        sink: Arc<dyn QueueSink>,
        queue: String,
    },
    Stream(JsonLinesWriter<Box<dyn Write + Send + Sync>>),
}

impl Publisher {
    pub async fn queue(sink: Arc<dyn QueueSink>, name: &str) -> Result<Self> {
        let queue = sink.get_or_create(name).await?;
        info!(queue = %queue, "Publishing records to queue");
        Ok(Publisher::Queue { sink, queue })
    }

    pub fn stream(writer: Box<dyn Write + Send + Sync>) -> Self {
        Publisher::Stream(JsonLinesWriter::new(writer))
    }

    pub fn stdout() -> Self {
        Self::stream(Box::new(std::io::stdout()))
    }

    pub async fn publish(&mut self, record: &EnrichedRecord) -> Result<()> {
        self.emit(record).await
    }

    /// Publish any serializable value as one message or line
    pub async fn emit<T: Serialize + Sync>(&mut self, value: &T) -> Result<()> {
        match self {
            Publisher::Queue { sink, queue } => {
                let body = serde_json::to_string(value)?;
                sink.send(queue, body).await
            }
            Publisher::Stream(writer) => {
                writer.write(value)?;
                writer.flush()?;
                Ok(())
            }
        }
    }
}
