//! Durable watermark storage
//!
//! A single well-known key holds the last harvested timestamp. One controller
//! instance writes a given key at a time.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::{
    config::{Credentials, Region},
    primitives::ByteStream,
    types::{BucketLocationConstraint, CreateBucketConfiguration},
    Client,
};
use harvest_common::Watermark;
use std::sync::Arc;
use tracing::{debug, info, instrument};

use crate::config::{CheckpointConfig, DEFAULT_REGION};
use crate::error::{IngestError, Result};

/// String get/put against durable storage. A missing key is `Ok(None)`.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn put(&self, key: &str, value: &str) -> Result<()>;
}

/// S3 bucket holding watermark objects
#[derive(Clone)]
pub struct S3CheckpointStore {
    client: Client,
    bucket: String,
}

impl S3CheckpointStore {
    /// Build a client and make sure the bucket exists, creating it if needed
    pub async fn connect(config: &CheckpointConfig) -> Result<Self> {
        debug!(bucket = %config.bucket, region = %config.region, "Initializing checkpoint store");

        let shared = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .load()
            .await;

        let mut builder =
            aws_sdk_s3::config::Builder::from(&shared).force_path_style(config.path_style);

        if let (Some(access_key), Some(secret_key)) = (&config.access_key, &config.secret_key) {
            builder = builder.credentials_provider(Credentials::new(
                access_key,
                secret_key,
                None,
                None,
                "harvest-checkpoint",
            ));
        }
        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        let store = Self {
            client: Client::from_conf(builder.build()),
            bucket: config.bucket.clone(),
        };
        store.ensure_bucket(&config.region).await?;

        info!(bucket = %store.bucket, "Checkpoint store initialized");
        Ok(store)
    }

    #[instrument(skip(self))]
    async fn ensure_bucket(&self, region: &str) -> Result<()> {
        if self
            .client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .is_ok()
        {
            return Ok(());
        }

        info!(bucket = %self.bucket, "Creating checkpoint bucket");
        let mut request = self.client.create_bucket().bucket(&self.bucket);
        if region != DEFAULT_REGION {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(region))
                    .build(),
            );
        }

        request.send().await.map_err(|e| {
            IngestError::checkpoint(format!(
                "failed to create bucket {}: {}",
                self.bucket,
                e.into_service_error()
            ))
        })?;
        Ok(())
    }
}

#[async_trait]
impl CheckpointStore for S3CheckpointStore {
    #[instrument(skip(self))]
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let output = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(output) => output,
            Err(e) => {
                let err = e.into_service_error();
                if err.is_no_such_key() {
                    debug!(key = %key, "No stored watermark");
                    return Ok(None);
                }
                return Err(IngestError::checkpoint(format!(
                    "failed to read s3://{}/{}: {}",
                    self.bucket, key, err
                )));
            }
        };

        let bytes = output
            .body
            .collect()
            .await
            .map_err(|e| IngestError::checkpoint(format!("failed to read object body: {}", e)))?
            .into_bytes();

        let value = String::from_utf8(bytes.to_vec())
            .map_err(|_| IngestError::checkpoint(format!("s3://{}/{} is not UTF-8", self.bucket, key)))?;

        Ok(Some(value.trim().to_string()))
    }

    #[instrument(skip(self))]
    async fn put(&self, key: &str, value: &str) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(value.as_bytes().to_vec()))
            .content_type("text/plain")
            .send()
            .await
            .map_err(|e| {
                IngestError::checkpoint(format!(
                    "failed to write s3://{}/{}: {}",
                    self.bucket,
                    key,
                    e.into_service_error()
                ))
            })?;

        debug!(bucket = %self.bucket, key = %key, "Stored watermark");
        Ok(())
    }
}

/// A checkpoint store bound to its watermark key
#[derive(Clone)]
pub struct Checkpoint {
    store: Arc<dyn CheckpointStore>,
    key: String,
}

impl Checkpoint {
    pub fn new(store: Arc<dyn CheckpointStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Read the stored watermark. A stored value that is not a watermark is an error.
    pub async fn load(&self) -> Result<Option<Watermark>> {
        match self.store.get(&self.key).await? {
            Some(value) if !value.is_empty() => Ok(Some(Watermark::parse(&value)?)),
            _ => Ok(None),
        }
    }

    pub async fn save(&self, watermark: &Watermark) -> Result<()> {
        self.store.put(&self.key, &watermark.to_string()).await
    }
}
