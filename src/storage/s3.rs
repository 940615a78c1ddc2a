//! AWS S3 storage implementation.
//!
//! Each key becomes one object under `{bucket}/{prefix}/`. A `PutObject`
//! replaces the whole object, which gives the per-title atomic replace the
//! engine relies on.

use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::primitives::ByteStream;

use crate::error::{AppError, Result};
use crate::storage::KvStore;

/// S3-backed key-value store.
#[derive(Clone)]
pub struct S3Storage {
    client: Client,
    bucket: String,
    prefix: String,
}

impl S3Storage {
    /// Create a new S3 storage instance.
    pub fn new(client: Client, bucket: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            prefix: prefix.into(),
        }
    }

    /// Create S3 storage from environment configuration.
    ///
    /// - `S3_BUCKET` (default: `comment-sync`)
    /// - `S3_PREFIX` (default: `comment-sync`)
    pub async fn from_env() -> Result<Self> {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        let client = Client::new(&config);

        let bucket = std::env::var("S3_BUCKET").unwrap_or_else(|_| "comment-sync".to_string());
        let prefix = std::env::var("S3_PREFIX").unwrap_or_else(|_| "comment-sync".to_string());

        Ok(Self::new(client, bucket, prefix))
    }

    fn object_key(&self, key: &str) -> String {
        let prefix = self.prefix.trim_matches('/');
        if prefix.is_empty() {
            key.to_string()
        } else {
            format!("{prefix}/{key}")
        }
    }
}

#[async_trait]
impl KvStore for S3Storage {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let object_key = self.object_key(key);
        let result = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&object_key)
            .send()
            .await;

        match result {
            Ok(output) => {
                let bytes = output
                    .body
                    .collect()
                    .await
                    .map_err(|e| AppError::Storage(e.to_string()))?;
                Ok(Some(bytes.into_bytes().to_vec()))
            }
            Err(err) => {
                let service_err = err.into_service_error();
                if service_err.is_no_such_key() {
                    log::debug!("No existing data at s3://{}/{}", self.bucket, object_key);
                    Ok(None)
                } else {
                    Err(AppError::Storage(service_err.to_string()))
                }
            }
        }
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        let object_key = self.object_key(key);
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&object_key)
            .body(ByteStream::from(value.to_vec()))
            .content_type("application/json")
            .send()
            .await
            .map_err(|e| AppError::Storage(e.to_string()))?;

        log::info!(
            "Wrote {} bytes to s3://{}/{}",
            value.len(),
            self.bucket,
            object_key
        );
        Ok(())
    }

    fn location(&self, key: &str) -> String {
        format!("s3://{}/{}", self.bucket, self.object_key(key))
    }
}
