use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_credential_types::Credentials;
use aws_sdk_s3::{primitives::ByteStreamError, Client, Error as S3Error};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info};

use crate::retry::with_backoff;

#[derive(Error, Debug)]
pub enum BlobStoreError {
    #[error("S3 error: {0}")]
    S3(#[from] S3Error),
    #[error("S3 SDK error: {0}")]
    SdkError(String),
    #[error("ByteStream error: {0}")]
    ByteStream(#[from] ByteStreamError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("configuration error: {0}")]
    Config(String),
}

/// Blob store connection configuration. Compatible with S3 v4 signing, so
/// any S3-compatible endpoint (MinIO, etc.) works via `endpoint_url`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobStoreConfig {
    pub bucket_name: String,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub endpoint_url: Option<String>,
}

impl BlobStoreConfig {
    pub fn validate(&self) -> Result<(), BlobStoreError> {
        if self.bucket_name.trim().is_empty() {
            return Err(BlobStoreError::Config(
                "bucket name cannot be empty".to_string(),
            ));
        }
        if self.access_key_id.trim().is_empty() || self.secret_access_key.trim().is_empty() {
            return Err(BlobStoreError::Config(
                "access key and secret key are required".to_string(),
            ));
        }
        Ok(())
    }
}

/// Contract for the Blob Store: `Put`/`Get`/`Delete`/`Head` against the two
/// fixed keyspaces `archives/` and `processed/`.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, key: &str, local_path: &Path) -> Result<(), BlobStoreError>;
    async fn get(&self, key: &str, local_path: &Path) -> Result<(), BlobStoreError>;
    async fn delete(&self, key: &str) -> Result<(), BlobStoreError>;
    async fn head(&self, key: &str) -> Result<Option<u64>, BlobStoreError>;
}

pub fn archive_key(batch_id: &str) -> String {
    format!("archives/{}.tar", batch_id)
}

pub fn processed_key(date: NaiveDate, audio_id: i64) -> String {
    format!("processed/{}/{}.opus", date.format("%Y-%m-%d"), audio_id)
}

/// Production S3 implementation.
pub struct S3BlobStore {
    client: Client,
    bucket_name: String,
}

impl S3BlobStore {
    pub async fn new(config: BlobStoreConfig) -> Result<Self, BlobStoreError> {
        config.validate()?;

        let credentials = Credentials::new(
            config.access_key_id,
            config.secret_access_key,
            None,
            None,
            "clipmod-pipeline",
        );

        let mut aws_config_builder = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region))
            .credentials_provider(credentials);

        if let Some(endpoint) = config.endpoint_url {
            aws_config_builder = aws_config_builder.endpoint_url(endpoint);
        }

        let aws_config = aws_config_builder.load().await;
        let client = Client::new(&aws_config);

        Ok(S3BlobStore {
            client,
            bucket_name: config.bucket_name,
        })
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn put(&self, key: &str, local_path: &Path) -> Result<(), BlobStoreError> {
        let data = fs::read(local_path).await?;
        debug!(key, bytes = data.len(), "uploading to blob store");

        with_backoff("s3_put_object", || async {
            self.client
                .put_object()
                .bucket(&self.bucket_name)
                .key(key)
                .body(data.clone().into())
                .content_type("application/octet-stream")
                .send()
                .await
                .map_err(|e| BlobStoreError::SdkError(format!("put_object failed: {}", e)))
        })
        .await?;

        info!(key, "uploaded to blob store");
        Ok(())
    }

    async fn get(&self, key: &str, local_path: &Path) -> Result<(), BlobStoreError> {
        debug!(key, "downloading from blob store");

        let response = with_backoff("s3_get_object", || async {
            self.client
                .get_object()
                .bucket(&self.bucket_name)
                .key(key)
                .send()
                .await
                .map_err(|e| BlobStoreError::SdkError(format!("get_object failed: {}", e)))
        })
        .await?;

        let data = response.body.collect().await?.into_bytes();
        fs::write(local_path, &data).await?;

        info!(key, bytes = data.len(), "downloaded from blob store");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), BlobStoreError> {
        with_backoff("s3_delete_object", || async {
            self.client
                .delete_object()
                .bucket(&self.bucket_name)
                .key(key)
                .send()
                .await
                .map_err(|e| BlobStoreError::SdkError(format!("delete_object failed: {}", e)))
        })
        .await?;

        info!(key, "deleted from blob store");
        Ok(())
    }

    async fn head(&self, key: &str) -> Result<Option<u64>, BlobStoreError> {
        let result = with_backoff("s3_head_object", || async {
            match self
                .client
                .head_object()
                .bucket(&self.bucket_name)
                .key(key)
                .send()
                .await
            {
                Ok(resp) => Ok(Some(resp.content_length().map(|n| n as u64))),
                Err(e) => {
                    let service_err = e.into_service_error();
                    if service_err.is_not_found() {
                        Ok(None)
                    } else {
                        Err(BlobStoreError::SdkError(service_err.to_string()))
                    }
                }
            }
        })
        .await?;

        Ok(result.flatten())
    }
}

#[cfg(test)]
pub mod fake {
    use super::*;
    use std::collections::HashMap;
    use tokio::sync::Mutex;

    #[derive(Default)]
    pub struct FakeBlobStore {
        objects: Mutex<HashMap<String, Vec<u8>>>,
    }

    impl FakeBlobStore {
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl BlobStore for FakeBlobStore {
        async fn put(&self, key: &str, local_path: &Path) -> Result<(), BlobStoreError> {
            let data = fs::read(local_path).await?;
            self.objects.lock().await.insert(key.to_string(), data);
            Ok(())
        }

        async fn get(&self, key: &str, local_path: &Path) -> Result<(), BlobStoreError> {
            let objects = self.objects.lock().await;
            let data = objects
                .get(key)
                .ok_or_else(|| BlobStoreError::Config(format!("no such key: {}", key)))?;
            fs::write(local_path, data).await?;
            Ok(())
        }

        async fn delete(&self, key: &str) -> Result<(), BlobStoreError> {
            self.objects.lock().await.remove(key);
            Ok(())
        }

        async fn head(&self, key: &str) -> Result<Option<u64>, BlobStoreError> {
            Ok(self.objects.lock().await.get(key).map(|d| d.len() as u64))
        }
    }

    #[test]
    fn archive_key_matches_layout() {
        assert_eq!(archive_key("B1"), "archives/B1.tar");
    }

    #[test]
    fn processed_key_matches_layout() {
        let date = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        assert_eq!(processed_key(date, 42), "processed/2025-01-01/42.opus");
    }
}
