//! S3 implementation of [`ObjectStore`].

use async_trait::async_trait;
use aws_sdk_s3 as s3;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;

use super::platform::ObjectStore;
use crate::error::DeployError;

/// Uploads offloaded archives. Path-style addressing is forced when an
/// endpoint override points at an S3-compatible store.
#[derive(Debug, Clone)]
pub struct S3ObjectStore {
    client: s3::Client,
}

impl S3ObjectStore {
    pub fn new(config: &aws_config::SdkConfig, path_style: bool) -> Self {
        let s3_config = s3::config::Builder::from(config)
            .force_path_style(path_style)
            .build();
        Self {
            client: s3::Client::from_conf(s3_config),
        }
    }

    pub fn from_client(client: s3::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put_object(&self, bucket: &str, key: &str, bytes: Vec<u8>) -> Result<(), DeployError> {
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(bytes))
            .content_type("application/zip")
            .send()
            .await
            .map_err(|e| DeployError::remote("PutObject", key, DisplayErrorContext(&e)))?;
        Ok(())
    }
}
