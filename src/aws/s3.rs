//! S3 object upload for reports

use super::context::AwsSession;
use super::error::from_sdk_error;
use anyhow::{Context, Result};
use aws_sdk_s3::{primitives::ByteStream, Client};
use tracing::debug;

/// Uploads rendered reports to a bucket
#[derive(Clone, Debug)]
pub struct S3Uploader {
    client: Client,
}

impl S3Uploader {
    pub fn from_session(session: &AwsSession) -> Self {
        Self {
            client: session.s3_client(),
        }
    }

    /// Upload bytes to S3
    pub async fn upload_bytes(
        &self,
        bucket: &str,
        key: &str,
        data: Vec<u8>,
        content_type: &str,
    ) -> Result<()> {
        debug!(bucket = %bucket, key = %key, size = data.len(), "Uploading report");

        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(from_sdk_error)
            .with_context(|| format!("Failed to upload report to s3://{bucket}/{key}"))?;

        Ok(())
    }
}
