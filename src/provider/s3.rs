//! S3-based template storage.
//!
//! Oversized templates and addons templates are uploaded to an artifact bucket
//! and referenced by URL in change set requests.

use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_s3::Client;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use tracing::{debug, info};

use crate::error::{HalldyllError, PackagingError, Result};

use super::store::ObjectStore;

/// Region assumed when the SDK configuration does not carry one.
const DEFAULT_REGION: &str = "us-east-1";

/// S3 template store.
#[derive(Debug, Clone)]
pub struct S3TemplateStore {
    /// S3 client.
    client: Client,
    /// Region of the artifact bucket, used to build object URLs.
    region: String,
}

impl S3TemplateStore {
    /// Creates a store from an explicit SDK configuration.
    #[must_use]
    pub fn new(sdk_config: &SdkConfig) -> Self {
        let region = sdk_config
            .region()
            .map_or_else(|| DEFAULT_REGION.to_string(), ToString::to_string);

        Self {
            client: Client::new(sdk_config),
            region,
        }
    }
}

/// Virtual-hosted style URL of an object.
fn object_url(bucket: &str, region: &str, key: &str) -> String {
    format!("https://{bucket}.s3.{region}.amazonaws.com/{key}")
}

#[async_trait]
impl ObjectStore for S3TemplateStore {
    async fn put_object(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<String> {
        debug!("Uploading {} bytes to s3://{bucket}/{key}", body.len());

        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(body))
            .content_type("application/x-yaml")
            .send()
            .await
            .map_err(|e| {
                HalldyllError::Packaging(PackagingError::UploadFailed {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                    message: DisplayErrorContext(&e).to_string(),
                })
            })?;

        let url = object_url(bucket, &self.region, key);
        info!("Uploaded template to {url}");
        Ok(url)
    }
}
