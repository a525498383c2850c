//! S3 backend (uses the AWS SDK)
//!
//! Credentials come from `AWS_ACCESS_KEY_ID`/`AWS_SECRET_ACCESS_KEY` when both
//! are set, otherwise from the SDK's default provider chain. A custom endpoint
//! switches to path-style addressing for MinIO and LocalStack.

use super::{ObjectStorage, PutObject, StorageError};
use crate::config::StorageSettings;
use async_trait::async_trait;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::ObjectCannedAcl;
use aws_sdk_s3::Client as S3Client;

/// [`ObjectStorage`] over an AWS SDK client
#[derive(Clone)]
pub struct S3Storage {
    client: S3Client,
}

impl S3Storage {
    pub async fn from_settings(settings: &StorageSettings) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(Region::new(settings.region.clone()));

        if let (Some(id), Some(secret)) = (&settings.access_key_id, &settings.secret_access_key) {
            loader = loader.credentials_provider(Credentials::new(id, secret, None, None, "rfrender-env"));
        }

        let shared = loader.load().await;
        let mut builder = aws_sdk_s3::config::Builder::from(&shared);
        if let Some(endpoint) = &settings.endpoint {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        Self {
            client: S3Client::from_conf(builder.build()),
        }
    }

    /// Create with an existing client (for testing)
    pub fn with_client(client: S3Client) -> Self {
        Self { client }
    }
}

fn storage_error<E>(err: E) -> StorageError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
{
    let code = err.code().unwrap_or("Unknown").to_string();
    let message = err
        .message()
        .map(str::to_string)
        .unwrap_or_else(|| DisplayErrorContext(&err).to_string());
    StorageError { code, message }
}

#[async_trait]
impl ObjectStorage for S3Storage {
    async fn put_object(&self, object: PutObject) -> Result<(), StorageError> {
        let mut request = self
            .client
            .put_object()
            .bucket(&object.bucket)
            .key(&object.key)
            .content_type(&object.content_type)
            .body(ByteStream::from(object.body));

        if object.public_read {
            request = request.acl(ObjectCannedAcl::PublicRead);
        }
        for (name, value) in &object.metadata {
            request = request.metadata(name, value);
        }

        request.send().await.map_err(storage_error)?;
        Ok(())
    }

    async fn head_bucket(&self, bucket: &str) -> Result<(), StorageError> {
        self.client
            .head_bucket()
            .bucket(bucket)
            .send()
            .await
            .map_err(storage_error)?;
        Ok(())
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), StorageError> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(storage_error)?;
        Ok(())
    }
}
