//! Artifact store
//!
//! Gives every upload a unique, date-partitioned key, pushes it through an
//! [`ObjectStorage`] backend, and works out the public URL it can be fetched from.

use crate::config::StorageSettings;
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc};
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

pub mod memory;
pub mod s3;

/// Error reported by an object-storage backend, with the upstream error code
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{code}: {message}")]
pub struct StorageError {
    pub code: String,
    pub message: String,
}

impl StorageError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

impl From<StorageError> for Error {
    fn from(err: StorageError) -> Self {
        Error::StorageUploadFailure {
            code: err.code,
            message: err.message,
        }
    }
}

/// A single object write
#[derive(Debug, Clone, PartialEq)]
pub struct PutObject {
    pub bucket: String,
    pub key: String,
    pub body: Vec<u8>,
    pub content_type: String,
    pub metadata: BTreeMap<String, String>,
    pub public_read: bool,
}

/// Object-storage capability
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn put_object(&self, object: PutObject) -> std::result::Result<(), StorageError>;

    /// Succeeds when the bucket exists and is reachable with our credentials.
    async fn head_bucket(&self, bucket: &str) -> std::result::Result<(), StorageError>;

    async fn delete_object(&self, bucket: &str, key: &str) -> std::result::Result<(), StorageError>;
}

/// A successfully uploaded object
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredObject {
    pub key: String,
    pub bucket: String,
    pub url: String,
    pub size_bytes: usize,
    pub content_type: String,
}

/// Uploads artifacts and derives their public URLs
pub struct ArtifactStore {
    settings: StorageSettings,
    backend: Option<Arc<dyn ObjectStorage>>,
}

impl ArtifactStore {
    pub fn new(settings: StorageSettings, backend: Option<Arc<dyn ObjectStorage>>) -> Self {
        Self { settings, backend }
    }

    /// A store that refuses every operation with [`Error::NotConfigured`]
    pub fn unconfigured(settings: StorageSettings) -> Self {
        Self::new(settings, None)
    }

    /// Build an S3-backed store, or an unconfigured one when no bucket is set.
    pub async fn from_settings(settings: StorageSettings) -> Self {
        if !settings.is_configured() {
            info!("AWS_S3_BUCKET not set, uploads disabled");
            return Self::unconfigured(settings);
        }
        let backend = s3::S3Storage::from_settings(&settings).await;
        info!("Storing artifacts in bucket {} ({})", settings.bucket, settings.region);
        Self::new(settings, Some(Arc::new(backend) as Arc<dyn ObjectStorage>))
    }

    pub fn settings(&self) -> &StorageSettings {
        &self.settings
    }

    pub fn is_configured(&self) -> bool {
        self.settings.is_configured() && self.backend.is_some()
    }

    fn backend(&self) -> Result<&Arc<dyn ObjectStorage>> {
        if !self.settings.is_configured() {
            return Err(Error::NotConfigured("S3 bucket is not configured".into()));
        }
        self.backend
            .as_ref()
            .ok_or_else(|| Error::NotConfigured("S3 client is not initialized".into()))
    }

    /// `{prefix}/{YYYY}/{MM}/{DD}/{uuid}.{extension}` for the current UTC date
    pub fn generate_key(&self, prefix: &str, extension: &str) -> String {
        object_key(prefix, extension, Utc::now(), Uuid::new_v4())
    }

    /// Public URL for `key`
    pub fn public_url(&self, key: &str) -> String {
        let settings = &self.settings;
        if let Some(template) = &settings.public_url_template {
            return template
                .replace("{bucket}", &settings.bucket)
                .replace("{region}", &settings.region)
                .replace("{key}", key);
        }
        if let Some(endpoint) = &settings.endpoint {
            return format!("{}/{}/{}", endpoint.trim_end_matches('/'), settings.bucket, key);
        }
        format!("https://{}.s3.{}.amazonaws.com/{}", settings.bucket, settings.region, key)
    }

    /// Upload `bytes` under a fresh key with public-read access.
    ///
    /// Upstream failures surface as [`Error::StorageUploadFailure`]; nothing is retried.
    pub async fn upload(
        &self,
        bytes: Vec<u8>,
        content_type: &str,
        prefix: &str,
        extension: &str,
        metadata: BTreeMap<String, String>,
    ) -> Result<StoredObject> {
        let backend = self.backend()?;
        let key = self.generate_key(prefix, extension);
        let size_bytes = bytes.len();

        debug!("Uploading {} bytes to s3://{}/{}", size_bytes, self.settings.bucket, key);
        backend
            .put_object(PutObject {
                bucket: self.settings.bucket.clone(),
                key: key.clone(),
                body: bytes,
                content_type: content_type.to_string(),
                metadata,
                public_read: true,
            })
            .await
            .map_err(|e| {
                warn!("Upload of {} failed: {}", key, e);
                Error::from(e)
            })?;

        let url = self.public_url(&key);
        info!("Uploaded {} ({} bytes)", key, size_bytes);
        Ok(StoredObject {
            key,
            bucket: self.settings.bucket.clone(),
            url,
            size_bytes,
            content_type: content_type.to_string(),
        })
    }

    /// Whether the bucket can be reached. `false` when not configured.
    pub async fn check_connectivity(&self) -> bool {
        let Ok(backend) = self.backend() else {
            return false;
        };
        match backend.head_bucket(&self.settings.bucket).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Bucket {} unreachable: {}", self.settings.bucket, e);
                false
            }
        }
    }

    /// Remove a previously uploaded object.
    pub async fn delete(&self, key: &str) -> Result<()> {
        let backend = self.backend()?;
        backend
            .delete_object(&self.settings.bucket, key)
            .await
            .map_err(|e| Error::StorageDeleteFailure {
                code: e.code,
                message: e.message,
            })?;
        info!("Deleted {}", key);
        Ok(())
    }
}

fn object_key(prefix: &str, extension: &str, at: DateTime<Utc>, id: Uuid) -> String {
    format!(
        "{}/{:04}/{:02}/{:02}/{}.{}",
        prefix.trim_matches('/'),
        at.year(),
        at.month(),
        at.day(),
        id.simple(),
        extension.trim_start_matches('.')
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::HashSet;

    fn settings(bucket: &str) -> StorageSettings {
        StorageSettings {
            bucket: bucket.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn key_is_date_partitioned() {
        let at = Utc.with_ymd_and_hms(2024, 3, 7, 23, 59, 59).unwrap();
        let id = Uuid::parse_str("67e55044-10b1-426f-9247-bb680e5fe0c8").unwrap();
        assert_eq!(
            object_key("images", "png", at, id),
            "images/2024/03/07/67e5504410b1426f9247bb680e5fe0c8.png"
        );
    }

    #[test]
    fn generated_keys_are_unique() {
        let store = ArtifactStore::unconfigured(settings("b"));
        let keys: HashSet<String> = (0..1000).map(|_| store.generate_key("images", "png")).collect();
        assert_eq!(keys.len(), 1000);
        assert!(keys.iter().all(|k| k.starts_with("images/") && k.ends_with(".png")));
    }

    #[test]
    fn url_prefers_template_then_endpoint() {
        let key = "images/2024/01/01/abc.png";

        let store = ArtifactStore::unconfigured(StorageSettings {
            region: "eu-west-1".into(),
            ..settings("renders")
        });
        assert_eq!(
            store.public_url(key),
            "https://renders.s3.eu-west-1.amazonaws.com/images/2024/01/01/abc.png"
        );

        let store = ArtifactStore::unconfigured(StorageSettings {
            endpoint: Some("http://localhost:9000/".into()),
            ..settings("renders")
        });
        assert_eq!(store.public_url(key), "http://localhost:9000/renders/images/2024/01/01/abc.png");

        let store = ArtifactStore::unconfigured(StorageSettings {
            endpoint: Some("http://localhost:9000".into()),
            public_url_template: Some("https://cdn.example.com/{bucket}/{key}?r={region}".into()),
            ..settings("renders")
        });
        assert_eq!(
            store.public_url(key),
            "https://cdn.example.com/renders/images/2024/01/01/abc.png?r=us-east-1"
        );
    }

    #[tokio::test]
    async fn unconfigured_store_fails_before_network() {
        let store = ArtifactStore::unconfigured(settings(""));
        let err = store
            .upload(vec![1, 2, 3], "image/png", "images", "png", BTreeMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotConfigured(_)));
        assert!(!store.check_connectivity().await);
        assert!(!store.is_configured());

        // a bucket without a client is still unconfigured
        let store = ArtifactStore::unconfigured(settings("renders"));
        assert!(matches!(store.delete("k").await, Err(Error::NotConfigured(_))));
    }
}
