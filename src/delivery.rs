//! Delivery orchestrator
//!
//! Captures once, then hands the image back inline, uploads it, or both.

use crate::capture::CaptureEngine;
use crate::storage::ArtifactStore;
use crate::{Error, ImageArtifact, RenderRequest, Result};
use base64::Engine as Base64Engine;
use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Key prefix for uploaded captures
pub const IMAGE_KEY_PREFIX: &str = "images";

/// How the caller wants the image back
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    /// Upload and return the public URL
    #[default]
    Url,
    /// Return the image inline as a data URI
    Base64,
    /// Both; a storage failure is reported but the inline data is kept
    Both,
}

impl DeliveryMode {
    pub fn wants_inline(self) -> bool {
        matches!(self, DeliveryMode::Base64 | DeliveryMode::Both)
    }

    pub fn wants_url(self) -> bool {
        matches!(self, DeliveryMode::Url | DeliveryMode::Both)
    }
}

/// Descriptive fields about the delivered image
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryMetadata {
    pub width: u32,
    pub height: u32,
    pub scale: f64,
    pub size_bytes: usize,
    pub content_type: String,
    pub sha256: String,
    pub generated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
}

/// Storage half of a partially successful delivery
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageFailure {
    pub error_code: String,
    pub message: String,
}

impl From<&Error> for StorageFailure {
    fn from(err: &Error) -> Self {
        Self {
            error_code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

/// Outcome of [`DeliveryOrchestrator::deliver`]
///
/// At least one of `url` and `inline_data` is always set.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryResult {
    pub url: Option<String>,
    /// `data:image/png;base64,...`
    pub inline_data: Option<String>,
    pub metadata: DeliveryMetadata,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_error: Option<StorageFailure>,
}

impl DeliveryResult {
    /// `false` when the upload half of a `Both` delivery failed
    pub fn is_complete(&self) -> bool {
        self.storage_error.is_none()
    }
}

/// Runs capture and delivery for a request
pub struct DeliveryOrchestrator {
    capture: Arc<CaptureEngine>,
    store: Arc<ArtifactStore>,
}

impl DeliveryOrchestrator {
    pub fn new(capture: Arc<CaptureEngine>, store: Arc<ArtifactStore>) -> Self {
        Self { capture, store }
    }

    pub fn capture_engine(&self) -> &Arc<CaptureEngine> {
        &self.capture
    }

    pub fn store(&self) -> &Arc<ArtifactStore> {
        &self.store
    }

    /// Render `request` exactly once and deliver it as `mode` asks.
    pub async fn deliver(&self, request: &RenderRequest, mode: DeliveryMode) -> Result<DeliveryResult> {
        let artifact = self.capture.capture(request).await?;
        let mut result = DeliveryResult {
            url: None,
            inline_data: None,
            metadata: metadata(&artifact),
            storage_error: None,
        };

        if mode.wants_inline() {
            result.inline_data = Some(data_uri(&artifact));
        }

        if mode.wants_url() {
            let upload = self
                .store
                .upload(
                    artifact.bytes.clone(),
                    artifact.content_type,
                    IMAGE_KEY_PREFIX,
                    "png",
                    upload_metadata(&artifact, &result.metadata.sha256),
                )
                .await;

            match upload {
                Ok(stored) => {
                    result.url = Some(stored.url);
                    result.metadata.key = Some(stored.key);
                    result.metadata.bucket = Some(stored.bucket);
                }
                // inline data already computed; keep it
                Err(e) if mode == DeliveryMode::Both => {
                    warn!("Upload failed, returning inline data only: {}", e);
                    result.storage_error = Some(StorageFailure::from(&e));
                }
                Err(e) => return Err(e),
            }
        }

        info!(
            "Delivered {} byte image as {:?}{}",
            result.metadata.size_bytes,
            mode,
            if result.is_complete() { "" } else { " (storage failed)" }
        );
        Ok(result)
    }

    /// Inline-only delivery that never touches storage.
    pub async fn preview(&self, request: &RenderRequest) -> Result<DeliveryResult> {
        self.deliver(request, DeliveryMode::Base64).await
    }
}

fn metadata(artifact: &ImageArtifact) -> DeliveryMetadata {
    DeliveryMetadata {
        width: artifact.viewport.width,
        height: artifact.viewport.height,
        scale: artifact.scale,
        size_bytes: artifact.len(),
        content_type: artifact.content_type.to_string(),
        sha256: artifact.sha256(),
        generated_at: Utc::now(),
        key: None,
        bucket: None,
    }
}

fn upload_metadata(artifact: &ImageArtifact, sha256: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("width".to_string(), artifact.viewport.width.to_string()),
        ("height".to_string(), artifact.viewport.height.to_string()),
        ("scale".to_string(), artifact.scale.to_string()),
        ("sha256".to_string(), sha256.to_string()),
    ])
}

/// `data:{content_type};base64,{payload}`
pub fn data_uri(artifact: &ImageArtifact) -> String {
    format!(
        "data:{};base64,{}",
        artifact.content_type,
        base64::engine::general_purpose::STANDARD.encode(&artifact.bytes)
    )
}
