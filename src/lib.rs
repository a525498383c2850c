//! RFox Render
//!
//! Turns HTML/CSS markup into PNG images using a pooled headless browser and
//! optionally publishes the result to S3-compatible object storage.
//!
//! # Pipeline
//!
//! - **Dimension validation**: width/height/scale are clamped, never rejected
//! - **Composition**: fragments are wrapped into a complete document, CSS is injected
//! - **Capture**: an isolated browser context renders the document and takes a PNG snapshot
//! - **Delivery**: the PNG is returned inline (base64), uploaded (URL), or both
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use rfrender::{CaptureEngine, DeliveryMode, DeliveryOrchestrator, EnginePool, RenderRequest};
//! use rfrender::config::ServiceConfig;
//! use rfrender::storage::ArtifactStore;
//!
//! # #[cfg(feature = "cdp")]
//! # async fn run() -> rfrender::Result<()> {
//! let config = ServiceConfig::default();
//! let pool = Arc::new(EnginePool::new(
//!     Arc::new(rfrender::engine::cdp::CdpLauncher::new()),
//!     config.engine.pool_config(),
//! ));
//! let capture = Arc::new(CaptureEngine::new(pool.clone(), &config.render));
//! let store = Arc::new(ArtifactStore::unconfigured(config.storage.clone()));
//! let delivery = DeliveryOrchestrator::new(capture, store);
//!
//! let request = RenderRequest::new("<h1>Hello</h1>", &config.render.defaults());
//! let result = delivery.deliver(&request, DeliveryMode::Base64).await?;
//! assert!(result.inline_data.is_some());
//! pool.close().await;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub use error::{Error, Result};

pub mod capture;
pub mod compose;
pub mod config;
pub mod delivery;
pub mod dimensions;
pub mod engine;
pub mod pool;
pub mod server;
pub mod storage;

pub use capture::CaptureEngine;
pub use compose::{ComposedDocument, DocumentComposer};
pub use delivery::{DeliveryMode, DeliveryOrchestrator, DeliveryResult};
pub use dimensions::{DimensionLimits, ValidatedDimensions};
pub use pool::{EnginePool, EngineStatus, RenderSession};

use sha2::{Digest, Sha256};

/// Content type of every capture produced by the pipeline
pub const PNG_CONTENT_TYPE: &str = "image/png";

/// Viewport dimensions in CSS pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1024,
            height: 768,
        }
    }
}

/// Defaults applied to a request when the caller leaves a field out.
///
/// Resolved once at the entry boundary (HTTP handler or CLI) so the rest of the
/// pipeline only ever sees concrete values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderDefaults {
    pub width: i64,
    pub height: i64,
    pub scale: f64,
}

impl Default for RenderDefaults {
    fn default() -> Self {
        Self {
            width: 1024,
            height: 768,
            scale: 1.0,
        }
    }
}

/// A request to render markup into an image
///
/// Numeric fields are kept as requested; the capture engine clamps them to the
/// configured limits before use.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderRequest {
    /// HTML fragment or complete document
    pub html: String,
    /// Extra CSS injected into the document head
    pub css: Option<String>,
    /// Requested viewport width in CSS pixels
    pub width: i64,
    /// Requested viewport height in CSS pixels
    pub height: i64,
    /// Device scale factor
    pub scale: f64,
    /// Capture the whole scrollable area instead of the viewport
    pub full_page: bool,
    /// Omit the default white background, keeping the alpha channel
    pub transparent: bool,
}

impl RenderRequest {
    /// Build a request for `html` using `defaults` for every other field.
    pub fn new(html: impl Into<String>, defaults: &RenderDefaults) -> Self {
        Self {
            html: html.into(),
            css: None,
            width: defaults.width,
            height: defaults.height,
            scale: defaults.scale,
            full_page: false,
            transparent: false,
        }
    }

    pub fn with_css(mut self, css: impl Into<String>) -> Self {
        self.css = Some(css.into());
        self
    }

    pub fn with_size(mut self, width: i64, height: i64) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_scale(mut self, scale: f64) -> Self {
        self.scale = scale;
        self
    }

    pub fn full_page(mut self, full_page: bool) -> Self {
        self.full_page = full_page;
        self
    }

    pub fn transparent(mut self, transparent: bool) -> Self {
        self.transparent = transparent;
        self
    }

    /// Reject requests that cannot be rendered at all.
    ///
    /// Only emptiness is checked; malformed markup is left to the engine.
    pub fn validate(&self) -> Result<()> {
        if self.html.trim().is_empty() {
            return Err(Error::ValidationFailure("HTML content must not be empty".into()));
        }
        Ok(())
    }
}

/// Raw capture output, alive only between capture and delivery
#[derive(Debug, Clone, PartialEq)]
pub struct ImageArtifact {
    pub bytes: Vec<u8>,
    pub content_type: &'static str,
    /// Validated viewport the image was rendered at
    pub viewport: Viewport,
    pub scale: f64,
}

impl ImageArtifact {
    pub fn png(bytes: Vec<u8>, viewport: Viewport, scale: f64) -> Self {
        Self {
            bytes,
            content_type: PNG_CONTENT_TYPE,
            viewport,
            scale,
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Hex-encoded SHA-256 of the image bytes
    pub fn sha256(&self) -> String {
        hex::encode(Sha256::digest(&self.bytes))
    }
}
