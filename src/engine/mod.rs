//! Rendering-engine capability
//!
//! The pool and capture engine only talk to these traits. A backend provides
//! a [`Launcher`] that starts engine processes, an [`EngineHandle`] per
//! process, and a [`RenderContext`] per isolated rendering session.

use crate::compose::ComposedDocument;
use crate::{Result, Viewport};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[cfg(feature = "cdp")]
pub mod cdp;

pub mod mock;

/// Command-line switches every engine is launched with: no sandbox, no GPU,
/// no reliance on `/dev/shm`, and deterministic font rendering.
pub const DEFAULT_ENGINE_ARGS: &[&str] = &[
    "--no-sandbox",
    "--disable-setuid-sandbox",
    "--disable-dev-shm-usage",
    "--disable-gpu",
    "--font-render-hinting=none",
];

/// Settings used when starting an engine process
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchConfig {
    /// Browser binary; auto-detected when `None`
    pub executable: Option<PathBuf>,
    /// Extra command-line switches
    pub args: Vec<String>,
    /// Initial window size, overridden per context
    pub window: Viewport,
    /// Upper bound for a single launch
    pub launch_timeout: Duration,
    /// How long the driver keeps an idle connection before giving up on it
    pub idle_timeout: Duration,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            executable: None,
            args: DEFAULT_ENGINE_ARGS.iter().map(|s| s.to_string()).collect(),
            window: Viewport::default(),
            launch_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(3600),
        }
    }
}

/// Raster capture options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CaptureOptions {
    /// Capture the full scrollable area rather than the viewport
    pub full_page: bool,
    /// Drop the default background so the PNG keeps its alpha channel
    pub omit_background: bool,
}

/// Starts engine processes
#[async_trait]
pub trait Launcher: Send + Sync {
    /// Launch a fresh engine process.
    async fn launch(&self, config: &LaunchConfig) -> Result<Arc<dyn EngineHandle>>;

    /// How many contexts one engine can serve at once, if the backend knows.
    fn concurrency_hint(&self) -> Option<usize> {
        None
    }
}

/// A live engine process shared by many sessions
#[async_trait]
pub trait EngineHandle: Send + Sync {
    /// Liveness predicate; `false` once the process crashed or disconnected.
    async fn is_healthy(&self) -> bool;

    /// Open an isolated context sized to `viewport` at device scale `scale`.
    async fn new_context(&self, viewport: Viewport, scale: f64) -> Result<Box<dyn RenderContext>>;

    /// Terminate the process. Safe to call more than once.
    async fn shutdown(&self) -> Result<()>;
}

/// One isolated rendering session inside an engine
#[async_trait]
pub trait RenderContext: Send {
    fn id(&self) -> &str;

    /// Load `document` and return once it has no in-flight network activity.
    /// Must give up after `deadline`.
    async fn load_document(&mut self, document: &ComposedDocument, deadline: Duration) -> Result<()>;

    /// PNG snapshot of the loaded document.
    async fn capture_raster(&mut self, options: CaptureOptions) -> Result<Vec<u8>>;

    /// Release the context. Idempotent.
    async fn destroy(&mut self) -> Result<()>;
}
