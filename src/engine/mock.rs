//! In-process engine double
//!
//! Behaves like a browser from the pool's point of view without starting one:
//! it counts launches and contexts, records what it was asked to render, and
//! can be told to hang, crash, or refuse to start. Used by the test suites and
//! for dry runs of the HTTP surface.

use crate::compose::ComposedDocument;
use crate::engine::{CaptureOptions, EngineHandle, LaunchConfig, Launcher, RenderContext};
use crate::{Error, Result, Viewport};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// A 1x1 transparent PNG
pub const PIXEL_PNG: &[u8] = &[
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44, 0x52,
    0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1F, 0x15, 0xC4,
    0x89, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9C, 0x63, 0x00, 0x01, 0x00, 0x00,
    0x05, 0x00, 0x01, 0x0D, 0x0A, 0x2D, 0xB4, 0x00, 0x00, 0x00, 0x00, 0x49, 0x45, 0x4E, 0x44, 0xAE,
    0x42, 0x60, 0x82,
];

/// What the last context was asked to do
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRender {
    pub document: String,
    pub viewport: Viewport,
    pub scale: f64,
    pub options: Option<CaptureOptions>,
}

#[derive(Debug, Clone, Default)]
struct Behavior {
    launch_delay: Duration,
    load_delay: Duration,
    never_quiesce: bool,
    crash_on_capture: bool,
    launch_failure: Option<String>,
}

#[derive(Default)]
struct Shared {
    launches: AtomicUsize,
    shutdowns: AtomicUsize,
    contexts_created: AtomicUsize,
    contexts_destroyed: AtomicUsize,
    behavior: Mutex<Behavior>,
    current: Mutex<Option<Arc<AtomicBool>>>,
    last_render: Mutex<Option<RecordedRender>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Launcher handing out [`MockEngine`]s
#[derive(Clone, Default)]
pub struct MockLauncher {
    shared: Arc<Shared>,
    concurrency: Option<usize>,
}

impl MockLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `n` as the engine's concurrency ceiling.
    pub fn with_concurrency(mut self, n: usize) -> Self {
        self.concurrency = Some(n);
        self
    }

    pub fn with_launch_delay(self, delay: Duration) -> Self {
        lock(&self.shared.behavior).launch_delay = delay;
        self
    }

    pub fn with_load_delay(self, delay: Duration) -> Self {
        lock(&self.shared.behavior).load_delay = delay;
        self
    }

    /// Documents never reach quiescence; loads hang until cancelled.
    pub fn set_never_quiesce(&self, on: bool) {
        lock(&self.shared.behavior).never_quiesce = on;
    }

    /// The engine dies in the middle of the next captures.
    pub fn set_crash_on_capture(&self, on: bool) {
        lock(&self.shared.behavior).crash_on_capture = on;
    }

    /// Make launches fail with `message`, or succeed again with `None`.
    pub fn set_launch_failure(&self, message: Option<&str>) {
        lock(&self.shared.behavior).launch_failure = message.map(str::to_string);
    }

    /// Simulate the most recent engine process being killed from outside.
    pub fn kill_current(&self) {
        if let Some(alive) = lock(&self.shared.current).as_ref() {
            alive.store(false, Ordering::SeqCst);
        }
    }

    pub fn launches(&self) -> usize {
        self.shared.launches.load(Ordering::SeqCst)
    }

    pub fn shutdowns(&self) -> usize {
        self.shared.shutdowns.load(Ordering::SeqCst)
    }

    pub fn contexts_created(&self) -> usize {
        self.shared.contexts_created.load(Ordering::SeqCst)
    }

    pub fn contexts_destroyed(&self) -> usize {
        self.shared.contexts_destroyed.load(Ordering::SeqCst)
    }

    /// Contexts opened but not yet destroyed
    pub fn live_contexts(&self) -> usize {
        self.contexts_created() - self.contexts_destroyed()
    }

    pub fn last_render(&self) -> Option<RecordedRender> {
        lock(&self.shared.last_render).clone()
    }
}

#[async_trait]
impl Launcher for MockLauncher {
    async fn launch(&self, _config: &LaunchConfig) -> Result<Arc<dyn EngineHandle>> {
        let behavior = lock(&self.shared.behavior).clone();
        if !behavior.launch_delay.is_zero() {
            tokio::time::sleep(behavior.launch_delay).await;
        }
        if let Some(message) = behavior.launch_failure {
            return Err(Error::RenderEngineFailure(format!("Failed to launch browser: {}", message)));
        }

        self.shared.launches.fetch_add(1, Ordering::SeqCst);
        let alive = Arc::new(AtomicBool::new(true));
        *lock(&self.shared.current) = Some(alive.clone());
        Ok(Arc::new(MockEngine {
            shared: self.shared.clone(),
            alive,
        }))
    }

    fn concurrency_hint(&self) -> Option<usize> {
        self.concurrency
    }
}

/// A pretend engine process
pub struct MockEngine {
    shared: Arc<Shared>,
    alive: Arc<AtomicBool>,
}

#[async_trait]
impl EngineHandle for MockEngine {
    async fn is_healthy(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn new_context(&self, viewport: Viewport, scale: f64) -> Result<Box<dyn RenderContext>> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(Error::RenderEngineFailure("Browser connection closed".into()));
        }
        let n = self.shared.contexts_created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockContext {
            id: format!("mock-{}", n + 1),
            shared: self.shared.clone(),
            alive: self.alive.clone(),
            viewport,
            scale,
            destroyed: false,
        }))
    }

    async fn shutdown(&self) -> Result<()> {
        if self.alive.swap(false, Ordering::SeqCst) {
            self.shared.shutdowns.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// A pretend isolated context
pub struct MockContext {
    id: String,
    shared: Arc<Shared>,
    alive: Arc<AtomicBool>,
    viewport: Viewport,
    scale: f64,
    destroyed: bool,
}

impl MockContext {
    fn ensure_alive(&self) -> Result<()> {
        if self.destroyed {
            return Err(Error::RenderEngineFailure(format!("Context {} already destroyed", self.id)));
        }
        if !self.alive.load(Ordering::SeqCst) {
            return Err(Error::RenderEngineFailure("Browser connection closed".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl RenderContext for MockContext {
    fn id(&self) -> &str {
        &self.id
    }

    async fn load_document(&mut self, document: &ComposedDocument, _deadline: Duration) -> Result<()> {
        self.ensure_alive()?;
        let behavior = lock(&self.shared.behavior).clone();
        *lock(&self.shared.last_render) = Some(RecordedRender {
            document: document.as_str().to_string(),
            viewport: self.viewport,
            scale: self.scale,
            options: None,
        });

        if behavior.never_quiesce {
            // never resolves; the caller has to cancel us
            futures::future::pending::<()>().await;
        }
        if !behavior.load_delay.is_zero() {
            tokio::time::sleep(behavior.load_delay).await;
        }
        self.ensure_alive()
    }

    async fn capture_raster(&mut self, options: CaptureOptions) -> Result<Vec<u8>> {
        self.ensure_alive()?;
        if lock(&self.shared.behavior).crash_on_capture {
            self.alive.store(false, Ordering::SeqCst);
            return Err(Error::RenderEngineFailure("Screenshot failed: target crashed".into()));
        }
        if let Some(render) = lock(&self.shared.last_render).as_mut() {
            render.options = Some(options);
        }
        Ok(PIXEL_PNG.to_vec())
    }

    async fn destroy(&mut self) -> Result<()> {
        if !self.destroyed {
            self.destroyed = true;
            self.shared.contexts_destroyed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}
