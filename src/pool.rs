//! Render session pool
//!
//! Owns the long-lived engine processes and hands out isolated sessions.
//!
//! Each pool slot holds at most one engine behind an async mutex. The mutex
//! is held across the whole check-health-then-relaunch step, so acquirers that
//! arrive during a relaunch wait for that relaunch instead of starting their
//! own engine, and nobody ever sees a half-initialized handle. Engines are
//! replaced, never mutated. A semaphore caps how many contexts are open at
//! once across the pool.
//!
//! Health checks never wait on a slot mutex. Each slot also keeps a lease on
//! the last engine it held, which stays in place while that engine is being
//! replaced.

use crate::compose::ComposedDocument;
use crate::engine::{CaptureOptions, EngineHandle, LaunchConfig, Launcher, RenderContext};
use crate::{Error, Result, Viewport};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use uuid::Uuid;

/// Pool sizing and launch settings
#[derive(Debug, Clone, PartialEq)]
pub struct PoolConfig {
    pub launch: LaunchConfig,
    /// Number of engine processes (slots)
    pub size: usize,
    /// Concurrent contexts per engine. Falls back to the launcher's hint, then 1.
    pub max_concurrent_contexts: Option<usize>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            launch: LaunchConfig::default(),
            size: 1,
            max_concurrent_contexts: None,
        }
    }
}

/// Coarse availability reported by health checks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineStatus {
    /// At least one engine is running and healthy
    Ready,
    /// Nothing launched yet; the next request will launch
    Idle,
    /// Engines exist but none are healthy, or the pool is closed
    Unavailable,
}

struct PooledEngine {
    handle: Arc<dyn EngineHandle>,
    generation: u64,
    healthy: Arc<AtomicBool>,
}

impl PooledEngine {
    fn lease(&self, slot: usize) -> EngineLease {
        EngineLease {
            handle: self.handle.clone(),
            slot,
            generation: self.generation,
            healthy: self.healthy.clone(),
        }
    }

    async fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst) && self.handle.is_healthy().await
    }
}

/// A reference to one pooled engine
#[derive(Clone)]
pub struct EngineLease {
    handle: Arc<dyn EngineHandle>,
    slot: usize,
    generation: u64,
    // shared with the slot entry; clearing it only affects this engine
    healthy: Arc<AtomicBool>,
}

impl EngineLease {
    pub fn handle(&self) -> &Arc<dyn EngineHandle> {
        &self.handle
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Increases every time any slot launches an engine
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub async fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst) && self.handle.is_healthy().await
    }
}

struct Slot {
    engine: Mutex<Option<PooledEngine>>,
    last_known: StdMutex<Option<EngineLease>>,
}

impl Slot {
    fn new() -> Self {
        Self {
            engine: Mutex::new(None),
            last_known: StdMutex::new(None),
        }
    }

    fn last_known(&self) -> Option<EngineLease> {
        self.last_known.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn record(&self, lease: Option<EngineLease>) {
        *self.last_known.lock().unwrap_or_else(|e| e.into_inner()) = lease;
    }
}

/// Engine processes shared by every request
pub struct EnginePool {
    launcher: Arc<dyn Launcher>,
    launch: LaunchConfig,
    slots: Vec<Slot>,
    next_slot: AtomicUsize,
    generation: AtomicU64,
    gate: Arc<Semaphore>,
    gate_size: usize,
    closed: AtomicBool,
}

impl EnginePool {
    /// Create a pool. Nothing is launched until the first acquisition or
    /// [`warm_up`](Self::warm_up).
    pub fn new(launcher: Arc<dyn Launcher>, config: PoolConfig) -> Self {
        let size = config.size.max(1);
        let per_engine = config
            .max_concurrent_contexts
            .or_else(|| launcher.concurrency_hint())
            .unwrap_or(1)
            .max(1);
        let gate_size = per_engine * size;

        info!("Engine pool: {} slot(s), {} concurrent context(s)", size, gate_size);

        Self {
            launcher,
            launch: config.launch,
            slots: (0..size).map(|_| Slot::new()).collect(),
            next_slot: AtomicUsize::new(0),
            generation: AtomicU64::new(0),
            gate: Arc::new(Semaphore::new(gate_size)),
            gate_size,
            closed: AtomicBool::new(false),
        }
    }

    /// Maximum number of sessions that may be open at once
    pub fn concurrency(&self) -> usize {
        self.gate_size
    }

    pub fn size(&self) -> usize {
        self.slots.len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::RenderEngineFailure("Engine pool is closed".into()));
        }
        Ok(())
    }

    /// Return a healthy engine, launching or relaunching one if needed.
    ///
    /// Launch failures propagate unchanged; the pool does not retry.
    pub async fn acquire_engine(&self) -> Result<EngineLease> {
        let slot = self.next_slot.fetch_add(1, Ordering::Relaxed) % self.slots.len();
        self.acquire_slot(slot).await
    }

    async fn acquire_slot(&self, slot: usize) -> Result<EngineLease> {
        self.ensure_open()?;
        let mut entry = self.slots[slot].engine.lock().await;
        // close() may have run while we waited
        self.ensure_open()?;

        if let Some(current) = entry.as_ref() {
            if current.is_healthy().await {
                return Ok(current.lease(slot));
            }
        }

        if let Some(stale) = entry.take() {
            warn!(
                "Engine in slot {} (generation {}) is unhealthy, relaunching",
                slot, stale.generation
            );
            if let Err(e) = stale.handle.shutdown().await {
                debug!("Shutting down stale engine failed: {}", e);
            }
        }

        let handle = self.launcher.launch(&self.launch).await?;
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        info!("Engine launched in slot {} (generation {})", slot, generation);

        let pooled = PooledEngine {
            handle,
            generation,
            healthy: Arc::new(AtomicBool::new(true)),
        };
        let lease = pooled.lease(slot);
        *entry = Some(pooled);
        self.slots[slot].record(Some(lease.clone()));
        Ok(lease)
    }

    /// Mark the engine behind `lease` as unhealthy so the next acquisition
    /// relaunches it. A lease from an older generation cannot affect a newer engine.
    pub fn invalidate(&self, lease: &EngineLease) {
        if lease.healthy.swap(false, Ordering::SeqCst) {
            warn!(
                "Engine in slot {} (generation {}) marked unhealthy",
                lease.slot, lease.generation
            );
        }
    }

    /// Open an isolated session on a pooled engine.
    ///
    /// Everything up to a usable context (permit wait, engine launch or
    /// relaunch, context creation) is bounded by `deadline`.
    pub async fn open_session(&self, viewport: Viewport, scale: f64, deadline: Duration) -> Result<RenderSession> {
        self.ensure_open()?;
        match tokio::time::timeout(deadline, self.start_session(viewport, scale)).await {
            Ok(result) => result,
            Err(_) => Err(Error::RenderTimeout(deadline.as_millis() as u64)),
        }
    }

    async fn start_session(&self, viewport: Viewport, scale: f64) -> Result<RenderSession> {
        let permit = self
            .gate
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::RenderEngineFailure("Engine pool is closed".into()))?;

        let lease = self.acquire_engine().await?;
        let context = match lease.handle.new_context(viewport, scale).await {
            Ok(context) => context,
            Err(e) => {
                if !lease.is_healthy().await {
                    self.invalidate(&lease);
                }
                return Err(e);
            }
        };

        let session = RenderSession {
            id: Uuid::new_v4().to_string(),
            viewport,
            scale,
            created_at: Utc::now(),
            context: Some(context),
            lease,
            _permit: permit,
        };
        debug!(
            "Session {} opened ({}x{} @ {})",
            session.id, viewport.width, viewport.height, scale
        );
        Ok(session)
    }

    /// Launch every slot ahead of the first request.
    pub async fn warm_up(&self) -> Result<()> {
        for slot in 0..self.slots.len() {
            self.acquire_slot(slot).await?;
        }
        Ok(())
    }

    /// Availability without launching anything
    pub async fn status(&self) -> EngineStatus {
        if self.is_closed() {
            return EngineStatus::Unavailable;
        }

        let mut ready = 0;
        let mut unhealthy = 0;
        for slot in &self.slots {
            let Some(lease) = slot.last_known() else {
                continue;
            };
            if lease.is_healthy().await {
                ready += 1;
            } else {
                unhealthy += 1;
            }
        }

        if ready > 0 {
            EngineStatus::Ready
        } else if unhealthy > 0 {
            EngineStatus::Unavailable
        } else {
            EngineStatus::Idle
        }
    }

    /// Shut every engine down. Later calls are no-ops, and later acquisitions fail.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.gate.close();

        let shutdowns = self.slots.iter().map(|slot| async move {
            let engine = slot.engine.lock().await.take();
            slot.record(None);
            if let Some(engine) = engine {
                if let Err(e) = engine.handle.shutdown().await {
                    warn!("Engine shutdown failed: {}", e);
                }
            }
        });
        futures::future::join_all(shutdowns).await;
        info!("Engine pool closed");
    }
}

/// A lease on one isolated context, destroyed at the end of its request
///
/// Always call [`destroy`](Self::destroy). A session dropped without it is
/// cleaned up on the runtime in the background.
pub struct RenderSession {
    id: String,
    viewport: Viewport,
    scale: f64,
    created_at: DateTime<Utc>,
    context: Option<Box<dyn RenderContext>>,
    lease: EngineLease,
    _permit: OwnedSemaphorePermit,
}

impl RenderSession {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn lease(&self) -> &EngineLease {
        &self.lease
    }

    pub fn is_destroyed(&self) -> bool {
        self.context.is_none()
    }

    fn context(&mut self) -> Result<&mut Box<dyn RenderContext>> {
        let id = &self.id;
        self.context
            .as_mut()
            .ok_or_else(|| Error::RenderEngineFailure(format!("Session {} already destroyed", id)))
    }

    pub async fn load_document(&mut self, document: &ComposedDocument, deadline: Duration) -> Result<()> {
        self.context()?.load_document(document, deadline).await
    }

    pub async fn capture_raster(&mut self, options: CaptureOptions) -> Result<Vec<u8>> {
        self.context()?.capture_raster(options).await
    }

    /// Release the isolated context. Idempotent.
    pub async fn destroy(&mut self) -> Result<()> {
        let Some(mut context) = self.context.take() else {
            return Ok(());
        };
        let result = context.destroy().await;
        debug!(
            "Session {} destroyed after {}ms",
            self.id,
            (Utc::now() - self.created_at).num_milliseconds()
        );
        result
    }
}

impl Drop for RenderSession {
    fn drop(&mut self) {
        let Some(mut context) = self.context.take() else {
            return;
        };
        warn!("Session {} dropped without destroy, cleaning up in background", self.id);
        let id = self.id.clone();
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                if let Err(e) = context.destroy().await {
                    warn!("Background destroy of session {} failed: {}", id, e);
                }
            });
        }
    }
}
