//! Capture engine
//!
//! Runs one render request end to end: clamp, compose, open a session, load,
//! settle, snapshot, and tear the session down whatever happened.

use crate::compose::ComposedDocument;
use crate::config::RenderSettings;
use crate::engine::CaptureOptions;
use crate::pool::{EnginePool, RenderSession};
use crate::{DimensionLimits, DocumentComposer, Error, ImageArtifact, RenderRequest, Result};
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::{Duration, Instant};

// Bounds cleanup so a wedged engine cannot hold the request open.
const DESTROY_TIMEOUT: Duration = Duration::from_secs(5);

/// Turns [`RenderRequest`]s into PNG artifacts
pub struct CaptureEngine {
    pool: Arc<EnginePool>,
    composer: DocumentComposer,
    limits: DimensionLimits,
    timeout: Duration,
    settle_delay: Duration,
}

impl CaptureEngine {
    pub fn new(pool: Arc<EnginePool>, settings: &RenderSettings) -> Self {
        Self {
            pool,
            composer: DocumentComposer::new(),
            limits: settings.limits(),
            timeout: settings.timeout,
            settle_delay: settings.settle_delay,
        }
    }

    pub fn pool(&self) -> &Arc<EnginePool> {
        &self.pool
    }

    pub fn limits(&self) -> &DimensionLimits {
        &self.limits
    }

    /// Render `request` to a PNG.
    ///
    /// The whole engine-facing part (context permit, engine launch, context
    /// creation, load, settle, snapshot) shares one deadline of `timeout`.
    /// The session is always destroyed.
    pub async fn capture(&self, request: &RenderRequest) -> Result<ImageArtifact> {
        request.validate()?;
        let started = Instant::now();

        let dims = self.limits.validate(request.width, request.height);
        let scale = self.limits.clamp_scale(request.scale);
        let viewport = dims.viewport();
        let document = self.composer.compose(&request.html, request.css.as_deref());
        let options = CaptureOptions {
            full_page: request.full_page,
            omit_background: request.transparent,
        };
        let timeout_ms = self.timeout.as_millis() as u64;
        let deadline = tokio::time::Instant::now() + self.timeout;

        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        let opened = tokio::time::timeout_at(deadline, self.pool.open_session(viewport, scale, remaining)).await;
        let mut session = match opened {
            Ok(Ok(session)) => session,
            Ok(Err(Error::RenderTimeout(_))) | Err(_) => {
                warn!("No session within {}ms", timeout_ms);
                return Err(Error::RenderTimeout(timeout_ms));
            }
            Ok(Err(e)) => return Err(e),
        };
        let lease = session.lease().clone();
        debug!("Session {} loading {} byte document", session.id(), document.len());

        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        let result = match tokio::time::timeout_at(deadline, self.render(&mut session, &document, options, remaining)).await {
            Ok(result) => result,
            Err(_) => {
                warn!("Session {} exceeded {}ms, destroying context", session.id(), timeout_ms);
                Err(Error::RenderTimeout(timeout_ms))
            }
        };

        match tokio::time::timeout(DESTROY_TIMEOUT, session.destroy()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Failed to destroy session {}: {}", session.id(), e),
            Err(_) => warn!("Destroying session {} timed out", session.id()),
        }

        match result {
            Ok(bytes) => {
                let artifact = ImageArtifact::png(bytes, viewport, scale);
                info!(
                    "Rendered {}x{}@{} in {}ms ({} bytes)",
                    viewport.width,
                    viewport.height,
                    scale,
                    started.elapsed().as_millis(),
                    artifact.len()
                );
                Ok(artifact)
            }
            Err(e) => {
                // a timeout never takes the engine down
                if !matches!(e, Error::RenderTimeout(_)) && !lease.is_healthy().await {
                    error!("Engine died during session {}: {}", session.id(), e);
                    self.pool.invalidate(&lease);
                }
                Err(e)
            }
        }
    }

    async fn render(
        &self,
        session: &mut RenderSession,
        document: &ComposedDocument,
        options: CaptureOptions,
        deadline: Duration,
    ) -> Result<Vec<u8>> {
        session.load_document(document, deadline).await?;
        if !self.settle_delay.is_zero() {
            tokio::time::sleep(self.settle_delay).await;
        }
        let bytes = session.capture_raster(options).await?;
        if bytes.is_empty() {
            return Err(Error::RenderEngineFailure("Engine returned an empty image".into()));
        }
        Ok(bytes)
    }
}
