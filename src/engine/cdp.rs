//! Chrome DevTools Protocol backend (uses the `headless_chrome` crate)
//!
//! The driver is synchronous, so every call runs on a blocking thread. Each
//! render session gets its own tab with its own device metrics; documents are
//! loaded through `data:` URLs, which gives them an opaque origin and keeps
//! storage from leaking between sessions.

use crate::compose::ComposedDocument;
use crate::engine::{CaptureOptions, EngineHandle, LaunchConfig, Launcher, RenderContext};
use crate::{Error, Result, Viewport};
use async_trait::async_trait;
use base64::Engine as Base64Engine;
use headless_chrome::browser::tab::Tab;
use headless_chrome::protocol::cdp::{Emulation, Page};
use headless_chrome::{Browser, LaunchOptions};
use log::{debug, info, warn};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::ffi::OsStr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use uuid::Uuid;

const HEALTH_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

// Resolves once web fonts and every <img> have settled.
const QUIESCENCE_SCRIPT: &str = r#"(async function() {
    if (document.fonts && document.fonts.ready) { await document.fonts.ready; }
    const pending = Array.from(document.images).filter(function(img) { return !img.complete; });
    await Promise.all(pending.map(function(img) {
        return new Promise(function(resolve) { img.onload = resolve; img.onerror = resolve; });
    }));
    return document.readyState;
})()"#;

const CONTENT_SIZE_SCRIPT: &str = r#"(function() {
    const d = document.documentElement;
    const b = document.body;
    return JSON.stringify([
        Math.max(d.scrollWidth, b ? b.scrollWidth : 0),
        Math.max(d.scrollHeight, b ? b.scrollHeight : 0)
    ]);
})()"#;

/// Launches headless Chrome/Chromium processes
#[derive(Debug, Clone, Default)]
pub struct CdpLauncher;

impl CdpLauncher {
    pub fn new() -> Self {
        CdpLauncher
    }
}

#[async_trait]
impl Launcher for CdpLauncher {
    async fn launch(&self, config: &LaunchConfig) -> Result<Arc<dyn EngineHandle>> {
        let cfg = config.clone();
        let launch = tokio::task::spawn_blocking(move || launch_browser(&cfg));
        let browser = tokio::time::timeout(config.launch_timeout, launch)
            .await
            .map_err(|_| {
                Error::RenderEngineFailure(format!(
                    "Browser did not start within {}ms",
                    config.launch_timeout.as_millis()
                ))
            })???;

        info!("Chromium launched (pid {:?})", browser.get_process_id());
        Ok(Arc::new(CdpEngine {
            browser: Mutex::new(Some(browser)),
        }))
    }

    fn concurrency_hint(&self) -> Option<usize> {
        Some(num_cpus::get())
    }
}

fn launch_browser(config: &LaunchConfig) -> Result<Browser> {
    let args: Vec<&OsStr> = config.args.iter().map(OsStr::new).collect();

    let launch_options = LaunchOptions::default_builder()
        .headless(true)
        .sandbox(false)
        .path(config.executable.clone())
        .window_size(Some((config.window.width, config.window.height)))
        .idle_browser_timeout(config.idle_timeout)
        .args(args)
        .build()
        .map_err(|e| Error::RenderEngineFailure(format!("Failed to build launch options: {}", e)))?;

    Browser::new(launch_options)
        .map_err(|e| Error::RenderEngineFailure(format!("Failed to launch browser: {}", e)))
}

/// One running browser process
pub struct CdpEngine {
    // `None` after shutdown
    browser: Mutex<Option<Browser>>,
}

impl CdpEngine {
    fn browser(&self) -> Result<Browser> {
        self.browser
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| Error::RenderEngineFailure("Browser has been shut down".into()))
    }
}

#[async_trait]
impl EngineHandle for CdpEngine {
    async fn is_healthy(&self) -> bool {
        let Ok(browser) = self.browser() else {
            return false;
        };
        let probe = tokio::task::spawn_blocking(move || browser.get_version().is_ok());
        matches!(tokio::time::timeout(HEALTH_PROBE_TIMEOUT, probe).await, Ok(Ok(true)))
    }

    async fn new_context(&self, viewport: Viewport, scale: f64) -> Result<Box<dyn RenderContext>> {
        let browser = self.browser()?;
        let tab = tokio::task::spawn_blocking(move || -> Result<Arc<Tab>> {
            let tab = browser
                .new_tab()
                .map_err(|e| Error::RenderEngineFailure(format!("Failed to create tab: {}", e)))?;

            let metrics = command::<Emulation::SetDeviceMetricsOverride>(json!({
                "width": viewport.width,
                "height": viewport.height,
                "deviceScaleFactor": scale,
                "mobile": false,
            }))?;
            if let Err(e) = tab.call_method(metrics) {
                let _ = tab.close(false);
                return Err(Error::RenderEngineFailure(format!("Failed to set viewport: {}", e)));
            }
            Ok(tab)
        })
        .await??;

        let id = Uuid::new_v4().simple().to_string();
        debug!("Opened tab {} at {}x{}@{}", id, viewport.width, viewport.height, scale);
        Ok(Box::new(CdpContext {
            id,
            tab: Some(tab),
        }))
    }

    async fn shutdown(&self) -> Result<()> {
        let browser = self.browser.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(browser) = browser {
            let pid = browser.get_process_id();
            // Dropping the last handle kills the child process.
            tokio::task::spawn_blocking(move || drop(browser)).await?;
            info!("Chromium shut down (pid {:?})", pid);
        }
        Ok(())
    }
}

/// A single tab used for one render
pub struct CdpContext {
    id: String,
    // `None` once destroyed
    tab: Option<Arc<Tab>>,
}

impl CdpContext {
    fn tab(&self) -> Result<Arc<Tab>> {
        self.tab
            .clone()
            .ok_or_else(|| Error::RenderEngineFailure(format!("Context {} already destroyed", self.id)))
    }
}

#[async_trait]
impl RenderContext for CdpContext {
    fn id(&self) -> &str {
        &self.id
    }

    async fn load_document(&mut self, document: &ComposedDocument, deadline: Duration) -> Result<()> {
        let tab = self.tab()?;
        let url = data_url(document);
        let timeout_ms = deadline.as_millis() as u64;

        tokio::task::spawn_blocking(move || -> Result<()> {
            tab.set_default_timeout(deadline);
            tab.navigate_to(&url)
                .map_err(|e| classify(e, timeout_ms, "Navigation failed"))?;
            // returns on the network-almost-idle lifecycle event
            tab.wait_until_navigated()
                .map_err(|e| classify(e, timeout_ms, "Wait for navigation failed"))?;
            tab.evaluate(QUIESCENCE_SCRIPT, true)
                .map_err(|e| classify(e, timeout_ms, "Waiting for resources failed"))?;
            Ok(())
        })
        .await?
    }

    async fn capture_raster(&mut self, options: CaptureOptions) -> Result<Vec<u8>> {
        let tab = self.tab()?;

        tokio::task::spawn_blocking(move || -> Result<Vec<u8>> {
            if options.omit_background {
                let transparent = command::<Emulation::SetDefaultBackgroundColorOverride>(json!({
                    "color": { "r": 0, "g": 0, "b": 0, "a": 0.0 }
                }))?;
                tab.call_method(transparent)
                    .map_err(|e| Error::RenderEngineFailure(format!("Failed to clear background: {}", e)))?;
            }

            let mut params = json!({ "format": "png", "fromSurface": true });
            if options.full_page {
                let (width, height) = content_size(&tab)?;
                params["captureBeyondViewport"] = json!(true);
                params["clip"] = json!({ "x": 0, "y": 0, "width": width, "height": height, "scale": 1 });
            }

            let shot = tab
                .call_method(command::<Page::CaptureScreenshot>(params)?)
                .map_err(|e| Error::RenderEngineFailure(format!("Screenshot failed: {}", e)))?;

            base64::engine::general_purpose::STANDARD
                .decode(shot.data)
                .map_err(|e| Error::RenderEngineFailure(format!("Screenshot payload was not base64: {}", e)))
        })
        .await?
    }

    async fn destroy(&mut self) -> Result<()> {
        let Some(tab) = self.tab.take() else {
            return Ok(());
        };
        let id = self.id.clone();
        tokio::task::spawn_blocking(move || {
            if let Err(e) = tab.close(false) {
                warn!("Failed to close tab {}: {}", id, e);
            }
        })
        .await?;
        Ok(())
    }
}

fn data_url(document: &ComposedDocument) -> String {
    format!(
        "data:text/html;charset=utf-8;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(document.as_str())
    )
}

fn content_size(tab: &Tab) -> Result<(f64, f64)> {
    let eval = tab
        .evaluate(CONTENT_SIZE_SCRIPT, false)
        .map_err(|e| Error::RenderEngineFailure(format!("Failed to measure page: {}", e)))?;

    let raw = eval
        .value
        .as_ref()
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::RenderEngineFailure("No value returned from page measurement".into()))?;

    let dims: [f64; 2] = serde_json::from_str(raw)
        .map_err(|e| Error::RenderEngineFailure(format!("Unexpected page measurement {:?}: {}", raw, e)))?;
    Ok((dims[0].max(1.0), dims[1].max(1.0)))
}

// Protocol parameter structs are built from JSON so optional fields that vary
// between protocol revisions can be left out.
fn command<C: DeserializeOwned>(params: serde_json::Value) -> Result<C> {
    serde_json::from_value(params)
        .map_err(|e| Error::Internal(format!("Invalid DevTools command parameters: {}", e)))
}

fn classify(err: anyhow::Error, timeout_ms: u64, what: &str) -> Error {
    let text = format!("{:#}", err);
    let lowered = text.to_ascii_lowercase();
    if lowered.contains("timed out") || lowered.contains("timeout") || lowered.contains("never came") {
        Error::RenderTimeout(timeout_ms)
    } else {
        Error::RenderEngineFailure(format!("{}: {}", what, text))
    }
}
