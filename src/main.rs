use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use log::{info, warn};
use rfrender::config::ServiceConfig;
use rfrender::engine::Launcher;
use rfrender::server::{self, AppState};
use rfrender::storage::ArtifactStore;
use rfrender::{CaptureEngine, DeliveryOrchestrator, EnginePool, RenderRequest};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rfrender", version, about = "Render HTML/CSS to PNG with headless Chrome")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP service
    Serve {
        #[arg(long, env = "HOST", default_value = "0.0.0.0")]
        host: String,
        #[arg(long, env = "PORT", default_value_t = 8000)]
        port: u16,
    },
    /// Render a single document to a PNG file
    Render(RenderArgs),
}

#[derive(Args)]
struct RenderArgs {
    /// HTML fragment or complete document
    html: PathBuf,
    /// Stylesheet to inject
    #[arg(long)]
    css: Option<PathBuf>,
    /// Output file (a unique name in the temp dir when omitted)
    #[arg(short, long)]
    output: Option<PathBuf>,
    #[arg(long)]
    width: Option<i64>,
    #[arg(long)]
    height: Option<i64>,
    #[arg(long)]
    scale: Option<f64>,
    #[arg(long)]
    full_page: bool,
    #[arg(long)]
    transparent: bool,
}

fn launcher() -> Arc<dyn Launcher> {
    #[cfg(feature = "cdp")]
    {
        Arc::new(rfrender::engine::cdp::CdpLauncher::new())
    }
    #[cfg(not(feature = "cdp"))]
    {
        warn!("Built without the `cdp` feature, rendering with the in-process mock engine");
        Arc::new(rfrender::engine::mock::MockLauncher::new())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}

async fn serve(config: ServiceConfig, host: String, port: u16) -> Result<()> {
    let pool = Arc::new(EnginePool::new(launcher(), config.engine.pool_config()));
    if config.engine.warmup {
        if let Err(e) = pool.warm_up().await {
            warn!("Engine warm-up failed, will retry on first request: {}", e);
        }
    }

    let capture = Arc::new(CaptureEngine::new(pool.clone(), &config.render));
    let store = Arc::new(ArtifactStore::from_settings(config.storage.clone()).await);
    let state = Arc::new(AppState::new(
        DeliveryOrchestrator::new(capture, store),
        config.render.defaults(),
    ));

    let listener = tokio::net::TcpListener::bind((host.as_str(), port))
        .await
        .with_context(|| format!("Failed to bind {}:{}", host, port))?;

    let served = server::serve(listener, state, shutdown_signal()).await;
    pool.close().await;
    served.context("HTTP server failed")
}

async fn render(config: ServiceConfig, args: RenderArgs) -> Result<()> {
    let html = tokio::fs::read_to_string(&args.html)
        .await
        .with_context(|| format!("Failed to read {}", args.html.display()))?;
    let css = match &args.css {
        Some(path) => Some(
            tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?,
        ),
        None => None,
    };

    let defaults = config.render.defaults();
    let request = RenderRequest {
        html,
        css,
        width: args.width.unwrap_or(defaults.width),
        height: args.height.unwrap_or(defaults.height),
        scale: args.scale.unwrap_or(defaults.scale),
        full_page: args.full_page,
        transparent: args.transparent,
    };

    let pool = Arc::new(EnginePool::new(launcher(), config.engine.pool_config()));
    let capture = CaptureEngine::new(pool.clone(), &config.render);
    let captured = capture.capture(&request).await;
    pool.close().await;
    let artifact = captured?;

    let output = args.output.unwrap_or_else(|| {
        std::env::temp_dir().join(format!("rfrender-{}.png", uuid::Uuid::new_v4().simple()))
    });
    tokio::fs::write(&output, &artifact.bytes)
        .await
        .with_context(|| format!("Failed to write {}", output.display()))?;

    println!("{}", output.display());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = ServiceConfig::from_env()?;

    match cli.command {
        Command::Serve { host, port } => serve(config, host, port).await,
        Command::Render(args) => render(config, args).await,
    }
}
