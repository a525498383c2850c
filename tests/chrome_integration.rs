//! Real-browser tests. Run with `cargo test -- --ignored` on a machine with Chrome.
#![cfg(feature = "cdp")]

use rfrender::config::RenderSettings;
use rfrender::engine::cdp::CdpLauncher;
use rfrender::pool::PoolConfig;
use rfrender::{CaptureEngine, EnginePool, Error, RenderDefaults, RenderRequest};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn png_size(bytes: &[u8]) -> (u32, u32) {
    assert_eq!(&bytes[..8], b"\x89PNG\r\n\x1a\n", "not a PNG");
    let width = u32::from_be_bytes([bytes[16], bytes[17], bytes[18], bytes[19]]);
    let height = u32::from_be_bytes([bytes[20], bytes[21], bytes[22], bytes[23]]);
    (width, height)
}

fn engine(timeout: Duration) -> (Arc<EnginePool>, CaptureEngine) {
    let pool = Arc::new(EnginePool::new(Arc::new(CdpLauncher::new()), PoolConfig::default()));
    let settings = RenderSettings {
        timeout,
        ..Default::default()
    };
    let capture = CaptureEngine::new(pool.clone(), &settings);
    (pool, capture)
}

/// Serve a 1x1 PNG after `delay`, once per connection.
fn slow_image_server(delay: Duration) -> String {
    let server = tiny_http::Server::http("127.0.0.1:0").unwrap();
    let addr = server.server_addr().to_string();
    std::thread::spawn(move || {
        for request in server.incoming_requests() {
            std::thread::spawn(move || {
                std::thread::sleep(delay);
                let header = tiny_http::Header::from_bytes(&b"Content-Type"[..], &b"image/png"[..]).unwrap();
                let response =
                    tiny_http::Response::from_data(rfrender::engine::mock::PIXEL_PNG.to_vec()).with_header(header);
                let _ = request.respond(response);
            });
        }
    });
    format!("http://{}/pixel.png", addr)
}

#[tokio::test]
#[ignore] // Requires Chrome to be installed
async fn test_viewport_and_scale_drive_png_size() {
    let (pool, capture) = engine(Duration::from_secs(30));

    let request = RenderRequest::new("<div style='background:#4A90D9'>Hi</div>", &RenderDefaults::default())
        .with_size(200, 100);
    let artifact = capture.capture(&request).await.unwrap();
    assert_eq!(png_size(&artifact.bytes), (200, 100));

    let artifact = capture.capture(&request.with_scale(2.0)).await.unwrap();
    assert_eq!(png_size(&artifact.bytes), (400, 200));

    pool.close().await;
}

#[tokio::test]
#[ignore] // Requires Chrome to be installed
async fn test_full_page_captures_scroll_height() {
    let (pool, capture) = engine(Duration::from_secs(30));

    let request = RenderRequest::new("<div style='height:1500px'>tall</div>", &RenderDefaults::default())
        .with_size(300, 200)
        .full_page(true);
    let artifact = capture.capture(&request).await.unwrap();
    let (width, height) = png_size(&artifact.bytes);
    assert_eq!(width, 300);
    assert!(height >= 1500, "expected full height, got {}", height);

    pool.close().await;
}

#[tokio::test]
#[ignore] // Requires Chrome to be installed
async fn test_capture_waits_for_slow_images() {
    let (pool, capture) = engine(Duration::from_secs(30));
    let url = slow_image_server(Duration::from_millis(500));

    let started = Instant::now();
    let request = RenderRequest::new(format!("<img src='{}'>", url), &RenderDefaults::default());
    capture.capture(&request).await.unwrap();
    assert!(started.elapsed() >= Duration::from_millis(500));

    pool.close().await;
}

#[tokio::test]
#[ignore] // Requires Chrome to be installed
async fn test_hanging_resource_times_out() {
    let (pool, capture) = engine(Duration::from_secs(2));
    let url = slow_image_server(Duration::from_secs(60));

    let request = RenderRequest::new(format!("<img src='{}'>", url), &RenderDefaults::default());
    let err = capture.capture(&request).await.unwrap_err();
    assert_eq!(err, Error::RenderTimeout(2000));

    // the engine is still usable afterwards
    let ok = RenderRequest::new("<p>after</p>", &RenderDefaults::default());
    capture.capture(&ok).await.unwrap();

    pool.close().await;
}
