use criterion::{criterion_group, criterion_main, Criterion};
use rfrender::config::RenderSettings;
use rfrender::engine::mock::MockLauncher;
use rfrender::pool::PoolConfig;
use rfrender::{CaptureEngine, DimensionLimits, DocumentComposer, EnginePool, RenderDefaults, RenderRequest};
use std::sync::Arc;
use std::time::Duration;

// Run with:
//    cargo bench --bench pipeline_bench

fn bench_compose(c: &mut Criterion) {
    let composer = DocumentComposer::new();
    let fragment = "<div class=card><h1>Hello</h1><p>World</p></div>".repeat(50);
    let document = format!(
        "<!DOCTYPE html><html><head><title>Bench</title></head><body>{}</body></html>",
        fragment
    );
    let css = "h1 { font-size: 32px; } p { color: #333; }";

    c.bench_function("compose_fragment", |b| b.iter(|| composer.compose(&fragment, Some(css))));
    c.bench_function("compose_full_document", |b| b.iter(|| composer.compose(&document, Some(css))));
}

fn bench_validate(c: &mut Criterion) {
    let limits = DimensionLimits::default();
    c.bench_function("validate_dimensions", |b| {
        b.iter(|| {
            let dims = limits.validate(99999, 600);
            let scale = limits.clamp_scale(7.5);
            (dims, scale)
        })
    });
}

// Pool and session overhead without a browser.
fn bench_mock_capture(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let pool = Arc::new(EnginePool::new(Arc::new(MockLauncher::new()), PoolConfig::default()));
    let settings = RenderSettings {
        settle_delay: Duration::ZERO,
        ..Default::default()
    };
    let capture = CaptureEngine::new(pool.clone(), &settings);
    let request = RenderRequest::new("<div>Hi</div>", &RenderDefaults::default());

    c.bench_function("mock_capture", |b| {
        b.iter(|| rt.block_on(capture.capture(&request)).unwrap())
    });

    rt.block_on(pool.close());
}

criterion_group!(benches, bench_compose, bench_validate, bench_mock_capture);
criterion_main!(benches);
