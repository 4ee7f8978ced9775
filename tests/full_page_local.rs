use std::sync::Arc;
use std::time::Duration;

use fullgrab::agent::CAPTURE_STYLE_ID;
use fullgrab::dom::html::parse_document;
use fullgrab::dom::lock_page;
use fullgrab::host::LocalHost;
use fullgrab::orchestrator::{Orchestrator, Termination};
use fullgrab::rendering::render_region;
use fullgrab::storage::{MemoryStore, Store};
use fullgrab::{CaptureConfig, Error, Viewport};
use sha2::{Digest, Sha256};

const VIEWPORT: Viewport = Viewport { width: 200, height: 300 };
const DPR: f64 = 2.0;

const LONG_PAGE: &str = r#"<html><head><title>Long page</title></head><body>
<header style="position: fixed; top: 0; height: 20px; background: rgb(255, 0, 0)"></header>
<div style="height: 120px; background: rgb(0, 0, 200)"></div>
<div style="height: 120px; background: rgb(0, 200, 0)"></div>
<div style="height: 120px; background: rgb(200, 200, 0)"></div>
<div style="height: 120px; background: rgb(0, 200, 200)"></div>
<div style="height: 120px; background: rgb(200, 0, 200)"></div>
<div style="height: 120px; background: rgb(90, 90, 90)"></div>
</body></html>"#;

fn config() -> CaptureConfig {
    CaptureConfig {
        viewport: VIEWPORT,
        device_pixel_ratio: DPR,
        ..CaptureConfig::default().without_delays()
    }
}

fn setup(html: &str, url: &str) -> (Arc<LocalHost>, Arc<MemoryStore>, Orchestrator<LocalHost, MemoryStore>) {
    let host = Arc::new(LocalHost::new(Duration::ZERO));
    host.open_tab(parse_document(html, VIEWPORT, DPR), url).unwrap();
    let store = Arc::new(MemoryStore::new());
    let orch = Orchestrator::new(host.clone(), store.clone(), config()).unwrap();
    (host, store, orch)
}

fn digest(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

#[tokio::test]
async fn long_page_is_stitched_seamlessly() {
    let reference = {
        let mut doc = parse_document(LONG_PAGE, VIEWPORT, DPR);
        doc.insert_style_sheet("no-scrollbars", "* { scrollbar-width: none !important; }");
        render_region(&doc, 0.0, 720.0).unwrap()
    };

    let (host, store, orch) = setup(LONG_PAGE, "file:///long.html");
    let report = orch.capture_full_page().await.unwrap();

    let offsets: Vec<f64> = report.frames.iter().map(|f| f.captured_at_scroll_y).collect();
    assert_eq!(offsets, vec![0.0, 220.0, 420.0]);
    assert_eq!(report.termination, Some(Termination::ReachedBottom));
    assert_eq!(report.page_title, "Long page");

    let stitched = image::load_from_memory(&report.image).unwrap().to_rgba8();
    assert_eq!(stitched.dimensions(), (400, 1440));
    // header only at the very top; the second tile shows content under it
    assert_eq!(stitched.get_pixel(20, 10).0, [255, 0, 0, 255]);
    assert_eq!(stitched.get_pixel(20, 450).0, [0, 200, 0, 255]);

    let expected = image::load_from_memory(&reference.png_data).unwrap().to_rgba8();
    assert_eq!(expected.dimensions(), stitched.dimensions());
    assert_eq!(digest(stitched.as_raw()), digest(expected.as_raw()));

    // the page is left as it was found
    let page = host.page(host.active_tab_id().unwrap()).unwrap();
    let doc = lock_page(&page).unwrap();
    assert_eq!(doc.scroll_y(), 0.0);
    assert!(!doc.has_style_sheet(CAPTURE_STYLE_ID));
    let header = doc.body_elements()[0];
    assert_eq!(doc.inline_style(header, "visibility"), None);
    assert_eq!(doc.inline_style(header, "opacity"), None);
    drop(doc);

    let record = store.load().unwrap().unwrap();
    assert_eq!(record.page_title, "Long page");
    assert_eq!(record.page_url, "file:///long.html");
    assert_eq!(record.original_captures.len(), 3);
    assert_eq!(record.image_bytes().unwrap(), Some(report.image.clone()));
}

#[tokio::test]
async fn sensitive_fields_are_obscured_in_frames_only() {
    let html = r#"<html><body>
<input type="password" value="hunter2" style="background: rgb(255, 0, 0)">
<div style="height: 100px; background: rgb(0, 0, 255)"></div>
</body></html>"#;
    let (host, _store, orch) = setup(html, "https://shop.test/login");
    let report = orch.capture_full_page().await.unwrap();
    assert_eq!(report.frames.len(), 1);

    let img = image::load_from_memory(&report.image).unwrap().to_rgba8();
    let [r, g, b, _] = img.get_pixel(200, 24).0;
    assert!(r == g && g == b, "expected grey, got {:?}", (r, g, b));
    // untouched content keeps its colour
    assert_eq!(img.get_pixel(200, 140).0, [0, 0, 255, 255]);

    let page = host.page(host.active_tab_id().unwrap()).unwrap();
    let doc = lock_page(&page).unwrap();
    let field = doc.body_elements()[0];
    assert_eq!(doc.inline_style(field, "filter"), None);
}

#[tokio::test]
async fn agent_is_injected_once_per_tab() {
    let (host, _store, orch) = setup(LONG_PAGE, "file:///long.html");
    let tab = host.active_tab_id().unwrap();
    assert!(!host.has_agent(tab));
    orch.capture_full_page().await.unwrap();
    assert!(host.has_agent(tab));
    orch.capture_full_page().await.unwrap();
    assert!(host.has_agent(tab));
}

#[tokio::test]
async fn protected_pages_cannot_be_captured() {
    let (_host, store, orch) = setup(LONG_PAGE, "about:blank");
    let err = orch.capture_full_page().await.unwrap_err();
    assert!(matches!(err, Error::InjectionFailed(_)));
    assert!(store.load().unwrap().is_none());
}

#[tokio::test]
async fn visible_capture_is_one_viewport() {
    let (_host, store, orch) = setup(LONG_PAGE, "file:///long.html");
    let report = orch.capture_visible().await.unwrap();
    let img = image::load_from_memory(&report.image).unwrap();
    assert_eq!((img.width(), img.height()), (400, 600));

    let record = store.load().unwrap().unwrap();
    assert_eq!(record.original_captures.len(), 1);
    assert_eq!(record.original_captures[0].offset, 0.0);
}
