use std::fs;

use fullgrab::fetch::{load_page, PageSource};
use fullgrab::{CaptureConfig, Error, Viewport};
use tiny_http::{Response, Server};

const PAGE: &str = r#"<html><head><title>Served page</title></head>
<body><div style="height: 2000px">tall</div></body></html>"#;

fn serve_once(body: &'static str, status: u16) -> String {
    let server = Server::http("127.0.0.1:0").unwrap();
    let addr = server.server_addr();
    std::thread::spawn(move || {
        if let Ok(request) = server.recv() {
            let response = Response::from_string(body).with_status_code(status);
            let _ = request.respond(response);
        }
    });
    format!("http://{}/page.html", addr)
}

fn config() -> CaptureConfig {
    CaptureConfig {
        viewport: Viewport { width: 320, height: 480 },
        ..Default::default()
    }
}

#[test]
fn remote_page_is_fetched_and_parsed() {
    let url = serve_once(PAGE, 200);
    let source = PageSource::parse(&url).unwrap();
    let page = load_page(&source, &config()).unwrap();

    assert_eq!(page.title, "Served page");
    assert_eq!(page.url, url);
    assert_eq!(page.document.client_height(), 480.0);
    assert_eq!(page.document.content_height(), 2000.0);
}

#[test]
fn http_errors_are_load_errors() {
    let url = serve_once("gone", 404);
    let source = PageSource::parse(&url).unwrap();
    let err = load_page(&source, &config()).err().unwrap();
    assert!(matches!(err, Error::LoadError(_)));
}

#[test]
fn local_files_load_by_path_and_url() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("page.html");
    fs::write(&path, PAGE).unwrap();

    let by_path = load_page(&PageSource::parse(path.to_str().unwrap()).unwrap(), &config()).unwrap();
    assert_eq!(by_path.title, "Served page");
    assert!(by_path.url.starts_with("file://"));

    let by_url = load_page(&PageSource::parse(&by_path.url).unwrap(), &config()).unwrap();
    assert_eq!(by_url.url, by_path.url);
    assert_eq!(by_url.document.content_height(), 2000.0);
}
