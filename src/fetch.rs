//! Loading pages into documents

use std::path::{Path, PathBuf};
#[cfg(feature = "net")]
use std::time::Duration;

use log::info;
#[cfg(feature = "net")]
use reqwest::blocking::Client;
use url::Url;

use crate::dom::html::parse_document;
use crate::dom::Document;
use crate::{CaptureConfig, Error, Result};

/// Where a page comes from
#[derive(Debug, Clone, PartialEq)]
pub enum PageSource {
    Remote(Url),
    Local(PathBuf),
}

impl PageSource {
    /// `http(s)://` URLs are remote; `file://` URLs and bare paths are local.
    pub fn parse(source: &str) -> Result<Self> {
        if source.starts_with("http://") || source.starts_with("https://") {
            let url = Url::parse(source).map_err(|e| Error::LoadError(format!("{}: {}", source, e)))?;
            return Ok(PageSource::Remote(url));
        }
        if source.starts_with("file://") {
            let url = Url::parse(source).map_err(|e| Error::LoadError(format!("{}: {}", source, e)))?;
            let path = url
                .to_file_path()
                .map_err(|_| Error::LoadError(format!("not a local file URL: {}", source)))?;
            return Ok(PageSource::Local(path));
        }
        Ok(PageSource::Local(PathBuf::from(source)))
    }
}

/// A parsed page ready to be opened in a tab
pub struct LoadedPage {
    pub document: Document,
    pub title: String,
    pub url: String,
}

pub fn load_page(source: &PageSource, config: &CaptureConfig) -> Result<LoadedPage> {
    let (html, url) = match source {
        PageSource::Remote(url) => (fetch_remote(url, config)?, url.to_string()),
        PageSource::Local(path) => read_local(path)?,
    };
    let document = parse_document(&html, config.viewport, config.device_pixel_ratio);
    let title = document.title().to_string();
    info!("loaded {} ({} bytes, title {:?})", url, html.len(), title);
    Ok(LoadedPage { document, title, url })
}

#[cfg(feature = "net")]
fn fetch_remote(url: &Url, config: &CaptureConfig) -> Result<String> {
    let client = Client::builder()
        .timeout(Duration::from_millis(config.timeout_ms))
        .build()
        .map_err(|e| Error::LoadError(format!("Failed to build HTTP client: {}", e)))?;
    let res = client
        .get(url.as_str())
        .header("User-Agent", config.user_agent.clone())
        .send()
        .map_err(|e| Error::LoadError(format!("HTTP GET failed: {}", e)))?
        .error_for_status()
        .map_err(|e| Error::LoadError(format!("HTTP GET failed: {}", e)))?;
    res.text()
        .map_err(|e| Error::LoadError(format!("Failed to read response body: {}", e)))
}

#[cfg(not(feature = "net"))]
fn fetch_remote(url: &Url, _config: &CaptureConfig) -> Result<String> {
    Err(Error::LoadError(format!(
        "cannot fetch {}: built without the `net` feature",
        url
    )))
}

fn read_local(path: &Path) -> Result<(String, String)> {
    let html = std::fs::read_to_string(path)
        .map_err(|e| Error::LoadError(format!("{}: {}", path.display(), e)))?;
    let url = path
        .canonicalize()
        .ok()
        .and_then(|p| Url::from_file_path(p).ok())
        .map(|u| u.to_string())
        .unwrap_or_else(|| format!("file://{}", path.display()));
    Ok((html, url))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sources_are_classified() {
        assert!(matches!(
            PageSource::parse("https://example.com/a").unwrap(),
            PageSource::Remote(_)
        ));
        assert_eq!(
            PageSource::parse("file:///tmp/page.html").unwrap(),
            PageSource::Local(PathBuf::from("/tmp/page.html"))
        );
        assert_eq!(
            PageSource::parse("page.html").unwrap(),
            PageSource::Local(PathBuf::from("page.html"))
        );
    }

    #[test]
    fn missing_file_is_a_load_error() {
        let err = load_page(
            &PageSource::Local(PathBuf::from("/definitely/not/here.html")),
            &CaptureConfig::default(),
        )
        .err()
        .unwrap();
        assert!(matches!(err, Error::LoadError(_)));
    }
}
