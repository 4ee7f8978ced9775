//! FullGrab capture pipeline
//!
//! Captures a web page, including content below the fold, as one seamless
//! raster image. Three components talk only through request/response
//! messages:
//!
//! - **Page agent** ([`agent`]): lives with the page; reports geometry,
//!   scrolls, hides scrollbars and fixed/sticky chrome, redacts sensitive
//!   content.
//! - **Orchestrator** ([`orchestrator`]): ensures the agent is present, drives
//!   the scroll/capture loop and hands the frames to the compositor.
//! - **Compositor** ([`compositor`]): pure transform from ordered frames to
//!   one flattened PNG.
//!
//! The browser host is modelled in-process by [`host::LocalHost`], which
//! renders [`dom::Document`] pages through the [`rendering`] module.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use fullgrab::{CaptureConfig, Viewport};
//! use fullgrab::host::LocalHost;
//! use fullgrab::orchestrator::Orchestrator;
//! use fullgrab::storage::MemoryStore;
//!
//! # async fn run() -> fullgrab::Result<()> {
//! let config = CaptureConfig {
//!     viewport: Viewport { width: 1280, height: 720 },
//!     ..Default::default()
//! };
//! let html = "<html><body><div style=\"height: 4000px\">long</div></body></html>";
//! let doc = fullgrab::dom::html::parse_document(html, config.viewport, config.device_pixel_ratio);
//!
//! let host = Arc::new(LocalHost::new(config.scroll_settle()));
//! host.open_tab(doc, "file:///long.html")?;
//!
//! let orchestrator = Orchestrator::new(host, Arc::new(MemoryStore::new()), config)?;
//! let report = orchestrator.capture_full_page().await?;
//! println!("{} frames, {} bytes", report.frames.len(), report.image.len());
//! # Ok(())
//! # }
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub mod error;
pub use error::{Error, Result};

pub mod agent;
pub mod compositor;
pub mod dom;
pub mod fetch;
pub mod host;
pub mod orchestrator;
pub mod protocol;
pub mod rendering;
pub mod storage;

pub use protocol::{Frame, PageMetrics};

/// Configuration for a capture pipeline
///
/// Overlap and settle delays are empirically tuned; every field can be
/// overridden from a JSON file (missing fields keep their defaults).
///
/// # Examples
///
/// ```
/// let cfg = fullgrab::CaptureConfig::default();
/// assert_eq!(cfg.overlap, 80.0);
/// assert!(cfg.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Viewport dimensions of pages loaded by the CLI
    pub viewport: Viewport,
    /// Device pixel ratio of pages loaded by the CLI
    pub device_pixel_ratio: f64,
    /// Vertical pixels shared by consecutive tiles
    pub overlap: f64,
    /// Tile cap `K`: the scroll range is bounded by `client_height * K`
    pub max_screens: u32,
    /// Absolute tile-count safety limit `N`
    pub max_tiles: usize,
    /// Ping attempts after injecting the page agent
    pub ping_attempts: u32,
    /// Back-off between ping attempts in milliseconds
    pub ping_backoff_ms: u64,
    /// Wait after injecting the agent before the first re-ping
    pub inject_settle_ms: u64,
    /// Settle delay applied by the agent after each scroll
    pub scroll_settle_ms: u64,
    /// Extra render settle delay before each screenshot
    pub render_settle_ms: u64,
    /// User agent string sent when fetching remote pages
    pub user_agent: String,
    /// Timeout for fetching remote pages in milliseconds
    pub timeout_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            viewport: Viewport::default(),
            device_pixel_ratio: 1.0,
            overlap: 80.0,
            max_screens: 15,
            max_tiles: 20,
            ping_attempts: 3,
            ping_backoff_ms: 250,
            inject_settle_ms: 250,
            scroll_settle_ms: 250,
            render_settle_ms: 350,
            user_agent: "Mozilla/5.0 (X11; Linux x86_64) FullGrab/0.1".to_string(),
            timeout_ms: 30000,
        }
    }
}

impl CaptureConfig {
    /// Load a configuration from a JSON file and validate it.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::ConfigError(format!("{}: {}", path.display(), e)))?;
        let cfg: CaptureConfig = serde_json::from_str(&raw)
            .map_err(|e| Error::ConfigError(format!("{}: {}", path.display(), e)))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.viewport.width == 0 || self.viewport.height == 0 {
            return Err(Error::ConfigError("viewport must be non-empty".into()));
        }
        if self.device_pixel_ratio.is_nan() || self.device_pixel_ratio <= 0.0 {
            return Err(Error::ConfigError("device_pixel_ratio must be positive".into()));
        }
        if self.overlap.is_nan() || self.overlap < 0.0 || self.overlap >= self.viewport.height as f64 {
            return Err(Error::ConfigError(format!(
                "overlap {} must be in [0, viewport height {})",
                self.overlap, self.viewport.height
            )));
        }
        if self.max_screens == 0 || self.max_tiles == 0 {
            return Err(Error::ConfigError("tile limits must be non-zero".into()));
        }
        if self.ping_attempts == 0 {
            return Err(Error::ConfigError("ping_attempts must be non-zero".into()));
        }
        Ok(())
    }

    pub fn scroll_settle(&self) -> Duration {
        Duration::from_millis(self.scroll_settle_ms)
    }

    pub fn render_settle(&self) -> Duration {
        Duration::from_millis(self.render_settle_ms)
    }

    pub fn ping_backoff(&self) -> Duration {
        Duration::from_millis(self.ping_backoff_ms)
    }

    pub fn inject_settle(&self) -> Duration {
        Duration::from_millis(self.inject_settle_ms)
    }

    /// Same pipeline constants with every delay set to zero.
    pub fn without_delays(mut self) -> Self {
        self.ping_backoff_ms = 0;
        self.inject_settle_ms = 0;
        self.scroll_settle_ms = 0;
        self.render_settle_ms = 0;
        self
    }
}

/// Viewport dimensions in CSS pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CaptureConfig::default();
        assert_eq!(config.viewport.width, 1280);
        assert_eq!(config.viewport.height, 720);
        assert_eq!(config.max_screens, 15);
        assert_eq!(config.max_tiles, 20);
        assert_eq!(config.ping_attempts, 3);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg: CaptureConfig =
            serde_json::from_str(r#"{"overlap": 40, "viewport": {"width": 800, "height": 600}}"#)
                .unwrap();
        assert_eq!(cfg.overlap, 40.0);
        assert_eq!(cfg.viewport, Viewport { width: 800, height: 600 });
        assert_eq!(cfg.render_settle_ms, 350);
    }

    #[test]
    fn overlap_must_fit_in_viewport() {
        let cfg = CaptureConfig {
            viewport: Viewport { width: 100, height: 80 },
            overlap: 80.0,
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(Error::ConfigError(_))));
    }

    #[test]
    fn config_loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.json");
        std::fs::write(&path, r#"{"max_tiles": 5}"#).unwrap();
        let cfg = CaptureConfig::from_json_file(&path).unwrap();
        assert_eq!(cfg.max_tiles, 5);
        assert!(CaptureConfig::from_json_file(dir.path().join("missing.json")).is_err());
    }
}
