//! Persisted capture state
//!
//! The last capture is stored as one record that downstream tools read. Each
//! capture replaces the previous record entirely.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::protocol::{data_url, Frame};
use crate::{Error, Result};

/// The persisted result of one capture
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureRecord {
    /// Composite as a data URL; absent when stitching failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub captured_image: Option<String>,
    pub original_captures: Vec<OriginalCapture>,
    pub page_title: String,
    pub page_url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OriginalCapture {
    /// Frame as a data URL
    pub image: String,
    pub offset: f64,
}

impl From<&Frame> for OriginalCapture {
    fn from(frame: &Frame) -> Self {
        Self {
            image: data_url::encode(&frame.image),
            offset: frame.captured_at_scroll_y,
        }
    }
}

impl CaptureRecord {
    pub fn new(image: Option<&[u8]>, frames: &[Frame], page_title: &str, page_url: &str) -> Self {
        Self {
            captured_image: image.map(data_url::encode),
            original_captures: frames.iter().map(OriginalCapture::from).collect(),
            page_title: page_title.to_string(),
            page_url: page_url.to_string(),
        }
    }

    /// Decoded PNG bytes of the composite, if any.
    pub fn image_bytes(&self) -> Result<Option<Vec<u8>>> {
        self.captured_image
            .as_deref()
            .map(|url| data_url::decode(url).map_err(Error::Storage))
            .transpose()
    }
}

/// Single-writer store for the last capture
pub trait Store: Send + Sync {
    /// Drop any previously stored capture.
    fn clear(&self) -> Result<()>;
    fn save(&self, record: &CaptureRecord) -> Result<()>;
    fn load(&self) -> Result<Option<CaptureRecord>>;

    /// Clear, then save.
    fn replace(&self, record: &CaptureRecord) -> Result<()> {
        self.clear()?;
        self.save(record)
    }
}

/// In-memory store
#[derive(Debug, Default)]
pub struct MemoryStore {
    record: Mutex<Option<CaptureRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    fn clear(&self) -> Result<()> {
        let mut slot = self
            .record
            .lock()
            .map_err(|_| Error::Storage("store lock poisoned".into()))?;
        *slot = None;
        Ok(())
    }

    fn save(&self, record: &CaptureRecord) -> Result<()> {
        let mut slot = self
            .record
            .lock()
            .map_err(|_| Error::Storage("store lock poisoned".into()))?;
        *slot = Some(record.clone());
        Ok(())
    }

    fn load(&self) -> Result<Option<CaptureRecord>> {
        let slot = self
            .record
            .lock()
            .map_err(|_| Error::Storage("store lock poisoned".into()))?;
        Ok(slot.clone())
    }
}

/// Store backed by `capture.json` in a directory
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub const FILE_NAME: &'static str = "capture.json";

    /// Create the directory if needed.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        Ok(Self {
            path: dir.join(Self::FILE_NAME),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Store for FileStore {
    fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, record: &CaptureRecord) -> Result<()> {
        let json = serde_json::to_vec_pretty(record)
            .map_err(|e| Error::Storage(format!("serialize capture: {}", e)))?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        debug!("saved capture record to {}", self.path.display());
        Ok(())
    }

    fn load(&self) -> Result<Option<CaptureRecord>> {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let record = serde_json::from_slice(&raw)
            .map_err(|e| Error::Storage(format!("{}: {}", self.path.display(), e)))?;
        Ok(Some(record))
    }
}
