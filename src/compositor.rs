//! Compositor: stitches ordered viewport frames into one image.
//!
//! [`stitch`] is a pure function. [`CompositorHandle`] runs it on a
//! dedicated worker that is started on first use and kept for the rest of
//! the process.

use std::sync::mpsc::{self, Sender};
use std::sync::OnceLock;
use std::thread;

use image::{imageops, ImageFormat, RgbaImage};
use log::{debug, warn};
use tokio::sync::oneshot;

use crate::protocol::{data_url, CompositorRequest, StitchRequest, StitchResponse};
use crate::rendering::raster::encode_png;
use crate::{Error, Result};

/// Largest edge a canvas may have, in pixels
pub const MAX_CANVAS_DIMENSION: u32 = 32_767;
/// Largest canvas area, in pixels
pub const MAX_CANVAS_AREA: u64 = 268_435_456;

/// A finished composite
#[derive(Debug, Clone)]
pub struct StitchedImage {
    pub width: u32,
    pub height: u32,
    pub png: Vec<u8>,
}

impl StitchedImage {
    pub fn data_url(&self) -> String {
        data_url::encode(&self.png)
    }
}

/// Stitch the frames of `request` into one PNG.
///
/// Frames are sorted by offset first. Frame pixels are physical, offsets are
/// CSS pixels; the scale between them comes from the first frame's width.
/// The output height is floored and each frame's position rounded, so tiles
/// never leave a fractional seam. Any frame that fails to decode fails the
/// whole stitch.
pub fn stitch(request: &StitchRequest) -> Result<StitchedImage> {
    if request.frames.is_empty() {
        return Err(Error::StitchFailure("no frames to stitch".into()));
    }
    if request.viewport_width.is_nan() || request.viewport_width <= 0.0 {
        return Err(Error::StitchFailure(format!(
            "invalid viewport width {}",
            request.viewport_width
        )));
    }

    let mut frames: Vec<_> = request.frames.iter().collect();
    frames.sort_by(|a, b| a.captured_at_scroll_y.total_cmp(&b.captured_at_scroll_y));

    let mut decoded = Vec::with_capacity(frames.len());
    for (i, frame) in frames.iter().enumerate() {
        let img = image::load_from_memory_with_format(&frame.image, ImageFormat::Png)
            .map_err(|e| Error::StitchFailure(format!("frame {} failed to decode: {}", i, e)))?;
        decoded.push((frame.captured_at_scroll_y, img.to_rgba8()));
    }

    let width = decoded[0].1.width();
    let scale = width as f64 / request.viewport_width;
    let height = (request.total_height * scale).floor();
    if !(1.0..=MAX_CANVAS_DIMENSION as f64).contains(&height) || width > MAX_CANVAS_DIMENSION {
        return Err(Error::StitchFailure(format!(
            "cannot allocate a {}x{} canvas",
            width, height
        )));
    }
    let height = height as u32;
    if width as u64 * height as u64 > MAX_CANVAS_AREA {
        return Err(Error::StitchFailure(format!(
            "cannot allocate a {}x{} canvas",
            width, height
        )));
    }

    let mut canvas = RgbaImage::new(width, height);
    for (offset, img) in &decoded {
        let y = (offset * scale).round() as i64;
        debug!("drawing {}x{} frame at y={}", img.width(), img.height(), y);
        imageops::overlay(&mut canvas, img, 0, y);
    }

    let png = encode_png(&canvas).map_err(|e| Error::StitchFailure(e.to_string()))?;
    Ok(StitchedImage { width, height, png })
}

/// Wire-level entry point: turn a compositor request into its reply.
pub fn handle(request: &CompositorRequest) -> StitchResponse {
    match request {
        CompositorRequest::StitchImages(req) => match stitch(req) {
            Ok(img) => StitchResponse::Image { data_url: img.data_url() },
            Err(e) => StitchResponse::Error { error: e.to_string() },
        },
    }
}

type Job = (StitchRequest, oneshot::Sender<Result<StitchedImage>>);

/// Handle to the compositor worker
#[derive(Clone)]
pub struct CompositorHandle {
    tx: Sender<Job>,
}

static SHARED: OnceLock<CompositorHandle> = OnceLock::new();

impl CompositorHandle {
    /// The process-wide compositor, started on first call.
    pub fn shared() -> Result<&'static CompositorHandle> {
        if let Some(handle) = SHARED.get() {
            return Ok(handle);
        }
        let handle = Self::spawn()?;
        Ok(SHARED.get_or_init(|| handle))
    }

    /// Start a private compositor worker.
    pub fn spawn() -> Result<Self> {
        let (tx, rx) = mpsc::channel::<Job>();
        thread::Builder::new()
            .name("fullgrab-compositor".into())
            .spawn(move || {
                while let Ok((request, resp)) = rx.recv() {
                    let res = stitch(&request);
                    if let Err(e) = &res {
                        warn!("stitch failed: {}", e);
                    }
                    let _ = resp.send(res);
                }
            })
            .map_err(|e| Error::Other(format!("failed to start compositor: {}", e)))?;
        Ok(Self { tx })
    }

    pub async fn stitch(&self, request: StitchRequest) -> Result<StitchedImage> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send((request, tx))
            .map_err(|_| Error::StitchFailure("compositor is gone".into()))?;
        rx.await
            .map_err(|e| Error::StitchFailure(format!("compositor canceled: {}", e)))?
    }
}
