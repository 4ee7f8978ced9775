//! Viewport rendering for in-process pages
//!
//! Produces the PNG screenshots the host hands out as `captureVisibleTab`
//! results.

pub mod paint;
pub mod raster;

use crate::dom::Document;
use crate::Result;

#[derive(Debug, Clone)]
pub struct Screenshot {
    pub width: u32,
    pub height: u32,
    pub png_data: Vec<u8>,
}

/// Render what is currently visible in the viewport.
pub fn render_viewport(doc: &Document) -> Result<Screenshot> {
    render_region(doc, doc.scroll_y(), doc.client_height())
}

/// Render the region `[top, top + height)` as if the viewport were scrolled
/// to `top` and `height` tall.
pub fn render_region(doc: &Document, top: f64, height: f64) -> Result<Screenshot> {
    let commands = paint::build_display_list(doc, top, height);
    let img = raster::rasterize(&commands, doc.client_width(), height, doc.device_pixel_ratio());
    let png_data = raster::encode_png(&img)?;
    Ok(Screenshot {
        width: img.width(),
        height: img.height(),
        png_data,
    })
}
