/// Rasterizer for paint lists

use image::codecs::png::PngEncoder;
use image::{imageops, ImageEncoder, Rgba as Pixel, RgbaImage};

use crate::dom::Rgba;
use crate::rendering::paint::{text_run_width, PaintCommand, TEXT_BAR_HEIGHT};
use crate::{Error, Result};

const OBSCURE_SIGMA: f32 = 4.0;

/// Map a CSS-pixel coordinate to a device-pixel edge.
fn device(v: f64, dpr: f64) -> i64 {
    (v * dpr).round() as i64
}

/// Rasterize `commands` into an image of `width x height` CSS pixels at the
/// given device pixel ratio.
pub fn rasterize(commands: &[PaintCommand], width: f64, height: f64, dpr: f64) -> RgbaImage {
    let w = device(width, dpr).max(1) as u32;
    let h = device(height, dpr).max(1) as u32;
    let mut img = RgbaImage::new(w, h);
    for cmd in commands {
        match *cmd {
            PaintCommand::SolidRect { x, y, width, height, rgba } => {
                fill(&mut img, x, y, width, height, rgba, dpr);
            }
            PaintCommand::TextRun { x, y, chars, rgba } => {
                fill(&mut img, x, y, text_run_width(chars), TEXT_BAR_HEIGHT, rgba, dpr);
            }
            PaintCommand::Obscure { x, y, width, height } => {
                obscure(&mut img, x, y, width, height, dpr);
            }
        }
    }
    img
}

/// Clip a CSS rect to the image, returning device-pixel bounds.
fn clip(img: &RgbaImage, x: f64, y: f64, width: f64, height: f64, dpr: f64) -> Option<(u32, u32, u32, u32)> {
    let x0 = device(x, dpr).clamp(0, img.width() as i64);
    let y0 = device(y, dpr).clamp(0, img.height() as i64);
    let x1 = device(x + width, dpr).clamp(0, img.width() as i64);
    let y1 = device(y + height, dpr).clamp(0, img.height() as i64);
    if x1 <= x0 || y1 <= y0 {
        return None;
    }
    Some((x0 as u32, y0 as u32, x1 as u32, y1 as u32))
}

fn fill(img: &mut RgbaImage, x: f64, y: f64, width: f64, height: f64, rgba: Rgba, dpr: f64) {
    let Some((x0, y0, x1, y1)) = clip(img, x, y, width, height, dpr) else { return };
    let Rgba(r, g, b, a) = rgba;
    for py in y0..y1 {
        for px in x0..x1 {
            let dst = img.get_pixel_mut(px, py);
            if a == 255 {
                *dst = Pixel([r, g, b, 255]);
            } else {
                let alpha = a as u32;
                let blend = |s: u8, d: u8| ((s as u32 * alpha + d as u32 * (255 - alpha)) / 255) as u8;
                *dst = Pixel([blend(r, dst[0]), blend(g, dst[1]), blend(b, dst[2]), 255]);
            }
        }
    }
}

/// Desaturate and blur a region in place.
fn obscure(img: &mut RgbaImage, x: f64, y: f64, width: f64, height: f64, dpr: f64) {
    let Some((x0, y0, x1, y1)) = clip(img, x, y, width, height, dpr) else { return };
    let mut region = imageops::crop_imm(&*img, x0, y0, x1 - x0, y1 - y0).to_image();
    for p in region.pixels_mut() {
        let luma = (0.299 * p[0] as f32 + 0.587 * p[1] as f32 + 0.114 * p[2] as f32) as u8;
        *p = Pixel([luma, luma, luma, p[3]]);
    }
    let blurred = imageops::blur(&region, OBSCURE_SIGMA * dpr as f32);
    imageops::replace(img, &blurred, x0 as i64, y0 as i64);
}

/// PNG-encode an RGBA image.
pub fn encode_png(img: &RgbaImage) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    PngEncoder::new(&mut buf)
        .write_image(img.as_raw(), img.width(), img.height(), image::ExtendedColorType::Rgba8)
        .map_err(|e| Error::Other(format!("PNG encode failed: {}", e)))?;
    Ok(buf)
}
