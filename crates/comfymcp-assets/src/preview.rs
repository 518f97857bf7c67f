//! Inline image previews: decode, flatten, downscale, re-encode to fit a
//! base64 budget
//!
//! Previews are JPEG. Transparent pixels are composited onto white first.
//! Encoding walks a fixed ladder of (max dimension, quality) steps and
//! returns the first result whose base64 form fits.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{ColorType, DynamicImage, ImageBuffer, Rgb, RgbImage};
use std::io::Cursor;

pub const DEFAULT_MAX_DIM: u32 = 512;
pub const DEFAULT_QUALITY: u8 = 70;
pub const PREVIEW_MIME: &str = "image/jpeg";

const FALLBACK_DIMS: &[u32] = &[384, 256];
const FALLBACK_QUALITIES: &[u8] = &[55, 40];
const LAST_RESORT: (u32, u8) = (256, 35);

#[derive(Debug, thiserror::Error)]
pub enum PreviewError {
    #[error("could not decode image: {0}")]
    Decode(#[from] image::ImageError),

    #[error("{chars} base64 chars even at {dim}px q{quality}, budget is {budget}")]
    OverBudget { chars: usize, dim: u32, quality: u8, budget: usize },
}

#[derive(Debug, Clone)]
pub struct EncodedPreview {
    pub data: String,
    pub mime_type: &'static str,
    pub width: u32,
    pub height: u32,
    pub bytes_len: usize,
}

/// Pixel size read from the image header, without a full decode.
pub fn image_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    image::io::Reader::new(Cursor::new(bytes))
        .with_guessed_format()
        .ok()?
        .into_dimensions()
        .ok()
}

/// Encode `bytes` as a JPEG preview no larger than `max_dim` on its long side
/// whose base64 form is at most `max_b64_chars`.
pub fn encode_preview(bytes: &[u8], max_dim: u32, max_b64_chars: usize) -> Result<EncodedPreview, PreviewError> {
    let source = flatten(&image::load_from_memory(bytes)?);
    let max_dim = max_dim.max(1);

    let mut dims = vec![max_dim];
    dims.extend(FALLBACK_DIMS.iter().copied().filter(|d| *d < max_dim));
    let mut qualities = vec![DEFAULT_QUALITY];
    qualities.extend_from_slice(FALLBACK_QUALITIES);

    for dim in dims {
        let scaled = downscale(&source, dim);
        for &quality in &qualities {
            let preview = encode_jpeg(&scaled, quality)?;
            if preview.data.len() <= max_b64_chars {
                return Ok(preview);
            }
        }
    }

    let (dim, quality) = LAST_RESORT;
    let dim = dim.min(max_dim);
    let preview = encode_jpeg(&downscale(&source, dim), quality)?;
    if preview.data.len() <= max_b64_chars {
        Ok(preview)
    } else {
        Err(PreviewError::OverBudget { chars: preview.data.len(), dim, quality, budget: max_b64_chars })
    }
}

/// Composite onto a white background and drop the alpha channel.
fn flatten(img: &DynamicImage) -> RgbImage {
    if !img.color().has_alpha() {
        return img.to_rgb8();
    }
    let rgba = img.to_rgba8();
    ImageBuffer::from_fn(rgba.width(), rgba.height(), |x, y| {
        let p = rgba.get_pixel(x, y);
        let a = p[3] as u32;
        let over_white = |c: u8| ((c as u32 * a + 255 * (255 - a)) / 255) as u8;
        Rgb([over_white(p[0]), over_white(p[1]), over_white(p[2])])
    })
}

fn downscale(img: &RgbImage, dim: u32) -> RgbImage {
    let (w, h) = img.dimensions();
    if w.max(h) <= dim {
        return img.clone();
    }
    let scale = dim as f64 / w.max(h) as f64;
    let nw = ((w as f64 * scale) as u32).max(1);
    let nh = ((h as f64 * scale) as u32).max(1);
    image::imageops::resize(img, nw, nh, FilterType::Lanczos3)
}

fn encode_jpeg(img: &RgbImage, quality: u8) -> Result<EncodedPreview, PreviewError> {
    let mut raw = Vec::new();
    JpegEncoder::new_with_quality(&mut raw, quality).encode(img.as_raw(), img.width(), img.height(), ColorType::Rgb8)?;
    Ok(EncodedPreview {
        data: STANDARD.encode(&raw),
        mime_type: PREVIEW_MIME,
        width: img.width(),
        height: img.height(),
        bytes_len: raw.len(),
    })
}
