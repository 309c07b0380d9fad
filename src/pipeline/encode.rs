//! Image encoding: `DynamicImage` → size-bounded base64 payload.
//!
//! PNG is tried first because it is lossless: text crispness matters far
//! more than file size for transcription accuracy. A page that still
//! exceeds the byte budget after downsampling (dense photos, scans with
//! noise) is re-encoded as JPEG so the request stays under provider limits.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageError};
use std::io::Cursor;
use tracing::debug;

/// A page ready to attach to a model request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    /// Base64 (standard alphabet, padded).
    pub data: String,
    pub mime_type: &'static str,
    pub width: u32,
    pub height: u32,
}

/// Limits applied before a page leaves the process.
#[derive(Debug, Clone, Copy)]
pub struct EncodeLimits {
    pub max_dimension: u32,
    pub max_bytes: usize,
    pub jpeg_quality: u8,
}

impl Default for EncodeLimits {
    fn default() -> Self {
        Self {
            max_dimension: 2048,
            max_bytes: 4 * 1024 * 1024,
            jpeg_quality: 85,
        }
    }
}

/// Downsample `img` so its longest edge is at most `max_dimension`.
///
/// Aspect ratio is preserved and smaller images are returned unchanged.
pub fn fit_within(img: DynamicImage, max_dimension: u32) -> DynamicImage {
    if img.width() <= max_dimension && img.height() <= max_dimension {
        return img;
    }
    let resized = img.resize(max_dimension, max_dimension, FilterType::Lanczos3);
    debug!(
        "Downsampled {}x{} → {}x{}",
        img.width(),
        img.height(),
        resized.width(),
        resized.height()
    );
    resized
}

/// Resize and encode a page, falling back to JPEG over the byte budget.
pub fn encode_page(img: DynamicImage, limits: &EncodeLimits) -> Result<EncodedImage, ImageError> {
    let img = fit_within(img, limits.max_dimension);
    let (width, height) = (img.width(), img.height());

    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    let mut mime_type = "image/png";

    if buf.len() > limits.max_bytes {
        debug!(
            "PNG is {} bytes (budget {}), re-encoding as JPEG q{}",
            buf.len(),
            limits.max_bytes,
            limits.jpeg_quality
        );
        buf.clear();
        let rgb = img.to_rgb8();
        JpegEncoder::new_with_quality(&mut buf, limits.jpeg_quality).encode_image(&rgb)?;
        mime_type = "image/jpeg";
    }

    let data = STANDARD.encode(&buf);
    debug!("Encoded page → {} bytes base64 ({mime_type})", data.len());

    Ok(EncodedImage {
        data,
        mime_type,
        width,
        height,
    })
}
