//! Thumbnail derivation for image uploads.
//!
//! Thumbnails preserve the source aspect ratio, are never larger than the
//! source, and are always re-encoded as JPEG (transparency is flattened
//! onto white).

use std::collections::BTreeMap;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, Rgb, RgbImage};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// JPEG quality used for every thumbnail.
pub const JPEG_QUALITY: u8 = 85;

/// Longest size tag accepted, in bytes.
pub const MAX_TAG_LEN: usize = 32;

/// Errors produced while deriving thumbnails.
#[derive(Debug, thiserror::Error)]
pub enum ThumbnailError {
    #[error("unsupported media: {0}")]
    UnsupportedMedia(String),

    #[error("encode error: {0}")]
    Encode(String),
}

/// A named bounding box for a thumbnail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThumbnailSize {
    pub tag: String,
    pub width: u32,
    pub height: u32,
}

impl ThumbnailSize {
    pub fn new(tag: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            tag: tag.into(),
            width,
            height,
        }
    }

    /// Whether the tag can prefix a stored file name: non-empty, at most
    /// [`MAX_TAG_LEN`] bytes, ASCII alphanumerics, `-` and `_` only.
    pub fn has_valid_tag(&self) -> bool {
        !self.tag.is_empty()
            && self.tag.len() <= MAX_TAG_LEN
            && self
                .tag
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
    }
}

/// The standard `small`/`medium`/`large` set.
pub fn default_sizes() -> Vec<ThumbnailSize> {
    vec![
        ThumbnailSize::new("small", 150, 150),
        ThumbnailSize::new("medium", 300, 300),
        ThumbnailSize::new("large", 600, 600),
    ]
}

/// Produces encoded thumbnails from raw image bytes.
///
/// Implementations are synchronous and CPU-bound; async callers should run
/// them on a blocking thread.
pub trait Thumbnailer: Send + Sync + 'static {
    /// Returns `tag -> encoded bytes` for every requested size.
    fn derive(
        &self,
        image: &[u8],
        sizes: &[ThumbnailSize],
    ) -> Result<BTreeMap<String, Vec<u8>>, ThumbnailError>;
}

/// Lanczos3 downscaler writing JPEG output.
#[derive(Debug, Clone)]
pub struct ThumbnailDeriver {
    quality: u8,
}

impl Default for ThumbnailDeriver {
    fn default() -> Self {
        Self {
            quality: JPEG_QUALITY,
        }
    }
}

impl ThumbnailDeriver {
    pub fn new() -> Self {
        Self::default()
    }

    fn render(&self, source: &RgbImage, size: &ThumbnailSize) -> Result<Vec<u8>, ThumbnailError> {
        let (w, h) = source.dimensions();
        let fitted = if w <= size.width && h <= size.height {
            source.clone()
        } else {
            DynamicImage::ImageRgb8(source.clone())
                .resize(size.width, size.height, FilterType::Lanczos3)
                .into_rgb8()
        };

        let mut out = Vec::new();
        JpegEncoder::new_with_quality(&mut out, self.quality)
            .encode_image(&fitted)
            .map_err(|e| ThumbnailError::Encode(e.to_string()))?;

        debug!(
            tag = %size.tag,
            width = fitted.width(),
            height = fitted.height(),
            bytes = out.len(),
            "thumbnail rendered"
        );
        Ok(out)
    }
}

impl Thumbnailer for ThumbnailDeriver {
    fn derive(
        &self,
        image: &[u8],
        sizes: &[ThumbnailSize],
    ) -> Result<BTreeMap<String, Vec<u8>>, ThumbnailError> {
        let decoded = image::load_from_memory(image)
            .map_err(|e| ThumbnailError::UnsupportedMedia(e.to_string()))?;
        let source = flatten_onto_white(decoded);

        sizes
            .iter()
            .map(|size| Ok((size.tag.clone(), self.render(&source, size)?)))
            .collect()
    }
}

/// Composites any alpha channel over an opaque white background.
fn flatten_onto_white(img: DynamicImage) -> RgbImage {
    if !img.color().has_alpha() {
        return img.into_rgb8();
    }

    let rgba = img.into_rgba8();
    let (w, h) = rgba.dimensions();
    RgbImage::from_fn(w, h, |x, y| {
        let [r, g, b, a] = rgba.get_pixel(x, y).0;
        let alpha = u16::from(a);
        let blend = |c: u8| ((u16::from(c) * alpha + 255 * (255 - alpha)) / 255) as u8;
        Rgb([blend(r), blend(g), blend(b)])
    })
}
