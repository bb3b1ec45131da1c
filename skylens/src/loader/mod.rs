//! Image decoding and pixel buffer creation.
//!
//! Decodes JPEG/PNG/TIFF byte streams into a bounded-resolution RGBA
//! buffer with a derived luminance plane. EXIF orientation is applied
//! before the buffer is emitted, so analyzers never see rotated data.
//!
//! The resolution cap depends on whether GPU execution is available and
//! on the source megapixel count: larger sources get proportionally
//! smaller caps to bound CPU cost.

use std::io::Cursor;
use std::time::Duration;

use image::DynamicImage;

use crate::common::Buffer2;
use crate::error::{AnalysisError, Result};

/// Default wall-clock budget for decoding a single image.
pub const DEFAULT_DECODE_BUDGET_MS: u64 = 30_000;

/// Default wall-clock budget for thumbnail generation.
pub const DEFAULT_THUMBNAIL_BUDGET_MS: u64 = 10_000;

/// Largest dimension of generated thumbnails.
const THUMBNAIL_MAX_DIMENSION: u32 = 256;

/// BT.601 luma weights for RGB to luminance conversion.
const LUMA_R: f32 = 0.299;
const LUMA_G: f32 = 0.587;
const LUMA_B: f32 = 0.114;

/// Options controlling decode resolution.
#[derive(Debug, Clone, Copy)]
pub struct LoadOptions {
    /// Whether a GPU execution path is available. GPU-backed analysis
    /// tolerates larger buffers.
    pub gpu_available: bool,
    /// Explicit cap on the largest dimension. Overrides the adaptive policy.
    pub max_dimension: Option<u32>,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            gpu_available: false,
            max_dimension: None,
        }
    }
}

/// Decoded image data: interleaved RGBA samples plus a derived
/// luminance plane in [0, 1].
///
/// Immutable once produced. Owned exclusively by the analysis call that
/// created it and dropped once all analyzers for the image complete.
#[derive(Debug, Clone)]
pub struct PixelBuffer {
    width: usize,
    height: usize,
    rgba: Vec<u8>,
    luma: Buffer2<f32>,
}

impl PixelBuffer {
    /// Build a pixel buffer from interleaved RGBA samples.
    pub fn from_rgba(width: usize, height: usize, rgba: Vec<u8>) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(AnalysisError::Dimension {
                width: width as u32,
                height: height as u32,
            });
        }
        assert_eq!(rgba.len(), width * height * 4, "rgba length mismatch");

        let mut luma = vec![0.0f32; width * height];
        for (i, px) in rgba.chunks_exact(4).enumerate() {
            luma[i] = (LUMA_R * px[0] as f32 + LUMA_G * px[1] as f32 + LUMA_B * px[2] as f32)
                / 255.0;
        }

        Ok(Self {
            width,
            height,
            rgba,
            luma: Buffer2::new(width, height, luma),
        })
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn pixel_count(&self) -> usize {
        self.width * self.height
    }

    /// Interleaved RGBA samples, 0-255.
    #[inline]
    pub fn rgba(&self) -> &[u8] {
        &self.rgba
    }

    /// Luminance plane in [0, 1].
    #[inline]
    pub fn luma(&self) -> &Buffer2<f32> {
        &self.luma
    }

    /// Normalized RGB triplet at (x, y).
    #[inline]
    pub fn rgb_at(&self, x: usize, y: usize) -> [f32; 3] {
        let i = (y * self.width + x) * 4;
        [
            self.rgba[i] as f32 / 255.0,
            self.rgba[i + 1] as f32 / 255.0,
            self.rgba[i + 2] as f32 / 255.0,
        ]
    }

    /// Mean of the luminance plane.
    pub fn mean_luma(&self) -> f32 {
        let px = self.luma.pixels();
        if px.is_empty() {
            return 0.0;
        }
        px.iter().sum::<f32>() / px.len() as f32
    }
}

/// Compute the largest allowed dimension for a decoded buffer.
///
/// GPU-backed analysis gets a higher base cap; very large sources are
/// capped harder so CPU-side passes stay bounded.
pub fn resolution_cap(gpu_available: bool, source_megapixels: f32) -> u32 {
    let base: f32 = if gpu_available { 3072.0 } else { 2048.0 };
    let scale = if source_megapixels <= 24.0 {
        1.0
    } else if source_megapixels <= 48.0 {
        0.75
    } else {
        0.5
    };
    (base * scale) as u32
}

/// Decode raw file bytes into a [`PixelBuffer`].
///
/// Applies EXIF orientation correction and the adaptive resolution cap.
pub fn decode(bytes: &[u8], options: &LoadOptions) -> Result<PixelBuffer> {
    let img = image::load_from_memory(bytes)?;
    let (width, height) = (img.width(), img.height());
    if width == 0 || height == 0 {
        return Err(AnalysisError::Dimension { width, height });
    }

    let img = apply_orientation(img, read_orientation(bytes));

    let megapixels = (width as f32 * height as f32) / 1_000_000.0;
    let cap = options
        .max_dimension
        .unwrap_or_else(|| resolution_cap(options.gpu_available, megapixels));

    let img = if img.width().max(img.height()) > cap {
        tracing::debug!(
            source_w = width,
            source_h = height,
            cap,
            "downscaling decoded image"
        );
        img.resize(cap, cap, image::imageops::FilterType::Triangle)
    } else {
        img
    };

    let rgba = img.to_rgba8();
    let (w, h) = (rgba.width() as usize, rgba.height() as usize);
    PixelBuffer::from_rgba(w, h, rgba.into_raw())
}

/// Decode a small preview of the image.
pub fn thumbnail(bytes: &[u8]) -> Result<PixelBuffer> {
    let img = image::load_from_memory(bytes)?;
    if img.width() == 0 || img.height() == 0 {
        return Err(AnalysisError::Dimension {
            width: img.width(),
            height: img.height(),
        });
    }
    let img = apply_orientation(img, read_orientation(bytes));
    let img = img.thumbnail(THUMBNAIL_MAX_DIMENSION, THUMBNAIL_MAX_DIMENSION);
    let rgba = img.to_rgba8();
    let (w, h) = (rgba.width() as usize, rgba.height() as usize);
    PixelBuffer::from_rgba(w, h, rgba.into_raw())
}

/// Decode with a wall-clock budget.
///
/// Decoding is synchronous and cannot be cancelled mid-flight, so it runs
/// on a blocking thread and the caller stops waiting once the budget is
/// exhausted.
pub async fn decode_with_timeout(
    bytes: Vec<u8>,
    options: LoadOptions,
    budget_ms: u64,
) -> Result<PixelBuffer> {
    run_bounded("decode", budget_ms, move || decode(&bytes, &options)).await
}

/// Generate a thumbnail with a (shorter) wall-clock budget.
pub async fn thumbnail_with_timeout(bytes: Vec<u8>, budget_ms: u64) -> Result<PixelBuffer> {
    run_bounded("thumbnail", budget_ms, move || thumbnail(&bytes)).await
}

async fn run_bounded<T, F>(operation: &'static str, budget_ms: u64, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    let handle = tokio::task::spawn_blocking(f);
    match tokio::time::timeout(Duration::from_millis(budget_ms), handle).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_err)) => Err(AnalysisError::Analyzer {
            analyzer: "loader",
            reason: join_err.to_string(),
        }),
        Err(_) => Err(AnalysisError::Timeout {
            operation,
            budget_ms,
        }),
    }
}

/// Read the EXIF orientation tag (1-8). Defaults to 1 (no transform)
/// when the container carries no EXIF data.
fn read_orientation(bytes: &[u8]) -> u32 {
    let reader = exif::Reader::new();
    let mut cursor = Cursor::new(bytes);
    match reader.read_from_container(&mut cursor) {
        Ok(meta) => meta
            .get_field(exif::Tag::Orientation, exif::In::PRIMARY)
            .and_then(|field| field.value.get_uint(0))
            .unwrap_or(1),
        Err(_) => 1,
    }
}

/// Apply the EXIF orientation transform.
fn apply_orientation(img: DynamicImage, orientation: u32) -> DynamicImage {
    match orientation {
        2 => img.fliph(),
        3 => img.rotate180(),
        4 => img.flipv(),
        5 => img.rotate90().fliph(),
        6 => img.rotate90(),
        7 => img.rotate270().fliph(),
        8 => img.rotate270(),
        _ => img,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{encode_png, gradient_image};

    #[test]
    fn test_decode_png_roundtrip() {
        let bytes = encode_png(&gradient_image(64, 48));
        let buffer = decode(&bytes, &LoadOptions::default()).unwrap();
        assert_eq!(buffer.width(), 64);
        assert_eq!(buffer.height(), 48);
        assert_eq!(buffer.rgba().len(), 64 * 48 * 4);
        assert_eq!(buffer.luma().len(), 64 * 48);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let err = decode(&[0u8; 16], &LoadOptions::default()).unwrap_err();
        assert!(matches!(err, AnalysisError::Decode(_)));
    }

    #[test]
    fn test_decode_rejects_empty() {
        let err = decode(&[], &LoadOptions::default()).unwrap_err();
        assert!(matches!(err, AnalysisError::Decode(_)));
    }

    #[test]
    fn test_luma_range() {
        let bytes = encode_png(&gradient_image(32, 32));
        let buffer = decode(&bytes, &LoadOptions::default()).unwrap();
        for &l in buffer.luma().pixels() {
            assert!((0.0..=1.0).contains(&l));
        }
    }

    #[test]
    fn test_explicit_cap_downscales() {
        let bytes = encode_png(&gradient_image(200, 100));
        let options = LoadOptions {
            gpu_available: false,
            max_dimension: Some(50),
        };
        let buffer = decode(&bytes, &options).unwrap();
        assert!(buffer.width() <= 50);
        assert!(buffer.height() <= 50);
    }

    #[test]
    fn test_resolution_cap_policy() {
        assert!(resolution_cap(true, 12.0) > resolution_cap(false, 12.0));
        // Larger sources get smaller caps.
        assert!(resolution_cap(false, 60.0) < resolution_cap(false, 30.0));
        assert!(resolution_cap(false, 30.0) < resolution_cap(false, 12.0));
    }

    #[test]
    fn test_thumbnail_is_small() {
        let bytes = encode_png(&gradient_image(800, 600));
        let thumb = thumbnail(&bytes).unwrap();
        assert!(thumb.width() <= 256);
        assert!(thumb.height() <= 256);
    }

    #[tokio::test]
    async fn test_decode_with_timeout_success() {
        let bytes = encode_png(&gradient_image(32, 32));
        let buffer = decode_with_timeout(bytes, LoadOptions::default(), 10_000)
            .await
            .unwrap();
        assert_eq!(buffer.width(), 32);
    }
}
