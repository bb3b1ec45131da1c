//! Compression and lens artifact detection built on the kernel backend.

use serde::{Deserialize, Serialize};

use crate::kernels::ExecutionContext;
use crate::loader::PixelBuffer;

/// JPEG block period used for blocking detection.
pub const BLOCK_PERIOD: usize = 8;

/// Gradient magnitude gate for aberration sampling.
pub const ABERRATION_EDGE_THRESHOLD: f32 = 0.1;

/// Number of radial rings for vignetting.
pub const VIGNETTING_RINGS: usize = 8;

/// Artifact sub-metrics, each normalized to [0, 100] severity.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ArtifactMetrics {
    /// JPEG blocking severity.
    pub blocking: f32,
    /// Chromatic aberration severity.
    pub aberration: f32,
    /// Vignetting severity.
    pub vignetting: f32,
    /// Radial falloff of the fitted vignetting model, in luminance units.
    pub vignetting_falloff: f32,
    /// Weighted combination of the three severities.
    pub combined: f32,
}

/// Detect compression and lens artifacts.
pub fn detect(buffer: &PixelBuffer, ctx: &ExecutionContext) -> ArtifactMetrics {
    let blocking = blocking_severity(buffer, ctx);
    let aberration = aberration_severity(buffer, ctx);
    let (vignetting, vignetting_falloff) = vignetting_severity(buffer, ctx);

    let combined =
        (blocking * 0.4 + aberration * 0.3 + vignetting * 0.3).clamp(0.0, 100.0);

    ArtifactMetrics {
        blocking,
        aberration,
        vignetting,
        vignetting_falloff,
        combined,
    }
}

/// Mean boundary-excess of the blocking map, scaled to severity.
fn blocking_severity(buffer: &PixelBuffer, ctx: &ExecutionContext) -> f32 {
    let map = ctx.blocking_map(buffer.luma(), BLOCK_PERIOD);
    let pixels = map.pixels();
    if pixels.is_empty() {
        return 0.0;
    }
    let mean = pixels.iter().sum::<f32>() / pixels.len() as f32;
    // A mean boundary excess of 0.05 in luma units is severe blocking.
    (mean / 0.05 * 100.0).clamp(0.0, 100.0)
}

/// Mean channel disagreement at strong edges.
fn aberration_severity(buffer: &PixelBuffer, ctx: &ExecutionContext) -> f32 {
    let map = ctx.aberration_map(buffer, ABERRATION_EDGE_THRESHOLD);
    let mut sum = 0.0f64;
    let mut count = 0u32;
    for &v in map.pixels() {
        if v > 0.0 {
            sum += v as f64;
            count += 1;
        }
    }
    if count == 0 {
        return 0.0;
    }
    let mean = (sum / count as f64) as f32;
    // Disagreement saturates severity at 0.5.
    (mean / 0.5 * 100.0).clamp(0.0, 100.0)
}

/// Fit a linear radial falloff to the ring profile. Severity comes from
/// the center-to-edge drop; a poor fit (high residual) discounts it, so
/// scene content gradients are not mistaken for lens vignetting.
fn vignetting_severity(buffer: &PixelBuffer, ctx: &ExecutionContext) -> (f32, f32) {
    let rings = ctx.ring_profile(buffer.luma(), VIGNETTING_RINGS);
    if rings.len() < 3 {
        return (0.0, 0.0);
    }

    let n = rings.len() as f32;
    let mean_x = (n - 1.0) / 2.0;
    let mean_y = rings.iter().sum::<f32>() / n;
    let mut num = 0.0f32;
    let mut den = 0.0f32;
    for (i, &y) in rings.iter().enumerate() {
        let dx = i as f32 - mean_x;
        num += dx * (y - mean_y);
        den += dx * dx;
    }
    if den == 0.0 {
        return (0.0, 0.0);
    }
    let slope = num / den;
    let intercept = mean_y - slope * mean_x;

    let mut residual = 0.0f32;
    for (i, &y) in rings.iter().enumerate() {
        residual += (y - (slope * i as f32 + intercept)).powi(2);
    }
    let rmse = (residual / n).sqrt();

    // Only darkening toward the edge counts.
    let falloff = (-slope * (n - 1.0)).max(0.0);
    // Fit confidence drops to zero when rmse reaches half the falloff.
    let confidence = if falloff > 0.0 {
        (1.0 - rmse / (falloff * 0.5 + 1e-6)).clamp(0.0, 1.0)
    } else {
        0.0
    };

    // A 0.3 center-to-edge drop is severe vignetting.
    let severity = (falloff / 0.3 * 100.0).clamp(0.0, 100.0) * confidence;
    (severity, falloff)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{buffer_from_image, uniform_buffer};
    use image::{Rgba, RgbaImage};

    #[test]
    fn test_uniform_has_no_artifacts() {
        let buffer = uniform_buffer(64, 64, 128);
        let ctx = ExecutionContext::cpu_only();
        let metrics = detect(&buffer, &ctx);
        assert_eq!(metrics.blocking, 0.0);
        assert_eq!(metrics.aberration, 0.0);
        assert_eq!(metrics.vignetting, 0.0);
        assert_eq!(metrics.combined, 0.0);
    }

    #[test]
    fn test_radial_falloff_detected() {
        let mut img = RgbaImage::new(64, 64);
        let cx = 31.5f32;
        let cy = 31.5f32;
        let max_r = (cx * cx + cy * cy).sqrt();
        for y in 0..64 {
            for x in 0..64 {
                let r = ((x as f32 - cx).powi(2) + (y as f32 - cy).powi(2)).sqrt();
                let v = (230.0 * (1.0 - 0.5 * r / max_r)) as u8;
                img.put_pixel(x, y, Rgba([v, v, v, 255]));
            }
        }
        let buffer = buffer_from_image(&img);
        let ctx = ExecutionContext::cpu_only();
        let metrics = detect(&buffer, &ctx);
        assert!(metrics.vignetting > 30.0, "vignetting {}", metrics.vignetting);
        assert!(metrics.vignetting_falloff > 0.1);
    }

    #[test]
    fn test_blocking_on_tiled_image() {
        let mut img = RgbaImage::new(64, 64);
        for y in 0..64u32 {
            for x in 0..64u32 {
                let v = if ((x / 8) + (y / 8)) % 2 == 0 { 96 } else { 160 };
                img.put_pixel(x, y, Rgba([v, v, v, 255]));
            }
        }
        let buffer = buffer_from_image(&img);
        let ctx = ExecutionContext::cpu_only();
        let metrics = detect(&buffer, &ctx);
        assert!(metrics.blocking > 20.0, "blocking {}", metrics.blocking);
    }
}
