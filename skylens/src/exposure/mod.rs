//! Exposure analysis: histogram statistics, spatial contrast metrics,
//! and a perceptual tonal-distribution score.
//!
//! The luminance histogram drives the global statistics (clipping
//! percentages, dynamic range, balance classification). A strided
//! window pass over the luminance plane adds local contrast,
//! highlight-recovery and shadow-detail sub-scores, and a 4x4 region
//! variance measures spatial consistency. Every sub-metric is exposed on
//! [`ExposureMetrics`] so downstream tooling can inspect more than the
//! final score.

use serde::{Deserialize, Serialize};

use crate::loader::PixelBuffer;

/// Number of luminance histogram bins.
const HISTOGRAM_BINS: usize = 256;

/// Bins at or below this count as underexposed.
const UNDER_BIN: usize = 10;

/// Bins at or above this count as overexposed.
const OVER_BIN: usize = 245;

/// Luminance above which a pixel counts as a highlight.
const HIGHLIGHT_LUMA: f32 = 0.9;

/// Luminance below which a pixel counts as a shadow.
const SHADOW_LUMA: f32 = 0.1;

/// Highlights above this are considered fully clipped (unrecoverable).
const CLIPPED_LUMA: f32 = 0.995;

/// Shadows below this are considered fully black (no detail).
const BLACK_LUMA: f32 = 0.005;

/// Sliding window edge for local contrast.
const WINDOW: usize = 9;

/// Stride between sampled windows.
const WINDOW_STRIDE: usize = 8;

/// Histogram shape classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum HistogramBalance {
    #[default]
    Balanced,
    Underexposed,
    Overexposed,
    HighContrast,
    LowContrast,
}

/// Configuration for exposure analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExposureConfig {
    /// Weight of the base (histogram penalty) score in the final blend.
    pub base_weight: f32,
    /// Weight of the spatial sub-score in the final blend.
    pub spatial_weight: f32,
    /// Weight of the perceptual sub-score in the final blend.
    pub perceptual_weight: f32,
}

impl Default for ExposureConfig {
    fn default() -> Self {
        Self {
            base_weight: 0.45,
            spatial_weight: 0.25,
            perceptual_weight: 0.30,
        }
    }
}

impl ExposureConfig {
    /// Validate the configuration.
    pub fn validate(&self) {
        let sum = self.base_weight + self.spatial_weight + self.perceptual_weight;
        assert!(
            (sum - 1.0).abs() < 1e-3,
            "exposure blend weights must sum to 1.0, got {}",
            sum
        );
    }
}

/// Exposure metrics for one image. All score fields are in [0, 100].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExposureMetrics {
    /// Percentage of pixels in the overexposed bins.
    pub over_exposed_pct: f32,
    /// Percentage of pixels in the underexposed bins.
    pub under_exposed_pct: f32,
    /// 5th-95th percentile luminance spread, normalized to [0, 1].
    pub dynamic_range: f32,
    /// Mean luminance in [0, 1].
    pub average_brightness: f32,
    /// Max/min luminance ratio.
    pub contrast_ratio: f32,
    /// Histogram shape classification.
    pub balance: HistogramBalance,
    /// Mean local contrast over sampled windows, 0-100.
    pub local_contrast: f32,
    /// Fraction of highlight pixels that retain detail, 0-100.
    pub highlight_recovery: f32,
    /// Fraction of shadow pixels that retain detail, 0-100.
    pub shadow_detail: f32,
    /// 4x4 region exposure consistency, 0-100 (higher = more uniform).
    pub spatial_consistency: f32,
    /// Combined spatial sub-score, 0-100.
    pub spatial_score: f32,
    /// Perceptual tonal-distribution sub-score, 0-100.
    pub perceptual_score: f32,
    /// Final exposure score, 0-100.
    pub score: f32,
}

/// Analyze exposure. Never fails; empty buffers yield zeroed metrics.
pub fn analyze(buffer: &PixelBuffer, config: &ExposureConfig) -> ExposureMetrics {
    let luma = buffer.luma();
    let pixels = luma.pixels();
    if pixels.is_empty() {
        return ExposureMetrics::default();
    }

    // Histogram statistics.
    let mut histogram = [0u32; HISTOGRAM_BINS];
    let mut min = f32::MAX;
    let mut max = f32::MIN;
    let mut sum = 0.0f64;
    for &v in pixels {
        let bin = ((v * 255.0) as usize).min(HISTOGRAM_BINS - 1);
        histogram[bin] += 1;
        min = min.min(v);
        max = max.max(v);
        sum += v as f64;
    }
    let total = pixels.len() as f32;
    let average_brightness = (sum / pixels.len() as f64) as f32;

    let under_count: u32 = histogram[..=UNDER_BIN].iter().sum();
    let over_count: u32 = histogram[OVER_BIN..].iter().sum();
    let under_exposed_pct = under_count as f32 / total * 100.0;
    let over_exposed_pct = over_count as f32 / total * 100.0;

    let p5 = percentile_bin(&histogram, total, 0.05);
    let p95 = percentile_bin(&histogram, total, 0.95);
    let dynamic_range = ((p95 as f32 - p5 as f32) / 255.0).clamp(0.0, 1.0);

    let contrast_ratio = (max + 0.01) / (min + 0.01);

    let balance = classify_balance(
        average_brightness,
        under_exposed_pct,
        over_exposed_pct,
        dynamic_range,
    );

    // Spatial sub-metrics.
    let spatial = spatial_metrics(buffer);

    // Perceptual sub-score.
    let perceptual_score = perceptual_score(&histogram, total, dynamic_range);

    // Base penalty score: start at 100 and pay for clipping and a
    // compressed tonal range.
    let range_penalty = (1.0 - dynamic_range) * 30.0;
    let base_score =
        (100.0 - over_exposed_pct * 1.5 - under_exposed_pct * 1.2 - range_penalty).clamp(0.0, 100.0);

    let score = (base_score * config.base_weight
        + spatial.score * config.spatial_weight
        + perceptual_score * config.perceptual_weight)
        .clamp(0.0, 100.0);

    ExposureMetrics {
        over_exposed_pct,
        under_exposed_pct,
        dynamic_range,
        average_brightness,
        contrast_ratio,
        balance,
        local_contrast: spatial.local_contrast,
        highlight_recovery: spatial.highlight_recovery,
        shadow_detail: spatial.shadow_detail,
        spatial_consistency: spatial.consistency,
        spatial_score: spatial.score,
        perceptual_score,
        score,
    }
}

/// Luminance bin at the given cumulative fraction.
fn percentile_bin(histogram: &[u32; HISTOGRAM_BINS], total: f32, fraction: f32) -> usize {
    let target = total * fraction;
    let mut cumulative = 0.0f32;
    for (bin, &count) in histogram.iter().enumerate() {
        cumulative += count as f32;
        if cumulative >= target {
            return bin;
        }
    }
    HISTOGRAM_BINS - 1
}

fn classify_balance(
    mean: f32,
    under_pct: f32,
    over_pct: f32,
    dynamic_range: f32,
) -> HistogramBalance {
    if under_pct > 25.0 || mean < 0.25 {
        HistogramBalance::Underexposed
    } else if over_pct > 25.0 || mean > 0.75 {
        HistogramBalance::Overexposed
    } else if under_pct > 10.0 && over_pct > 10.0 {
        HistogramBalance::HighContrast
    } else if dynamic_range < 0.25 {
        HistogramBalance::LowContrast
    } else {
        HistogramBalance::Balanced
    }
}

struct SpatialMetrics {
    local_contrast: f32,
    highlight_recovery: f32,
    shadow_detail: f32,
    consistency: f32,
    score: f32,
}

fn spatial_metrics(buffer: &PixelBuffer) -> SpatialMetrics {
    let luma = buffer.luma();
    let width = luma.width();
    let height = luma.height();

    // Local contrast over strided windows.
    let mut contrast_sum = 0.0f64;
    let mut windows = 0u32;
    let mut y = 0;
    while y + WINDOW <= height {
        let mut x = 0;
        while x + WINDOW <= width {
            let mut lo = f32::MAX;
            let mut hi = f32::MIN;
            for wy in y..y + WINDOW {
                for wx in x..x + WINDOW {
                    let v = *luma.get(wx, wy);
                    lo = lo.min(v);
                    hi = hi.max(v);
                }
            }
            contrast_sum += (hi - lo) as f64;
            windows += 1;
            x += WINDOW_STRIDE;
        }
        y += WINDOW_STRIDE;
    }
    // Full-range local contrast would be 1.0; 0.4 is already strong.
    let local_contrast = if windows > 0 {
        (((contrast_sum / windows as f64) as f32) / 0.4 * 100.0).clamp(0.0, 100.0)
    } else {
        0.0
    };

    // Highlight recovery and shadow detail.
    let mut highlights = 0u32;
    let mut recoverable = 0u32;
    let mut shadows = 0u32;
    let mut detailed = 0u32;
    for &v in luma.pixels() {
        if v > HIGHLIGHT_LUMA {
            highlights += 1;
            if v < CLIPPED_LUMA {
                recoverable += 1;
            }
        } else if v < SHADOW_LUMA {
            shadows += 1;
            if v > BLACK_LUMA {
                detailed += 1;
            }
        }
    }
    // No highlights/shadows at all is a perfect score for that band.
    let highlight_recovery = if highlights > 0 {
        recoverable as f32 / highlights as f32 * 100.0
    } else {
        100.0
    };
    let shadow_detail = if shadows > 0 {
        detailed as f32 / shadows as f32 * 100.0
    } else {
        100.0
    };

    // 4x4 region exposure variance as a consistency measure.
    let mut region_means = Vec::with_capacity(16);
    let rw = (width / 4).max(1);
    let rh = (height / 4).max(1);
    for ry in 0..4 {
        for rx in 0..4 {
            let x0 = rx * rw;
            let y0 = ry * rh;
            if x0 >= width || y0 >= height {
                continue;
            }
            let x1 = ((rx + 1) * rw).min(width);
            let y1 = ((ry + 1) * rh).min(height);
            let mut s = 0.0f64;
            let mut n = 0u32;
            for yy in y0..y1 {
                for xx in x0..x1 {
                    s += *luma.get(xx, yy) as f64;
                    n += 1;
                }
            }
            if n > 0 {
                region_means.push((s / n as f64) as f32);
            }
        }
    }
    let consistency = if region_means.len() > 1 {
        let mean = region_means.iter().sum::<f32>() / region_means.len() as f32;
        let var = region_means
            .iter()
            .map(|m| (m - mean).powi(2))
            .sum::<f32>()
            / region_means.len() as f32;
        // Region variance of 0.04 (std 0.2) wipes out the score.
        ((1.0 - var / 0.04).clamp(0.0, 1.0)) * 100.0
    } else {
        100.0
    };

    let score = (local_contrast * 0.35
        + highlight_recovery * 0.25
        + shadow_detail * 0.25
        + consistency * 0.15)
        .clamp(0.0, 100.0);

    SpatialMetrics {
        local_contrast,
        highlight_recovery,
        shadow_detail,
        consistency,
        score,
    }
}

/// Reward a bell-shaped midtone distribution; penalize clipping mass and
/// contrast far from the target band.
fn perceptual_score(histogram: &[u32; HISTOGRAM_BINS], total: f32, dynamic_range: f32) -> f32 {
    let midtones: u32 = histogram[64..192].iter().sum();
    let midtone_fraction = midtones as f32 / total;

    // Peak reward at ~65% midtone mass.
    let midtone_score = (1.0 - (midtone_fraction - 0.65).abs() / 0.65).clamp(0.0, 1.0) * 100.0;

    let clipped_low: u32 = histogram[..4].iter().sum();
    let clipped_high: u32 = histogram[252..].iter().sum();
    let clip_penalty = ((clipped_low + clipped_high) as f32 / total * 200.0).min(40.0);

    // Target dynamic range band: 0.5-0.9.
    let range_penalty = if dynamic_range < 0.5 {
        (0.5 - dynamic_range) * 60.0
    } else if dynamic_range > 0.9 {
        (dynamic_range - 0.9) * 100.0
    } else {
        0.0
    };

    (midtone_score - clip_penalty - range_penalty).clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{buffer_from_image, gradient_image, uniform_buffer};

    #[test]
    fn test_uniform_midgray_is_low_contrast() {
        let buffer = uniform_buffer(64, 64, 128);
        let metrics = analyze(&buffer, &ExposureConfig::default());
        assert_eq!(metrics.balance, HistogramBalance::LowContrast);
        assert_eq!(metrics.over_exposed_pct, 0.0);
        assert_eq!(metrics.under_exposed_pct, 0.0);
        assert!((0.0..=100.0).contains(&metrics.score));
    }

    #[test]
    fn test_black_image_is_underexposed() {
        let buffer = uniform_buffer(64, 64, 2);
        let metrics = analyze(&buffer, &ExposureConfig::default());
        assert_eq!(metrics.balance, HistogramBalance::Underexposed);
        assert!(metrics.under_exposed_pct > 99.0);
        assert!(metrics.score < 50.0);
    }

    #[test]
    fn test_white_image_is_overexposed() {
        let buffer = uniform_buffer(64, 64, 253);
        let metrics = analyze(&buffer, &ExposureConfig::default());
        assert_eq!(metrics.balance, HistogramBalance::Overexposed);
        assert!(metrics.over_exposed_pct > 99.0);
    }

    #[test]
    fn test_gradient_has_full_dynamic_range() {
        let buffer = buffer_from_image(&gradient_image(256, 32));
        let metrics = analyze(&buffer, &ExposureConfig::default());
        assert!(metrics.dynamic_range > 0.8);
        assert!(metrics.contrast_ratio > 10.0);
    }

    #[test]
    fn test_gradient_beats_black() {
        let gradient = analyze(
            &buffer_from_image(&gradient_image(128, 64)),
            &ExposureConfig::default(),
        );
        let black = analyze(&uniform_buffer(128, 64, 2), &ExposureConfig::default());
        assert!(gradient.score > black.score);
    }

    #[test]
    fn test_sub_metrics_in_range() {
        let buffer = buffer_from_image(&gradient_image(100, 100));
        let m = analyze(&buffer, &ExposureConfig::default());
        for v in [
            m.local_contrast,
            m.highlight_recovery,
            m.shadow_detail,
            m.spatial_consistency,
            m.spatial_score,
            m.perceptual_score,
            m.score,
        ] {
            assert!((0.0..=100.0).contains(&v), "out of range: {}", v);
        }
    }

    #[test]
    fn test_config_validation() {
        ExposureConfig::default().validate();
    }

    #[test]
    #[should_panic(expected = "sum to 1.0")]
    fn test_bad_blend_weights_panic() {
        ExposureConfig {
            base_weight: 0.9,
            spatial_weight: 0.9,
            perceptual_weight: 0.9,
        }
        .validate();
    }
}
