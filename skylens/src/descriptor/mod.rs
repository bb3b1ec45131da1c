//! Descriptor analysis: feature detection, spatial distribution, and a
//! photogrammetric suitability score.
//!
//! Candidates from four detectors are merged, deduplicated by spatial
//! radius, and capped. The score blends keypoint density, grid
//! distribution, response strength, and descriptor quality with weights
//! biased toward quality, since weak features break bundle adjustment
//! long before sparse ones do.

pub mod detectors;
pub mod keypoint;

use serde::{Deserialize, Serialize};

use crate::kernels::ExecutionContext;
use crate::loader::PixelBuffer;

pub use keypoint::{dedup, Keypoint, KeypointKind};

/// Grid edge for distribution metrics.
const GRID: usize = 8;

/// Keypoint density (per pixel) that earns a full density score.
const TARGET_DENSITY: f32 = 0.002;

/// Configuration for descriptor analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DescriptorConfig {
    /// Harris corner constant.
    pub harris_k: f32,
    /// Harris acceptance threshold as a fraction of the peak response.
    pub harris_relative_threshold: f32,
    /// FAST center contrast threshold in [0, 1] luma units.
    pub fast_threshold: f32,
    /// Sobel magnitude threshold for edge points.
    pub edge_threshold: f32,
    /// Base sigma for blob detection.
    pub blob_sigma: f32,
    /// Absolute DoG response floor for blob detection.
    pub blob_threshold: f32,
    /// Minimum distance between kept keypoints, in pixels.
    pub dedup_distance: f32,
    /// Hard cap on kept keypoints.
    pub max_keypoints: usize,
}

impl Default for DescriptorConfig {
    fn default() -> Self {
        Self {
            harris_k: 0.04,
            harris_relative_threshold: 0.05,
            fast_threshold: 0.08,
            edge_threshold: 0.3,
            blob_sigma: 1.2,
            blob_threshold: 0.01,
            dedup_distance: 4.0,
            max_keypoints: 2000,
        }
    }
}

impl DescriptorConfig {
    /// Validate the configuration.
    pub fn validate(&self) {
        assert!(
            self.harris_k > 0.0 && self.harris_k < 0.25,
            "harris_k out of range: {}",
            self.harris_k
        );
        assert!(self.dedup_distance >= 0.0, "dedup_distance must be >= 0");
        assert!(self.max_keypoints > 0, "max_keypoints must be > 0");
        assert!(
            self.blob_sigma > 0.0,
            "blob_sigma must be > 0, got {}",
            self.blob_sigma
        );
    }
}

/// Spatial distribution of keypoints over an 8x8 grid.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DistributionMetrics {
    /// 1 − coefficient of variation of per-cell counts, in [0, 1].
    pub uniformity: f32,
    /// Fraction of grid cells containing at least one keypoint.
    pub coverage: f32,
    /// Clustering tendency in [0, 1]: 0 = evenly spread, 1 = clumped.
    pub clustering: f32,
}

/// Descriptor quality estimates.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct QualityMetrics {
    /// Mean local contrast at keypoints, in [0, 1].
    pub distinctiveness: f32,
    /// Strength consistency across keypoints, in [0, 1].
    pub repeatability: f32,
    /// Expected matchability, in [0, 1].
    pub matchability: f32,
}

/// Descriptor metrics for one image.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DescriptorMetrics {
    /// Keypoints surviving dedup and the cap.
    pub keypoint_count: usize,
    /// Keypoints per pixel.
    pub density: f32,
    /// Mean keypoint strength in [0, 1].
    pub mean_strength: f32,
    pub distribution: DistributionMetrics,
    pub quality: QualityMetrics,
    /// Density sub-score, 0-100.
    pub density_score: f32,
    /// Distribution sub-score, 0-100.
    pub distribution_score: f32,
    /// Strength sub-score, 0-100.
    pub strength_score: f32,
    /// Quality sub-score, 0-100.
    pub quality_score: f32,
    /// Final photogrammetric descriptor score, 0-100.
    pub score: f32,
}

/// Analyze feature content. Zero detected keypoints yield zeroed
/// metrics rather than an error.
pub fn analyze(
    buffer: &PixelBuffer,
    config: &DescriptorConfig,
    ctx: &ExecutionContext,
) -> DescriptorMetrics {
    let luma = buffer.luma();

    let mut candidates = detectors::harris_corners(luma, config, ctx);
    candidates.extend(detectors::fast_corners(luma, config));
    candidates.extend(detectors::edge_points(luma, config));
    candidates.extend(detectors::blob_points(luma, config));

    let mut keypoints = dedup(candidates, config.dedup_distance);
    keypoints.truncate(config.max_keypoints);

    if keypoints.is_empty() {
        return DescriptorMetrics::default();
    }

    let pixel_count = buffer.pixel_count() as f32;
    let density = keypoints.len() as f32 / pixel_count;
    let mean_strength =
        keypoints.iter().map(|k| k.strength).sum::<f32>() / keypoints.len() as f32;

    let distribution = distribution_metrics(&keypoints, buffer.width(), buffer.height());
    let quality = quality_metrics(&keypoints, buffer, mean_strength);

    let density_score = (density / TARGET_DENSITY).clamp(0.0, 1.0) * 100.0;
    let distribution_score = (distribution.uniformity * 0.4
        + distribution.coverage * 0.4
        + (1.0 - distribution.clustering) * 0.2)
        .clamp(0.0, 1.0)
        * 100.0;
    let strength_score = mean_strength.clamp(0.0, 1.0) * 100.0;
    let quality_score = (quality.distinctiveness * 0.35
        + quality.repeatability * 0.30
        + quality.matchability * 0.35)
        .clamp(0.0, 1.0)
        * 100.0;

    let score = (density_score * 0.20
        + distribution_score * 0.25
        + strength_score * 0.15
        + quality_score * 0.40)
        .clamp(0.0, 100.0);

    DescriptorMetrics {
        keypoint_count: keypoints.len(),
        density,
        mean_strength,
        distribution,
        quality,
        density_score,
        distribution_score,
        strength_score,
        quality_score,
        score,
    }
}

fn distribution_metrics(keypoints: &[Keypoint], width: usize, height: usize) -> DistributionMetrics {
    let mut cells = [0u32; GRID * GRID];
    let cell_w = (width as f32 / GRID as f32).max(1.0);
    let cell_h = (height as f32 / GRID as f32).max(1.0);
    for kp in keypoints {
        let cx = ((kp.x / cell_w) as usize).min(GRID - 1);
        let cy = ((kp.y / cell_h) as usize).min(GRID - 1);
        cells[cy * GRID + cx] += 1;
    }

    let n = cells.len() as f32;
    let mean = keypoints.len() as f32 / n;
    let variance = cells
        .iter()
        .map(|&c| (c as f32 - mean).powi(2))
        .sum::<f32>()
        / n;
    let cv = if mean > 0.0 { variance.sqrt() / mean } else { 0.0 };
    let uniformity = (1.0 - cv / 2.0).clamp(0.0, 1.0);

    let occupied = cells.iter().filter(|&&c| c > 0).count();
    let coverage = occupied as f32 / n;

    let clustering = clustering_tendency(keypoints, width, height);

    DistributionMetrics {
        uniformity,
        coverage,
        clustering,
    }
}

/// Mean nearest-neighbor distance against the even-spacing expectation
/// `0.5 * sqrt(area / n)`. Sampled when the keypoint list is large.
fn clustering_tendency(keypoints: &[Keypoint], width: usize, height: usize) -> f32 {
    if keypoints.len() < 2 {
        return 0.0;
    }
    const MAX_SAMPLES: usize = 500;
    let step = (keypoints.len() / MAX_SAMPLES).max(1);

    let mut nn_sum = 0.0f64;
    let mut samples = 0u32;
    for i in (0..keypoints.len()).step_by(step) {
        let mut best = f32::MAX;
        for (j, other) in keypoints.iter().enumerate() {
            if i != j {
                best = best.min(keypoints[i].distance_sq(other));
            }
        }
        nn_sum += (best.sqrt()) as f64;
        samples += 1;
    }
    let mean_nn = (nn_sum / samples as f64) as f32;

    let area = (width * height) as f32;
    let expected = 0.5 * (area / keypoints.len() as f32).sqrt();
    if expected <= 0.0 {
        return 0.0;
    }
    (1.0 - mean_nn / expected).clamp(0.0, 1.0)
}

fn quality_metrics(
    keypoints: &[Keypoint],
    buffer: &PixelBuffer,
    mean_strength: f32,
) -> QualityMetrics {
    let luma = buffer.luma();
    let width = luma.width();
    let height = luma.height();

    // Distinctiveness: 5x5 local contrast around each keypoint.
    let mut contrast_sum = 0.0f64;
    for kp in keypoints {
        let x = kp.x as usize;
        let y = kp.y as usize;
        let mut lo = f32::MAX;
        let mut hi = f32::MIN;
        for dy in -2i32..=2 {
            for dx in -2i32..=2 {
                let sx = (x as i32 + dx).clamp(0, width as i32 - 1) as usize;
                let sy = (y as i32 + dy).clamp(0, height as i32 - 1) as usize;
                let v = *luma.get(sx, sy);
                lo = lo.min(v);
                hi = hi.max(v);
            }
        }
        contrast_sum += (hi - lo) as f64;
    }
    let distinctiveness =
        ((contrast_sum / keypoints.len() as f64) as f32 / 0.5).clamp(0.0, 1.0);

    // Repeatability: 1 − cv of strengths.
    let variance = keypoints
        .iter()
        .map(|k| (k.strength - mean_strength).powi(2))
        .sum::<f32>()
        / keypoints.len() as f32;
    let repeatability = if mean_strength > 0.0 {
        (1.0 - variance.sqrt() / mean_strength).clamp(0.0, 1.0)
    } else {
        0.0
    };

    let matchability = ((distinctiveness + mean_strength) / 2.0).clamp(0.0, 1.0);

    QualityMetrics {
        distinctiveness,
        repeatability,
        matchability,
    }
}
