//! Sharpness scoring via multi-scale Laplacian variance.
//!
//! The Laplacian response is computed at the native resolution and at one
//! or more downsampled scales; each scale contributes the variance of its
//! absolute response, weighted by the scale factor so that small, noisier
//! scales are attenuated. The log of the combined variance is mapped to a
//! 0-100 score with a scene-adaptive normalization factor.

use serde::{Deserialize, Serialize};

use crate::common::Buffer2;
use crate::kernels::ExecutionContext;
use crate::loader::PixelBuffer;

/// Variance is computed on a 0-255 luminance scale; the luma plane is
/// stored normalized, so responses are rescaled before squaring.
const LUMA_SCALE: f32 = 255.0;

/// Scene classification driving the blur normalization factor.
///
/// Aerial sky frames carry little natural texture, so the same Laplacian
/// variance means more sharpness than it would in a ground-detail frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SceneKind {
    /// Mostly sky / uniform background.
    AerialSky,
    /// Texture-rich ground imagery.
    GroundDetail,
    /// Mixed content. This is the default.
    #[default]
    Mixed,
}

impl SceneKind {
    /// Log-variance multiplier for this scene class.
    ///
    /// Empirical defaults; see crate configuration notes on
    /// recalibration.
    pub fn normalization_factor(&self) -> f32 {
        match self {
            SceneKind::AerialSky => 11.0,
            SceneKind::GroundDetail => 16.0,
            SceneKind::Mixed => 14.0,
        }
    }
}

/// Configuration for blur analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlurConfig {
    /// Downsampling factors to evaluate; 1.0 is the native resolution.
    pub scales: Vec<f32>,
    /// Override for the scene-derived normalization factor.
    pub normalization_override: Option<f32>,
}

impl Default for BlurConfig {
    fn default() -> Self {
        Self {
            scales: vec![1.0, 0.5, 0.25],
            normalization_override: None,
        }
    }
}

impl BlurConfig {
    /// Validate the configuration.
    pub fn validate(&self) {
        assert!(!self.scales.is_empty(), "at least one scale is required");
        for &s in &self.scales {
            assert!(
                s > 0.0 && s <= 1.0,
                "scale factors must be in (0, 1], got {}",
                s
            );
        }
    }
}

/// Sharpness metrics for one image.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BlurMetrics {
    /// Sharpness score, 0-100. Higher is sharper.
    pub score: f32,
    /// Scale-weighted Laplacian variance (0-255 luminance units).
    pub raw_variance: f32,
    /// Normalization factor actually applied.
    pub normalization_factor: f32,
    /// Scene class the factor was chosen for.
    pub scene: SceneKind,
}

/// Analyze sharpness. Never fails: degenerate inputs yield score 0.
pub fn analyze(buffer: &PixelBuffer, config: &BlurConfig, ctx: &ExecutionContext) -> BlurMetrics {
    let scene = classify_scene(buffer);
    let factor = config
        .normalization_override
        .unwrap_or_else(|| scene.normalization_factor());

    let mut weighted_sum = 0.0f64;
    let mut weight_total = 0.0f64;
    for &scale in &config.scales {
        let luma = if (scale - 1.0).abs() < f32::EPSILON {
            buffer.luma().clone()
        } else {
            downsample(buffer.luma(), scale)
        };
        if luma.width() < 3 || luma.height() < 3 {
            continue;
        }
        let map = ctx.laplacian_map(&luma);
        let variance = interior_variance(&map);
        weighted_sum += variance as f64 * scale as f64;
        weight_total += scale as f64;
    }

    if weight_total <= 0.0 {
        return BlurMetrics {
            score: 0.0,
            raw_variance: 0.0,
            normalization_factor: factor,
            scene,
        };
    }

    let raw_variance = (weighted_sum / weight_total) as f32;
    let score = ((raw_variance + 1.0).ln() * factor).clamp(0.0, 100.0);

    BlurMetrics {
        score,
        raw_variance,
        normalization_factor: factor,
        scene,
    }
}

/// Variance of the absolute Laplacian response over interior pixels,
/// in 0-255 luminance units.
fn interior_variance(map: &Buffer2<f32>) -> f32 {
    let width = map.width();
    let height = map.height();
    if width < 3 || height < 3 {
        return 0.0;
    }

    let mut sum = 0.0f64;
    let mut sum_sq = 0.0f64;
    let mut n = 0u64;
    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let v = (*map.get(x, y) * LUMA_SCALE) as f64;
            sum += v;
            sum_sq += v * v;
            n += 1;
        }
    }
    if n == 0 {
        return 0.0;
    }
    let mean = sum / n as f64;
    ((sum_sq / n as f64) - mean * mean).max(0.0) as f32
}

/// Box-downsample the luminance plane by a factor in (0, 1).
fn downsample(luma: &Buffer2<f32>, scale: f32) -> Buffer2<f32> {
    let width = ((luma.width() as f32 * scale) as usize).max(1);
    let height = ((luma.height() as f32 * scale) as usize).max(1);
    let step_x = luma.width() as f32 / width as f32;
    let step_y = luma.height() as f32 / height as f32;

    let mut out = Buffer2::new_default(width, height);
    for y in 0..height {
        let sy0 = (y as f32 * step_y) as usize;
        let sy1 = (((y + 1) as f32 * step_y) as usize).min(luma.height()).max(sy0 + 1);
        for x in 0..width {
            let sx0 = (x as f32 * step_x) as usize;
            let sx1 = (((x + 1) as f32 * step_x) as usize).min(luma.width()).max(sx0 + 1);

            let mut sum = 0.0f32;
            let mut count = 0u32;
            for sy in sy0..sy1 {
                for sx in sx0..sx1 {
                    sum += *luma.get(sx, sy);
                    count += 1;
                }
            }
            *out.get_mut(x, y) = sum / count as f32;
        }
    }
    out
}

/// Lightweight sky-vs-ground heuristic on the pixel buffer.
///
/// The top third of aerial sky frames is bright and nearly textureless;
/// texture-rich frames have high local variation throughout.
fn classify_scene(buffer: &PixelBuffer) -> SceneKind {
    let luma = buffer.luma();
    let width = luma.width();
    let height = luma.height();
    if width < 4 || height < 4 {
        return SceneKind::Mixed;
    }

    let top_rows = (height / 3).max(1);
    let mut top_sum = 0.0f64;
    let mut top_texture = 0.0f64;
    let mut top_n = 0u64;
    for y in 0..top_rows {
        for x in 1..width {
            let v = *luma.get(x, y);
            top_sum += v as f64;
            top_texture += (v - *luma.get(x - 1, y)).abs() as f64;
            top_n += 1;
        }
    }
    let top_mean = top_sum / top_n as f64;
    let top_detail = top_texture / top_n as f64;

    let mut total_texture = 0.0f64;
    let mut total_n = 0u64;
    for y in 0..height {
        for x in 1..width {
            total_texture += (*luma.get(x, y) - *luma.get(x - 1, y)).abs() as f64;
            total_n += 1;
        }
    }
    let overall_detail = total_texture / total_n as f64;

    if top_mean > 0.65 && top_detail < 0.02 {
        SceneKind::AerialSky
    } else if overall_detail > 0.06 {
        SceneKind::GroundDetail
    } else {
        SceneKind::Mixed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{checkerboard_buffer, uniform_buffer};

    fn ctx() -> ExecutionContext {
        ExecutionContext::cpu_only()
    }

    #[test]
    fn test_uniform_gray_scores_zero() {
        let buffer = uniform_buffer(100, 100, 128);
        let metrics = analyze(&buffer, &BlurConfig::default(), &ctx());
        assert_eq!(metrics.score, 0.0);
        assert_eq!(metrics.raw_variance, 0.0);
    }

    #[test]
    fn test_checkerboard_scores_high() {
        let buffer = checkerboard_buffer(100, 100, 2);
        let metrics = analyze(&buffer, &BlurConfig::default(), &ctx());
        assert!(metrics.score > 70.0, "score was {}", metrics.score);
    }

    #[test]
    fn test_score_in_range() {
        for cell in [1u32, 3, 7, 16] {
            let buffer = checkerboard_buffer(64, 64, cell);
            let metrics = analyze(&buffer, &BlurConfig::default(), &ctx());
            assert!((0.0..=100.0).contains(&metrics.score));
        }
    }

    #[test]
    fn test_tiny_image_never_errors() {
        let buffer = uniform_buffer(2, 2, 50);
        let metrics = analyze(&buffer, &BlurConfig::default(), &ctx());
        assert_eq!(metrics.score, 0.0);
    }

    #[test]
    fn test_normalization_override() {
        let buffer = checkerboard_buffer(64, 64, 4);
        let config = BlurConfig {
            normalization_override: Some(1.0),
            ..Default::default()
        };
        let low = analyze(&buffer, &config, &ctx());
        let default = analyze(&buffer, &BlurConfig::default(), &ctx());
        assert!(low.score < default.score);
        assert_eq!(low.normalization_factor, 1.0);
    }

    #[test]
    fn test_sky_scene_classification() {
        // Bright, textureless image classifies as aerial sky.
        let buffer = uniform_buffer(60, 60, 220);
        let metrics = analyze(&buffer, &BlurConfig::default(), &ctx());
        assert_eq!(metrics.scene, SceneKind::AerialSky);
        assert_eq!(
            metrics.normalization_factor,
            SceneKind::AerialSky.normalization_factor()
        );
    }

    #[test]
    fn test_ground_scene_classification() {
        let buffer = checkerboard_buffer(60, 60, 2);
        let metrics = analyze(&buffer, &BlurConfig::default(), &ctx());
        assert_eq!(metrics.scene, SceneKind::GroundDetail);
    }
}
