//! Noise estimation and artifact-aware quality scoring.
//!
//! Noise sigma comes from the mean of per-block luminance variances: in
//! mostly-smooth regions block variance is dominated by sensor noise, so
//! the mean variance approximates the squared noise level. Compression
//! and lens artifacts (blocking, chromatic aberration, vignetting) feed
//! into the same score through [`artifacts`].

pub mod artifacts;

use serde::{Deserialize, Serialize};

use crate::kernels::ExecutionContext;
use crate::loader::PixelBuffer;

pub use artifacts::ArtifactMetrics;

/// Block size for variance-based noise estimation.
const NOISE_BLOCK_SIZE: usize = 8;

/// Noise sigma (in [0, 1] luma units) treated as the practical maximum.
const MAX_NOISE_SIGMA: f32 = 0.15;

/// Configuration for noise analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoiseConfig {
    /// Penalty weight for the normalized noise level.
    pub noise_penalty: f32,
    /// Cap on the noise penalty.
    pub noise_penalty_cap: f32,
    /// Penalty weight for the combined artifact severity.
    pub artifact_penalty: f32,
    /// Cap on the artifact penalty.
    pub artifact_penalty_cap: f32,
    /// Bonus weight for signal-to-noise ratio.
    pub snr_bonus: f32,
    /// Cap on the SNR bonus.
    pub snr_bonus_cap: f32,
}

impl Default for NoiseConfig {
    fn default() -> Self {
        Self {
            noise_penalty: 60.0,
            noise_penalty_cap: 60.0,
            artifact_penalty: 0.4,
            artifact_penalty_cap: 40.0,
            snr_bonus: 0.1,
            snr_bonus_cap: 10.0,
        }
    }
}

impl NoiseConfig {
    /// Validate the configuration.
    pub fn validate(&self) {
        assert!(
            self.noise_penalty >= 0.0 && self.artifact_penalty >= 0.0 && self.snr_bonus >= 0.0,
            "noise score weights must be non-negative"
        );
        assert!(
            self.noise_penalty_cap >= 0.0
                && self.artifact_penalty_cap >= 0.0
                && self.snr_bonus_cap >= 0.0,
            "noise score caps must be non-negative"
        );
    }
}

/// Noise metrics for one image.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NoiseMetrics {
    /// Estimated noise sigma in [0, 1] luma units.
    pub sigma: f32,
    /// Sigma normalized against [`MAX_NOISE_SIGMA`], in [0, 1].
    pub noise_level: f32,
    /// Mean luminance over estimated sigma.
    pub snr: f32,
    /// Compression and lens artifact sub-metrics.
    pub artifacts: ArtifactMetrics,
    /// Final noise score, 0-100.
    pub score: f32,
}

/// Analyze noise and artifacts.
pub fn analyze(buffer: &PixelBuffer, config: &NoiseConfig, ctx: &ExecutionContext) -> NoiseMetrics {
    let variances = ctx.block_variances(buffer.luma(), NOISE_BLOCK_SIZE);
    let sigma = if variances.is_empty() {
        0.0
    } else {
        (variances.iter().sum::<f32>() / variances.len() as f32).sqrt()
    };
    let noise_level = (sigma / MAX_NOISE_SIGMA).clamp(0.0, 1.0);

    let mean = buffer.mean_luma();
    let snr = if sigma > 1e-6 { mean / sigma } else { mean / 1e-6 };

    let artifacts = artifacts::detect(buffer, ctx);

    let noise_penalty = (noise_level * config.noise_penalty).min(config.noise_penalty_cap);
    let artifact_penalty =
        (artifacts.combined * config.artifact_penalty).min(config.artifact_penalty_cap);
    let snr_bonus = (snr * config.snr_bonus).min(config.snr_bonus_cap);

    let score = (100.0 - noise_penalty - artifact_penalty + snr_bonus).clamp(0.0, 100.0);

    NoiseMetrics {
        sigma,
        noise_level,
        snr,
        artifacts,
        score,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{buffer_from_image, noisy_image, uniform_buffer};

    #[test]
    fn test_uniform_gray_scores_high() {
        let buffer = uniform_buffer(64, 64, 128);
        let metrics = analyze(&buffer, &NoiseConfig::default(), &ExecutionContext::cpu_only());
        assert_eq!(metrics.sigma, 0.0);
        assert_eq!(metrics.noise_level, 0.0);
        assert!(metrics.score >= 99.0, "score {}", metrics.score);
    }

    #[test]
    fn test_noise_lowers_score() {
        let ctx = ExecutionContext::cpu_only();
        let config = NoiseConfig::default();
        let clean = analyze(&uniform_buffer(64, 64, 128), &config, &ctx);
        let noisy = analyze(&buffer_from_image(&noisy_image(64, 64, 128, 40)), &config, &ctx);
        assert!(noisy.sigma > clean.sigma);
        assert!(noisy.score < clean.score, "{} vs {}", noisy.score, clean.score);
    }

    #[test]
    fn test_snr_reflects_brightness() {
        let ctx = ExecutionContext::cpu_only();
        let config = NoiseConfig::default();
        let dark = analyze(&buffer_from_image(&noisy_image(64, 64, 40, 20)), &config, &ctx);
        let bright = analyze(&buffer_from_image(&noisy_image(64, 64, 200, 20)), &config, &ctx);
        assert!(bright.snr > dark.snr);
    }

    #[test]
    fn test_score_in_range() {
        let metrics = analyze(
            &buffer_from_image(&noisy_image(48, 48, 128, 80)),
            &NoiseConfig::default(),
            &ExecutionContext::cpu_only(),
        );
        assert!((0.0..=100.0).contains(&metrics.score));
        assert!((0.0..=1.0).contains(&metrics.noise_level));
    }
}
