//! Top-level configuration for the analysis engine.
//!
//! Per-analyzer tuning lives next to each analyzer ([`BlurConfig`],
//! [`ExposureConfig`], [`NoiseConfig`], [`DescriptorConfig`]); this module
//! aggregates them and owns the composite weight vector.
//!
//! The normalization constants carried in the analyzer configs are
//! empirical defaults inherited from field use. They are exposed as plain
//! configuration so they can be recalibrated against a labeled dataset.

use serde::{Deserialize, Serialize};

use crate::blur::BlurConfig;
use crate::descriptor::DescriptorConfig;
use crate::exposure::ExposureConfig;
use crate::noise::NoiseConfig;

/// Tolerance when checking that a weight vector sums to 1.0.
const WEIGHT_SUM_TOLERANCE: f32 = 1e-3;

/// Weight vector for composite scoring. Weights must sum to 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityWeights {
    pub blur: f32,
    pub exposure: f32,
    pub noise: f32,
    pub technical: f32,
    pub descriptor: f32,
}

impl QualityWeights {
    /// Create a weight vector, checking that the components sum to 1.0.
    ///
    /// # Panics
    ///
    /// Panics if any weight is negative or the sum deviates from 1.0
    /// by more than a small tolerance.
    pub fn new(blur: f32, exposure: f32, noise: f32, technical: f32, descriptor: f32) -> Self {
        let weights = Self {
            blur,
            exposure,
            noise,
            technical,
            descriptor,
        };
        weights.validate();
        weights
    }

    /// Preset emphasizing feature (descriptor) quality for multi-view
    /// reconstruction workloads.
    pub fn photogrammetric() -> Self {
        Self::new(0.20, 0.15, 0.10, 0.15, 0.40)
    }

    pub fn sum(&self) -> f32 {
        self.blur + self.exposure + self.noise + self.technical + self.descriptor
    }

    /// Validate the weight vector.
    pub fn validate(&self) {
        for (name, w) in [
            ("blur", self.blur),
            ("exposure", self.exposure),
            ("noise", self.noise),
            ("technical", self.technical),
            ("descriptor", self.descriptor),
        ] {
            assert!(
                w.is_finite() && w >= 0.0,
                "{} weight must be non-negative and finite, got {}",
                name,
                w
            );
        }
        let sum = self.sum();
        assert!(
            (sum - 1.0).abs() <= WEIGHT_SUM_TOLERANCE,
            "weights must sum to 1.0, got {}",
            sum
        );
    }
}

impl Default for QualityWeights {
    fn default() -> Self {
        Self::new(0.25, 0.20, 0.20, 0.15, 0.20)
    }
}

/// Full configuration for per-image analysis.
#[derive(Debug, Clone, Default)]
pub struct AnalysisConfig {
    /// Composite score weight vector.
    pub weights: QualityWeights,
    /// Blur analyzer tuning.
    pub blur: BlurConfig,
    /// Exposure analyzer tuning.
    pub exposure: ExposureConfig,
    /// Noise/artifact analyzer tuning.
    pub noise: NoiseConfig,
    /// Descriptor analyzer tuning.
    pub descriptor: DescriptorConfig,
}

impl AnalysisConfig {
    /// Validate all nested configuration.
    ///
    /// # Panics
    ///
    /// Panics on invalid parameters. Call once before batch processing.
    pub fn validate(&self) {
        self.weights.validate();
        self.blur.validate();
        self.exposure.validate();
        self.noise.validate();
        self.descriptor.validate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_weights_sum_to_one() {
        let w = QualityWeights::default();
        assert!((w.sum() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_photogrammetric_preset_emphasizes_descriptor() {
        let w = QualityWeights::photogrammetric();
        assert!((w.sum() - 1.0).abs() < 1e-6);
        assert!(w.descriptor > w.blur);
        assert!(w.descriptor > w.exposure);
        assert!(w.descriptor > w.noise);
    }

    #[test]
    #[should_panic(expected = "sum to 1.0")]
    fn test_bad_sum_panics() {
        let _ = QualityWeights::new(0.5, 0.5, 0.5, 0.0, 0.0);
    }

    #[test]
    #[should_panic(expected = "non-negative")]
    fn test_negative_weight_panics() {
        let _ = QualityWeights::new(1.5, -0.5, 0.0, 0.0, 0.0);
    }

    #[test]
    fn test_default_config_validates() {
        AnalysisConfig::default().validate();
    }
}
