//! Composite scoring and suitability classification.

use serde::{Deserialize, Serialize};

use crate::config::QualityWeights;

/// Component scores feeding the composite, each expected in [0, 100].
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ScoreInputs {
    pub blur: f32,
    pub exposure: f32,
    pub noise: f32,
    pub technical: f32,
    pub descriptor: f32,
}

/// Composite quality result.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompositeScore {
    /// Weighted overall score, rounded to the nearest integer in
    /// [0, 100].
    pub overall: f32,
    pub suitability: Suitability,
    pub inputs: ScoreInputs,
}

/// Photogrammetric suitability tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Suitability {
    Excellent,
    Good,
    Acceptable,
    Marginal,
    Unsuitable,
}

/// Tier thresholds, strictly descending. A score at or above the
/// threshold earns the tier.
const SUITABILITY_TIERS: [(f32, Suitability); 4] = [
    (85.0, Suitability::Excellent),
    (70.0, Suitability::Good),
    (55.0, Suitability::Acceptable),
    (40.0, Suitability::Marginal),
];

impl Suitability {
    /// Classify an overall score.
    pub fn from_score(score: f32) -> Self {
        for (threshold, tier) in SUITABILITY_TIERS {
            if score >= threshold {
                return tier;
            }
        }
        Suitability::Unsuitable
    }

    pub fn label(&self) -> &'static str {
        match self {
            Suitability::Excellent => "excellent",
            Suitability::Good => "good",
            Suitability::Acceptable => "acceptable",
            Suitability::Marginal => "marginal",
            Suitability::Unsuitable => "unsuitable",
        }
    }
}

impl std::fmt::Display for Suitability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Blend component scores into the overall score. Non-finite inputs are
/// treated as 0 so a degenerate analyzer can never poison the result.
pub fn composite(inputs: ScoreInputs, weights: &QualityWeights) -> CompositeScore {
    let clean = |v: f32| if v.is_finite() { v.clamp(0.0, 100.0) } else { 0.0 };

    let weighted = clean(inputs.blur) * weights.blur
        + clean(inputs.exposure) * weights.exposure
        + clean(inputs.noise) * weights.noise
        + clean(inputs.technical) * weights.technical
        + clean(inputs.descriptor) * weights.descriptor;

    let overall = (weighted / weights.sum()).round().clamp(0.0, 100.0);

    CompositeScore {
        overall,
        suitability: Suitability::from_score(overall),
        inputs,
    }
}

/// Aggregate statistics over a batch of composite results.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AnalysisStats {
    pub total: usize,
    pub excellent: usize,
    pub good: usize,
    pub acceptable: usize,
    pub marginal: usize,
    pub unsuitable: usize,
    pub mean_overall: f32,
    pub mean_blur: f32,
    pub mean_exposure: f32,
    pub mean_noise: f32,
    pub mean_technical: f32,
    pub mean_descriptor: f32,
}

impl AnalysisStats {
    pub fn from_results(results: &[CompositeScore]) -> Self {
        if results.is_empty() {
            return Self::default();
        }

        let mut stats = Self {
            total: results.len(),
            ..Self::default()
        };
        for result in results {
            match result.suitability {
                Suitability::Excellent => stats.excellent += 1,
                Suitability::Good => stats.good += 1,
                Suitability::Acceptable => stats.acceptable += 1,
                Suitability::Marginal => stats.marginal += 1,
                Suitability::Unsuitable => stats.unsuitable += 1,
            }
            stats.mean_overall += result.overall;
            stats.mean_blur += result.inputs.blur;
            stats.mean_exposure += result.inputs.exposure;
            stats.mean_noise += result.inputs.noise;
            stats.mean_technical += result.inputs.technical;
            stats.mean_descriptor += result.inputs.descriptor;
        }
        let n = results.len() as f32;
        stats.mean_overall /= n;
        stats.mean_blur /= n;
        stats.mean_exposure /= n;
        stats.mean_noise /= n;
        stats.mean_technical /= n;
        stats.mean_descriptor /= n;
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs(blur: f32, exposure: f32, noise: f32, technical: f32, descriptor: f32) -> ScoreInputs {
        ScoreInputs {
            blur,
            exposure,
            noise,
            technical,
            descriptor,
        }
    }

    #[test]
    fn test_default_weight_example() {
        // 80*.25 + 70*.20 + 90*.20 + 50*.15 + 60*.20 = 71.5 -> 72.
        let result = composite(inputs(80.0, 70.0, 90.0, 50.0, 60.0), &QualityWeights::default());
        assert_eq!(result.overall, 72.0);
        assert_eq!(result.suitability, Suitability::Good);
    }

    #[test]
    fn test_boundary_straddles() {
        let weights = QualityWeights::default();
        let just_below = composite(inputs(84.0, 84.0, 84.0, 84.0, 84.0), &weights);
        let just_above = composite(inputs(85.0, 85.0, 85.0, 85.0, 85.0), &weights);
        assert_eq!(just_below.suitability, Suitability::Good);
        assert_eq!(just_above.suitability, Suitability::Excellent);

        let marginal = composite(inputs(40.0, 40.0, 40.0, 40.0, 40.0), &weights);
        let unsuitable = composite(inputs(39.0, 39.0, 39.0, 39.0, 39.0), &weights);
        assert_eq!(marginal.suitability, Suitability::Marginal);
        assert_eq!(unsuitable.suitability, Suitability::Unsuitable);
    }

    #[test]
    fn test_non_finite_inputs_become_zero() {
        let result = composite(
            inputs(f32::NAN, 100.0, f32::INFINITY, 100.0, 100.0),
            &QualityWeights::default(),
        );
        // blur and noise zeroed: 100*.20 + 100*.15 + 100*.20 = 55.
        assert_eq!(result.overall, 55.0);
        assert!(result.overall.is_finite());
    }

    #[test]
    fn test_composite_is_deterministic() {
        let weights = QualityWeights::photogrammetric();
        let a = composite(inputs(73.0, 61.0, 88.0, 45.0, 92.0), &weights);
        let b = composite(inputs(73.0, 61.0, 88.0, 45.0, 92.0), &weights);
        assert_eq!(a, b);
    }

    #[test]
    fn test_tier_thresholds_strictly_descending() {
        for pair in SUITABILITY_TIERS.windows(2) {
            assert!(pair[0].0 > pair[1].0);
        }
    }

    #[test]
    fn test_stats_aggregation() {
        let weights = QualityWeights::default();
        let results = [
            composite(inputs(90.0, 90.0, 90.0, 90.0, 90.0), &weights),
            composite(inputs(30.0, 30.0, 30.0, 30.0, 30.0), &weights),
        ];
        let stats = AnalysisStats::from_results(&results);
        assert_eq!(stats.total, 2);
        assert_eq!(stats.excellent, 1);
        assert_eq!(stats.unsuitable, 1);
        assert!((stats.mean_overall - 60.0).abs() < 1e-3);
        assert!((stats.mean_blur - 60.0).abs() < 1e-3);
    }

    #[test]
    fn test_empty_stats() {
        assert_eq!(AnalysisStats::from_results(&[]), AnalysisStats::default());
    }
}
