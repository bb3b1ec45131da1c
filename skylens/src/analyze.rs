//! Per-image analysis pipeline: the four analyzers plus the composite
//! scorer, with optional stage callbacks for progress reporting.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::blur::{self, BlurMetrics};
use crate::config::AnalysisConfig;
use crate::descriptor::{self, DescriptorMetrics};
use crate::exposure::{self, ExposureMetrics};
use crate::kernels::ExecutionContext;
use crate::loader::PixelBuffer;
use crate::noise::{self, NoiseMetrics};
use crate::score::{self, CompositeScore, ScoreInputs};

/// Pipeline stage, reported before each analyzer runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnalyzerStage {
    Blur,
    Exposure,
    Noise,
    Descriptor,
    Scoring,
}

impl AnalyzerStage {
    pub fn name(&self) -> &'static str {
        match self {
            AnalyzerStage::Blur => "blur",
            AnalyzerStage::Exposure => "exposure",
            AnalyzerStage::Noise => "noise",
            AnalyzerStage::Descriptor => "descriptor",
            AnalyzerStage::Scoring => "scoring",
        }
    }
}

/// Complete quality report for one image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    pub blur: BlurMetrics,
    pub exposure: ExposureMetrics,
    pub noise: NoiseMetrics,
    pub descriptor: DescriptorMetrics,
    /// 100 minus the combined artifact severity.
    pub technical_score: f32,
    pub composite: CompositeScore,
}

/// Analyze one decoded image.
pub fn analyze_buffer(
    buffer: &PixelBuffer,
    config: &AnalysisConfig,
    ctx: &ExecutionContext,
) -> QualityReport {
    analyze_buffer_staged(buffer, config, ctx, |_| {})
}

/// Analyze one decoded image, invoking `on_stage` before each stage.
pub fn analyze_buffer_staged(
    buffer: &PixelBuffer,
    config: &AnalysisConfig,
    ctx: &ExecutionContext,
    on_stage: impl Fn(AnalyzerStage),
) -> QualityReport {
    on_stage(AnalyzerStage::Blur);
    let blur = blur::analyze(buffer, &config.blur, ctx);

    on_stage(AnalyzerStage::Exposure);
    let exposure = exposure::analyze(buffer, &config.exposure);

    on_stage(AnalyzerStage::Noise);
    let noise = noise::analyze(buffer, &config.noise, ctx);

    on_stage(AnalyzerStage::Descriptor);
    let descriptor = descriptor::analyze(buffer, &config.descriptor, ctx);

    on_stage(AnalyzerStage::Scoring);
    let technical_score = (100.0 - noise.artifacts.combined).clamp(0.0, 100.0);
    let composite = score::composite(
        ScoreInputs {
            blur: blur.score,
            exposure: exposure.score,
            noise: noise.score,
            technical: technical_score,
            descriptor: descriptor.score,
        },
        &config.weights,
    );

    debug!(
        overall = composite.overall,
        suitability = %composite.suitability,
        "image analyzed"
    );

    QualityReport {
        blur,
        exposure,
        noise,
        descriptor,
        technical_score,
        composite,
    }
}

/// Analyze a batch of decoded images in parallel.
pub fn analyze_all(
    buffers: &[PixelBuffer],
    config: &AnalysisConfig,
    ctx: &ExecutionContext,
) -> Vec<QualityReport> {
    buffers
        .par_iter()
        .map(|buffer| analyze_buffer(buffer, config, ctx))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::score::Suitability;
    use crate::testing::{buffer_from_image, checkerboard_image, uniform_buffer};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_uniform_image_report() {
        let buffer = uniform_buffer(64, 64, 128);
        let report = analyze_buffer(&buffer, &AnalysisConfig::default(), &ExecutionContext::cpu_only());
        // Featureless and perfectly flat: sharp it is not.
        assert_eq!(report.blur.score, 0.0);
        assert_eq!(report.descriptor.keypoint_count, 0);
        assert!(report.noise.score >= 99.0);
        assert!((0.0..=100.0).contains(&report.composite.overall));
    }

    #[test]
    fn test_checkerboard_beats_uniform() {
        let config = AnalysisConfig::default();
        let ctx = ExecutionContext::cpu_only();
        let sharp = analyze_buffer(
            &buffer_from_image(&checkerboard_image(96, 96, 8)),
            &config,
            &ctx,
        );
        let flat = analyze_buffer(&uniform_buffer(96, 96, 128), &config, &ctx);
        assert!(sharp.composite.overall > flat.composite.overall);
    }

    #[test]
    fn test_stage_callback_order() {
        let buffer = uniform_buffer(32, 32, 128);
        let seen = parking_lot::Mutex::new(Vec::new());
        analyze_buffer_staged(
            &buffer,
            &AnalysisConfig::default(),
            &ExecutionContext::cpu_only(),
            |stage| seen.lock().push(stage),
        );
        assert_eq!(
            *seen.lock(),
            vec![
                AnalyzerStage::Blur,
                AnalyzerStage::Exposure,
                AnalyzerStage::Noise,
                AnalyzerStage::Descriptor,
                AnalyzerStage::Scoring,
            ]
        );
    }

    #[test]
    fn test_batch_matches_single() {
        let config = AnalysisConfig::default();
        let ctx = ExecutionContext::cpu_only();
        let buffers = vec![
            uniform_buffer(48, 48, 100),
            buffer_from_image(&checkerboard_image(48, 48, 4)),
        ];
        let batch = analyze_all(&buffers, &config, &ctx);
        assert_eq!(batch.len(), 2);
        let single = analyze_buffer(&buffers[0], &config, &ctx);
        assert_eq!(batch[0].composite.overall, single.composite.overall);
    }

    #[test]
    fn test_failed_tier_for_zeroed_inputs() {
        let count = AtomicUsize::new(0);
        let buffer = uniform_buffer(16, 16, 0);
        let report = analyze_buffer_staged(
            &buffer,
            &AnalysisConfig::default(),
            &ExecutionContext::cpu_only(),
            |_| {
                count.fetch_add(1, Ordering::Relaxed);
            },
        );
        assert_eq!(count.load(Ordering::Relaxed), 5);
        assert!(matches!(
            report.composite.suitability,
            Suitability::Marginal | Suitability::Unsuitable
        ));
    }
}
