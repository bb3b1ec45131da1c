//! Skylens - Image quality analysis for drone photogrammetry.
//!
//! This library scores aerial survey photos for photogrammetric
//! processing, including:
//! - Multi-scale blur detection with scene-aware normalization
//! - Exposure, noise, and compression/lens artifact analysis
//! - Feature (keypoint) richness estimation for bundle adjustment
//! - Composite scoring with suitability classification
//! - CPU/GPU kernel execution with benchmark-driven dispatch
//! - A bounded-concurrency batch scheduler
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use skylens::{analyze_buffer, AnalysisConfig, ExecutionContext, LoadOptions};
//!
//! let bytes = std::fs::read("DJI_0001.JPG")?;
//! let ctx = ExecutionContext::new();
//! let buffer = skylens::loader::decode(&bytes, &LoadOptions::default())?;
//!
//! let report = analyze_buffer(&buffer, &AnalysisConfig::default(), &ctx);
//! println!("{} ({})", report.composite.overall, report.composite.suitability);
//! ```

mod analyze;
pub mod blur;
pub(crate) mod common;
mod config;
mod error;
pub mod descriptor;
pub mod exposure;
pub mod kernels;
pub mod loader;
pub mod noise;
pub mod scheduler;
pub mod score;

#[cfg(test)]
pub mod testing;

// ============================================================================
// Core types
// ============================================================================

pub use common::{Buffer2, SharedFn};
pub use config::{AnalysisConfig, QualityWeights};
pub use error::{AnalysisError, Result};
pub use loader::{LoadOptions, PixelBuffer};

// ============================================================================
// Analysis pipeline
// ============================================================================

pub use analyze::{analyze_all, analyze_buffer, analyze_buffer_staged, AnalyzerStage, QualityReport};
pub use blur::{BlurConfig, BlurMetrics, SceneKind};
pub use descriptor::{DescriptorConfig, DescriptorMetrics, Keypoint, KeypointKind};
pub use exposure::{ExposureConfig, ExposureMetrics, HistogramBalance};
pub use noise::{ArtifactMetrics, NoiseConfig, NoiseMetrics};
pub use score::{composite, AnalysisStats, CompositeScore, ScoreInputs, Suitability};

// ============================================================================
// Execution backend
// ============================================================================

pub use kernels::benchmark::{BenchmarkCache, BenchmarkRecord};
pub use kernels::{Backend, ExecutionContext, KernelOp};

// ============================================================================
// Scheduling
// ============================================================================

pub use scheduler::{
    AnalysisResult, AnalysisStage, AnalysisTask, CompletionCallback, ProgressCallback,
    ProgressUpdate, Scheduler, SchedulerConfig, TaskId,
};
