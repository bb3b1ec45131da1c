//! Task and result types for the analysis scheduler.

use serde::{Deserialize, Serialize};

use crate::analyze::QualityReport;
use crate::score::{CompositeScore, ScoreInputs, Suitability};

pub type TaskId = u64;

/// A queued analysis request: encoded image bytes plus a caller-supplied
/// source label (usually the file path).
#[derive(Debug, Clone)]
pub struct AnalysisTask {
    pub id: TaskId,
    pub source: String,
    pub bytes: Vec<u8>,
}

/// Outcome of one task. A failed task still carries a full report with
/// zeroed metrics and [`Suitability::Unsuitable`], so batch consumers
/// never need a separate error path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub task_id: TaskId,
    pub source: String,
    pub report: QualityReport,
    pub error: Option<String>,
}

impl AnalysisResult {
    pub fn completed(task_id: TaskId, source: String, report: QualityReport) -> Self {
        Self {
            task_id,
            source,
            report,
            error: None,
        }
    }

    pub fn failed(task_id: TaskId, source: String, error: String) -> Self {
        Self {
            task_id,
            source,
            report: QualityReport {
                blur: Default::default(),
                exposure: Default::default(),
                noise: Default::default(),
                descriptor: Default::default(),
                technical_score: 0.0,
                composite: CompositeScore {
                    overall: 0.0,
                    suitability: Suitability::Unsuitable,
                    inputs: ScoreInputs::default(),
                },
            },
            error: Some(error),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }
}
