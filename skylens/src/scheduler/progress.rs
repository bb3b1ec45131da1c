//! Progress reporting for scheduled tasks.

use serde::{Deserialize, Serialize};

use crate::analyze::AnalyzerStage;
use crate::common::SharedFn;

use super::task::{AnalysisResult, TaskId};

/// Lifecycle stage of a scheduled task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnalysisStage {
    Queued,
    Loading,
    Analyzing(AnalyzerStage),
    Scoring,
    Completed,
    Failed,
}

impl AnalysisStage {
    /// Nominal completion percentage at the start of this stage.
    pub fn percent(&self) -> u8 {
        match self {
            AnalysisStage::Queued => 0,
            AnalysisStage::Loading => 10,
            AnalysisStage::Analyzing(AnalyzerStage::Blur) => 30,
            AnalysisStage::Analyzing(AnalyzerStage::Exposure) => 45,
            AnalysisStage::Analyzing(AnalyzerStage::Noise) => 60,
            AnalysisStage::Analyzing(AnalyzerStage::Descriptor) => 75,
            AnalysisStage::Analyzing(AnalyzerStage::Scoring) | AnalysisStage::Scoring => 90,
            AnalysisStage::Completed | AnalysisStage::Failed => 100,
        }
    }
}

/// Emitted at every stage boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub task_id: TaskId,
    pub stage: AnalysisStage,
    pub percent: u8,
}

impl ProgressUpdate {
    pub fn new(task_id: TaskId, stage: AnalysisStage) -> Self {
        Self {
            task_id,
            stage,
            percent: stage.percent(),
        }
    }
}

pub type ProgressCallback = SharedFn<dyn Fn(ProgressUpdate) + Send + Sync>;
pub type CompletionCallback = SharedFn<dyn Fn(AnalysisResult) + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_is_monotonic_over_lifecycle() {
        let stages = [
            AnalysisStage::Queued,
            AnalysisStage::Loading,
            AnalysisStage::Analyzing(AnalyzerStage::Blur),
            AnalysisStage::Analyzing(AnalyzerStage::Exposure),
            AnalysisStage::Analyzing(AnalyzerStage::Noise),
            AnalysisStage::Analyzing(AnalyzerStage::Descriptor),
            AnalysisStage::Scoring,
            AnalysisStage::Completed,
        ];
        for pair in stages.windows(2) {
            assert!(pair[0].percent() < pair[1].percent());
        }
    }
}
