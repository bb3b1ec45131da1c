//! Error taxonomy for the analysis engine.

use thiserror::Error;

/// Result alias for analysis operations.
pub type Result<T> = std::result::Result<T, AnalysisError>;

/// Errors that can occur while analyzing an image.
///
/// Only load-stage errors are fatal to a task. Kernel errors are always
/// recovered by falling back to the CPU path, and analyzer errors degrade
/// to zeroed metrics for the affected stage.
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// The byte stream is not a decodable raster image.
    #[error("failed to decode image: {0}")]
    Decode(String),

    /// The decoded image has a degenerate width or height.
    #[error("degenerate image dimensions: {width}x{height}")]
    Dimension { width: u32, height: u32 },

    /// A bounded operation exceeded its wall-clock budget.
    #[error("{operation} exceeded its {budget_ms} ms budget")]
    Timeout {
        operation: &'static str,
        budget_ms: u64,
    },

    /// GPU kernel execution failed. Always recoverable via CPU fallback.
    #[error("kernel execution failed: {0}")]
    Kernel(String),

    /// Unexpected failure inside a metric stage.
    #[error("analyzer '{analyzer}' failed: {reason}")]
    Analyzer {
        analyzer: &'static str,
        reason: String,
    },
}

impl From<image::ImageError> for AnalysisError {
    fn from(err: image::ImageError) -> Self {
        AnalysisError::Decode(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AnalysisError::Dimension {
            width: 0,
            height: 42,
        };
        assert_eq!(err.to_string(), "degenerate image dimensions: 0x42");

        let err = AnalysisError::Timeout {
            operation: "decode",
            budget_ms: 30_000,
        };
        assert!(err.to_string().contains("30000 ms"));
    }
}
