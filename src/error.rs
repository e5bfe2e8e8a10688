use thiserror::Error;

use crate::data::LoadError;

/// Failure taxonomy for the pipeline. Per-run recoverable conditions
/// (a single grid point with too few bars, a zero-trade result) are carried
/// as diagnostics on the manifest instead; everything here is surfaced as a
/// typed error by the stage that hit it.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Frame shorter than the strategy warm-up. Recovered per grid point
    /// during a sweep; fatal when a single backtest was requested.
    #[error("insufficient data: {have} bars, warm-up requires more than {need}")]
    InsufficientData { have: usize, need: usize },

    /// Malformed input row or file. Fatal to the affected file only.
    #[error("schema error: {context}")]
    SchemaError { context: String },

    /// The aligner could not find enough common bars.
    #[error("insufficient overlap: {overlap} common bars, need at least {min}")]
    InsufficientOverlap { overlap: usize, min: usize },

    /// Shrinkage could not produce a positive semi-definite covariance.
    #[error("covariance degenerate: {reason}")]
    CovarianceDegenerate { reason: String },

    /// The risk-parity solver hit its iteration cap.
    #[error("allocation failed to converge after {iterations} iterations")]
    AllocationDivergent { iterations: usize },

    /// A validator predicate fired and the run is configured to treat that
    /// as fatal.
    #[error("validation failed: {predicate}")]
    ValidationFailed { predicate: String },

    /// Cooperative cancellation was observed at a stage boundary.
    #[error("run cancelled")]
    Cancelled,

    /// A price loader failure in a context where the stage cannot continue
    /// without the data (e.g. a chosen concurrency constituent).
    #[error("price loader: {0}")]
    Loader(#[from] LoadError),

    /// A violated internal invariant. Always a bug, never recoverable.
    #[error("internal invariant violated: {0}")]
    InternalInvariant(String),
}

impl EngineError {
    /// Stable machine-readable kind tag, used by diagnostics and tests.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::InsufficientData { .. } => "InsufficientData",
            EngineError::SchemaError { .. } => "SchemaError",
            EngineError::InsufficientOverlap { .. } => "InsufficientOverlap",
            EngineError::CovarianceDegenerate { .. } => "CovarianceDegenerate",
            EngineError::AllocationDivergent { .. } => "AllocationDivergent",
            EngineError::ValidationFailed { .. } => "ValidationFailed",
            EngineError::Cancelled => "Cancelled",
            EngineError::Loader(_) => "Loader",
            EngineError::InternalInvariant(_) => "InternalInvariant",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_tags_are_stable() {
        let e = EngineError::InsufficientData { have: 3, need: 10 };
        assert_eq!(e.kind(), "InsufficientData");
        let e = EngineError::AllocationDivergent { iterations: 500 };
        assert_eq!(e.kind(), "AllocationDivergent");
    }

    #[test]
    fn display_carries_context() {
        let e = EngineError::InsufficientOverlap {
            overlap: 20,
            min: 30,
        };
        let msg = e.to_string();
        assert!(msg.contains("20"));
        assert!(msg.contains("30"));
    }
}
