//! Concurrency and risk analysis: calendar alignment, covariance,
//! allocation, and the derived portfolio risk report.

pub mod align;
pub mod allocation;
pub mod covariance;
pub mod engine;

pub use align::{AlignPolicy, AlignedReturns};
pub use allocation::AllocationMethod;
pub use engine::{analyze, ConstituentSeries, RiskAnalysis};
