//! Serialized output surface: the run manifest and its parts.
//!
//! All fractions are decimals, all booleans are booleans; percentages are a
//! display-layer concern and never appear here. The manifest round-trips
//! through JSON (undefined metrics serialize as null and read back as NaN).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::types::{PortfolioRow, StrategyId};

/// Which pipeline produced the manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    Sweep,
    Best,
    Concurrency,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiagnosticKind {
    InsufficientData,
    NoTrades,
    SchemaError,
    OutlierReturn,
    ForwardFill,
    LoadFailed,
    ValidationFailed,
    SinkError,
    Cancelled,
}

/// A structured warning attached to the manifest instead of failing the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    /// What the warning is about: a ticker, a strategy id, a file.
    pub scope: String,
    pub message: String,
}

impl Diagnostic {
    pub fn new(kind: DiagnosticKind, scope: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            scope: scope.into(),
            message: message.into(),
        }
    }
}

/// Outcome of a single validator predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationCheck {
    pub predicate: String,
    pub passed: bool,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationSummary {
    pub passed: bool,
    pub checks: Vec<ValidationCheck>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightEntry {
    pub id: StrategyId,
    pub weight: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContributionEntry {
    pub id: StrategyId,
    pub contribution: f64,
}

/// Output of the concurrency stage: covariance, allocation and the derived
/// portfolio risk figures for the chosen strategy set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskReport {
    /// Allocation method label.
    pub method: String,
    /// Sample (possibly shrunk) covariance of the aligned return matrix.
    pub covariance: Vec<Vec<f64>>,
    /// Ledoit-Wolf intensity when shrinkage was applied.
    pub shrinkage: Option<f64>,
    /// Per-bar portfolio volatility `sqrt(w' Sigma w)`.
    pub volatility: f64,
    /// Max drawdown of the combined equity curve.
    pub max_drawdown: f64,
    /// The combination assumption behind `max_drawdown`.
    pub rebalancing: String,
    pub allocation: Vec<WeightEntry>,
    pub risk_contributions: Vec<ContributionEntry>,
    /// Weighted mean of constituent expectancies, decimal scale.
    pub expectancy_per_trade: f64,
    /// Sum of per-strategy entry signals.
    pub signals_total: usize,
    /// Distinct bars with at least one entry across constituents.
    pub signal_bars_distinct: usize,
}

/// The single document every pipeline returns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunManifest {
    pub run_id: String,
    pub stage: Stage,
    pub rows: Vec<PortfolioRow>,
    pub risk_report: Option<RiskReport>,
    pub diagnostics: Vec<Diagnostic>,
    pub cancelled: bool,
    pub partial: bool,
    pub validation: Option<ValidationSummary>,
}

impl RunManifest {
    pub fn new(stage: Stage) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            stage,
            rows: Vec::new(),
            risk_report: None,
            diagnostics: Vec::new(),
            cancelled: false,
            partial: false,
            validation: None,
        }
    }

    pub fn push_diagnostic(&mut self, diagnostic: Diagnostic) {
        tracing::warn!(
            kind = ?diagnostic.kind,
            scope = %diagnostic.scope,
            "{}",
            diagnostic.message
        );
        self.diagnostics.push(diagnostic);
    }
}
