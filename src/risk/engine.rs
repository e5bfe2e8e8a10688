//! Concurrent-exposure analysis over a chosen strategy set.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use nalgebra::DMatrix;

use super::align::{align, AlignPolicy};
use super::allocation::{allocate, check_rc_sum, risk_contributions, AllocationMethod};
use super::covariance;
use crate::engine::types::{EquityCurve, StrategyId};
use crate::error::EngineError;
use crate::manifest::{ContributionEntry, Diagnostic, RiskReport, WeightEntry};

/// The combination assumption stated on every report: weights are held
/// constant, i.e. the portfolio rebalances to target every bar.
pub const REBALANCING_ASSUMPTION: &str = "constant-weight, rebalanced each bar";

/// One chosen strategy's inputs to the concurrency stage.
#[derive(Debug, Clone)]
pub struct ConstituentSeries {
    pub id: StrategyId,
    pub equity: EquityCurve,
    /// Expectancy per trade on the decimal scale. Percentage inputs are a
    /// schema violation upstream; this stage only ever sees decimals.
    pub expectancy_per_trade: f64,
    pub entry_timestamps: Vec<DateTime<Utc>>,
}

/// Everything the concurrency stage derives; the report is the serialized
/// part, the rest feeds the validator.
#[derive(Debug, Clone)]
pub struct RiskAnalysis {
    pub report: RiskReport,
    pub sigma: DMatrix<f64>,
    pub combined_returns: Vec<f64>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Align the constituents, estimate covariance, allocate, and derive the
/// portfolio risk figures.
pub fn analyze(
    constituents: &[ConstituentSeries],
    policy: AlignPolicy,
    method: &AllocationMethod,
) -> Result<RiskAnalysis, EngineError> {
    let pairs: Vec<(StrategyId, EquityCurve)> = constituents
        .iter()
        .map(|c| (c.id.clone(), c.equity.clone()))
        .collect();
    let aligned = align(&pairs, policy)?;

    let estimate = covariance::estimate(&aligned.matrix)?;
    let weights = allocate(method, &estimate.sigma)?;
    let (rc, sigma_p) = risk_contributions(&weights, &estimate.sigma);
    check_rc_sum(&rc, sigma_p)?;

    // Combined curve under the constant-weight assumption; its drawdown is
    // the portfolio drawdown. A weighted average of individual drawdowns
    // would understate it and is exactly what this stage must not do.
    let t = aligned.index.len();
    let mut combined_returns = Vec::with_capacity(t);
    for k in 0..t {
        let mut r = 0.0;
        for (i, row) in aligned.matrix.iter().enumerate() {
            r += weights[i] * row[k];
        }
        combined_returns.push(r);
    }
    let max_drawdown = drawdown_from_returns(&combined_returns);

    let expectancy: f64 = constituents
        .iter()
        .enumerate()
        .map(|(i, c)| weights[i] * c.expectancy_per_trade)
        .sum();

    let signals_total: usize = constituents.iter().map(|c| c.entry_timestamps.len()).sum();
    let distinct: BTreeSet<DateTime<Utc>> = constituents
        .iter()
        .flat_map(|c| c.entry_timestamps.iter().copied())
        .collect();

    let n = constituents.len();
    let covariance_rows: Vec<Vec<f64>> = (0..n)
        .map(|i| (0..n).map(|j| estimate.sigma[(i, j)]).collect())
        .collect();

    let report = RiskReport {
        method: method.label().to_string(),
        covariance: covariance_rows,
        shrinkage: estimate.shrinkage,
        volatility: sigma_p,
        max_drawdown,
        rebalancing: REBALANCING_ASSUMPTION.to_string(),
        allocation: constituents
            .iter()
            .enumerate()
            .map(|(i, c)| WeightEntry {
                id: c.id.clone(),
                weight: weights[i],
            })
            .collect(),
        risk_contributions: constituents
            .iter()
            .enumerate()
            .map(|(i, c)| ContributionEntry {
                id: c.id.clone(),
                contribution: rc[i],
            })
            .collect(),
        expectancy_per_trade: expectancy,
        signals_total,
        signal_bars_distinct: distinct.len(),
    };

    Ok(RiskAnalysis {
        report,
        sigma: estimate.sigma,
        combined_returns,
        diagnostics: aligned.diagnostics,
    })
}

/// Max drawdown of the equity path implied by a return series, with the
/// pre-first-bar equity of 1.0 included as a potential peak.
fn drawdown_from_returns(returns: &[f64]) -> f64 {
    let mut equity = 1.0;
    let mut peak = 1.0;
    let mut max_dd = 0.0;
    for r in returns {
        equity *= 1.0 + r;
        if equity > peak {
            peak = equity;
        }
        let dd = 1.0 - equity / peak;
        if dd > max_dd {
            max_dd = dd;
        }
    }
    max_dd
}
