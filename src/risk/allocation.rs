//! Allocation weight schemes and risk-contribution arithmetic.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Iteration cap for the risk-parity solver.
const MAX_ITERATIONS: usize = 500;

/// Convergence criterion: spread of risk contributions relative to
/// portfolio volatility.
const CONVERGENCE_TOL: f64 = 1e-6;

/// Relative tolerance on the risk-contribution sum invariant.
pub const RC_SUM_TOL: f64 = 1e-9;

/// How portfolio weights are chosen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "type")]
pub enum AllocationMethod {
    #[default]
    EqualWeight,
    InverseVolatility,
    RiskParity,
    /// Externally supplied target ratios, normalized to sum to 1.
    RatioBased { ratios: Vec<f64> },
}

impl AllocationMethod {
    pub fn label(&self) -> &'static str {
        match self {
            AllocationMethod::EqualWeight => "EqualWeight",
            AllocationMethod::InverseVolatility => "InverseVolatility",
            AllocationMethod::RiskParity => "RiskParity",
            AllocationMethod::RatioBased { .. } => "RatioBased",
        }
    }
}

/// Compute the weight vector for `method` against the covariance `sigma`.
/// Weights are non-negative and sum to 1.
pub fn allocate(
    method: &AllocationMethod,
    sigma: &DMatrix<f64>,
) -> Result<DVector<f64>, EngineError> {
    let n = sigma.nrows();
    match method {
        AllocationMethod::EqualWeight => Ok(DVector::from_element(n, 1.0 / n as f64)),
        AllocationMethod::InverseVolatility => inverse_volatility(sigma),
        AllocationMethod::RiskParity => risk_parity(sigma),
        AllocationMethod::RatioBased { ratios } => ratio_based(ratios, n),
    }
}

/// `sigma_p = sqrt(w' Sigma w)` and the per-strategy contributions
/// `RC_i = w_i (Sigma w)_i / sigma_p`, which sum to `sigma_p`.
pub fn risk_contributions(weights: &DVector<f64>, sigma: &DMatrix<f64>) -> (DVector<f64>, f64) {
    let marginal = sigma * weights;
    let variance = weights.dot(&marginal);
    let sigma_p = variance.max(0.0).sqrt();
    if sigma_p == 0.0 {
        return (DVector::zeros(weights.len()), 0.0);
    }
    let rc = weights.component_mul(&marginal) / sigma_p;
    (rc, sigma_p)
}

/// Enforce `|sum(RC) - sigma_p| <= 1e-9 * sigma_p`. A violation is a bug
/// in the arithmetic, not a data problem.
pub fn check_rc_sum(rc: &DVector<f64>, sigma_p: f64) -> Result<(), EngineError> {
    let sum: f64 = rc.iter().sum();
    if (sum - sigma_p).abs() > RC_SUM_TOL * sigma_p.max(f64::MIN_POSITIVE) {
        return Err(EngineError::InternalInvariant(format!(
            "risk contributions sum to {sum}, expected {sigma_p}"
        )));
    }
    Ok(())
}

fn inverse_volatility(sigma: &DMatrix<f64>) -> Result<DVector<f64>, EngineError> {
    let n = sigma.nrows();
    let mut raw = DVector::zeros(n);
    for i in 0..n {
        let variance = sigma[(i, i)];
        if variance <= 0.0 {
            return Err(EngineError::CovarianceDegenerate {
                reason: format!("non-positive variance on diagonal index {i}"),
            });
        }
        raw[i] = 1.0 / variance.sqrt();
    }
    let total: f64 = raw.iter().sum();
    Ok(raw / total)
}

/// Multiplicative iteration toward equal risk contributions: scale each
/// weight by `target / RC_i` and renormalize until the contribution spread
/// falls under `1e-6 * sigma_p`, or give up at the iteration cap.
fn risk_parity(sigma: &DMatrix<f64>) -> Result<DVector<f64>, EngineError> {
    let n = sigma.nrows();
    let mut weights = inverse_volatility(sigma)?;

    for _ in 0..MAX_ITERATIONS {
        let (rc, sigma_p) = risk_contributions(&weights, sigma);
        let max = rc.iter().copied().fold(f64::MIN, f64::max);
        let min = rc.iter().copied().fold(f64::MAX, f64::min);
        if max - min < CONVERGENCE_TOL * sigma_p {
            return Ok(weights);
        }
        let target = sigma_p / n as f64;
        for i in 0..n {
            weights[i] *= target / rc[i].max(f64::MIN_POSITIVE);
        }
        let total: f64 = weights.iter().sum();
        weights /= total;
    }

    Err(EngineError::AllocationDivergent {
        iterations: MAX_ITERATIONS,
    })
}

fn ratio_based(ratios: &[f64], n: usize) -> Result<DVector<f64>, EngineError> {
    if ratios.len() != n {
        return Err(EngineError::SchemaError {
            context: format!("{} allocation ratios supplied for {n} strategies", ratios.len()),
        });
    }
    if ratios.iter().any(|r| !r.is_finite() || *r < 0.0) {
        return Err(EngineError::SchemaError {
            context: "allocation ratios must be finite and non-negative".into(),
        });
    }
    let total: f64 = ratios.iter().sum();
    if total <= 0.0 {
        return Err(EngineError::SchemaError {
            context: "allocation ratios must not all be zero".into(),
        });
    }
    Ok(DVector::from_iterator(n, ratios.iter().map(|r| r / total)))
}
