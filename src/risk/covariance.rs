//! Sample covariance with Ledoit-Wolf shrinkage toward a scaled identity.

use nalgebra::DMatrix;

use crate::error::EngineError;

/// Eigenvalues below this are treated as a violated PSD property.
const EIGEN_FLOOR: f64 = -1e-10;

/// Relative threshold under the largest eigenvalue below which an
/// eigenvalue counts as zero for rank purposes.
const RANK_TOLERANCE: f64 = 1e-12;

/// The estimated covariance and, when shrinkage had to be applied, the
/// closed-form Ledoit-Wolf intensity used.
#[derive(Debug, Clone)]
pub struct CovarianceEstimate {
    pub sigma: DMatrix<f64>,
    pub shrinkage: Option<f64>,
}

/// Estimate the covariance of an (N x T) return matrix.
///
/// The sample estimator (ddof = 1) is used as-is when full-rank and PSD.
/// Otherwise the Ledoit-Wolf estimator pulls it toward `mu * I`; if even
/// the shrunk matrix is degenerate the whole concurrency stage fails.
/// There is no default-correlation fallback.
pub fn estimate(matrix: &[Vec<f64>]) -> Result<CovarianceEstimate, EngineError> {
    let n = matrix.len();
    if n == 0 {
        return Err(EngineError::CovarianceDegenerate {
            reason: "no return streams".into(),
        });
    }
    let t = matrix[0].len();
    if t < 2 {
        return Err(EngineError::CovarianceDegenerate {
            reason: format!("{t} observations, need at least 2"),
        });
    }

    let sample = sample_covariance(matrix);
    if is_well_conditioned(&sample) {
        return Ok(CovarianceEstimate {
            sigma: sample,
            shrinkage: None,
        });
    }

    let (shrunk, intensity) = ledoit_wolf(matrix, &sample);
    tracing::info!(intensity, "sample covariance degenerate, applied shrinkage");
    if !is_well_conditioned(&shrunk) {
        return Err(EngineError::CovarianceDegenerate {
            reason: format!("matrix remains ill-conditioned after shrinkage ({intensity:.4})"),
        });
    }

    Ok(CovarianceEstimate {
        sigma: shrunk,
        shrinkage: Some(intensity),
    })
}

/// Sample covariance, ddof = 1, exactly symmetric: the upper triangle is
/// computed once and mirrored.
pub fn sample_covariance(matrix: &[Vec<f64>]) -> DMatrix<f64> {
    let n = matrix.len();
    let t = matrix[0].len();
    let means: Vec<f64> = matrix
        .iter()
        .map(|row| row.iter().sum::<f64>() / t as f64)
        .collect();

    let mut sigma = DMatrix::zeros(n, n);
    for i in 0..n {
        for j in i..n {
            let mut acc = 0.0;
            for k in 0..t {
                acc += (matrix[i][k] - means[i]) * (matrix[j][k] - means[j]);
            }
            let cov = acc / (t as f64 - 1.0);
            sigma[(i, j)] = cov;
            sigma[(j, i)] = cov;
        }
    }
    sigma
}

/// Full rank and no eigenvalue below the PSD floor.
fn is_well_conditioned(sigma: &DMatrix<f64>) -> bool {
    let n = sigma.nrows();
    let eigen = sigma.clone().symmetric_eigen();
    let max_eig = eigen.eigenvalues.iter().fold(0.0f64, |a, &b| a.max(b.abs()));
    if max_eig == 0.0 {
        return false;
    }
    let rank = eigen
        .eigenvalues
        .iter()
        .filter(|&&v| v > max_eig * RANK_TOLERANCE)
        .count();
    let min_eig = eigen.eigenvalues.iter().copied().fold(f64::MAX, f64::min);
    rank == n && min_eig > EIGEN_FLOOR
}

/// Closed-form Ledoit-Wolf (2004) shrinkage toward the scaled identity
/// `mu * I`, `mu = trace(S) / N`. Returns the shrunk matrix and the
/// intensity `rho` in [0, 1].
fn ledoit_wolf(matrix: &[Vec<f64>], sample: &DMatrix<f64>) -> (DMatrix<f64>, f64) {
    let n = matrix.len();
    let t = matrix[0].len();
    let means: Vec<f64> = matrix
        .iter()
        .map(|row| row.iter().sum::<f64>() / t as f64)
        .collect();

    let mu = sample.trace() / n as f64;

    // d^2 = ||S - mu I||_F^2
    let mut d2 = 0.0;
    for i in 0..n {
        for j in 0..n {
            let target = if i == j { mu } else { 0.0 };
            d2 += (sample[(i, j)] - target).powi(2);
        }
    }

    // b^2 = min(d^2, (1/T^2) * sum_t ||x_t x_t' - S||_F^2)
    let mut b2_bar = 0.0;
    for k in 0..t {
        for i in 0..n {
            for j in 0..n {
                let outer = (matrix[i][k] - means[i]) * (matrix[j][k] - means[j]);
                b2_bar += (outer - sample[(i, j)]).powi(2);
            }
        }
    }
    b2_bar /= (t * t) as f64;
    let b2 = b2_bar.min(d2);

    let rho = if d2 > 0.0 { b2 / d2 } else { 0.0 };
    let mut shrunk = sample * (1.0 - rho);
    for i in 0..n {
        shrunk[(i, i)] += rho * mu;
    }
    (shrunk, rho)
}
