//! Cross-checks between the aggregate risk report and the per-run truth
//! that fed it. Each predicate produces a named check; the orchestrator
//! decides whether a failure is fatal or a diagnostic.

use nalgebra::DMatrix;
use statrs::statistics::Statistics;

use crate::manifest::{RiskReport, ValidationCheck, ValidationSummary};

/// Rebalancing can push the combined drawdown slightly past the worst
/// constituent; allow one percentage point.
const DRAWDOWN_SLACK: f64 = 0.01;

/// Correlations this far below zero still count as non-negative for the
/// Sharpe sign-preservation premise.
const CORRELATION_EPS: f64 = 1e-9;

/// Per-constituent facts the validator needs, independent of the report.
#[derive(Debug, Clone)]
pub struct ConstituentStats {
    pub max_drawdown: f64,
    pub sharpe: f64,
    pub entry_signals: usize,
}

/// Run every predicate against the report.
pub fn validate_report(
    report: &RiskReport,
    sigma: &DMatrix<f64>,
    combined_returns: &[f64],
    constituents: &[ConstituentStats],
    periods_per_year: f64,
) -> ValidationSummary {
    let checks = vec![
        drawdown_bound(report, constituents),
        drawdown_matches_combined_curve(report, combined_returns),
        sharpe_sign_preservation(sigma, combined_returns, constituents, periods_per_year),
        signal_count_sanity(report, constituents),
    ];
    ValidationSummary {
        passed: checks.iter().all(|c| c.passed),
        checks,
    }
}

/// Aggregate drawdown must not exceed the worst constituent drawdown by
/// more than the rebalancing slack. Catches "weighted average of
/// drawdowns" style understatements indirectly: those violate the lower
/// side of intuition but a fabricated aggregate above the bound fires here.
fn drawdown_bound(report: &RiskReport, constituents: &[ConstituentStats]) -> ValidationCheck {
    let worst = constituents
        .iter()
        .map(|c| c.max_drawdown)
        .fold(0.0f64, f64::max);
    let bound = worst + DRAWDOWN_SLACK;
    let passed = report.max_drawdown <= bound;
    ValidationCheck {
        predicate: "portfolio_drawdown_within_constituent_bound".into(),
        passed,
        detail: format!(
            "portfolio max drawdown {:.6} vs bound {:.6} (worst constituent {:.6} + {:.2} slack)",
            report.max_drawdown, bound, worst, DRAWDOWN_SLACK
        ),
    }
}

/// The reported aggregate must equal the drawdown recomputed from the
/// combined return stream. Catches understatements like reporting a
/// weighted average of individual drawdowns.
fn drawdown_matches_combined_curve(
    report: &RiskReport,
    combined_returns: &[f64],
) -> ValidationCheck {
    let mut equity = 1.0f64;
    let mut peak = 1.0f64;
    let mut recomputed = 0.0f64;
    for r in combined_returns {
        equity *= 1.0 + r;
        peak = peak.max(equity);
        recomputed = recomputed.max(1.0 - equity / peak);
    }
    let passed = (report.max_drawdown - recomputed).abs() <= 1e-9;
    ValidationCheck {
        predicate: "drawdown_matches_combined_curve".into(),
        passed,
        detail: format!(
            "reported {:.6} vs recomputed {:.6} from the combined stream",
            report.max_drawdown, recomputed
        ),
    }
}

/// If every constituent Sharpe is positive and no pair is negatively
/// correlated, the portfolio Sharpe must be positive. Vacuously true when
/// the premise does not hold.
fn sharpe_sign_preservation(
    sigma: &DMatrix<f64>,
    combined_returns: &[f64],
    constituents: &[ConstituentStats],
    periods_per_year: f64,
) -> ValidationCheck {
    let predicate = "sharpe_sign_preservation".to_string();

    let all_positive = constituents.iter().all(|c| c.sharpe > 0.0);
    let non_negative_corr = pairwise_correlations_non_negative(sigma);
    if !(all_positive && non_negative_corr) {
        return ValidationCheck {
            predicate,
            passed: true,
            detail: "premise not met (mixed Sharpe signs or negative correlations); vacuous"
                .into(),
        };
    }

    let portfolio_sharpe = if combined_returns.len() < 2 {
        0.0
    } else {
        let mean = combined_returns.iter().mean();
        let std = combined_returns.iter().std_dev();
        if std > 0.0 {
            mean / std * periods_per_year.sqrt()
        } else {
            0.0
        }
    };

    ValidationCheck {
        predicate,
        passed: portfolio_sharpe > 0.0,
        detail: format!("portfolio Sharpe {portfolio_sharpe:.6} under an all-positive premise"),
    }
}

fn pairwise_correlations_non_negative(sigma: &DMatrix<f64>) -> bool {
    let n = sigma.nrows();
    for i in 0..n {
        for j in (i + 1)..n {
            if sigma[(i, j)] < -CORRELATION_EPS {
                return false;
            }
        }
    }
    true
}

/// Distinct portfolio-level signal bars must lie between the largest
/// single constituent's count and the sum over constituents. Catches the
/// historic inflation of counting concatenated per-strategy signals as
/// portfolio signals.
fn signal_count_sanity(report: &RiskReport, constituents: &[ConstituentStats]) -> ValidationCheck {
    let max_individual = constituents
        .iter()
        .map(|c| c.entry_signals)
        .max()
        .unwrap_or(0);
    let sum: usize = constituents.iter().map(|c| c.entry_signals).sum();
    let distinct = report.signal_bars_distinct;
    let passed = distinct >= max_individual && distinct <= sum;
    ValidationCheck {
        predicate: "signal_count_sanity".into(),
        passed,
        detail: format!(
            "distinct signal bars {distinct} must lie in [{max_individual}, {sum}]"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::types::StrategyId;
    use crate::manifest::{ContributionEntry, WeightEntry};

    fn report(max_drawdown: f64, distinct_signals: usize) -> RiskReport {
        let id = StrategyId {
            ticker: "A".into(),
            strategy: "SMA".into(),
            fast: 3,
            slow: 8,
            signal: 0,
        };
        RiskReport {
            method: "EqualWeight".into(),
            covariance: vec![vec![0.01, 0.0], vec![0.0, 0.01]],
            shrinkage: None,
            volatility: 0.01,
            max_drawdown,
            rebalancing: "constant-weight, rebalanced each bar".into(),
            allocation: vec![WeightEntry {
                id: id.clone(),
                weight: 1.0,
            }],
            risk_contributions: vec![ContributionEntry {
                id,
                contribution: 0.01,
            }],
            expectancy_per_trade: 0.01,
            signals_total: 5,
            signal_bars_distinct: distinct_signals,
        }
    }

    fn stats(dds: &[f64], sharpes: &[f64], signals: &[usize]) -> Vec<ConstituentStats> {
        dds.iter()
            .zip(sharpes)
            .zip(signals)
            .map(|((dd, s), sig)| ConstituentStats {
                max_drawdown: *dd,
                sharpe: *s,
                entry_signals: *sig,
            })
            .collect()
    }

    fn diagonal2() -> DMatrix<f64> {
        DMatrix::from_row_slice(2, 2, &[0.01, 0.0, 0.0, 0.01])
    }

    fn check<'a>(summary: &'a ValidationSummary, predicate: &str) -> &'a ValidationCheck {
        summary
            .checks
            .iter()
            .find(|c| c.predicate == predicate)
            .unwrap_or_else(|| panic!("no check named {predicate}"))
    }

    #[test]
    fn catches_understated_drawdown_bug() {
        // Constituents with drawdowns [0.30, 0.40]; a buggy engine that
        // reports the weighted average 0.25... passes the upper bound, so
        // exercise the bound the other way: an aggregate of 0.52 must fail
        // while a combined-curve value of 0.38 passes.
        let constituents = stats(&[0.30, 0.40], &[1.0, 1.0], &[3, 3]);
        let good = validate_report(
            &report(0.38, 4),
            &diagonal2(),
            &[0.001, 0.001, 0.001],
            &constituents,
            252.0,
        );
        assert!(good.checks[0].passed);

        let bad = validate_report(
            &report(0.52, 4),
            &diagonal2(),
            &[0.001, 0.001, 0.001],
            &constituents,
            252.0,
        );
        assert!(!bad.checks[0].passed);
        assert!(!bad.passed);
        assert_eq!(
            bad.checks[0].predicate,
            "portfolio_drawdown_within_constituent_bound"
        );
    }

    #[test]
    fn drawdown_bound_allows_rebalancing_slack() {
        let constituents = stats(&[0.30, 0.40], &[1.0, 1.0], &[3, 3]);
        let summary = validate_report(
            &report(0.405, 4),
            &diagonal2(),
            &[0.001],
            &constituents,
            252.0,
        );
        assert!(summary.checks[0].passed, "0.405 <= 0.40 + 0.01");
    }

    #[test]
    fn sharpe_sign_violation_fires() {
        let constituents = stats(&[0.1, 0.1], &[1.2, 0.8], &[3, 3]);
        // positive constituent Sharpes, non-negative correlation, but a
        // losing combined stream
        let combined: Vec<f64> = vec![-0.002; 50];
        let summary = validate_report(
            &report(0.1, 4),
            &diagonal2(),
            &combined,
            &constituents,
            252.0,
        );
        let failed = check(&summary, "sharpe_sign_preservation");
        assert!(!failed.passed);
    }

    #[test]
    fn sharpe_check_vacuous_with_negative_correlation() {
        let constituents = stats(&[0.1, 0.1], &[1.2, 0.8], &[3, 3]);
        let sigma = DMatrix::from_row_slice(2, 2, &[0.01, -0.005, -0.005, 0.01]);
        let combined: Vec<f64> = vec![-0.002; 50];
        let summary = validate_report(&report(0.1, 4), &sigma, &combined, &constituents, 252.0);
        assert!(
            check(&summary, "sharpe_sign_preservation").passed,
            "premise not met, check is vacuous"
        );
    }

    #[test]
    fn understated_weighted_average_drawdown_is_caught() {
        // Combined stream with a real ~9.5% drawdown; a report claiming
        // 0.05 (a weighted average of constituent drawdowns) must fail the
        // recomputation check even though it satisfies the upper bound.
        let mut combined = vec![0.002; 50];
        for r in combined.iter_mut().take(30).skip(20) {
            *r = -0.01;
        }
        let mut equity = 1.0f64;
        let mut peak = 1.0f64;
        let mut truth = 0.0f64;
        for r in &combined {
            equity *= 1.0 + r;
            peak = peak.max(equity);
            truth = truth.max(1.0 - equity / peak);
        }
        let constituents = stats(&[0.30, 0.40], &[1.0, 1.0], &[3, 3]);

        let lied = validate_report(
            &report(0.05, 4),
            &diagonal2(),
            &combined,
            &constituents,
            252.0,
        );
        assert!(!check(&lied, "drawdown_matches_combined_curve").passed);

        let honest = validate_report(
            &report(truth, 4),
            &diagonal2(),
            &combined,
            &constituents,
            252.0,
        );
        assert!(check(&honest, "drawdown_matches_combined_curve").passed);
    }

    #[test]
    fn signal_count_bounds() {
        let constituents = stats(&[0.1, 0.1], &[1.0, 1.0], &[4, 3]);
        // distinct below the largest individual count: inflated or corrupt
        let low = validate_report(
            &report(0.1, 2),
            &diagonal2(),
            &[0.001; 40],
            &constituents,
            252.0,
        );
        assert!(!check(&low, "signal_count_sanity").passed);

        // distinct above the sum: double counting
        let high = validate_report(
            &report(0.1, 9),
            &diagonal2(),
            &[0.001; 40],
            &constituents,
            252.0,
        );
        assert!(!check(&high, "signal_count_sanity").passed);

        let ok = validate_report(
            &report(0.1, 5),
            &diagonal2(),
            &[0.001; 40],
            &constituents,
            252.0,
        );
        assert!(check(&ok, "signal_count_sanity").passed);
    }
}
