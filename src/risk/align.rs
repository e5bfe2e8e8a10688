//! Alignment of N equity curves onto a common calendar.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::engine::types::{EquityCurve, StrategyId};
use crate::error::EngineError;
use crate::manifest::{Diagnostic, DiagnosticKind};

/// Minimum common-calendar length the intersection policy will accept.
pub const MIN_OVERLAP_BARS: usize = 30;

/// Bar-level return magnitude beyond which a bar is flagged (never clipped).
pub const OUTLIER_RETURN: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum AlignPolicy {
    /// Common calendar = intersection of every stream's support. Fails with
    /// `InsufficientOverlap` below [`MIN_OVERLAP_BARS`].
    #[default]
    Intersection,
    /// Common calendar = union of supports; bars missing from a stream
    /// contribute a zero (flat) return. Potentially biased; diagnosed.
    UnionForwardFill,
}

/// The (N x T) return matrix and its shared calendar.
#[derive(Debug, Clone)]
pub struct AlignedReturns {
    pub index: Vec<DateTime<Utc>>,
    pub matrix: Vec<Vec<f64>>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Align the constituents' equity curves and derive per-bar returns.
///
/// The first retained bar's return is taken against the equity value of the
/// bar immediately preceding the common calendar in that stream, so no
/// leading placeholder remains; a stream whose very first bar opens the
/// calendar contributes a zero first return.
pub fn align(
    curves: &[(StrategyId, EquityCurve)],
    policy: AlignPolicy,
) -> Result<AlignedReturns, EngineError> {
    let supports: Vec<BTreeMap<DateTime<Utc>, f64>> = curves
        .iter()
        .map(|(_, curve)| {
            curve
                .timestamps
                .iter()
                .copied()
                .zip(curve.values.iter().copied())
                .collect()
        })
        .collect();

    let index: Vec<DateTime<Utc>> = match policy {
        AlignPolicy::Intersection => {
            let mut common: Option<BTreeSet<DateTime<Utc>>> = None;
            for support in &supports {
                let keys: BTreeSet<DateTime<Utc>> = support.keys().copied().collect();
                common = Some(match common {
                    None => keys,
                    Some(acc) => acc.intersection(&keys).copied().collect(),
                });
            }
            common.unwrap_or_default().into_iter().collect()
        }
        AlignPolicy::UnionForwardFill => {
            let mut union = BTreeSet::new();
            for support in &supports {
                union.extend(support.keys().copied());
            }
            union.into_iter().collect()
        }
    };

    if policy == AlignPolicy::Intersection && index.len() < MIN_OVERLAP_BARS {
        return Err(EngineError::InsufficientOverlap {
            overlap: index.len(),
            min: MIN_OVERLAP_BARS,
        });
    }

    let mut diagnostics = Vec::new();
    if policy == AlignPolicy::UnionForwardFill {
        diagnostics.push(Diagnostic::new(
            DiagnosticKind::ForwardFill,
            "aligner",
            "union alignment fills missing bars with flat returns; \
             covariances may be biased toward zero",
        ));
    }

    let mut matrix = Vec::with_capacity(curves.len());
    for ((id, _), support) in curves.iter().zip(&supports) {
        let mut returns = Vec::with_capacity(index.len());
        let mut prev: Option<f64> = index
            .first()
            .and_then(|first| support.range(..*first).next_back().map(|(_, &e)| e));

        for ts in &index {
            match support.get(ts) {
                Some(&equity) => {
                    let r = match prev {
                        Some(p) if p != 0.0 => equity / p - 1.0,
                        _ => 0.0,
                    };
                    returns.push(r);
                    prev = Some(equity);
                }
                // only reachable under union alignment
                None => returns.push(0.0),
            }
        }

        let outliers: Vec<usize> = returns
            .iter()
            .enumerate()
            .filter(|(_, r)| r.abs() > OUTLIER_RETURN)
            .map(|(i, _)| i)
            .collect();
        if !outliers.is_empty() {
            diagnostics.push(Diagnostic::new(
                DiagnosticKind::OutlierReturn,
                id.to_string(),
                format!(
                    "{} bar-level returns exceed |{OUTLIER_RETURN}| (first at calendar index {})",
                    outliers.len(),
                    outliers[0]
                ),
            ));
        }

        matrix.push(returns);
    }

    Ok(AlignedReturns {
        index,
        matrix,
        diagnostics,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(day: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::days(day)
    }

    fn id(name: &str) -> StrategyId {
        StrategyId {
            ticker: name.into(),
            strategy: "SMA".into(),
            fast: 3,
            slow: 8,
            signal: 0,
        }
    }

    fn curve(days: impl IntoIterator<Item = i64>, start: f64, step: f64) -> EquityCurve {
        let timestamps: Vec<DateTime<Utc>> = days.into_iter().map(ts).collect();
        let values = (0..timestamps.len())
            .map(|i| start + step * i as f64)
            .collect();
        EquityCurve { timestamps, values }
    }

    #[test]
    fn insufficient_overlap_is_typed() {
        // Supports intersect on only 20 bars
        let a = curve(0..40, 1.0, 0.01);
        let b = curve(20..60, 1.0, 0.01);
        let err = align(
            &[(id("A"), a), (id("B"), b)],
            AlignPolicy::Intersection,
        )
        .unwrap_err();
        match err {
            EngineError::InsufficientOverlap { overlap, min } => {
                assert_eq!(overlap, 20);
                assert_eq!(min, MIN_OVERLAP_BARS);
            }
            other => panic!("expected InsufficientOverlap, got {other:?}"),
        }
    }

    #[test]
    fn union_fill_covers_the_gap_and_diagnoses() {
        let a = curve(0..40, 1.0, 0.01);
        let b = curve(20..60, 1.0, 0.01);
        let aligned = align(
            &[(id("A"), a), (id("B"), b)],
            AlignPolicy::UnionForwardFill,
        )
        .unwrap();
        assert_eq!(aligned.index.len(), 60);
        assert!(aligned
            .diagnostics
            .iter()
            .any(|d| d.kind == DiagnosticKind::ForwardFill));
        // stream B is flat-filled over its missing prefix
        assert!(aligned.matrix[1][..20].iter().all(|r| *r == 0.0));
        // and live afterwards
        assert!(aligned.matrix[1][21] != 0.0);
    }

    #[test]
    fn intersection_is_deterministic() {
        let a = curve(0..45, 1.0, 0.01);
        let b = curve(5..50, 1.0, 0.02);
        let pair = [(id("A"), a), (id("B"), b)];
        let first = align(&pair, AlignPolicy::Intersection).unwrap();
        let second = align(&pair, AlignPolicy::Intersection).unwrap();
        assert_eq!(first.index, second.index);
        assert_eq!(first.matrix, second.matrix);
    }

    #[test]
    fn first_retained_bar_uses_preceding_equity() {
        // Stream A has bars before the intersection: its first aligned
        // return must be computed against the bar just before the calendar.
        let a = curve(0..40, 1.0, 0.1); // values 1.0, 1.1, 1.2, ...
        let b = curve(5..40, 1.0, 0.1);
        let aligned = align(&[(id("A"), a), (id("B"), b)], AlignPolicy::Intersection).unwrap();
        assert_eq!(aligned.index.len(), 35);
        // A at day 5 has equity 1.5; preceding bar (day 4) 1.4
        let expected = 1.5 / 1.4 - 1.0;
        assert!((aligned.matrix[0][0] - expected).abs() < 1e-12);
        // B's first bar opens its own support: zero first return, no NaN
        assert!((aligned.matrix[1][0] - 0.0).abs() < f64::EPSILON);
        assert!(aligned.matrix.iter().flatten().all(|r| r.is_finite()));
    }

    #[test]
    fn matrix_rows_share_identical_length() {
        let a = curve(0..40, 1.0, 0.01);
        let b = curve(3..45, 1.0, 0.015);
        let c = curve(0..50, 1.0, 0.02);
        let aligned = align(
            &[(id("A"), a), (id("B"), b), (id("C"), c)],
            AlignPolicy::Intersection,
        )
        .unwrap();
        for row in &aligned.matrix {
            assert_eq!(row.len(), aligned.index.len());
        }
    }

    #[test]
    fn outlier_bars_are_flagged_not_clipped() {
        let mut a = curve(0..40, 1.0, 0.001);
        a.values[10] = a.values[9] * 1.8; // +80% bar
        let b = curve(0..40, 1.0, 0.001);
        let aligned = align(&[(id("A"), a), (id("B"), b)], AlignPolicy::Intersection).unwrap();
        assert!(aligned
            .diagnostics
            .iter()
            .any(|d| d.kind == DiagnosticKind::OutlierReturn));
        // the raw return is preserved
        assert!(aligned.matrix[0][10] > OUTLIER_RETURN);
    }
}
