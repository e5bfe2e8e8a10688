//! Minimum-criteria gate, composite scoring, and the four-bucket
//! metric-type aggregation over a sweep's surviving rows.

use garde::Validate;
use serde::{Deserialize, Serialize};

use super::types::{Bucket, MetricTypeLabel, PortfolioRow, TargetMetric};

/// Lower bounds a row must meet (inclusively) to survive the gate. Unset
/// bounds are not checked. A row whose profit factor is undefined fails
/// any configured profit-factor minimum.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct MinimumCriteria {
    #[garde(skip)]
    pub trades: Option<usize>,
    #[garde(inner(range(min = 0.0, max = 1.0)))]
    pub win_rate: Option<f64>,
    #[garde(inner(range(min = 0.0)))]
    pub profit_factor: Option<f64>,
    #[garde(skip)]
    pub sortino: Option<f64>,
    #[garde(skip)]
    pub expectancy_per_trade: Option<f64>,
    #[garde(skip)]
    pub beats_bnh: Option<bool>,
}

impl MinimumCriteria {
    pub fn passes(&self, row: &PortfolioRow) -> bool {
        let m = &row.metrics;
        if let Some(min) = self.trades {
            if m.trades < min {
                return false;
            }
        }
        if let Some(min) = self.win_rate {
            if !(m.win_rate >= min) {
                return false;
            }
        }
        if let Some(min) = self.profit_factor {
            // NaN (undefined) compares false and correctly fails the gate
            if !(m.profit_factor >= min) {
                return false;
            }
        }
        if let Some(min) = self.sortino {
            if !(m.sortino >= min) {
                return false;
            }
        }
        if let Some(min) = self.expectancy_per_trade {
            if !(m.expectancy_per_trade >= min) {
                return false;
            }
        }
        if let Some(required) = self.beats_bnh {
            if required && !m.beats_bnh {
                return false;
            }
        }
        true
    }
}

/// Drop rows failing the gate.
pub fn apply_gate(rows: Vec<PortfolioRow>, criteria: &MinimumCriteria) -> Vec<PortfolioRow> {
    let before = rows.len();
    let survivors: Vec<PortfolioRow> = rows.into_iter().filter(|r| criteria.passes(r)).collect();
    tracing::debug!(before, after = survivors.len(), "minimum-criteria gate");
    survivors
}

/// Assign the composite score over one surviving population:
///
/// `score = (2*n(win_rate) + n(trades) + n(sortino) + n(profit_factor)
///           + n(expectancy) + n(beats_bnh)) / 7`
///
/// where `n` is min-max normalization across the population (constant
/// columns normalize to 0.5, undefined values to 0.0).
pub fn assign_scores(rows: &mut [PortfolioRow]) {
    if rows.is_empty() {
        return;
    }

    let columns: [Vec<f64>; 6] = [
        rows.iter().map(|r| r.metrics.win_rate).collect(),
        rows.iter().map(|r| r.metrics.trades as f64).collect(),
        rows.iter().map(|r| r.metrics.sortino).collect(),
        rows.iter().map(|r| r.metrics.profit_factor).collect(),
        rows.iter().map(|r| r.metrics.expectancy_per_trade).collect(),
        rows.iter()
            .map(|r| if r.metrics.beats_bnh { 1.0 } else { 0.0 })
            .collect(),
    ];
    let normalized: Vec<Vec<f64>> = columns.iter().map(|c| min_max_normalize(c)).collect();

    for (i, row) in rows.iter_mut().enumerate() {
        let score = (2.0 * normalized[0][i]
            + normalized[1][i]
            + normalized[2][i]
            + normalized[3][i]
            + normalized[4][i]
            + normalized[5][i])
            / 7.0;
        row.metrics.score = score;
    }
}

fn min_max_normalize(values: &[f64]) -> Vec<f64> {
    let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    let Some((min, max)) = finite
        .iter()
        .copied()
        .fold(None, |acc: Option<(f64, f64)>, v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
    else {
        return vec![0.0; values.len()];
    };

    values
        .iter()
        .map(|&v| {
            if !v.is_finite() {
                0.0
            } else if (max - min).abs() < f64::EPSILON {
                0.5
            } else {
                (v - min) / (max - min)
            }
        })
        .collect()
}

/// Produce the labeled candidate multiset: for each target metric, the
/// Most / Least / Mean-closest / Median-closest rows, each carrying a
/// single label. The same strategy may appear several times under
/// different labels; deduplication is the best-aggregator's job.
pub fn aggregate(rows: &[PortfolioRow], targets: &[TargetMetric]) -> Vec<PortfolioRow> {
    let mut out = Vec::new();
    for &metric in targets {
        let finite: Vec<f64> = rows
            .iter()
            .map(|r| metric.value(&r.metrics))
            .filter(|v| v.is_finite())
            .collect();
        if finite.is_empty() {
            continue;
        }
        let mean = finite.iter().sum::<f64>() / finite.len() as f64;
        let median = median_of(&finite);

        for bucket in Bucket::all() {
            let candidate = match bucket {
                Bucket::Most => select_extreme(rows, metric, true),
                Bucket::Least => select_extreme(rows, metric, false),
                Bucket::Mean => select_closest(rows, metric, mean),
                Bucket::Median => select_closest(rows, metric, median),
            };
            if let Some(row) = candidate {
                let mut labeled = row.clone();
                labeled.labels = vec![MetricTypeLabel { bucket, metric }];
                out.push(labeled);
            }
        }
    }
    out
}

fn median_of(sortable: &[f64]) -> f64 {
    let mut values = sortable.to_vec();
    values.sort_by(|a, b| a.partial_cmp(b).expect("finite values"));
    let n = values.len();
    if n % 2 == 1 {
        values[n / 2]
    } else {
        (values[n / 2 - 1] + values[n / 2]) / 2.0
    }
}

/// Row with the highest (or lowest) metric value; ties break to the
/// lexicographically smallest strategy id. NaN never competes.
fn select_extreme(rows: &[PortfolioRow], metric: TargetMetric, highest: bool) -> Option<&PortfolioRow> {
    let mut best: Option<(&PortfolioRow, f64)> = None;
    for row in rows {
        let v = metric.value(&row.metrics);
        if !v.is_finite() {
            continue;
        }
        best = Some(match best {
            None => (row, v),
            Some((cur, cur_v)) => {
                let wins = if highest { v > cur_v } else { v < cur_v };
                let ties = v == cur_v && row.id < cur.id;
                if wins || ties {
                    (row, v)
                } else {
                    (cur, cur_v)
                }
            }
        });
    }
    best.map(|(row, _)| row)
}

/// Row whose metric value is closest to `target`; ties break to the
/// lexicographically smallest strategy id.
fn select_closest(rows: &[PortfolioRow], metric: TargetMetric, target: f64) -> Option<&PortfolioRow> {
    let mut best: Option<(&PortfolioRow, f64)> = None;
    for row in rows {
        let v = metric.value(&row.metrics);
        if !v.is_finite() {
            continue;
        }
        let distance = (v - target).abs();
        best = Some(match best {
            None => (row, distance),
            Some((cur, cur_d)) => {
                if distance < cur_d || (distance == cur_d && row.id < cur.id) {
                    (row, distance)
                } else {
                    (cur, cur_d)
                }
            }
        });
    }
    best.map(|(row, _)| row)
}
