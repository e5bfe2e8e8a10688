use statrs::statistics::Statistics;

use super::types::{EquityCurve, PortfolioMetrics, Trade};

/// Maximum finite value for unbounded ratio metrics (profit factor, omega)
/// when the losing side is empty. Avoids `f64::INFINITY`, which is not a
/// valid JSON number.
pub(crate) const RATIO_CAP: f64 = 999.99;

/// Compute the canonical metric set from a trade list and equity curve.
///
/// `buy_hold_return` is the benchmark total return over the same window
/// (first post-warm-up close to final close). `periods_per_year` comes from
/// the frame's timeframe. The composite `score` is populated later by the
/// portfolio filter; it starts at 0.
pub fn compute_metrics(
    trades: &[Trade],
    equity: &EquityCurve,
    buy_hold_return: f64,
    periods_per_year: f64,
) -> PortfolioMetrics {
    let trade = trade_level(trades);
    let curve = curve_level(equity, periods_per_year);

    PortfolioMetrics {
        trades: trades.len(),
        win_rate: trade.win_rate,
        total_return: curve.total_return,
        avg_winning_trade: trade.avg_winning_trade,
        avg_losing_trade: trade.avg_losing_trade,
        profit_factor: trade.profit_factor,
        expectancy_per_trade: trade.expectancy,
        sharpe: curve.sharpe,
        sortino: curve.sortino,
        omega: curve.omega,
        max_drawdown: curve.max_drawdown,
        calmar: curve.calmar,
        beats_bnh: curve.total_return > buy_hold_return,
        score: 0.0,
    }
}

struct TradeLevel {
    win_rate: f64,
    avg_winning_trade: f64,
    avg_losing_trade: f64,
    profit_factor: f64,
    expectancy: f64,
}

fn trade_level(trades: &[Trade]) -> TradeLevel {
    if trades.is_empty() {
        return TradeLevel {
            win_rate: 0.0,
            avg_winning_trade: 0.0,
            avg_losing_trade: 0.0,
            profit_factor: f64::NAN,
            expectancy: 0.0,
        };
    }

    let total = trades.len() as f64;
    let mut winners = 0usize;
    let mut losers = 0usize;
    let mut win_sum = 0.0;
    let mut loss_sum = 0.0;
    let mut ret_sum = 0.0;

    for t in trades {
        ret_sum += t.ret;
        if t.ret > 0.0 {
            winners += 1;
            win_sum += t.ret;
        } else if t.ret < 0.0 {
            losers += 1;
            loss_sum += t.ret;
        }
    }

    let profit_factor = if loss_sum < 0.0 {
        win_sum / loss_sum.abs()
    } else if winners > 0 {
        RATIO_CAP
    } else {
        0.0
    };

    TradeLevel {
        win_rate: winners as f64 / total,
        avg_winning_trade: if winners > 0 { win_sum / winners as f64 } else { 0.0 },
        avg_losing_trade: if losers > 0 { loss_sum / losers as f64 } else { 0.0 },
        profit_factor,
        expectancy: ret_sum / total,
    }
}

struct CurveLevel {
    total_return: f64,
    sharpe: f64,
    sortino: f64,
    omega: f64,
    max_drawdown: f64,
    calmar: f64,
}

fn curve_level(equity: &EquityCurve, periods_per_year: f64) -> CurveLevel {
    let total_return = equity.final_equity() - 1.0;
    let max_drawdown = equity.max_drawdown();
    let returns = equity.log_returns();

    let annualize = periods_per_year.sqrt();
    let (sharpe, sortino, omega) = if returns.len() < 2 {
        (0.0, 0.0, f64::NAN)
    } else {
        let mean = returns.iter().mean();
        let std = returns.iter().std_dev();
        let sharpe = if std > 0.0 { mean / std * annualize } else { 0.0 };

        let clipped: Vec<f64> = returns.iter().map(|r| r.min(0.0)).collect();
        let downside = clipped.iter().std_dev();
        let sortino = if downside > 0.0 {
            mean / downside * annualize
        } else {
            0.0
        };

        let upside: f64 = returns.iter().map(|r| r.max(0.0)).sum();
        let downside_sum: f64 = returns.iter().map(|r| (-r).max(0.0)).sum();
        let omega = if downside_sum > 0.0 {
            upside / downside_sum
        } else if upside > 0.0 {
            RATIO_CAP
        } else {
            f64::NAN
        };
        (sharpe, sortino, omega)
    };

    let calmar = if max_drawdown > 0.0 && !returns.is_empty() {
        let annualized_return =
            equity.final_equity().powf(periods_per_year / returns.len() as f64) - 1.0;
        annualized_return / max_drawdown
    } else {
        f64::NAN
    };

    CurveLevel {
        total_return,
        sharpe,
        sortino,
        omega,
        max_drawdown,
        calmar,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::types::TradeSide;
    use chrono::{TimeZone, Utc};

    fn curve(values: &[f64]) -> EquityCurve {
        let timestamps = (0..values.len())
            .map(|i| {
                Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
                    + chrono::Duration::days(i as i64)
            })
            .collect();
        EquityCurve {
            timestamps,
            values: values.to_vec(),
        }
    }

    fn trade(ret: f64) -> Trade {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        Trade {
            entry_ts: ts,
            entry_price: 100.0,
            exit_ts: ts + chrono::Duration::days(5),
            exit_price: 100.0 * (1.0 + ret),
            side: TradeSide::Long,
            ret,
            bars_held: 5,
            mfe: ret.max(0.0),
            mae: ret.min(0.0),
            still_open: false,
        }
    }

    #[test]
    fn zero_trades_is_a_valid_row() {
        let m = compute_metrics(&[], &curve(&[1.0, 1.0, 1.0]), 0.05, 252.0);
        assert_eq!(m.trades, 0);
        assert!((m.win_rate - 0.0).abs() < f64::EPSILON);
        assert!(m.profit_factor.is_nan());
        assert!((m.expectancy_per_trade - 0.0).abs() < f64::EPSILON);
        assert!(!m.beats_bnh);
    }

    #[test]
    fn win_rate_and_averages() {
        let trades = vec![trade(0.10), trade(-0.05), trade(0.20), trade(-0.15)];
        let m = compute_metrics(&trades, &curve(&[1.0, 1.1]), 0.0, 252.0);
        assert!((m.win_rate - 0.5).abs() < 1e-12);
        assert!((m.avg_winning_trade - 0.15).abs() < 1e-12);
        assert!((m.avg_losing_trade - (-0.10)).abs() < 1e-12);
        assert!((m.profit_factor - 0.30 / 0.20).abs() < 1e-12);
        assert!((m.expectancy_per_trade - 0.025).abs() < 1e-12);
    }

    #[test]
    fn no_losers_caps_profit_factor() {
        let trades = vec![trade(0.10), trade(0.05)];
        let m = compute_metrics(&trades, &curve(&[1.0, 1.15]), 0.0, 252.0);
        assert!((m.profit_factor - RATIO_CAP).abs() < f64::EPSILON);
        assert!(m.profit_factor.is_finite());
    }

    #[test]
    fn all_losers_zero_profit_factor() {
        let trades = vec![trade(-0.10), trade(-0.05)];
        let m = compute_metrics(&trades, &curve(&[1.0, 0.85]), 0.0, 252.0);
        assert!((m.profit_factor - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn sharpe_positive_on_rising_curve() {
        let values: Vec<f64> = (0..40).map(|i| 1.0 + f64::from(i) * 0.01).collect();
        let m = compute_metrics(&[], &curve(&values), 0.0, 252.0);
        assert!(m.sharpe > 0.0);
        assert!((m.max_drawdown - 0.0).abs() < f64::EPSILON);
        assert!(m.calmar.is_nan(), "calmar undefined when drawdown is zero");
    }

    #[test]
    fn sortino_zero_without_downside() {
        let values: Vec<f64> = (0..10).map(|i| 1.0 + f64::from(i) * 0.01).collect();
        let m = compute_metrics(&[], &curve(&values), 0.0, 252.0);
        // min(r, 0) is identically zero on a monotonic rise
        assert!((m.sortino - 0.0).abs() < f64::EPSILON);
        assert!((m.omega - RATIO_CAP).abs() < f64::EPSILON);
    }

    #[test]
    fn omega_matches_gain_loss_ratio() {
        let m = compute_metrics(&[], &curve(&[1.0, 1.1, 1.0]), 0.0, 252.0);
        let up = (1.1f64).ln();
        let down = (1.1f64).ln(); // symmetric round trip in log space
        assert!((m.omega - up / down).abs() < 1e-12);
    }

    #[test]
    fn calmar_uses_annualized_return() {
        let values = vec![1.0, 1.2, 1.1, 1.3];
        let eq = curve(&values);
        let m = compute_metrics(&[], &eq, 0.0, 252.0);
        let ann = (1.3f64).powf(252.0 / 3.0) - 1.0;
        let expected = ann / eq.max_drawdown();
        assert!((m.calmar - expected).abs() < 1e-9);
    }

    #[test]
    fn beats_bnh_strict_comparison() {
        let m = compute_metrics(&[], &curve(&[1.0, 1.1]), 0.1, 252.0);
        // total_return == 0.1 exactly: must not beat an equal benchmark
        assert!((m.total_return - 0.1).abs() < 1e-12);
        assert!(!m.beats_bnh);
    }

    #[test]
    fn flat_curve_has_zero_sharpe_not_nan() {
        let m = compute_metrics(&[], &curve(&[1.0, 1.0, 1.0, 1.0]), 0.0, 252.0);
        assert!((m.sharpe - 0.0).abs() < f64::EPSILON);
        assert!((m.sortino - 0.0).abs() < f64::EPSILON);
        assert!(m.omega.is_nan());
    }
}
