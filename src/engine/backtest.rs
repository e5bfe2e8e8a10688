use chrono::{DateTime, Utc};

use super::metrics::compute_metrics;
use super::types::{EquityCurve, PortfolioMetrics, Trade, TradeSide};
use crate::error::EngineError;
use crate::frame::PriceFrame;
use crate::signals::{build_signals, RsiFilter, SignalStream, StrategyKind};

/// Everything one simulated run produces.
#[derive(Debug, Clone)]
pub struct BacktestOutput {
    pub trades: Vec<Trade>,
    pub equity: EquityCurve,
    pub metrics: PortfolioMetrics,
}

/// Generate signals and simulate a single strategy on a frame.
pub fn run_backtest(
    frame: &PriceFrame,
    kind: &StrategyKind,
    side: TradeSide,
    rsi_filter: Option<&RsiFilter>,
) -> Result<BacktestOutput, EngineError> {
    let signals = build_signals(frame, kind, side, rsi_filter)?;
    Ok(run_with_signals(frame, &signals, side))
}

/// Simulate a pre-built signal stream. The execution model is simplified,
/// fully-invested and single-position: an entry signalled on bar `t` fills
/// at the close of bar `t + 1`; an exit signalled on bar `t` fills at the
/// close of bar `t`. Fees and slippage are zero. An exit landing on the
/// bar an entry fills is dropped; the position runs to the next exit or
/// the final-bar mark. A position still open at the last bar is closed
/// mark-to-last-close and flagged `still_open`. Entries that would fill on
/// the final bar never open: a zero-duration mark carries no information.
pub fn run_with_signals(
    frame: &PriceFrame,
    signals: &SignalStream,
    side: TradeSide,
) -> BacktestOutput {
    let w = signals.warm_up;
    let n = frame.len();
    debug_assert!(n > w, "caller guarantees the frame outlives the warm-up");

    let close = frame.close();
    let high = frame.high();
    let low = frame.low();
    let ts = frame.timestamps();

    let mut timestamps = Vec::with_capacity(n - w);
    let mut values = Vec::with_capacity(n - w);
    let mut equity_val = 1.0;
    let mut trades = Vec::new();
    let mut open: Option<OpenPosition> = None;

    for t in w..n {
        if let Some(pos) = &mut open {
            if t > pos.entry_idx {
                let bar_ret = close[t] / close[t - 1] - 1.0;
                equity_val *= 1.0 + side.multiplier() * bar_ret;
                pos.observe(high[t], low[t], side);
            }
        }
        timestamps.push(ts[t]);
        values.push(equity_val);

        if signals.exits[t] {
            if let Some(pos) = open.take() {
                trades.push(pos.close(t, ts[t], close[t], side, false));
            }
        }
        if open.is_none() && t + 1 < n && signals.entries[t - 1] {
            open = Some(OpenPosition::new(t, ts[t], close[t]));
        }
    }

    if let Some(pos) = open.take() {
        let last = n - 1;
        trades.push(pos.close(last, ts[last], close[last], side, true));
    }

    let equity = EquityCurve { timestamps, values };
    let buy_hold = close[n - 1] / close[w] - 1.0;
    let metrics = compute_metrics(
        &trades,
        &equity,
        buy_hold,
        frame.timeframe().periods_per_year(),
    );

    BacktestOutput {
        trades,
        equity,
        metrics,
    }
}

struct OpenPosition {
    entry_idx: usize,
    entry_ts: DateTime<Utc>,
    entry_price: f64,
    /// Most favorable intra-bar price seen while open (highs for longs,
    /// lows for shorts), seeded at the entry price.
    favorable: f64,
    adverse: f64,
}

impl OpenPosition {
    fn new(entry_idx: usize, entry_ts: DateTime<Utc>, entry_price: f64) -> Self {
        Self {
            entry_idx,
            entry_ts,
            entry_price,
            favorable: entry_price,
            adverse: entry_price,
        }
    }

    fn observe(&mut self, high: f64, low: f64, side: TradeSide) {
        match side {
            TradeSide::Long => {
                self.favorable = self.favorable.max(high);
                self.adverse = self.adverse.min(low);
            }
            TradeSide::Short => {
                self.favorable = self.favorable.min(low);
                self.adverse = self.adverse.max(high);
            }
        }
    }

    fn close(
        self,
        exit_idx: usize,
        exit_ts: DateTime<Utc>,
        exit_price: f64,
        side: TradeSide,
        still_open: bool,
    ) -> Trade {
        let m = side.multiplier();
        Trade {
            entry_ts: self.entry_ts,
            entry_price: self.entry_price,
            exit_ts,
            exit_price,
            side,
            ret: m * (exit_price / self.entry_price - 1.0),
            bars_held: exit_idx - self.entry_idx,
            mfe: m * (self.favorable - self.entry_price) / self.entry_price,
            mae: m * (self.adverse - self.entry_price) / self.entry_price,
            still_open,
        }
    }
}
