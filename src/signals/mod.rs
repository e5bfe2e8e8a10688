//! Strategy definitions and entry/exit signal generation.

pub mod cross;

use std::sync::Arc;

use dashmap::DashMap;
use garde::Validate;
use serde::{Deserialize, Serialize};

use crate::engine::types::TradeSide;
use crate::error::EngineError;
use crate::frame::PriceFrame;
use crate::indicators::{ema, rsi, sma};

/// A parameterized strategy family. `fast < slow` always; MACD additionally
/// carries a signal-line window of at least 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum StrategyKind {
    SmaCross { fast: usize, slow: usize },
    EmaCross { fast: usize, slow: usize },
    Macd { fast: usize, slow: usize, signal: usize },
}

impl StrategyKind {
    pub fn tag(&self) -> &'static str {
        match self {
            StrategyKind::SmaCross { .. } => "SMA",
            StrategyKind::EmaCross { .. } => "EMA",
            StrategyKind::Macd { .. } => "MACD",
        }
    }

    pub fn fast(&self) -> usize {
        match *self {
            StrategyKind::SmaCross { fast, .. }
            | StrategyKind::EmaCross { fast, .. }
            | StrategyKind::Macd { fast, .. } => fast,
        }
    }

    pub fn slow(&self) -> usize {
        match *self {
            StrategyKind::SmaCross { slow, .. }
            | StrategyKind::EmaCross { slow, .. }
            | StrategyKind::Macd { slow, .. } => slow,
        }
    }

    /// Signal-line window; 0 for the non-MACD families.
    pub fn signal_window(&self) -> usize {
        match *self {
            StrategyKind::Macd { signal, .. } => signal,
            _ => 0,
        }
    }

    /// Window constraints hold (`fast < slow`, MACD signal >= 1).
    pub fn is_valid(&self) -> bool {
        let windows_ok = self.fast() >= 1 && self.fast() < self.slow();
        match self {
            StrategyKind::Macd { signal, .. } => windows_ok && *signal >= 1,
            _ => windows_ok,
        }
    }

    /// First bar index at which a signal may fire: no signal before
    /// `max(slow, signal_window, rsi_window) + 1` bars have elapsed.
    pub fn warm_up(&self, rsi_filter: Option<&RsiFilter>) -> usize {
        let rsi_window = rsi_filter.map_or(0, |f| f.window);
        self.slow().max(self.signal_window()).max(rsi_window)
    }
}

/// Optional RSI confirmation attached to entries. The gate direction
/// follows the trade side: long entries are suppressed while RSI is above
/// the threshold (overbought), short entries while below it (oversold).
/// Exits are never gated.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Validate)]
pub struct RsiFilter {
    #[garde(range(min = 1))]
    pub window: usize,
    #[garde(range(min = 1.0, max = 99.0))]
    pub threshold: f64,
}

/// Collapsed entry/exit streams for one frame and strategy, strictly
/// alternating: never an entry while in position, never an exit while flat.
#[derive(Debug, Clone)]
pub struct SignalStream {
    pub entries: Vec<bool>,
    pub exits: Vec<bool>,
    pub position_in: Vec<bool>,
    /// First eligible signal index for this strategy on this frame.
    pub warm_up: usize,
}

impl SignalStream {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Per-run memoization of raw indicator series, keyed by window. Shared
/// read-only across sweep workers for one frame; a sweep over a dense grid
/// recomputes each moving average once instead of per combination. Purely a
/// performance cache, dropped with the sweep.
#[derive(Debug, Default)]
pub struct IndicatorCache {
    sma: DashMap<usize, Arc<Vec<f64>>>,
    ema: DashMap<usize, Arc<Vec<f64>>>,
    rsi: DashMap<usize, Arc<Vec<f64>>>,
}

impl IndicatorCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn sma(&self, close: &[f64], window: usize) -> Arc<Vec<f64>> {
        self.sma
            .entry(window)
            .or_insert_with(|| Arc::new(sma(close, window)))
            .clone()
    }

    fn ema(&self, close: &[f64], window: usize) -> Arc<Vec<f64>> {
        self.ema
            .entry(window)
            .or_insert_with(|| Arc::new(ema(close, window)))
            .clone()
    }

    fn rsi(&self, close: &[f64], window: usize) -> Arc<Vec<f64>> {
        self.rsi
            .entry(window)
            .or_insert_with(|| Arc::new(rsi(close, window)))
            .clone()
    }
}

/// Generate the collapsed signal stream for a frame/strategy/side triple.
///
/// Returns `InsufficientData` when the frame is not strictly longer than
/// the warm-up.
pub fn build_signals(
    frame: &PriceFrame,
    kind: &StrategyKind,
    side: TradeSide,
    rsi_filter: Option<&RsiFilter>,
) -> Result<SignalStream, EngineError> {
    build_signals_cached(frame, kind, side, rsi_filter, &IndicatorCache::new())
}

/// [`build_signals`] with a shared indicator cache; the sweep entry point.
pub fn build_signals_cached(
    frame: &PriceFrame,
    kind: &StrategyKind,
    side: TradeSide,
    rsi_filter: Option<&RsiFilter>,
    cache: &IndicatorCache,
) -> Result<SignalStream, EngineError> {
    let warm_up = kind.warm_up(rsi_filter);
    let n = frame.len();
    if n <= warm_up {
        return Err(EngineError::InsufficientData {
            have: n,
            need: warm_up,
        });
    }

    let close = frame.close();
    let (fast_series, slow_series): (Arc<Vec<f64>>, Arc<Vec<f64>>) = match *kind {
        StrategyKind::SmaCross { fast, slow } => (cache.sma(close, fast), cache.sma(close, slow)),
        StrategyKind::EmaCross { fast, slow } => (cache.ema(close, fast), cache.ema(close, slow)),
        StrategyKind::Macd { fast, slow, signal } => {
            let ema_fast = cache.ema(close, fast);
            let ema_slow = cache.ema(close, slow);
            let mut line = vec![f64::NAN; n];
            for i in 0..n {
                if ema_fast[i].is_finite() && ema_slow[i].is_finite() {
                    line[i] = ema_fast[i] - ema_slow[i];
                }
            }
            let signal_line = crate::indicators::macd::ema_over_valid(&line, signal);
            (Arc::new(line), Arc::new(signal_line))
        }
    };

    let (mut raw_entries, raw_exits) = match side {
        TradeSide::Long => (
            cross::cross_above(&fast_series, &slow_series, warm_up),
            cross::cross_below(&fast_series, &slow_series, warm_up),
        ),
        TradeSide::Short => (
            cross::cross_below(&fast_series, &slow_series, warm_up),
            cross::cross_above(&fast_series, &slow_series, warm_up),
        ),
    };

    if let Some(filter) = rsi_filter {
        apply_rsi_gate(&mut raw_entries, frame, side, filter, cache);
    }

    Ok(collapse(&raw_entries, &raw_exits, warm_up))
}

/// Suppress entries where the RSI confirmation fails. An undefined RSI
/// value suppresses the entry as well: an unconfirmed signal never fires.
fn apply_rsi_gate(
    entries: &mut [bool],
    frame: &PriceFrame,
    side: TradeSide,
    filter: &RsiFilter,
    cache: &IndicatorCache,
) {
    let series = cache.rsi(frame.close(), filter.window);
    for (t, fired) in entries.iter_mut().enumerate() {
        if !*fired {
            continue;
        }
        let value = series[t];
        let blocked = match side {
            TradeSide::Long => !value.is_finite() || value > filter.threshold,
            TradeSide::Short => !value.is_finite() || value < filter.threshold,
        };
        if blocked {
            *fired = false;
        }
    }
}

/// Flat -> InPosition -> Flat state machine. Duplicate entries while in
/// position and exits while flat collapse to the first occurrence.
fn collapse(raw_entries: &[bool], raw_exits: &[bool], warm_up: usize) -> SignalStream {
    let n = raw_entries.len();
    let mut entries = vec![false; n];
    let mut exits = vec![false; n];
    let mut position_in = vec![false; n];
    let mut in_position = false;

    for t in 0..n {
        if in_position && raw_exits[t] {
            exits[t] = true;
            in_position = false;
        } else if !in_position && raw_entries[t] {
            entries[t] = true;
            in_position = true;
        }
        position_in[t] = in_position;
    }

    SignalStream {
        entries,
        exits,
        position_in,
        warm_up,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{Bar, Timeframe};
    use chrono::{TimeZone, Utc};

    fn frame_from_closes(closes: &[f64]) -> PriceFrame {
        let bars: Vec<Bar> = closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Bar {
                ts: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
                    + chrono::Duration::days(i as i64),
                open: c,
                high: c + 0.5,
                low: (c - 0.5).max(0.1),
                close: c,
                volume: 1.0,
            })
            .collect();
        PriceFrame::new("TEST", Timeframe::Daily, &bars).unwrap()
    }

    #[test]
    fn ramp_sma_cross_enters_at_first_eligible_bar() {
        let closes: Vec<f64> = (10..=40).map(f64::from).collect();
        let frame = frame_from_closes(&closes);
        let kind = StrategyKind::SmaCross { fast: 3, slow: 5 };
        let stream = build_signals(&frame, &kind, TradeSide::Long, None).unwrap();

        assert_eq!(stream.warm_up, 5);
        assert!(stream.entries[5], "ramp cross should fire at index 5");
        assert_eq!(stream.entries.iter().filter(|&&b| b).count(), 1);
        assert!(stream.exits.iter().all(|&b| !b), "monotonic ramp never exits");
        assert!(stream.position_in[5..].iter().all(|&b| b));
    }

    #[test]
    fn insufficient_data_is_typed() {
        let closes: Vec<f64> = (10..15).map(f64::from).collect();
        let frame = frame_from_closes(&closes);
        let kind = StrategyKind::SmaCross { fast: 3, slow: 5 };
        let err = build_signals(&frame, &kind, TradeSide::Long, None).unwrap_err();
        assert!(matches!(err, EngineError::InsufficientData { .. }));
    }

    #[test]
    fn short_side_inverts_polarity() {
        // Down ramp: fast SMA below slow SMA throughout
        let closes: Vec<f64> = (10..=40).rev().map(f64::from).collect();
        let frame = frame_from_closes(&closes);
        let kind = StrategyKind::SmaCross { fast: 3, slow: 5 };
        let long = build_signals(&frame, &kind, TradeSide::Long, None).unwrap();
        let short = build_signals(&frame, &kind, TradeSide::Short, None).unwrap();
        assert!(long.entries.iter().all(|&b| !b));
        assert!(short.entries[5]);
    }

    #[test]
    fn streams_strictly_alternate() {
        // Oscillating closes to provoke repeated crosses
        let closes: Vec<f64> = (0..120)
            .map(|i| 100.0 + (f64::from(i) * 0.35).sin() * 10.0)
            .collect();
        let frame = frame_from_closes(&closes);
        let kind = StrategyKind::SmaCross { fast: 3, slow: 8 };
        let stream = build_signals(&frame, &kind, TradeSide::Long, None).unwrap();

        let mut in_position = false;
        for t in 0..stream.len() {
            assert!(!(stream.entries[t] && stream.exits[t]));
            if stream.entries[t] {
                assert!(!in_position, "entry while in position at {t}");
                in_position = true;
            }
            if stream.exits[t] {
                assert!(in_position, "exit while flat at {t}");
                in_position = false;
            }
        }
        // At least one full round trip on an oscillator
        assert!(stream.exits.iter().any(|&b| b));
    }

    #[test]
    fn rsi_gate_suppresses_overbought_long_entries() {
        // Strong up ramp: RSI saturates at 100, so any threshold below 100
        // blocks every long entry.
        let closes: Vec<f64> = (10..=60).map(f64::from).collect();
        let frame = frame_from_closes(&closes);
        let kind = StrategyKind::SmaCross { fast: 3, slow: 5 };
        let filter = RsiFilter {
            window: 5,
            threshold: 70.0,
        };
        let gated = build_signals(&frame, &kind, TradeSide::Long, Some(&filter)).unwrap();
        assert!(gated.entries.iter().all(|&b| !b));

        let ungated = build_signals(&frame, &kind, TradeSide::Long, None).unwrap();
        assert!(ungated.entries.iter().any(|&b| b));
    }

    #[test]
    fn rsi_filter_extends_warm_up() {
        let kind = StrategyKind::SmaCross { fast: 3, slow: 5 };
        let filter = RsiFilter {
            window: 14,
            threshold: 70.0,
        };
        assert_eq!(kind.warm_up(Some(&filter)), 14);
        assert_eq!(kind.warm_up(None), 5);
    }

    #[test]
    fn macd_signals_respect_line_definition() {
        let closes: Vec<f64> = (0..80)
            .map(|i| 100.0 + (f64::from(i) * 0.25).sin() * 8.0)
            .collect();
        let frame = frame_from_closes(&closes);
        let kind = StrategyKind::Macd {
            fast: 5,
            slow: 10,
            signal: 4,
        };
        let stream = build_signals(&frame, &kind, TradeSide::Long, None).unwrap();
        assert_eq!(stream.warm_up, 10);
        // signal line is undefined until index slow + signal - 2 = 12
        assert!(stream.entries[..12].iter().all(|&b| !b));
        assert!(stream.entries.iter().any(|&b| b));
    }

    #[test]
    fn kind_validity() {
        assert!(StrategyKind::SmaCross { fast: 3, slow: 5 }.is_valid());
        assert!(StrategyKind::SmaCross { fast: 4, slow: 5 }.is_valid());
        assert!(!StrategyKind::SmaCross { fast: 5, slow: 5 }.is_valid());
        assert!(!StrategyKind::SmaCross { fast: 6, slow: 5 }.is_valid());
        assert!(!StrategyKind::Macd {
            fast: 3,
            slow: 5,
            signal: 0
        }
        .is_valid());
    }
}
