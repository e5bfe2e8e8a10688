use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::data::LoadError;

/// Bar interval of a price series. Governs annualization downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Timeframe {
    #[default]
    Daily,
    Hourly,
}

impl Timeframe {
    /// Annualization period: 252 trading days, or 252 days of 6.5 regular
    /// trading hours.
    pub fn periods_per_year(self) -> f64 {
        match self {
            Timeframe::Daily => 252.0,
            Timeframe::Hourly => 252.0 * 6.5,
        }
    }
}

/// One OHLCV row at the frame's timeframe.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub ts: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Immutable aligned OHLCV table for one ticker at one timeframe.
///
/// Constructed once per ticker per run and shared read-only (behind `Arc`)
/// with every downstream stage. Gaps present in the source calendar are
/// preserved; the engine never inserts or drops bars.
#[derive(Debug, Clone)]
pub struct PriceFrame {
    ticker: String,
    timeframe: Timeframe,
    timestamps: Vec<DateTime<Utc>>,
    open: Vec<f64>,
    high: Vec<f64>,
    low: Vec<f64>,
    close: Vec<f64>,
    volume: Vec<f64>,
}

impl PriceFrame {
    /// Build a frame from bars, enforcing the structural invariants:
    /// strictly increasing unique timestamps, finite positive prices,
    /// non-negative volume.
    pub fn new(
        ticker: impl Into<String>,
        timeframe: Timeframe,
        bars: &[Bar],
    ) -> Result<Self, LoadError> {
        let ticker = ticker.into();
        let mut timestamps = Vec::with_capacity(bars.len());
        let mut open = Vec::with_capacity(bars.len());
        let mut high = Vec::with_capacity(bars.len());
        let mut low = Vec::with_capacity(bars.len());
        let mut close = Vec::with_capacity(bars.len());
        let mut volume = Vec::with_capacity(bars.len());

        for (i, bar) in bars.iter().enumerate() {
            if let Some(prev) = timestamps.last() {
                if bar.ts <= *prev {
                    return Err(LoadError::CorruptData(format!(
                        "{ticker}: non-monotonic timestamp at bar {i} ({} after {prev})",
                        bar.ts
                    )));
                }
            }
            for (name, px) in [
                ("open", bar.open),
                ("high", bar.high),
                ("low", bar.low),
                ("close", bar.close),
            ] {
                if !px.is_finite() || px <= 0.0 {
                    return Err(LoadError::CorruptData(format!(
                        "{ticker}: bar {i} has invalid {name} price {px}"
                    )));
                }
            }
            if !bar.volume.is_finite() || bar.volume < 0.0 {
                return Err(LoadError::CorruptData(format!(
                    "{ticker}: bar {i} has invalid volume {}",
                    bar.volume
                )));
            }
            timestamps.push(bar.ts);
            open.push(bar.open);
            high.push(bar.high);
            low.push(bar.low);
            close.push(bar.close);
            volume.push(bar.volume);
        }

        Ok(Self {
            ticker,
            timeframe,
            timestamps,
            open,
            high,
            low,
            close,
            volume,
        })
    }

    pub fn ticker(&self) -> &str {
        &self.ticker
    }

    pub fn timeframe(&self) -> Timeframe {
        self.timeframe
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn timestamps(&self) -> &[DateTime<Utc>] {
        &self.timestamps
    }

    pub fn open(&self) -> &[f64] {
        &self.open
    }

    pub fn high(&self) -> &[f64] {
        &self.high
    }

    pub fn low(&self) -> &[f64] {
        &self.low
    }

    pub fn close(&self) -> &[f64] {
        &self.close
    }

    pub fn volume(&self) -> &[f64] {
        &self.volume
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn bar(day: u32, close: f64) -> Bar {
        let ts = Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap();
        Bar {
            ts,
            open: close,
            high: close * 1.01,
            low: close * 0.99,
            close,
            volume: 1000.0,
        }
    }

    #[test]
    fn valid_frame_roundtrips_columns() {
        let bars = vec![bar(1, 10.0), bar(2, 11.0), bar(3, 12.0)];
        let frame = PriceFrame::new("SPY", Timeframe::Daily, &bars).unwrap();
        assert_eq!(frame.len(), 3);
        assert_eq!(frame.close(), &[10.0, 11.0, 12.0]);
        assert_eq!(frame.ticker(), "SPY");
    }

    #[test]
    fn rejects_duplicate_timestamp() {
        let bars = vec![bar(1, 10.0), bar(1, 11.0)];
        let err = PriceFrame::new("SPY", Timeframe::Daily, &bars).unwrap_err();
        assert!(matches!(err, LoadError::CorruptData(_)));
    }

    #[test]
    fn rejects_out_of_order_timestamp() {
        let bars = vec![bar(2, 10.0), bar(1, 11.0)];
        assert!(PriceFrame::new("SPY", Timeframe::Daily, &bars).is_err());
    }

    #[test]
    fn rejects_nonpositive_price() {
        let mut b = bar(1, 10.0);
        b.close = 0.0;
        assert!(PriceFrame::new("SPY", Timeframe::Daily, &[b]).is_err());
    }

    #[test]
    fn rejects_nan_price() {
        let mut b = bar(1, 10.0);
        b.high = f64::NAN;
        assert!(PriceFrame::new("SPY", Timeframe::Daily, &[b]).is_err());
    }

    #[test]
    fn rejects_negative_volume() {
        let mut b = bar(1, 10.0);
        b.volume = -1.0;
        assert!(PriceFrame::new("SPY", Timeframe::Daily, &[b]).is_err());
    }

    #[test]
    fn hourly_annualization_period() {
        assert!((Timeframe::Hourly.periods_per_year() - 1638.0).abs() < f64::EPSILON);
        assert!((Timeframe::Daily.periods_per_year() - 252.0).abs() < f64::EPSILON);
    }
}
