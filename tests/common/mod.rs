#![allow(dead_code)]

use std::collections::HashMap;

use chrono::{DateTime, TimeZone, Utc};
use quantsweep::data::{LoadError, PriceLoader};
use quantsweep::frame::{Bar, PriceFrame, Timeframe};

/// Install a test subscriber once; `RUST_LOG` controls verbosity.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn day(i: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::days(i)
}

pub fn frame_from_closes(ticker: &str, closes: &[f64]) -> PriceFrame {
    frame_from_closes_at(ticker, closes, 0)
}

/// Build a daily frame whose calendar starts `offset` days in.
pub fn frame_from_closes_at(ticker: &str, closes: &[f64], offset: i64) -> PriceFrame {
    let bars: Vec<Bar> = closes
        .iter()
        .enumerate()
        .map(|(i, &c)| Bar {
            ts: day(offset + i as i64),
            open: c,
            high: c + 0.5,
            low: (c - 0.5).max(0.1),
            close: c,
            volume: 1_000.0,
        })
        .collect();
    PriceFrame::new(ticker, Timeframe::Daily, &bars).unwrap()
}

/// A slow sine oscillator around 100; crosses repeatedly, so moving-average
/// strategies produce several round trips.
pub fn oscillator_closes(bars: usize, phase: f64, amplitude: f64) -> Vec<f64> {
    (0..bars)
        .map(|i| 100.0 + (i as f64 * 0.3 + phase).sin() * amplitude)
        .collect()
}

/// Frames served from memory; the standard loader stand-in for tests.
pub struct MemoryLoader {
    frames: HashMap<String, PriceFrame>,
}

impl MemoryLoader {
    pub fn new(frames: impl IntoIterator<Item = PriceFrame>) -> Self {
        Self {
            frames: frames
                .into_iter()
                .map(|f| (f.ticker().to_string(), f))
                .collect(),
        }
    }
}

impl PriceLoader for MemoryLoader {
    fn load(
        &self,
        ticker: &str,
        _timeframe: Timeframe,
        _max_years: Option<f64>,
    ) -> Result<PriceFrame, LoadError> {
        self.frames
            .get(ticker)
            .cloned()
            .ok_or_else(|| LoadError::NotFound(ticker.to_string()))
    }
}
