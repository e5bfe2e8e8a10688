//! Parquet-backed price loader: one `<TICKER>.parquet` file per ticker in
//! a data directory.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use polars::prelude::*;

use super::{LoadError, PriceLoader};
use crate::frame::{Bar, PriceFrame, Timeframe};

/// The canonical timestamp column name used internally after normalization.
pub const BAR_TS_COL: &str = "ts";

/// Loads OHLCV parquet files from a directory. No caching of its own; a
/// caching loader can wrap this one.
pub struct ParquetBars {
    dir: PathBuf,
}

impl ParquetBars {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Data directory from `QUANTSWEEP_DATA_DIR` (a `.env` file is honored).
    pub fn from_env() -> Result<Self, LoadError> {
        dotenvy::dotenv().ok();
        let dir = std::env::var("QUANTSWEEP_DATA_DIR")
            .map_err(|_| LoadError::NotFound("QUANTSWEEP_DATA_DIR is not set".into()))?;
        Ok(Self::new(dir))
    }
}

/// Normalize the timestamp column to a microsecond `Datetime` named `ts`.
/// Accepts `ts`, `timestamp`, `datetime` or `date` sources; `Date` and
/// string columns are cast to midnight datetimes.
pub fn normalize_ts(df: DataFrame) -> Result<DataFrame, PolarsError> {
    let (src_col, src_dtype) = if let Ok(c) = df.column(BAR_TS_COL) {
        (BAR_TS_COL, c.dtype().clone())
    } else if let Ok(c) = df.column("timestamp") {
        ("timestamp", c.dtype().clone())
    } else if let Ok(c) = df.column("datetime") {
        ("datetime", c.dtype().clone())
    } else if let Ok(c) = df.column("date") {
        ("date", c.dtype().clone())
    } else {
        return Ok(df);
    };

    let cast_expr = match &src_dtype {
        DataType::Datetime(_, _) => col(src_col).cast(DataType::Datetime(TimeUnit::Microseconds, None)),
        DataType::Date | DataType::String => col(src_col)
            .cast(DataType::Date)
            .cast(DataType::Datetime(TimeUnit::Microseconds, None)),
        _ => col(src_col).cast(DataType::Datetime(TimeUnit::Microseconds, None)),
    };

    let collected = df.lazy().with_column(cast_expr.alias(BAR_TS_COL)).collect()?;
    if src_col == BAR_TS_COL {
        Ok(collected)
    } else {
        collected.drop(src_col)
    }
}

impl PriceLoader for ParquetBars {
    fn load(
        &self,
        ticker: &str,
        timeframe: Timeframe,
        max_years: Option<f64>,
    ) -> Result<PriceFrame, LoadError> {
        let path = self.dir.join(format!("{ticker}.parquet"));
        if !path.exists() {
            return Err(LoadError::NotFound(ticker.to_string()));
        }
        let path_str = path.to_string_lossy().to_string();

        let df = LazyFrame::scan_parquet(path_str.as_str().into(), ScanArgsParquet::default())
            .and_then(LazyFrame::collect)
            .map_err(|e| LoadError::CorruptData(format!("{ticker}: {e}")))?;
        let df = normalize_ts(df).map_err(|e| LoadError::CorruptData(format!("{ticker}: {e}")))?;
        if !df.schema().contains(BAR_TS_COL) {
            return Err(LoadError::CorruptData(format!(
                "{ticker}: no recognizable timestamp column"
            )));
        }

        let df = df
            .lazy()
            .sort([BAR_TS_COL], SortMultipleOptions::default())
            .collect()
            .map_err(|e| LoadError::CorruptData(format!("{ticker}: {e}")))?;

        let mut bars = extract_bars(&df, ticker)?;
        if let Some(years) = max_years {
            if let Some(last) = bars.last() {
                let cutoff = last.ts - chrono::Duration::seconds((years * 365.25 * 86_400.0) as i64);
                bars.retain(|b| b.ts >= cutoff);
            }
        }

        tracing::debug!(ticker, bars = bars.len(), "loaded price frame");
        PriceFrame::new(ticker, timeframe, &bars)
    }
}

fn extract_bars(df: &DataFrame, ticker: &str) -> Result<Vec<Bar>, LoadError> {
    let corrupt = |msg: String| LoadError::CorruptData(format!("{ticker}: {msg}"));

    let ts_col = df
        .column(BAR_TS_COL)
        .and_then(|c| c.cast(&DataType::Int64))
        .map_err(|e| corrupt(e.to_string()))?;
    let ts_micros = ts_col.i64().map_err(|e| corrupt(e.to_string()))?;

    let mut price_cols = Vec::with_capacity(5);
    for name in ["open", "high", "low", "close", "volume"] {
        let column = df
            .column(name)
            .and_then(|c| c.cast(&DataType::Float64))
            .map_err(|e| corrupt(e.to_string()))?;
        price_cols.push(column);
    }
    let floats: Vec<&Float64Chunked> = price_cols
        .iter()
        .map(|c| c.f64())
        .collect::<Result<_, _>>()
        .map_err(|e: PolarsError| corrupt(e.to_string()))?;

    let mut bars = Vec::with_capacity(df.height());
    for i in 0..df.height() {
        let micros = ts_micros
            .get(i)
            .ok_or_else(|| corrupt(format!("null timestamp at row {i}")))?;
        let ts: DateTime<Utc> = DateTime::from_timestamp_micros(micros)
            .ok_or_else(|| corrupt(format!("timestamp out of range at row {i}")))?;
        let mut values = [0.0f64; 5];
        for (slot, chunked) in values.iter_mut().zip(&floats) {
            *slot = chunked
                .get(i)
                .ok_or_else(|| corrupt(format!("null price field at row {i}")))?;
        }
        bars.push(Bar {
            ts,
            open: values[0],
            high: values[1],
            low: values[2],
            close: values[3],
            volume: values[4],
        });
    }
    Ok(bars)
}
