//! Injected data boundaries: the price loader and the portfolio-row source.

pub mod parquet;
pub mod rows;

use thiserror::Error;

use crate::engine::types::PortfolioRow;
use crate::frame::{PriceFrame, Timeframe};
use crate::manifest::Diagnostic;

/// Failures a price loader can surface. The core treats the loader as
/// opaque: no HTTP, no caching policy of its own.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("no price data for ticker {0}")]
    NotFound(String),
    #[error("corrupt price data: {0}")]
    CorruptData(String),
    #[error("network failure while loading prices: {0}")]
    Network(String),
}

/// Supplies validated OHLCV frames. Implementations are injected into the
/// orchestrator; a caching loader can be composed in externally.
pub trait PriceLoader: Send + Sync {
    fn load(
        &self,
        ticker: &str,
        timeframe: Timeframe,
        max_years: Option<f64>,
    ) -> Result<PriceFrame, LoadError>;
}

/// Supplies previously persisted portfolio rows for the best-aggregation
/// pipeline. Malformed input is fatal to the affected file only; the
/// implementation reports it as a diagnostic and keeps going.
pub trait PortfolioSource {
    fn collect_rows(&mut self) -> (Vec<PortfolioRow>, Vec<Diagnostic>);
}
