//! Bar-aligned indicator primitives.
//!
//! Every function returns a vector of the input length with `f64::NAN` as
//! the explicit "undefined" sentinel for the warm-up prefix. NaN is never
//! silently treated as zero by any consumer.

pub mod ema;
pub mod macd;
pub mod rsi;
pub mod sma;

pub use ema::ema;
pub use macd::{macd, MacdSeries};
pub use rsi::rsi;
pub use sma::sma;
