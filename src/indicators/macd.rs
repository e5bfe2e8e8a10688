use super::ema::ema;

/// The three MACD output series, all bar-aligned with the input.
#[derive(Debug, Clone)]
pub struct MacdSeries {
    /// `ema(fast) - ema(slow)`; NaN where either EMA is undefined.
    pub macd: Vec<f64>,
    /// EMA of the macd line with period `signal`, seeded with the arithmetic
    /// mean of the macd line's first `signal` defined values.
    pub signal: Vec<f64>,
    /// `macd - signal`; NaN where either is undefined.
    pub histogram: Vec<f64>,
}

/// Moving Average Convergence/Divergence.
pub fn macd(data: &[f64], fast: usize, slow: usize, signal: usize) -> MacdSeries {
    let n = data.len();
    let ema_fast = ema(data, fast);
    let ema_slow = ema(data, slow);

    let mut macd_line = vec![f64::NAN; n];
    for i in 0..n {
        if ema_fast[i].is_finite() && ema_slow[i].is_finite() {
            macd_line[i] = ema_fast[i] - ema_slow[i];
        }
    }

    let signal_line = ema_over_valid(&macd_line, signal);

    let mut histogram = vec![f64::NAN; n];
    for i in 0..n {
        if macd_line[i].is_finite() && signal_line[i].is_finite() {
            histogram[i] = macd_line[i] - signal_line[i];
        }
    }

    MacdSeries {
        macd: macd_line,
        signal: signal_line,
        histogram,
    }
}

/// EMA over the defined suffix of a NaN-prefixed series. The seed is the
/// arithmetic mean of the first `period` defined values, placed at the bar
/// of the last value entering the seed.
pub(crate) fn ema_over_valid(series: &[f64], period: usize) -> Vec<f64> {
    let n = series.len();
    let mut out = vec![f64::NAN; n];
    if period == 0 {
        return out;
    }
    let Some(first) = series.iter().position(|v| v.is_finite()) else {
        return out;
    };
    if n - first < period {
        return out;
    }

    let valid = &series[first..];
    let inner = ema(valid, period);
    out[first..].copy_from_slice(&inner);
    out
}
