/// Exponential Moving Average with smoothing `alpha = 2 / (period + 1)`.
///
/// Seeded with the arithmetic mean of the first `period` inputs at index
/// `period - 1`; NaN before that.
pub fn ema(data: &[f64], period: usize) -> Vec<f64> {
    let n = data.len();
    if period == 0 || n < period {
        return vec![f64::NAN; n];
    }

    let alpha = 2.0 / (period as f64 + 1.0);
    let mut out = vec![f64::NAN; n];
    let seed: f64 = data[..period].iter().sum::<f64>() / period as f64;
    out[period - 1] = seed;
    let mut prev = seed;
    for i in period..n {
        prev = (data[i] - prev) * alpha + prev;
        out[i] = prev;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_from_initial_mean() {
        let data = [2.0, 4.0, 6.0, 8.0];
        let out = ema(&data, 3);
        assert!(out[0].is_nan());
        assert!(out[1].is_nan());
        // seed = mean(2, 4, 6) = 4
        assert!((out[2] - 4.0).abs() < 1e-12);
        // alpha = 0.5: ema[3] = (8 - 4) * 0.5 + 4 = 6
        assert!((out[3] - 6.0).abs() < 1e-12);
    }

    #[test]
    fn period_one_tracks_price() {
        let data = [10.0, 20.0, 30.0];
        let out = ema(&data, 1);
        assert_eq!(out, vec![10.0, 20.0, 30.0]);
    }

    #[test]
    fn insufficient_data_all_nan() {
        let out = ema(&[1.0, 2.0], 5);
        assert!(out.iter().all(|v| v.is_nan()));
    }

    #[test]
    fn converges_toward_constant_input() {
        let data = vec![5.0; 50];
        let out = ema(&data, 10);
        assert!((out[49] - 5.0).abs() < 1e-12);
    }
}
