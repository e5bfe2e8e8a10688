//! Crossover detection between two bar-aligned indicator series.

/// True at `t` when `fast` crosses above `slow`.
///
/// Evaluation begins at `start` (the first eligible post-warm-up bar). A
/// bar whose previous comparison state is unknown (the first eligible bar,
/// or a predecessor still inside an indicator's NaN prefix) counts as a
/// cross when the favorable ordering already holds. After that a cross
/// requires a strict flip across two valid bars.
pub fn cross_above(fast: &[f64], slow: &[f64], start: usize) -> Vec<bool> {
    detect(fast, slow, start, |a, b| a > b, |a, b| a <= b)
}

/// True at `t` when `fast` crosses below `slow`. Mirror of [`cross_above`].
pub fn cross_below(fast: &[f64], slow: &[f64], start: usize) -> Vec<bool> {
    detect(fast, slow, start, |a, b| a < b, |a, b| a >= b)
}

fn detect(
    fast: &[f64],
    slow: &[f64],
    start: usize,
    now: impl Fn(f64, f64) -> bool,
    before: impl Fn(f64, f64) -> bool,
) -> Vec<bool> {
    debug_assert_eq!(fast.len(), slow.len());
    let n = fast.len();
    let mut out = vec![false; n];
    for t in start..n {
        if !(fast[t].is_finite() && slow[t].is_finite()) {
            continue;
        }
        if !now(fast[t], slow[t]) {
            continue;
        }
        let prev_known = t > start && fast[t - 1].is_finite() && slow[t - 1].is_finite();
        out[t] = !prev_known || before(fast[t - 1], slow[t - 1]);
    }
    out
}
