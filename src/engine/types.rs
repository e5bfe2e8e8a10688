use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Direction of a position. Governs entry/exit polarity and return sign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum TradeSide {
    #[default]
    Long,
    Short,
}

impl TradeSide {
    pub fn multiplier(self) -> f64 {
        match self {
            TradeSide::Long => 1.0,
            TradeSide::Short => -1.0,
        }
    }
}

/// One completed (or final-bar marked) round trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub entry_ts: DateTime<Utc>,
    pub entry_price: f64,
    pub exit_ts: DateTime<Utc>,
    pub exit_price: f64,
    pub side: TradeSide,
    /// Signed return as a decimal fraction of the entry price.
    pub ret: f64,
    pub bars_held: usize,
    /// Peak favorable excursion while open, fraction of entry, signed per side.
    pub mfe: f64,
    /// Peak adverse excursion while open, fraction of entry, signed per side.
    pub mae: f64,
    /// The position was still open at the final bar and was marked to the
    /// last close. Metrics treat the trade like any other.
    pub still_open: bool,
}

/// Bar-indexed cumulative return multipliers anchored at 1.0 on the first
/// post-warm-up bar. The definitive return stream for risk aggregation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityCurve {
    pub timestamps: Vec<DateTime<Utc>>,
    pub values: Vec<f64>,
}

impl EquityCurve {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn final_equity(&self) -> f64 {
        self.values.last().copied().unwrap_or(1.0)
    }

    /// First differences of log equity.
    pub fn log_returns(&self) -> Vec<f64> {
        self.values
            .windows(2)
            .map(|w| (w[1] / w[0]).ln())
            .collect()
    }

    /// Plain per-bar returns `e[t]/e[t-1] - 1`.
    pub fn simple_returns(&self) -> Vec<f64> {
        self.values.windows(2).map(|w| w[1] / w[0] - 1.0).collect()
    }

    /// Largest peak-to-trough fraction, in [0, 1].
    pub fn max_drawdown(&self) -> f64 {
        let mut peak = f64::MIN;
        let mut max_dd = 0.0;
        for &v in &self.values {
            if v > peak {
                peak = v;
            }
            let dd = 1.0 - v / peak;
            if dd > max_dd {
                max_dd = dd;
            }
        }
        max_dd
    }
}

/// Canonical per-run metric set computed from trades and the equity curve.
/// All fractions are decimals, never percentages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioMetrics {
    pub trades: usize,
    pub win_rate: f64,
    pub total_return: f64,
    pub avg_winning_trade: f64,
    pub avg_losing_trade: f64,
    /// NaN (JSON null) when there are no trades; capped at a finite
    /// sentinel when there are winners and no losers.
    #[serde(with = "nullable_f64")]
    pub profit_factor: f64,
    pub expectancy_per_trade: f64,
    pub sharpe: f64,
    pub sortino: f64,
    #[serde(with = "nullable_f64")]
    pub omega: f64,
    pub max_drawdown: f64,
    /// NaN (JSON null) when max drawdown is zero.
    #[serde(with = "nullable_f64")]
    pub calmar: f64,
    pub beats_bnh: bool,
    /// Composite in [0, 1], assigned by the portfolio filter over the
    /// surviving population.
    pub score: f64,
}

/// Serialize non-finite floats as JSON null and read null back as NaN.
/// Keeps the manifest valid JSON without inventing sentinel numbers.
pub(crate) mod nullable_f64 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_finite() {
            serializer.serialize_some(value)
        } else {
            serializer.serialize_none()
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NAN))
    }
}

/// The unique identity of a parameterized strategy on a ticker, used for
/// deduplication and as the content-defined tie-breaker everywhere.
/// `signal` is 0 for non-MACD families. The derived ordering is the
/// lexicographic `(ticker, strategy, fast, slow, signal)` order.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct StrategyId {
    pub ticker: String,
    pub strategy: String,
    pub fast: usize,
    pub slow: usize,
    pub signal: usize,
}

impl StrategyId {
    pub fn new(ticker: impl Into<String>, kind: &crate::signals::StrategyKind) -> Self {
        Self {
            ticker: ticker.into(),
            strategy: kind.tag().to_string(),
            fast: kind.fast(),
            slow: kind.slow(),
            signal: kind.signal_window(),
        }
    }
}

impl fmt::Display for StrategyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.signal == 0 {
            write!(f, "{} {}({},{})", self.ticker, self.strategy, self.fast, self.slow)
        } else {
            write!(
                f,
                "{} {}({},{},{})",
                self.ticker, self.strategy, self.fast, self.slow, self.signal
            )
        }
    }
}

/// Metrics the four-bucket aggregation can target. Display names are the
/// label vocabulary and the serialized form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TargetMetric {
    #[serde(rename = "Total Return")]
    TotalReturn,
    #[serde(rename = "Total Trades")]
    TotalTrades,
    #[serde(rename = "Avg Winning Trade")]
    AvgWinningTrade,
    Sharpe,
    Omega,
    Sortino,
    #[serde(rename = "Win Rate")]
    WinRate,
    #[serde(rename = "Profit Factor")]
    ProfitFactor,
    Expectancy,
    #[serde(rename = "Max Drawdown")]
    MaxDrawdown,
}

impl TargetMetric {
    /// The default aggregation targets.
    pub fn default_set() -> Vec<TargetMetric> {
        vec![
            TargetMetric::TotalReturn,
            TargetMetric::TotalTrades,
            TargetMetric::AvgWinningTrade,
            TargetMetric::Sharpe,
            TargetMetric::Omega,
            TargetMetric::Sortino,
        ]
    }

    /// Column extraction for bucket selection. NaN-able columns surface
    /// NaN as-is; selection treats NaN as non-competitive.
    pub fn value(self, m: &PortfolioMetrics) -> f64 {
        match self {
            TargetMetric::TotalReturn => m.total_return,
            TargetMetric::TotalTrades => m.trades as f64,
            TargetMetric::AvgWinningTrade => m.avg_winning_trade,
            TargetMetric::Sharpe => m.sharpe,
            TargetMetric::Omega => m.omega,
            TargetMetric::Sortino => m.sortino,
            TargetMetric::WinRate => m.win_rate,
            TargetMetric::ProfitFactor => m.profit_factor,
            TargetMetric::Expectancy => m.expectancy_per_trade,
            TargetMetric::MaxDrawdown => m.max_drawdown,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            TargetMetric::TotalReturn => "Total Return",
            TargetMetric::TotalTrades => "Total Trades",
            TargetMetric::AvgWinningTrade => "Avg Winning Trade",
            TargetMetric::Sharpe => "Sharpe",
            TargetMetric::Omega => "Omega",
            TargetMetric::Sortino => "Sortino",
            TargetMetric::WinRate => "Win Rate",
            TargetMetric::ProfitFactor => "Profit Factor",
            TargetMetric::Expectancy => "Expectancy",
            TargetMetric::MaxDrawdown => "Max Drawdown",
        }
    }
}

impl fmt::Display for TargetMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TargetMetric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Total Return" => Ok(TargetMetric::TotalReturn),
            "Total Trades" => Ok(TargetMetric::TotalTrades),
            "Avg Winning Trade" => Ok(TargetMetric::AvgWinningTrade),
            "Sharpe" => Ok(TargetMetric::Sharpe),
            "Omega" => Ok(TargetMetric::Omega),
            "Sortino" => Ok(TargetMetric::Sortino),
            "Win Rate" => Ok(TargetMetric::WinRate),
            "Profit Factor" => Ok(TargetMetric::ProfitFactor),
            "Expectancy" => Ok(TargetMetric::Expectancy),
            "Max Drawdown" => Ok(TargetMetric::MaxDrawdown),
            other => Err(format!("unknown target metric: {other:?}")),
        }
    }
}

/// Aggregation bucket. The declared order is the label sort priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Bucket {
    Most,
    Mean,
    Median,
    Least,
}

impl Bucket {
    pub fn name(self) -> &'static str {
        match self {
            Bucket::Most => "Most",
            Bucket::Mean => "Mean",
            Bucket::Median => "Median",
            Bucket::Least => "Least",
        }
    }

    pub fn all() -> [Bucket; 4] {
        [Bucket::Most, Bucket::Mean, Bucket::Median, Bucket::Least]
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Bucket {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Most" => Ok(Bucket::Most),
            "Mean" => Ok(Bucket::Mean),
            "Median" => Ok(Bucket::Median),
            "Least" => Ok(Bucket::Least),
            other => Err(format!("unknown bucket: {other:?}")),
        }
    }
}

/// One aggregation label, e.g. "Most Total Return". Ordering is bucket
/// priority first, then alphabetical by metric name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MetricTypeLabel {
    pub bucket: Bucket,
    pub metric: TargetMetric,
}

impl PartialOrd for MetricTypeLabel {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MetricTypeLabel {
    fn cmp(&self, other: &Self) -> Ordering {
        self.bucket
            .cmp(&other.bucket)
            .then_with(|| self.metric.name().cmp(other.metric.name()))
    }
}

impl fmt::Display for MetricTypeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.bucket, self.metric)
    }
}

impl FromStr for MetricTypeLabel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (bucket, metric) = s
            .split_once(' ')
            .ok_or_else(|| format!("malformed metric-type label: {s:?}"))?;
        Ok(MetricTypeLabel {
            bucket: bucket.parse()?,
            metric: metric.parse()?,
        })
    }
}

/// A metric row plus the strategy identity and its aggregation labels.
/// Labels accumulate during best-aggregation; everything else is immutable
/// after the filter emits the row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioRow {
    #[serde(flatten)]
    pub id: StrategyId,
    #[serde(flatten)]
    pub metrics: PortfolioMetrics,
    #[serde(rename = "metric_type", with = "metric_type_string")]
    pub labels: Vec<MetricTypeLabel>,
}

impl PortfolioRow {
    /// The canonical comma-joined label string.
    pub fn metric_type(&self) -> String {
        let parts: Vec<String> = self.labels.iter().map(ToString::to_string).collect();
        parts.join(", ")
    }
}

/// Labels serialize as the comma-joined display string and parse back.
mod metric_type_string {
    use super::MetricTypeLabel;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        labels: &[MetricTypeLabel],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let parts: Vec<String> = labels.iter().map(ToString::to_string).collect();
        serializer.serialize_str(&parts.join(", "))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<MetricTypeLabel>, D::Error> {
        let joined = String::deserialize(deserializer)?;
        if joined.is_empty() {
            return Ok(Vec::new());
        }
        joined
            .split(", ")
            .map(|part| part.parse().map_err(serde::de::Error::custom))
            .collect()
    }
}
