//! The enumerated configuration surface the core consumes. Anything not
//! represented here is not a core concern.

use garde::Validate;
use serde::{Deserialize, Serialize};

use crate::engine::filter::MinimumCriteria;
use crate::engine::sweep::{GridSpec, StrategyFamily};
use crate::engine::types::{TargetMetric, TradeSide};
use crate::frame::Timeframe;
use crate::risk::{AlignPolicy, AllocationMethod};
use crate::signals::RsiFilter;

fn default_parallelism() -> usize {
    std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
}

fn default_target_metrics() -> Vec<TargetMetric> {
    TargetMetric::default_set()
}

fn default_grid() -> GridSpec {
    GridSpec {
        fast_min: 5,
        fast_max: 20,
        slow_min: 21,
        slow_max: 60,
        signal_min: None,
        signal_max: None,
        step: 1,
    }
}

/// Full run configuration with the documented defaults.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RunConfig {
    /// Governs annualization (252 daily / 1638 hourly periods per year).
    #[serde(default)]
    #[garde(skip)]
    pub timeframe: Timeframe,

    /// Signal polarity for every strategy in the run.
    #[serde(default)]
    #[garde(skip)]
    pub side: TradeSide,

    #[serde(default)]
    #[garde(dive)]
    pub min_criteria: MinimumCriteria,

    /// Ordered metric list for the four-bucket aggregation.
    #[serde(default = "default_target_metrics")]
    #[garde(length(min = 1))]
    pub target_metrics: Vec<TargetMetric>,

    #[serde(default = "default_grid")]
    #[garde(dive)]
    pub grid: GridSpec,

    #[serde(default)]
    #[garde(skip)]
    pub family: StrategyFamily,

    /// Sweep worker count; defaults to the hardware thread count.
    #[serde(default = "default_parallelism")]
    #[garde(range(min = 1))]
    pub parallelism: usize,

    #[serde(default)]
    #[garde(skip)]
    pub align_policy: AlignPolicy,

    #[serde(default)]
    #[garde(skip)]
    pub allocation_method: AllocationMethod,

    /// Optional RSI confirmation attached to cross entries.
    #[serde(default)]
    #[garde(dive)]
    pub rsi: Option<RsiFilter>,

    /// Wall-clock budget; expiry raises the cooperative cancellation flag.
    #[serde(default)]
    #[garde(skip)]
    pub time_budget_secs: Option<u64>,

    /// Retain per-combination equity curves in sweep records so the
    /// concurrency stage can reuse them without re-backtesting.
    #[serde(default)]
    #[garde(skip)]
    pub keep_equity_curves: bool,

    /// Whether a fired validator predicate fails the concurrency stage or
    /// lands in diagnostics.
    #[serde(default)]
    #[garde(skip)]
    pub validation_fatal: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            timeframe: Timeframe::default(),
            side: TradeSide::default(),
            min_criteria: MinimumCriteria::default(),
            target_metrics: default_target_metrics(),
            grid: default_grid(),
            family: StrategyFamily::default(),
            parallelism: default_parallelism(),
            align_policy: AlignPolicy::default(),
            allocation_method: AllocationMethod::default(),
            rsi: None,
            time_budget_secs: None,
            keep_equity_curves: false,
            validation_fatal: false,
        }
    }
}
