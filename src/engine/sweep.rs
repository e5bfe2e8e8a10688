//! Cartesian parameter-grid enumeration and parallel backtest dispatch.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;

use garde::Validate;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::backtest::run_with_signals;
use super::types::{EquityCurve, PortfolioRow, StrategyId, TradeSide};
use crate::error::EngineError;
use crate::frame::PriceFrame;
use crate::manifest::{Diagnostic, DiagnosticKind};
use crate::orchestrator::CancelToken;
use crate::signals::{build_signals_cached, IndicatorCache, RsiFilter, StrategyKind};

/// Strategy family a grid expands into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum StrategyFamily {
    #[default]
    Sma,
    Ema,
    Macd,
}

fn default_step() -> usize {
    1
}

fn default_macd_signal() -> usize {
    9
}

/// Inclusive sweep ranges. `fast < slow` is enforced per combination at
/// enumeration time (violating combinations are skipped silently); the
/// range bounds themselves only need to be well-formed.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct GridSpec {
    #[garde(range(min = 1))]
    pub fast_min: usize,
    #[garde(range(min = 1), custom(bound_gte(&self.fast_min)))]
    pub fast_max: usize,
    #[garde(range(min = 2))]
    pub slow_min: usize,
    #[garde(range(min = 2), custom(bound_gte(&self.slow_min)))]
    pub slow_max: usize,
    /// Signal-line range; only consulted for the MACD family, which falls
    /// back to the canonical window of 9 when unset.
    #[serde(default)]
    #[garde(skip)]
    pub signal_min: Option<usize>,
    #[serde(default)]
    #[garde(custom(opt_bound_gte(self.signal_min)))]
    pub signal_max: Option<usize>,
    #[serde(default = "default_step")]
    #[garde(range(min = 1))]
    pub step: usize,
}

fn bound_gte(min: &usize) -> impl FnOnce(&usize, &()) -> garde::Result + '_ {
    move |max: &usize, (): &()| {
        if max < min {
            return Err(garde::Error::new(format!(
                "range upper bound ({max}) must be >= lower bound ({min})"
            )));
        }
        Ok(())
    }
}

fn opt_bound_gte(min: Option<usize>) -> impl FnOnce(&Option<usize>, &()) -> garde::Result {
    move |max: &Option<usize>, (): &()| {
        if let (Some(lo), Some(hi)) = (min, max) {
            if *hi < lo {
                return Err(garde::Error::new(format!(
                    "signal_max ({hi}) must be >= signal_min ({lo})"
                )));
            }
        }
        Ok(())
    }
}

impl GridSpec {
    /// Deterministic enumeration in ascending `(fast, slow, signal)` order.
    pub fn enumerate(&self, family: StrategyFamily) -> Vec<StrategyKind> {
        let signal_range = match (self.signal_min, self.signal_max) {
            (Some(lo), Some(hi)) => (lo, hi),
            (Some(lo), None) => (lo, lo),
            (None, Some(hi)) => (hi, hi),
            (None, None) => (default_macd_signal(), default_macd_signal()),
        };

        let mut out = Vec::new();
        for fast in (self.fast_min..=self.fast_max).step_by(self.step) {
            for slow in (self.slow_min..=self.slow_max).step_by(self.step) {
                if fast >= slow {
                    continue;
                }
                match family {
                    StrategyFamily::Sma => out.push(StrategyKind::SmaCross { fast, slow }),
                    StrategyFamily::Ema => out.push(StrategyKind::EmaCross { fast, slow }),
                    StrategyFamily::Macd => {
                        for signal in (signal_range.0..=signal_range.1).step_by(self.step) {
                            if signal >= 1 {
                                out.push(StrategyKind::Macd { fast, slow, signal });
                            }
                        }
                    }
                }
            }
        }
        out
    }
}

/// One completed grid point, tagged with its enumeration index so sinks can
/// restore deterministic order regardless of worker completion order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepRecord {
    pub index: usize,
    pub row: PortfolioRow,
    /// Present only when the sweep was asked to keep curves for downstream
    /// concurrency analysis.
    pub equity: Option<EquityCurve>,
}

/// Receives completed records from worker threads.
pub trait ResultSink: Send + Sync {
    fn accept(&self, record: SweepRecord) -> anyhow::Result<()>;
}

/// Collects records in memory and hands them back in enumeration order.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<SweepRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drain the collected records, restored to enumeration order.
    pub fn drain(&self) -> Vec<SweepRecord> {
        let mut records = std::mem::take(&mut *self.records.lock().expect("sink poisoned"));
        records.sort_by_key(|r| r.index);
        records
    }
}

impl ResultSink for MemorySink {
    fn accept(&self, record: SweepRecord) -> anyhow::Result<()> {
        self.records.lock().expect("sink poisoned").push(record);
        Ok(())
    }
}

/// Streams records to a JSON-lines file as workers complete them. Large
/// grids never accumulate in memory; the reader reorders by `index`.
pub struct JsonlSink {
    writer: Mutex<BufWriter<File>>,
}

impl JsonlSink {
    pub fn create(path: &Path) -> anyhow::Result<Self> {
        let file = File::create(path)?;
        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn finish(self) -> anyhow::Result<()> {
        self.writer
            .into_inner()
            .map_err(|_| anyhow::anyhow!("sink poisoned"))?
            .flush()?;
        Ok(())
    }
}

impl ResultSink for JsonlSink {
    fn accept(&self, record: SweepRecord) -> anyhow::Result<()> {
        let line = serde_json::to_string(&record)?;
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| anyhow::anyhow!("sink poisoned"))?;
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        Ok(())
    }
}

/// What a finished (or stopped) sweep looked like.
#[derive(Debug)]
pub struct SweepOutcome {
    pub enumerated: usize,
    pub completed: usize,
    pub partial: bool,
    pub diagnostics: Vec<Diagnostic>,
}

enum JobStatus {
    Completed,
    Skipped(Diagnostic),
    Cancelled,
}

/// Backtest every valid grid combination of `family` on `frame`, streaming
/// completed rows into `sink`.
///
/// Workers observe the cancellation token between jobs only; in-flight
/// combinations complete. A cancelled sweep reports `partial = true` with
/// whatever reached the sink.
#[allow(clippy::too_many_arguments)]
pub fn run_sweep(
    frame: &PriceFrame,
    family: StrategyFamily,
    grid: &GridSpec,
    side: TradeSide,
    rsi_filter: Option<&RsiFilter>,
    parallelism: usize,
    keep_equity: bool,
    sink: &dyn ResultSink,
    cancel: &CancelToken,
) -> Result<SweepOutcome, EngineError> {
    let combos = grid.enumerate(family);
    tracing::info!(
        ticker = frame.ticker(),
        combinations = combos.len(),
        workers = parallelism,
        "starting sensitivity sweep"
    );

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(parallelism.max(1))
        .build()
        .map_err(|e| EngineError::InternalInvariant(format!("worker pool: {e}")))?;

    let cache = IndicatorCache::new();
    let statuses: Vec<JobStatus> = pool.install(|| {
        combos
            .par_iter()
            .enumerate()
            .map(|(index, kind)| {
                if cancel.is_cancelled() {
                    return JobStatus::Cancelled;
                }
                run_one(frame, kind, side, rsi_filter, &cache, index, keep_equity, sink)
            })
            .collect()
    });

    let mut completed = 0usize;
    let mut diagnostics = Vec::new();
    for status in statuses {
        match status {
            JobStatus::Completed => completed += 1,
            JobStatus::Skipped(diag) => diagnostics.push(diag),
            JobStatus::Cancelled => {}
        }
    }

    Ok(SweepOutcome {
        enumerated: combos.len(),
        completed,
        partial: cancel.is_cancelled(),
        diagnostics,
    })
}

#[allow(clippy::too_many_arguments)]
fn run_one(
    frame: &PriceFrame,
    kind: &StrategyKind,
    side: TradeSide,
    rsi_filter: Option<&RsiFilter>,
    cache: &IndicatorCache,
    index: usize,
    keep_equity: bool,
    sink: &dyn ResultSink,
) -> JobStatus {
    let id = StrategyId::new(frame.ticker(), kind);
    let signals = match build_signals_cached(frame, kind, side, rsi_filter, cache) {
        Ok(signals) => signals,
        Err(err) => {
            return JobStatus::Skipped(Diagnostic::new(
                DiagnosticKind::InsufficientData,
                id.to_string(),
                err.to_string(),
            ));
        }
    };

    let output = run_with_signals(frame, &signals, side);
    let record = SweepRecord {
        index,
        row: PortfolioRow {
            id: id.clone(),
            metrics: output.metrics,
            labels: Vec::new(),
        },
        equity: keep_equity.then_some(output.equity),
    };

    match sink.accept(record) {
        Ok(()) => JobStatus::Completed,
        Err(err) => JobStatus::Skipped(Diagnostic::new(
            DiagnosticKind::SinkError,
            id.to_string(),
            err.to_string(),
        )),
    }
}
