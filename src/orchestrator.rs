//! Pipeline wiring: task dispatch, cancellation, and manifest assembly.
//!
//! All stage outputs are immutable values; the manifest the orchestrator
//! builds incrementally is the only mutable state in a run.

use std::cmp::Reverse;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use garde::Validate;
use ordered_float::OrderedFloat;

use crate::config::RunConfig;
use crate::data::{PortfolioSource, PriceLoader};
use crate::engine::backtest::run_backtest;
use crate::engine::best::deduplicate;
use crate::engine::filter::{aggregate, apply_gate, assign_scores};
use crate::engine::sweep::{run_sweep, MemorySink};
use crate::engine::types::PortfolioRow;
use crate::error::EngineError;
use crate::manifest::{Diagnostic, DiagnosticKind, RunManifest, Stage};
use crate::risk::{analyze, ConstituentSeries};
use crate::signals::StrategyKind;
use crate::validate::{validate_report, ConstituentStats};

/// Cooperative cancellation flag, optionally armed with a wall-clock
/// deadline. Workers check it between jobs; stages check it at their
/// boundaries. Nothing is ever interrupted mid-backtest.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_budget(budget: Option<Duration>) -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            deadline: budget.map(|b| Instant::now() + b),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        if self.flag.load(Ordering::SeqCst) {
            return true;
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                self.flag.store(true, Ordering::SeqCst);
                return true;
            }
        }
        false
    }
}

/// Sweep the configured grid for each ticker, then curate the survivors.
#[derive(Debug, Clone)]
pub struct SweepTask {
    pub tickers: Vec<String>,
    pub max_years: Option<f64>,
}

/// Re-aggregate previously persisted sweep rows.
pub struct BestTask {
    pub source: Box<dyn PortfolioSource + Send>,
}

/// One chosen strategy for concurrency analysis.
#[derive(Debug, Clone)]
pub struct Selection {
    pub ticker: String,
    pub kind: StrategyKind,
    pub max_years: Option<f64>,
}

/// Analyze a chosen strategy set for concurrent exposure.
#[derive(Debug, Clone)]
pub struct ConcurrencyTask {
    pub selections: Vec<Selection>,
}

/// The pipelines the engine can run.
pub enum Task {
    Sweep(SweepTask),
    Best(BestTask),
    Concurrency(ConcurrencyTask),
}

pub struct Orchestrator {
    loader: Arc<dyn PriceLoader>,
    config: RunConfig,
}

impl Orchestrator {
    /// Rejects invalid configuration up front; nothing else is checked at
    /// run time.
    pub fn new(loader: Arc<dyn PriceLoader>, config: RunConfig) -> Result<Self, EngineError> {
        config
            .validate()
            .map_err(|report| EngineError::SchemaError {
                context: format!("configuration: {report}"),
            })?;
        Ok(Self { loader, config })
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Run a task under a fresh cancellation token (armed with the
    /// configured time budget, if any).
    pub fn run(&self, task: Task) -> Result<RunManifest, EngineError> {
        let cancel =
            CancelToken::with_budget(self.config.time_budget_secs.map(Duration::from_secs));
        self.run_cancellable(task, &cancel)
    }

    /// Run a task under an externally owned cancellation token.
    pub fn run_cancellable(
        &self,
        task: Task,
        cancel: &CancelToken,
    ) -> Result<RunManifest, EngineError> {
        match task {
            Task::Sweep(task) => self.run_sweep_task(&task, cancel),
            Task::Best(task) => self.run_best_task(task, cancel),
            Task::Concurrency(task) => self.run_concurrency_task(&task, cancel),
        }
    }

    fn run_sweep_task(
        &self,
        task: &SweepTask,
        cancel: &CancelToken,
    ) -> Result<RunManifest, EngineError> {
        let cfg = &self.config;
        let mut manifest = RunManifest::new(Stage::Sweep);
        tracing::info!(run_id = %manifest.run_id, tickers = task.tickers.len(), "sweep run");

        for ticker in &task.tickers {
            if cancel.is_cancelled() {
                break;
            }

            let frame = match self.loader.load(ticker, cfg.timeframe, task.max_years) {
                Ok(frame) => frame,
                Err(err) => {
                    manifest.push_diagnostic(Diagnostic::new(
                        DiagnosticKind::LoadFailed,
                        ticker.clone(),
                        err.to_string(),
                    ));
                    continue;
                }
            };

            let sink = MemorySink::new();
            let outcome = run_sweep(
                &frame,
                cfg.family,
                &cfg.grid,
                cfg.side,
                cfg.rsi.as_ref(),
                cfg.parallelism,
                cfg.keep_equity_curves,
                &sink,
                cancel,
            )?;
            manifest.partial |= outcome.partial;
            for diagnostic in outcome.diagnostics {
                manifest.push_diagnostic(diagnostic);
            }

            let rows: Vec<PortfolioRow> = sink.drain().into_iter().map(|r| r.row).collect();
            manifest.rows.extend(curate(rows, cfg));
        }

        manifest.cancelled = cancel.is_cancelled();
        manifest.partial |= manifest.cancelled;
        sort_rows(&mut manifest.rows);
        Ok(manifest)
    }

    fn run_best_task(
        &self,
        mut task: BestTask,
        cancel: &CancelToken,
    ) -> Result<RunManifest, EngineError> {
        let mut manifest = RunManifest::new(Stage::Best);
        tracing::info!(run_id = %manifest.run_id, "best-aggregation run");

        let (rows, diagnostics) = task.source.collect_rows();
        for diagnostic in diagnostics {
            manifest.push_diagnostic(diagnostic);
        }

        manifest.rows = curate(rows, &self.config);
        sort_rows(&mut manifest.rows);
        manifest.cancelled = cancel.is_cancelled();
        manifest.partial = manifest.cancelled;
        Ok(manifest)
    }

    fn run_concurrency_task(
        &self,
        task: &ConcurrencyTask,
        cancel: &CancelToken,
    ) -> Result<RunManifest, EngineError> {
        let cfg = &self.config;
        let mut manifest = RunManifest::new(Stage::Concurrency);
        tracing::info!(
            run_id = %manifest.run_id,
            strategies = task.selections.len(),
            "concurrency run"
        );

        let mut constituents = Vec::with_capacity(task.selections.len());
        let mut stats = Vec::with_capacity(task.selections.len());
        for selection in &task.selections {
            if cancel.is_cancelled() {
                manifest.cancelled = true;
                manifest.partial = true;
                return Ok(manifest);
            }

            let frame = self
                .loader
                .load(&selection.ticker, cfg.timeframe, selection.max_years)?;
            let output = run_backtest(&frame, &selection.kind, cfg.side, cfg.rsi.as_ref())?;

            let id = crate::engine::types::StrategyId::new(frame.ticker(), &selection.kind);
            stats.push(ConstituentStats {
                max_drawdown: output.metrics.max_drawdown,
                sharpe: output.metrics.sharpe,
                entry_signals: output.trades.len(),
            });
            manifest.rows.push(PortfolioRow {
                id: id.clone(),
                metrics: output.metrics.clone(),
                labels: Vec::new(),
            });
            constituents.push(ConstituentSeries {
                id,
                equity: output.equity,
                expectancy_per_trade: output.metrics.expectancy_per_trade,
                entry_timestamps: output.trades.iter().map(|t| t.entry_ts).collect(),
            });
        }

        let analysis = analyze(&constituents, cfg.align_policy, &cfg.allocation_method)?;
        for diagnostic in analysis.diagnostics {
            manifest.push_diagnostic(diagnostic);
        }

        let summary = validate_report(
            &analysis.report,
            &analysis.sigma,
            &analysis.combined_returns,
            &stats,
            cfg.timeframe.periods_per_year(),
        );
        if !summary.passed {
            let fired: Vec<&str> = summary
                .checks
                .iter()
                .filter(|c| !c.passed)
                .map(|c| c.predicate.as_str())
                .collect();
            if cfg.validation_fatal {
                return Err(EngineError::ValidationFailed {
                    predicate: fired.join(", "),
                });
            }
            manifest.push_diagnostic(Diagnostic::new(
                DiagnosticKind::ValidationFailed,
                "validator",
                fired.join(", "),
            ));
        }

        manifest.risk_report = Some(analysis.report);
        manifest.validation = Some(summary);
        manifest.cancelled = cancel.is_cancelled();
        manifest.partial = manifest.cancelled;
        Ok(manifest)
    }
}

/// Gate, score, bucket-aggregate and deduplicate one row population.
/// Pre-existing labels ride along as extra candidates so nothing a prior
/// aggregation assigned is dropped.
fn curate(rows: Vec<PortfolioRow>, cfg: &RunConfig) -> Vec<PortfolioRow> {
    let mut survivors = apply_gate(rows, &cfg.min_criteria);
    assign_scores(&mut survivors);
    let mut candidates = aggregate(&survivors, &cfg.target_metrics);
    candidates.extend(survivors.into_iter().filter(|r| !r.labels.is_empty()));
    deduplicate(candidates)
}

/// Canonical manifest ordering: score descending, ties by id ascending.
fn sort_rows(rows: &mut [PortfolioRow]) {
    rows.sort_by_key(|r| (Reverse(OrderedFloat(r.metrics.score)), r.id.clone()));
}
