use std::collections::HashMap;
use std::sync::Arc;

use backtest_core::{
    BacktestError, BacktestRequest, BacktestResult, BacktestStatus, PriceBar, ResultStore, Signal,
    SignalStore, SignalStats, UsageRecord,
};
use chrono::Utc;
use market_data::MarketDataProvider;
use rayon::prelude::*;

use crate::config::EngineConfig;
use crate::engine::{BacktestEngine, CancelFlag, SimulationError};
use crate::portfolio::{PortfolioState, PriceIndex};
use crate::report::{build_result, ReportContext};
use crate::strategy::{ThresholdStrategy, TradingStrategy};
use crate::validation::validate_request;

/// Prices, benchmark bars and signals fetched once and shared by many runs.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    pub prices: PriceIndex,
    pub benchmark_bars: HashMap<String, Vec<PriceBar>>,
    pub signals: Vec<Signal>,
}

/// Runs backtests end to end: validate, fetch, simulate, analyse, persist.
#[derive(Clone)]
pub struct BacktestOrchestrator {
    provider: MarketDataProvider,
    signals: Arc<dyn SignalStore>,
    results: Arc<dyn ResultStore>,
    strategy: Arc<dyn TradingStrategy>,
    config: EngineConfig,
}

impl BacktestOrchestrator {
    pub fn new(
        provider: MarketDataProvider,
        signals: Arc<dyn SignalStore>,
        results: Arc<dyn ResultStore>,
    ) -> Self {
        Self {
            provider,
            signals,
            results,
            strategy: Arc::new(ThresholdStrategy::default()),
            config: EngineConfig::default(),
        }
    }

    pub fn with_strategy(mut self, strategy: Arc<dyn TradingStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub async fn run(&self, request: BacktestRequest) -> Result<BacktestResult, BacktestError> {
        self.run_with_cancel(request, &CancelFlag::new()).await
    }

    #[tracing::instrument(skip_all, fields(backtest_id))]
    pub async fn run_with_cancel(
        &self,
        request: BacktestRequest,
        cancel: &CancelFlag,
    ) -> Result<BacktestResult, BacktestError> {
        let request = validate_request(request)?;
        let id = format!("backtest-{}", uuid::Uuid::new_v4());
        tracing::Span::current().record("backtest_id", id.as_str());
        let created_at = Utc::now();

        tracing::info!(
            "Starting backtest {} for {} symbols, {} to {}",
            id,
            request.symbols.len(),
            request.start_date,
            request.end_date
        );
        if let Err(e) = self.results.update_status(&id, BacktestStatus::Running).await {
            tracing::warn!("Failed to record running status for {}: {}", id, e);
        }

        let (dataset, usage) = match self.fetch_dataset(&request).await {
            Ok(fetched) => fetched,
            Err(e) => {
                tracing::error!("Backtest {} could not load its inputs: {}", id, e);
                let failed = self.empty_result(&id, &request, created_at, e.to_string());
                self.persist_failure(&failed).await;
                return Err(e);
            }
        };

        // The day loop is CPU-bound; keep it off the async workers.
        let task = {
            let strategy = Arc::clone(&self.strategy);
            let config = self.config.clone();
            let cancel = cancel.clone();
            let id = id.clone();
            let request = request.clone();
            tokio::task::spawn_blocking(move || {
                simulate_and_report(&id, &request, &dataset, strategy.as_ref(), &config, &cancel, created_at, usage)
            })
        };
        let (result, failure) = match task.await {
            Ok(outcome) => outcome,
            Err(e) => {
                let message = format!("simulation task failed: {}", e);
                tracing::error!("Backtest {}: {}", id, message);
                let failed = self.empty_result(&id, &request, created_at, message.clone());
                self.persist_failure(&failed).await;
                return Err(BacktestError::Simulation {
                    message,
                    partial: Box::new(failed),
                });
            }
        };

        if let Err(e) = self.results.save_result(&result).await {
            tracing::error!("Failed to persist backtest {}: {}", id, e);
            return Err(match failure {
                None => BacktestError::Persistence {
                    message: e.to_string(),
                    result: Box::new(result),
                },
                Some(failure) => into_backtest_error(failure, result),
            });
        }

        match failure {
            None => {
                tracing::info!(
                    "Backtest {} completed: total return {:?}, {} trades",
                    id,
                    result.total_return,
                    result.trades.len()
                );
                Ok(result)
            }
            Some(failure) => {
                tracing::warn!("Backtest {} ended early: {}", id, failure);
                Err(into_backtest_error(failure, result))
            }
        }
    }

    /// Bars for every symbol (all required), benchmark bars (best effort) and signals.
    async fn fetch_dataset(
        &self,
        request: &BacktestRequest,
    ) -> Result<(Dataset, Vec<UsageRecord>), BacktestError> {
        let (start, end) = (request.start_date, request.end_date);
        let (fetched, mut usage) = self.provider.get_many(&request.symbols, start, end).await;

        let mut prices = PriceIndex::new();
        for (symbol, result) in fetched {
            match result {
                Ok(bars) => prices.insert(&symbol, bars),
                Err(e) => {
                    return Err(BacktestError::DataUnavailable {
                        symbol,
                        reason: e.to_string(),
                    })
                }
            }
        }

        let mut benchmark_symbols: Vec<String> = self
            .config
            .benchmarks
            .iter()
            .map(|(_, symbol)| symbol.clone())
            .chain(std::iter::once(request.benchmark_symbol.clone()))
            .filter(|symbol| !prices.contains(symbol))
            .collect();
        benchmark_symbols.sort();
        benchmark_symbols.dedup();

        let mut benchmark_bars = HashMap::new();
        if !benchmark_symbols.is_empty() {
            let (fetched, benchmark_usage) =
                self.provider.get_many(&benchmark_symbols, start, end).await;
            usage.merge(benchmark_usage);
            for (symbol, result) in fetched {
                match result {
                    Ok(bars) => {
                        benchmark_bars.insert(symbol, bars);
                    }
                    Err(e) => tracing::warn!("Benchmark {} unavailable: {}", symbol, e),
                }
            }
        }

        let signals = self
            .signals
            .get_signals(start, end, Some(request.symbols.as_slice()))
            .await
            .map_err(BacktestError::SignalStore)?;
        tracing::info!("Loaded {} signals", signals.len());

        Ok((
            Dataset {
                prices,
                benchmark_bars,
                signals,
            },
            usage.into_records(),
        ))
    }

    /// Store a failed result with its error; if that fails, at least record the status.
    async fn persist_failure(&self, result: &BacktestResult) {
        if let Err(e) = self.results.save_result(result).await {
            tracing::error!("Failed to persist failed backtest {}: {}", result.id, e);
            if let Err(e) = self.results.update_status(&result.id, BacktestStatus::Failed).await {
                tracing::warn!("Failed to record failed status for {}: {}", result.id, e);
            }
        }
    }

    /// A failed result for a run that never produced simulation state.
    fn empty_result(
        &self,
        id: &str,
        request: &BacktestRequest,
        created_at: chrono::DateTime<Utc>,
        error: String,
    ) -> BacktestResult {
        let state = PortfolioState::new(request.initial_capital);
        let dataset = Dataset::default();
        let ctx = ReportContext {
            id,
            strategy: self.strategy.name(),
            request,
            prices: &dataset.prices,
            benchmark_bars: &dataset.benchmark_bars,
            config: &self.config,
            created_at,
        };
        build_result(
            &ctx,
            state,
            SignalStats::default(),
            BacktestStatus::Failed,
            Some(error),
            Vec::new(),
        )
    }

    /// Simulate many requests against one dataset in parallel.
    ///
    /// Each run owns its own portfolio state; nothing is fetched or persisted.
    pub fn run_batch(
        &self,
        requests: Vec<BacktestRequest>,
        dataset: &Dataset,
    ) -> Vec<Result<BacktestResult, BacktestError>> {
        let created_at = Utc::now();
        let strategy = self.strategy.as_ref();
        let config = &self.config;
        requests
            .into_par_iter()
            .enumerate()
            .map(|(i, request)| -> Result<BacktestResult, BacktestError> {
                let request = validate_request(request)?;
                let id = format!("batch-{:04}", i);
                let (result, failure) = simulate_and_report(
                    &id,
                    &request,
                    dataset,
                    strategy,
                    config,
                    &CancelFlag::new(),
                    created_at,
                    Vec::new(),
                );
                match failure {
                    None => Ok(result),
                    Some(failure) => Err(into_backtest_error(failure, result)),
                }
            })
            .collect()
    }
}

/// Run the day loop and assemble the result, whatever the simulation's outcome.
#[allow(clippy::too_many_arguments)]
fn simulate_and_report(
    id: &str,
    request: &BacktestRequest,
    dataset: &Dataset,
    strategy: &dyn TradingStrategy,
    config: &EngineConfig,
    cancel: &CancelFlag,
    created_at: chrono::DateTime<Utc>,
    usage: Vec<UsageRecord>,
) -> (BacktestResult, Option<SimulationError>) {
    let ctx = ReportContext {
        id,
        strategy: strategy.name(),
        request,
        prices: &dataset.prices,
        benchmark_bars: &dataset.benchmark_bars,
        config,
        created_at,
    };
    let engine = BacktestEngine::new(request, strategy);
    match engine.run(&dataset.prices, &dataset.signals, cancel) {
        Ok(outcome) => {
            let result = build_result(
                &ctx,
                outcome.state,
                outcome.stats,
                BacktestStatus::Completed,
                None,
                usage,
            );
            (result, None)
        }
        Err(failure) => {
            let failure = *failure;
            let status = match failure.error {
                SimulationError::Cancelled { .. } => BacktestStatus::Cancelled,
                SimulationError::Invalid { .. } => BacktestStatus::Failed,
            };
            let result = build_result(
                &ctx,
                failure.state,
                failure.stats,
                status,
                Some(failure.error.to_string()),
                usage,
            );
            (result, Some(failure.error))
        }
    }
}

fn into_backtest_error(failure: SimulationError, partial: BacktestResult) -> BacktestError {
    match failure {
        SimulationError::Cancelled { .. } => BacktestError::Cancelled {
            partial: Box::new(partial),
        },
        SimulationError::Invalid { .. } => BacktestError::Simulation {
            message: failure.to_string(),
            partial: Box::new(partial),
        },
    }
}
