use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backtest_core::{
    BacktestError, BacktestRequest, BacktestResult, BacktestStatus, MarketDataSource, PriceBar,
    ResultStore, Signal, SignalFilters, SignalStore, StoreError, TradeAction, TradeReason,
};
use chrono::{Duration as ChronoDuration, NaiveDate, TimeZone, Utc};
use market_data::{MarketDataProvider, ProviderConfig, StaticSource};
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::config::EngineConfig;
use crate::engine::{BacktestEngine, CancelFlag, SimulationError, SimulationOutcome};
use crate::memory::{InMemoryResultStore, InMemorySignalStore};
use crate::orchestrator::{BacktestOrchestrator, Dataset};
use crate::portfolio::PriceIndex;
use crate::report::{build_result, ReportContext};
use crate::db::BacktestDb;
use crate::strategy::{DecisionContext, ThresholdStrategy, TradeIntent, TradingStrategy};

/// Helper: calendar date `offset` days after 2024-01-01.
fn date(offset: i64) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + ChronoDuration::days(offset)
}

/// Helper: a bar with every price at `close`.
fn bar(offset: i64, close: f64) -> PriceBar {
    let price = Decimal::from_f64(close).unwrap();
    PriceBar {
        date: date(offset),
        open: price,
        high: price,
        low: price,
        close: price,
        volume: 1_000_000.0,
    }
}

/// Helper: one bar per calendar day starting 2024-01-01.
fn bars_from(closes: &[f64]) -> Vec<PriceBar> {
    closes
        .iter()
        .enumerate()
        .map(|(i, c)| bar(i as i64, *c))
        .collect()
}

fn signal(symbol: &str, offset: i64, score: f64, confidence: f64) -> Signal {
    let d = date(offset);
    Signal {
        id: format!("{}-{}-{}", symbol, offset, score),
        symbol: symbol.to_string(),
        timestamp: Utc
            .from_utc_datetime(&d.and_hms_opt(14, 30, 0).unwrap()),
        score,
        confidence,
        risk: None,
        source: "test".to_string(),
        market_cap: None,
    }
}

/// Helper: buy signal that clears both thresholds.
fn buy_signal(symbol: &str, offset: i64) -> Signal {
    signal(symbol, offset, 0.9, 0.8)
}

fn sell_signal(symbol: &str, offset: i64) -> Signal {
    signal(symbol, offset, 0.1, 0.8)
}

/// Helper: request over `days` calendar days from 2024-01-01.
fn test_request(symbols: &[&str], days: i64) -> BacktestRequest {
    BacktestRequest::new(
        date(0),
        date(days - 1),
        symbols.iter().map(|s| s.to_string()).collect(),
    )
}

fn simulate(request: &BacktestRequest, prices: &PriceIndex, signals: &[Signal]) -> SimulationOutcome {
    let strategy = ThresholdStrategy::default();
    BacktestEngine::new(request, &strategy)
        .run(prices, signals, &CancelFlag::new())
        .unwrap()
}

fn report(request: &BacktestRequest, prices: &PriceIndex, signals: &[Signal]) -> BacktestResult {
    let outcome = simulate(request, prices, signals);
    let benchmark_bars = HashMap::new();
    let config = EngineConfig::default();
    let ctx = ReportContext {
        id: "test",
        strategy: "signal_threshold",
        request,
        prices,
        benchmark_bars: &benchmark_bars,
        config: &config,
        created_at: Utc::now(),
    };
    build_result(
        &ctx,
        outcome.state,
        outcome.stats,
        BacktestStatus::Completed,
        None,
        Vec::new(),
    )
}

/// Prices that rise, fall and recover, for runs with several trades.
fn choppy_closes(days: usize) -> Vec<f64> {
    (0..days)
        .map(|i| 100.0 + 10.0 * ((i as f64) * 0.7).sin() + i as f64 * 0.2)
        .collect()
}

// ===========================================================================
// Trade simulation scenarios
// ===========================================================================

#[test]
fn test_buy_signal_sizes_ten_percent_of_cash() {
    let request = test_request(&["X"], 5);
    let prices = PriceIndex::new().with_bars("X", bars_from(&[100.0; 5]));
    let outcome = simulate(&request, &prices, &[buy_signal("X", 1)]);

    let state = outcome.state;
    assert_eq!(state.trades.len(), 1);
    let trade = &state.trades[0];
    assert_eq!(trade.action, TradeAction::Buy);
    assert_eq!(trade.quantity, dec!(100));
    assert_eq!(trade.price, dec!(100));
    // 100 x 100 x (1 + 0.001 + 0.0005)
    assert_eq!(state.cash, dec!(100000) - dec!(10015));
    assert_eq!(trade.pnl, Decimal::ZERO);
    assert_eq!(outcome.stats.executed, 1);
}

#[test]
fn test_sell_without_position_changes_nothing() {
    let request = test_request(&["X"], 5);
    let prices = PriceIndex::new().with_bars("X", bars_from(&[100.0; 5]));
    let outcome = simulate(&request, &prices, &[sell_signal("X", 2)]);

    assert!(outcome.state.trades.is_empty());
    assert!(outcome.state.positions.is_empty());
    assert_eq!(outcome.state.cash, dec!(100000));
    assert_eq!(outcome.stats.no_decision, 1);
}

#[test]
fn test_flat_prices_give_zero_return_and_undefined_sharpe() {
    let request = test_request(&["X"], 30);
    let prices = PriceIndex::new().with_bars("X", bars_from(&[50.0; 30]));
    let result = report(&request, &prices, &[]);

    assert_eq!(result.series.len(), 30);
    assert_eq!(result.total_return, Some(0.0));
    assert_eq!(result.metrics.volatility, Some(0.0));
    assert_eq!(result.metrics.sharpe_ratio, None);
    assert!(result.metrics.undefined.contains_key("sharpe_ratio"));
    assert!(result.series.daily_returns.iter().all(|r| *r == 0.0));
}

#[test]
fn test_min_score_filter_discards_signal() {
    let mut request = test_request(&["X"], 5);
    request.filters = Some(SignalFilters {
        min_score: Some(0.8),
        ..Default::default()
    });
    let prices = PriceIndex::new().with_bars("X", bars_from(&[100.0; 5]));
    let outcome = simulate(&request, &prices, &[signal("X", 1, 0.75, 0.9)]);

    assert!(outcome.state.trades.is_empty());
    assert_eq!(outcome.stats.filtered, 1);
    assert_eq!(outcome.stats.no_decision, 0);
}

#[test]
fn test_crash_after_rally_is_half_drawdown() {
    let mut closes = vec![100.0];
    for _ in 0..10 {
        let last = *closes.last().unwrap();
        closes.push(last * 1.01);
    }
    let last = *closes.last().unwrap();
    closes.push(last * 0.5);

    let returns = crate::benchmark::close_returns(&bars_from(&closes));
    let dd = crate::metrics::max_drawdown(&crate::metrics::cumulative_returns(&returns)).unwrap();
    assert!((dd + 0.5).abs() < 1e-9, "got {}", dd);
}

#[test]
fn test_signal_without_bar_is_no_price() {
    let request = test_request(&["X"], 5);
    // no bar on day 2
    let bars = vec![bar(0, 100.0), bar(1, 100.0), bar(3, 100.0), bar(4, 100.0)];
    let prices = PriceIndex::new().with_bars("X", bars);
    let outcome = simulate(&request, &prices, &[buy_signal("X", 2), buy_signal("Y", 3)]);

    assert!(outcome.state.trades.is_empty());
    assert_eq!(outcome.stats.no_price, 2);
    assert_eq!(outcome.stats.received, 2);
}

#[test]
fn test_days_without_bars_keep_previous_mark() {
    let request = test_request(&["X"], 4);
    let bars = vec![bar(0, 100.0), bar(1, 110.0), bar(3, 120.0)];
    let prices = PriceIndex::new().with_bars("X", bars);
    let outcome = simulate(&request, &prices, &[buy_signal("X", 0)]);

    let equity = &outcome.state.series.equity;
    assert_eq!(equity.len(), 4);
    assert_eq!(equity[1], equity[2]);
    assert_eq!(outcome.state.series.daily_returns[2], 0.0);
    assert!(equity[3] > equity[2]);
}

#[test]
fn test_signals_outside_window_are_ignored() {
    let request = test_request(&["X"], 5);
    let prices = PriceIndex::new().with_bars("X", bars_from(&[100.0; 10]));
    let outcome = simulate(&request, &prices, &[buy_signal("X", 7)]);
    assert_eq!(outcome.stats.received, 0);
    assert!(outcome.state.trades.is_empty());
}

#[test]
fn test_same_day_signals_run_in_arrival_order() {
    let request = test_request(&["X"], 3);
    let prices = PriceIndex::new().with_bars("X", bars_from(&[100.0; 3]));
    // sell first (nothing held), then buy
    let outcome = simulate(&request, &prices, &[sell_signal("X", 1), buy_signal("X", 1)]);
    assert_eq!(outcome.stats.no_decision, 1);
    assert_eq!(outcome.state.trades.len(), 1);
    assert_eq!(outcome.state.trades[0].action, TradeAction::Buy);
}

#[test]
fn test_stop_loss_exits_whole_position() {
    let mut request = test_request(&["X"], 5);
    request.stop_loss = Some(0.1);
    let prices = PriceIndex::new().with_bars("X", bars_from(&[100.0, 100.0, 95.0, 85.0, 80.0]));
    let outcome = simulate(&request, &prices, &[buy_signal("X", 1)]);

    let trades = &outcome.state.trades;
    assert_eq!(trades.len(), 2);
    assert_eq!(trades[1].action, TradeAction::Sell);
    assert_eq!(trades[1].reason, TradeReason::StopLoss);
    assert_eq!(trades[1].quantity, trades[0].quantity);
    assert_eq!(trades[1].price, dec!(85));
    assert!(trades[1].signal.is_none());
    assert!(trades[1].pnl < Decimal::ZERO);
    assert!(outcome.state.positions.is_empty());
}

#[test]
fn test_cancelled_run_keeps_partial_state() {
    let request = test_request(&["X"], 5);
    let prices = PriceIndex::new().with_bars("X", bars_from(&[100.0; 5]));
    let strategy = ThresholdStrategy::default();
    let cancel = CancelFlag::new();
    cancel.cancel();

    let failure = BacktestEngine::new(&request, &strategy)
        .run(&prices, &[buy_signal("X", 0)], &cancel)
        .unwrap_err();
    assert_eq!(failure.error, SimulationError::Cancelled { date: date(0) });
    assert!(failure.state.series.is_empty());
    assert_eq!(failure.state.cash, dec!(100000));
}

// ===========================================================================
// Properties
// ===========================================================================

fn mixed_run() -> (BacktestRequest, PriceIndex, Vec<Signal>) {
    let request = test_request(&["X", "Y"], 40);
    let prices = PriceIndex::new()
        .with_bars("X", bars_from(&choppy_closes(40)))
        .with_bars("Y", bars_from(&[20.0; 40]));
    let mut signals = Vec::new();
    for offset in (0..40).step_by(3) {
        signals.push(buy_signal("X", offset));
        signals.push(buy_signal("Y", offset));
        signals.push(sell_signal("X", offset + 1));
    }
    (request, prices, signals)
}

#[test]
fn test_repeated_runs_are_identical() {
    let (request, prices, signals) = mixed_run();
    let first = report(&request, &prices, &signals);
    let second = report(&request, &prices, &signals);

    assert!(!first.trades.is_empty());
    assert_eq!(first.trades, second.trades);
    assert_eq!(first.series, second.series);
    assert_eq!(first.metrics, second.metrics);
    assert_eq!(first.rolling, second.rolling);
}

#[test]
fn test_cash_and_positions_reconcile_with_trade_log() {
    let (request, prices, signals) = mixed_run();
    let state = simulate(&request, &prices, &signals).state;

    let buy_costs: Decimal = state
        .trades
        .iter()
        .filter(|t| t.action == TradeAction::Buy)
        .map(|t| t.commission + t.slippage)
        .sum();
    let realized: Decimal = state
        .trades
        .iter()
        .filter(|t| t.action == TradeAction::Sell)
        .map(|t| t.pnl)
        .sum();
    let unrealized: Decimal = state.positions.values().map(|p| p.unrealized_pnl).sum();

    let expected = request.initial_capital - buy_costs + realized + unrealized;
    let diff = (state.total_value() - expected).abs();
    assert!(diff < dec!(0.0001), "off by {}", diff);
    assert!(state.trades.iter().any(|t| t.action == TradeAction::Sell));
}

#[test]
fn test_positions_never_go_negative() {
    let (request, prices, signals) = mixed_run();
    let state = simulate(&request, &prices, &signals).state;

    let mut held: HashMap<String, Decimal> = HashMap::new();
    for trade in &state.trades {
        let qty = held.entry(trade.symbol.clone()).or_default();
        match trade.action {
            TradeAction::Buy => *qty += trade.quantity,
            TradeAction::Sell => *qty -= trade.quantity,
        }
        assert!(*qty >= Decimal::ZERO, "{} went negative", trade.symbol);
    }
    assert!(state.positions.values().all(|p| p.quantity > Decimal::ZERO));
}

#[test]
fn test_series_shapes_and_drawdowns() {
    let (request, prices, signals) = mixed_run();
    let result = report(&request, &prices, &signals);
    let series = &result.series;

    assert_eq!(series.len(), 40);
    assert_eq!(series.equity.len(), 40);
    assert_eq!(series.daily_returns.len(), 40);
    assert_eq!(series.cumulative_returns.len(), 40);
    assert_eq!(series.drawdowns.len(), 40);
    assert!(series.drawdowns.iter().all(|d| *d <= 0.0));
    assert!(result.metrics.max_drawdown.unwrap() <= 0.0);
    assert!(result.metrics.volatility.unwrap() >= 0.0);

    assert_eq!(result.rolling.window, 21);
    assert_eq!(result.rolling.volatility.len(), 40);
    assert!(result.rolling.volatility[..20].iter().all(Option::is_none));
    assert!(result.rolling.volatility[20].is_some());
    assert_eq!(result.rolling.beta.len(), 40);
}

#[test]
fn test_relative_metrics_undefined_without_benchmark() {
    let (request, prices, signals) = mixed_run();
    let result = report(&request, &prices, &signals);
    assert_eq!(result.metrics.beta, None);
    assert!(result.metrics.undefined.contains_key("beta"));
    assert!(result.metrics.undefined.contains_key("treynor_ratio"));
    assert_eq!(result.benchmarks["sp500"].data_points, 0);
    assert!(result.rolling.beta.iter().all(Option::is_none));
}

#[test]
fn test_relative_metrics_against_traded_benchmark() {
    let mut request = test_request(&["SPY"], 40);
    request.benchmark_symbol = "SPY".to_string();
    let prices = PriceIndex::new().with_bars("SPY", bars_from(&choppy_closes(40)));
    let result = report(&request, &prices, &[buy_signal("SPY", 0)]);

    let beta = result.metrics.beta.unwrap();
    assert!(beta > 0.0 && beta < 0.2, "beta {}", beta);
    assert!(result.metrics.tracking_error.unwrap() > 0.0);
    assert!(result.benchmarks["sp500"].data_points == 40);

    let position = &result.positions[0];
    assert!(position.weight > 0.0 && position.weight < 1.0);
    assert!(position.volatility.unwrap() > 0.0);
    assert!((position.beta.unwrap() - 1.0).abs() < 1e-9);
    assert!(result.rolling.beta[39].is_some());
}

// ===========================================================================
// Orchestrator
// ===========================================================================

fn provider(source: StaticSource) -> MarketDataProvider {
    let sources: Vec<Arc<dyn MarketDataSource>> = vec![Arc::new(source)];
    MarketDataProvider::new(
        sources,
        ProviderConfig {
            max_retries: 0,
            backoff: Duration::ZERO,
            concurrency: 2,
        },
    )
}

fn fixture_source() -> StaticSource {
    StaticSource::new("fixture")
        .with_bars("AAPL", bars_from(&choppy_closes(30)))
        .with_bars("SPY", bars_from(&choppy_closes(30)))
}

fn orchestrator(
    source: StaticSource,
    signals: Vec<Signal>,
    results: Arc<dyn ResultStore>,
) -> BacktestOrchestrator {
    BacktestOrchestrator::new(
        provider(source),
        Arc::new(InMemorySignalStore::new(signals)),
        results,
    )
}

struct FailingResultStore;

#[async_trait]
impl ResultStore for FailingResultStore {
    async fn save_result(&self, _result: &BacktestResult) -> Result<(), StoreError> {
        Err(StoreError::Database("disk full".to_string()))
    }

    async fn update_status(&self, _id: &str, _status: BacktestStatus) -> Result<(), StoreError> {
        Err(StoreError::Database("disk full".to_string()))
    }
}

struct FailingSignalStore;

#[async_trait]
impl SignalStore for FailingSignalStore {
    async fn get_signals(
        &self,
        _start: NaiveDate,
        _end: NaiveDate,
        _symbols: Option<&[String]>,
    ) -> Result<Vec<Signal>, StoreError> {
        Err(StoreError::Database("table missing".to_string()))
    }
}

#[tokio::test]
async fn test_orchestrator_completes_and_persists() {
    let store = Arc::new(InMemoryResultStore::new());
    let orch = orchestrator(
        fixture_source(),
        vec![buy_signal("AAPL", 2), sell_signal("AAPL", 10)],
        store.clone(),
    );

    let result = orch.run(test_request(&["aapl"], 30)).await.unwrap();
    assert_eq!(result.status, BacktestStatus::Completed);
    assert_eq!(result.request.symbols, vec!["AAPL"]);
    assert_eq!(result.trades.len(), 2);
    assert_eq!(result.signal_stats.executed, 2);
    assert!(result.completed_at.is_some());
    assert!(result.metrics.beta.is_some());
    assert!(result.benchmarks["sp500"].data_points > 0);
    assert_eq!(result.benchmarks["nasdaq"].data_points, 0);
    assert!(result.data_usage.iter().any(|u| u.source == "fixture"));

    let stored = store.get(&result.id).unwrap();
    assert_eq!(stored.status, BacktestStatus::Completed);
    assert_eq!(stored.result.unwrap(), result);
}

#[tokio::test]
async fn test_orchestrator_rejects_invalid_request_before_io() {
    let store = Arc::new(InMemoryResultStore::new());
    let orch = orchestrator(fixture_source(), Vec::new(), store.clone());

    let mut request = test_request(&["AAPL"], 30);
    request.initial_capital = dec!(-5);
    let err = orch.run(request).await.unwrap_err();
    assert_eq!(err.code(), "VALIDATION_ERROR");
    assert!(store.is_empty());
}

#[tokio::test]
async fn test_orchestrator_missing_symbol_is_data_unavailable() {
    let store = Arc::new(InMemoryResultStore::new());
    let orch = orchestrator(fixture_source(), Vec::new(), store.clone());

    let err = orch.run(test_request(&["AAPL", "NOPE"], 30)).await.unwrap_err();
    match &err {
        BacktestError::DataUnavailable { symbol, .. } => assert_eq!(symbol, "NOPE"),
        other => panic!("expected DataUnavailable, got {:?}", other),
    }
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn test_orchestrator_failed_fetch_is_stored_with_reason() {
    let db = BacktestDb::connect("sqlite::memory:").await.unwrap();
    let store = Arc::new(db.clone());
    let orch = BacktestOrchestrator::new(
        provider(fixture_source()),
        Arc::new(InMemorySignalStore::new(Vec::new())),
        store,
    );

    let err = orch.run(test_request(&["NOPE"], 30)).await.unwrap_err();
    assert_eq!(err.code(), "DATA_UNAVAILABLE");

    let listed = db.list_backtests(10).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].status, BacktestStatus::Failed);
    assert!(listed[0].error.as_deref().unwrap().contains("NOPE"));

    let record = db.get_backtest(&listed[0].id).await.unwrap().unwrap();
    let result = record.result.unwrap();
    assert_eq!(result.status, BacktestStatus::Failed);
    assert!(result.series.is_empty());
    assert_eq!(result.total_return, None);
}

#[tokio::test]
async fn test_orchestrator_signal_store_failure() {
    let orch = BacktestOrchestrator::new(
        provider(fixture_source()),
        Arc::new(FailingSignalStore),
        Arc::new(InMemoryResultStore::new()),
    );
    let err = orch.run(test_request(&["AAPL"], 30)).await.unwrap_err();
    assert_eq!(err.code(), "SIGNAL_STORE_ERROR");
}

#[tokio::test]
async fn test_orchestrator_save_failure_returns_result() {
    let orch = orchestrator(fixture_source(), vec![buy_signal("AAPL", 2)], Arc::new(FailingResultStore));

    let err = orch.run(test_request(&["AAPL"], 30)).await.unwrap_err();
    assert_eq!(err.code(), "PERSISTENCE_ERROR");
    let result = err.result().unwrap();
    assert_eq!(result.status, BacktestStatus::Completed);
    assert_eq!(result.trades.len(), 1);
}

#[tokio::test]
async fn test_orchestrator_cancel_persists_partial_result() {
    let store = Arc::new(InMemoryResultStore::new());
    let orch = orchestrator(fixture_source(), vec![buy_signal("AAPL", 2)], store.clone());
    let cancel = CancelFlag::new();
    cancel.cancel();

    let err = orch
        .run_with_cancel(test_request(&["AAPL"], 30), &cancel)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "BACKTEST_CANCELLED");
    let partial = err.result().unwrap();
    assert_eq!(partial.status, BacktestStatus::Cancelled);
    assert_eq!(store.status(&partial.id), Some(BacktestStatus::Cancelled));
}

struct PanickingStrategy;

impl TradingStrategy for PanickingStrategy {
    fn name(&self) -> &str {
        "panicking"
    }

    fn decide(&self, _signal: &Signal, _ctx: &DecisionContext<'_>) -> Option<TradeIntent> {
        panic!("strategy blew up");
    }
}

#[tokio::test]
async fn test_orchestrator_crashed_simulation_is_stored_as_failed() {
    let store = Arc::new(InMemoryResultStore::new());
    let orch = orchestrator(fixture_source(), vec![buy_signal("AAPL", 2)], store.clone())
        .with_strategy(Arc::new(PanickingStrategy));

    let err = orch.run(test_request(&["AAPL"], 30)).await.unwrap_err();
    assert_eq!(err.code(), "BACKTEST_ERROR");
    let id = err.result().unwrap().id.clone();

    let stored = store.get(&id).unwrap();
    assert_eq!(stored.status, BacktestStatus::Failed);
    let result = stored.result.unwrap();
    assert_eq!(result.status, BacktestStatus::Failed);
    assert!(result
        .error
        .as_deref()
        .unwrap()
        .contains("simulation task failed"));
    assert!(result.completed_at.is_some());
}

#[tokio::test]
async fn test_run_cancelled_before_first_day_has_undefined_return() {
    let store = Arc::new(InMemoryResultStore::new());
    let orch = orchestrator(fixture_source(), Vec::new(), store.clone());
    let cancel = CancelFlag::new();
    cancel.cancel();

    let err = orch
        .run_with_cancel(test_request(&["AAPL"], 30), &cancel)
        .await
        .unwrap_err();
    let partial = err.result().unwrap();
    assert!(partial.series.is_empty());
    assert_eq!(partial.total_return, None);
    assert_eq!(partial.metrics.total_return, None);
    assert!(partial.metrics.undefined.contains_key("total_return"));
    assert!(partial.metrics.undefined.contains_key("annualized_return"));
}

#[test]
fn test_single_day_run_has_defined_return() {
    let request = test_request(&["X"], 1);
    let prices = PriceIndex::new().with_bars("X", bars_from(&[100.0]));
    let result = report(&request, &prices, &[]);
    assert_eq!(result.series.len(), 1);
    assert_eq!(result.total_return, Some(0.0));
    assert!(!result.metrics.undefined.contains_key("total_return"));
}

#[test]
fn test_run_batch_shares_one_dataset() {
    let orch = orchestrator(fixture_source(), Vec::new(), Arc::new(InMemoryResultStore::new()));
    let dataset = Dataset {
        prices: PriceIndex::new().with_bars("AAPL", bars_from(&choppy_closes(30))),
        benchmark_bars: HashMap::from([("SPY".to_string(), bars_from(&choppy_closes(30)))]),
        signals: vec![buy_signal("AAPL", 2), sell_signal("AAPL", 10)],
    };

    let cheap = test_request(&["AAPL"], 30);
    let mut expensive = test_request(&["AAPL"], 30);
    expensive.commission = 0.01;
    let mut invalid = test_request(&["AAPL"], 30);
    invalid.max_positions = 0;

    let results = orch.run_batch(vec![cheap, expensive, invalid], &dataset);
    assert_eq!(results.len(), 3);
    let cheap = results[0].as_ref().unwrap();
    let expensive = results[1].as_ref().unwrap();
    assert!(expensive.metrics.total_commission > cheap.metrics.total_commission);
    assert!(expensive.final_capital < cheap.final_capital);
    assert!(matches!(results[2], Err(BacktestError::Validation(_))));
}
