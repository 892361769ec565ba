use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::dates::flexible_date;

/// Symbols simulated when a request does not name any.
pub const DEFAULT_SYMBOLS: &[&str] = &["SPY", "QQQ", "IWM"];

fn default_symbols() -> Vec<String> {
    DEFAULT_SYMBOLS.iter().map(|s| s.to_string()).collect()
}

fn default_initial_capital() -> Decimal {
    Decimal::new(100_000, 0)
}

fn default_risk_free_rate() -> f64 {
    0.02
}

fn default_commission() -> f64 {
    0.001
}

fn default_slippage() -> f64 {
    0.0005
}

fn default_max_positions() -> u32 {
    10
}

fn default_benchmark_symbol() -> String {
    "SPY".to_string()
}

fn default_confidence() -> f64 {
    0.5
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RebalanceFrequency {
    #[default]
    Daily,
    Weekly,
    Monthly,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketCapRange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

/// Optional pre-trade signal filters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalFilters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_risk: Option<f64>,
    /// Minimum dollar volume (close x volume) of the signal day's bar.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_liquidity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub market_cap: Option<MarketCapRange>,
}

/// Parameters of a single backtest run. Validated once, then treated as immutable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BacktestRequest {
    #[serde(with = "flexible_date")]
    pub start_date: NaiveDate,
    #[serde(with = "flexible_date")]
    pub end_date: NaiveDate,
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,
    #[serde(default = "default_initial_capital")]
    pub initial_capital: Decimal,
    /// Annual rate in [0, 1].
    #[serde(default = "default_risk_free_rate")]
    pub risk_free_rate: f64,
    /// Commission as a fraction of trade notional.
    #[serde(default = "default_commission")]
    pub commission: f64,
    /// Slippage as a fraction of trade notional.
    #[serde(default = "default_slippage")]
    pub slippage: f64,
    #[serde(default = "default_max_positions")]
    pub max_positions: u32,
    #[serde(default)]
    pub rebalance_frequency: RebalanceFrequency,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_loss: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub take_profit: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filters: Option<SignalFilters>,
    /// Benchmark used for beta, alpha and the other relative metrics.
    #[serde(default = "default_benchmark_symbol")]
    pub benchmark_symbol: String,
}

impl BacktestRequest {
    /// Request with every optional parameter at its default.
    pub fn new(start_date: NaiveDate, end_date: NaiveDate, symbols: Vec<String>) -> Self {
        Self {
            start_date,
            end_date,
            symbols,
            initial_capital: default_initial_capital(),
            risk_free_rate: default_risk_free_rate(),
            commission: default_commission(),
            slippage: default_slippage(),
            max_positions: default_max_positions(),
            rebalance_frequency: RebalanceFrequency::Daily,
            stop_loss: None,
            take_profit: None,
            filters: None,
            benchmark_symbol: default_benchmark_symbol(),
        }
    }

    /// Number of calendar days simulated (both ends inclusive).
    pub fn calendar_days(&self) -> i64 {
        (self.end_date - self.start_date).num_days() + 1
    }
}

/// A timestamped, scored expression of trading conviction for a symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Signal {
    #[serde(default)]
    pub id: String,
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub score: f64,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk: Option<f64>,
    #[serde(default)]
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub market_cap: Option<f64>,
}

impl Signal {
    /// Calendar date (UTC) the signal belongs to.
    pub fn date(&self) -> NaiveDate {
        self.timestamp.date_naive()
    }

    pub fn reference(&self) -> SignalRef {
        SignalRef {
            id: self.id.clone(),
            source: self.source.clone(),
            score: self.score,
            confidence: self.confidence,
        }
    }
}

/// The subset of a signal recorded on the trade it caused.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalRef {
    pub id: String,
    pub source: String,
    pub score: f64,
    pub confidence: f64,
}

/// One trading day's OHLCV for a symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    #[serde(with = "flexible_date")]
    pub date: NaiveDate,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: f64,
}

impl PriceBar {
    pub fn dollar_volume(&self) -> f64 {
        self.close.to_f64().unwrap_or(0.0) * self.volume
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub symbol: String,
    pub quantity: Decimal,
    pub average_price: Decimal,
    pub current_price: Decimal,
    pub unrealized_pnl: Decimal,
    pub realized_pnl: Decimal,
    pub weight: f64,
    pub beta: Option<f64>,
    pub volatility: Option<f64>,
}

impl Position {
    pub fn open(symbol: &str, quantity: Decimal, price: Decimal) -> Self {
        Self {
            symbol: symbol.to_string(),
            quantity,
            average_price: price,
            current_price: price,
            unrealized_pnl: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            weight: 0.0,
            beta: None,
            volatility: None,
        }
    }

    pub fn market_value(&self) -> Decimal {
        self.quantity * self.current_price
    }

    /// Revalue the position at `price`.
    pub fn mark(&mut self, price: Decimal) {
        self.current_price = price;
        self.unrealized_pnl = (price - self.average_price) * self.quantity;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeAction {
    Buy,
    Sell,
}

impl fmt::Display for TradeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeAction::Buy => write!(f, "buy"),
            TradeAction::Sell => write!(f, "sell"),
        }
    }
}

/// Why a trade happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeReason {
    #[default]
    Signal,
    StopLoss,
    TakeProfit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trade {
    pub id: String,
    pub symbol: String,
    pub action: TradeAction,
    pub quantity: Decimal,
    pub price: Decimal,
    pub timestamp: DateTime<Utc>,
    /// Realized pnl net of costs for sells, always zero for buys.
    pub pnl: Decimal,
    pub commission: Decimal,
    pub slippage: Decimal,
    #[serde(default)]
    pub reason: TradeReason,
    /// Originating signal; absent for protective exits.
    pub signal: Option<SignalRef>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BacktestStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl BacktestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BacktestStatus::Running => "running",
            BacktestStatus::Completed => "completed",
            BacktestStatus::Failed => "failed",
            BacktestStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for BacktestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BacktestStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(BacktestStatus::Running),
            "completed" => Ok(BacktestStatus::Completed),
            "failed" => Ok(BacktestStatus::Failed),
            "cancelled" => Ok(BacktestStatus::Cancelled),
            other => Err(format!("unknown backtest status '{}'", other)),
        }
    }
}

/// Risk-adjusted performance of the simulated portfolio.
///
/// Every ratio that can be mathematically undefined is an `Option`; when it is
/// `None` the reason is listed in `undefined` under the metric's name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceMetrics {
    pub total_return: Option<f64>,
    pub annualized_return: Option<f64>,
    pub volatility: Option<f64>,
    pub sharpe_ratio: Option<f64>,
    pub sortino_ratio: Option<f64>,
    pub max_drawdown: Option<f64>,
    pub calmar_ratio: Option<f64>,
    pub var_95: Option<f64>,
    pub cvar_95: Option<f64>,
    pub beta: Option<f64>,
    pub alpha: Option<f64>,
    pub jensen_alpha: Option<f64>,
    pub tracking_error: Option<f64>,
    pub information_ratio: Option<f64>,
    pub treynor_ratio: Option<f64>,
    pub total_trades: usize,
    pub profitable_trades: usize,
    pub win_rate: Option<f64>,
    pub average_win: Option<f64>,
    pub average_loss: Option<f64>,
    pub profit_factor: Option<f64>,
    pub total_commission: Decimal,
    pub total_slippage: Decimal,
    #[serde(default)]
    pub undefined: BTreeMap<String, String>,
}

/// Per-day series produced by the simulation loop. All vectors share one length.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailySeries {
    pub dates: Vec<NaiveDate>,
    pub equity: Vec<f64>,
    pub daily_returns: Vec<f64>,
    pub cumulative_returns: Vec<f64>,
    pub drawdowns: Vec<f64>,
}

impl DailySeries {
    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }
}

/// Trailing-window statistics aligned with [`DailySeries`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollingSeries {
    pub window: usize,
    pub volatility: Vec<Option<f64>>,
    pub sharpe: Vec<Option<f64>>,
    pub beta: Vec<Option<f64>>,
    pub alpha: Vec<Option<f64>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BenchmarkResult {
    pub symbol: String,
    pub total_return: f64,
    pub annualized_return: f64,
    pub volatility: f64,
    pub sharpe_ratio: Option<f64>,
    pub max_drawdown: f64,
    pub data_points: usize,
}

impl BenchmarkResult {
    /// Placeholder for a benchmark whose prices could not be obtained.
    pub fn zeroed(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            ..Default::default()
        }
    }
}

/// How the signals of a run were disposed of.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalStats {
    pub received: usize,
    pub filtered: usize,
    pub no_price: usize,
    pub no_decision: usize,
    pub rejected: usize,
    pub executed: usize,
}

/// Data-fetch usage for one (source, operation, date) key within a single run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageRecord {
    pub source: String,
    pub operation: String,
    pub date: NaiveDate,
    pub requests: u32,
    pub failures: u32,
    pub bars: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BacktestResult {
    pub id: String,
    pub status: BacktestStatus,
    pub strategy: String,
    pub request: BacktestRequest,
    pub initial_capital: Decimal,
    pub final_capital: Decimal,
    pub cash: Decimal,
    pub total_return: Option<f64>,
    pub metrics: PerformanceMetrics,
    pub series: DailySeries,
    pub rolling: RollingSeries,
    pub trades: Vec<Trade>,
    pub positions: Vec<Position>,
    pub benchmarks: BTreeMap<String, BenchmarkResult>,
    pub signal_stats: SignalStats,
    pub data_usage: Vec<UsageRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}
