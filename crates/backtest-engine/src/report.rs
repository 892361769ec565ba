//! Turns the final portfolio state of a simulation into a [`BacktestResult`].

use std::collections::{BTreeMap, HashMap};

use backtest_core::{
    BacktestRequest, BacktestResult, BacktestStatus, PriceBar, RollingSeries, SignalStats,
    UsageRecord,
};
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::benchmark::{align_returns, close_returns, compute_benchmark, AlignedReturns};
use crate::config::EngineConfig;
use crate::metrics::{self, MetricInputs};
use crate::portfolio::{PortfolioState, PriceIndex};

/// Everything about a run that does not come out of the simulation itself.
pub struct ReportContext<'a> {
    pub id: &'a str,
    pub strategy: &'a str,
    pub request: &'a BacktestRequest,
    pub prices: &'a PriceIndex,
    /// Bars of benchmark symbols that are not part of `prices`.
    pub benchmark_bars: &'a HashMap<String, Vec<PriceBar>>,
    pub config: &'a EngineConfig,
    pub created_at: DateTime<Utc>,
}

impl ReportContext<'_> {
    fn bars_for(&self, symbol: &str) -> Option<&[PriceBar]> {
        self.prices
            .bars(symbol)
            .or_else(|| self.benchmark_bars.get(symbol).map(Vec::as_slice))
    }
}

pub fn build_result(
    ctx: &ReportContext<'_>,
    mut state: PortfolioState,
    signal_stats: SignalStats,
    status: BacktestStatus,
    error: Option<String>,
    data_usage: Vec<UsageRecord>,
) -> BacktestResult {
    let request = ctx.request;
    let rf = ctx.config.daily_rate(request.risk_free_rate);
    let trading_days = ctx.config.trading_days;

    let primary_bars = ctx.bars_for(&request.benchmark_symbol);
    let aligned = primary_bars
        .map(|bars| align_returns(&state.series, bars))
        .unwrap_or_default();

    let metrics = metrics::compute_performance(&MetricInputs {
        daily_returns: &state.series.daily_returns,
        cumulative_returns: &state.series.cumulative_returns,
        trades: &state.trades,
        benchmark_pairs: primary_bars.map(|_| (aligned.portfolio.as_slice(), aligned.benchmark.as_slice())),
        rf,
        trading_days,
    });

    let rolling = rolling_series(&state, &aligned, ctx.config.rolling_window, rf);

    let final_capital = state.total_value();
    for position in state.positions.values_mut() {
        position.weight = if final_capital > Decimal::ZERO {
            (position.market_value() / final_capital).to_f64().unwrap_or(0.0)
        } else {
            0.0
        };
        let bars = ctx.prices.bars(&position.symbol).unwrap_or(&[]);
        position.volatility = metrics::volatility(&close_returns(bars)).ok();
        position.beta = primary_bars.and_then(|benchmark| {
            let (r, b) = paired_close_returns(bars, benchmark);
            metrics::beta(&r, &b).ok()
        });
    }

    let mut benchmarks = BTreeMap::new();
    for (name, symbol) in &ctx.config.benchmarks {
        benchmarks.insert(
            name.clone(),
            compute_benchmark(symbol, ctx.bars_for(symbol), rf, trading_days),
        );
    }
    if !ctx.config.benchmarks.iter().any(|(_, s)| *s == request.benchmark_symbol) {
        benchmarks.insert(
            request.benchmark_symbol.clone(),
            compute_benchmark(&request.benchmark_symbol, primary_bars, rf, trading_days),
        );
    }

    let completed_at = (status != BacktestStatus::Running).then(Utc::now);

    BacktestResult {
        id: ctx.id.to_string(),
        status,
        strategy: ctx.strategy.to_string(),
        request: request.clone(),
        initial_capital: state.initial_capital,
        final_capital,
        cash: state.cash,
        total_return: metrics.total_return,
        metrics,
        series: state.series,
        rolling,
        trades: state.trades,
        positions: state.positions.into_values().collect(),
        benchmarks,
        signal_stats,
        data_usage,
        error,
        created_at: ctx.created_at,
        completed_at,
    }
}

fn rolling_series(
    state: &PortfolioState,
    aligned: &AlignedReturns,
    window: usize,
    rf: f64,
) -> RollingSeries {
    let daily = &state.series.daily_returns;
    let relative = |f: &dyn Fn(&[f64], &[f64]) -> metrics::MetricResult| -> Vec<Option<f64>> {
        state
            .series
            .dates
            .iter()
            .map(|date| {
                let end = aligned.count_through(*date);
                if window == 0 || end < window {
                    return None;
                }
                let start = end - window;
                f(&aligned.portfolio[start..end], &aligned.benchmark[start..end]).ok()
            })
            .collect()
    };

    RollingSeries {
        window,
        volatility: metrics::rolling(daily, window, metrics::volatility),
        sharpe: metrics::rolling(daily, window, |s| metrics::sharpe_ratio(s, rf)),
        beta: relative(&metrics::beta),
        alpha: relative(&|r: &[f64], b: &[f64]| metrics::alpha(r, b, rf)),
    }
}

/// Close-to-close returns of two symbols over the intervals both traded.
fn paired_close_returns(bars: &[PriceBar], benchmark: &[PriceBar]) -> (Vec<f64>, Vec<f64>) {
    let closes: HashMap<_, _> = benchmark.iter().map(|b| (b.date, b.close)).collect();
    let mut r = Vec::new();
    let mut b = Vec::new();
    for w in bars.windows(2) {
        let (Some(b0), Some(b1)) = (closes.get(&w[0].date), closes.get(&w[1].date)) else {
            continue;
        };
        let values = (
            w[0].close.to_f64(),
            w[1].close.to_f64(),
            b0.to_f64(),
            b1.to_f64(),
        );
        if let (Some(p0), Some(p1), Some(q0), Some(q1)) = values {
            if p0 > 0.0 && q0 > 0.0 {
                r.push(p1 / p0 - 1.0);
                b.push(q1 / q0 - 1.0);
            }
        }
    }
    (r, b)
}
