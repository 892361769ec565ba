use std::collections::HashMap;

use backtest_core::{BenchmarkResult, DailySeries, PriceBar};
use chrono::NaiveDate;
use rust_decimal::prelude::ToPrimitive;

use crate::metrics;

/// Reference indices reported next to every run, keyed by display name.
pub const DEFAULT_BENCHMARKS: &[(&str, &str)] =
    &[("sp500", "SPY"), ("nasdaq", "QQQ"), ("bonds", "TLT")];

/// Close-to-close returns; the first bar has no return.
pub fn close_returns(bars: &[PriceBar]) -> Vec<f64> {
    bars.windows(2)
        .filter_map(|w| {
            let prev = w[0].close.to_f64()?;
            let next = w[1].close.to_f64()?;
            (prev > 0.0).then(|| next / prev - 1.0)
        })
        .collect()
}

/// Summary statistics for a benchmark's price series.
///
/// Missing or too-short data yields [`BenchmarkResult::zeroed`] rather than an
/// error, so a failed benchmark never fails the run.
pub fn compute_benchmark(
    symbol: &str,
    bars: Option<&[PriceBar]>,
    rf: f64,
    trading_days: u32,
) -> BenchmarkResult {
    let bars = match bars {
        Some(bars) if bars.len() >= 3 => bars,
        Some(bars) => {
            tracing::warn!("Benchmark {} has only {} bars", symbol, bars.len());
            return BenchmarkResult {
                data_points: bars.len(),
                ..BenchmarkResult::zeroed(symbol)
            };
        }
        None => {
            tracing::warn!("No data for benchmark {}", symbol);
            return BenchmarkResult::zeroed(symbol);
        }
    };

    let returns = close_returns(bars);
    let cumulative = metrics::cumulative_returns(&returns);
    let computed = metrics::total_return(&cumulative).and_then(|total| {
        Ok((
            total,
            metrics::annualized_return(total, returns.len(), trading_days)?,
            metrics::volatility(&returns)?,
            metrics::max_drawdown(&cumulative)?,
        ))
    });

    match computed {
        Ok((total_return, annualized_return, volatility, max_drawdown)) => BenchmarkResult {
            symbol: symbol.to_string(),
            total_return,
            annualized_return,
            volatility,
            sharpe_ratio: metrics::sharpe_ratio(&returns, rf).ok(),
            max_drawdown,
            data_points: bars.len(),
        },
        Err(e) => {
            tracing::warn!("Benchmark {} statistics undefined: {}", symbol, e);
            BenchmarkResult {
                data_points: bars.len(),
                ..BenchmarkResult::zeroed(symbol)
            }
        }
    }
}

/// Portfolio and benchmark returns over the same intervals.
///
/// Each pair spans two consecutive benchmark trading dates that both fall
/// inside the simulated window; the portfolio side is the equity change over
/// that same span.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlignedReturns {
    pub dates: Vec<NaiveDate>,
    pub portfolio: Vec<f64>,
    pub benchmark: Vec<f64>,
}

impl AlignedReturns {
    /// Number of pairs whose end date is on or before `date`.
    pub fn count_through(&self, date: NaiveDate) -> usize {
        self.dates.partition_point(|d| *d <= date)
    }
}

pub fn align_returns(series: &DailySeries, bars: &[PriceBar]) -> AlignedReturns {
    let equity: HashMap<NaiveDate, f64> = series
        .dates
        .iter()
        .copied()
        .zip(series.equity.iter().copied())
        .collect();

    let mut aligned = AlignedReturns::default();
    for w in bars.windows(2) {
        let (prev, next) = (&w[0], &w[1]);
        let (Some(e0), Some(e1)) = (equity.get(&prev.date), equity.get(&next.date)) else {
            continue;
        };
        let (Some(c0), Some(c1)) = (prev.close.to_f64(), next.close.to_f64()) else {
            continue;
        };
        if *e0 <= 0.0 || c0 <= 0.0 {
            continue;
        }
        aligned.dates.push(next.date);
        aligned.portfolio.push(e1 / e0 - 1.0);
        aligned.benchmark.push(c1 / c0 - 1.0);
    }
    aligned
}
