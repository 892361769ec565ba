//! Pure statistical functions over daily return series.
//!
//! Every function that can be mathematically undefined returns a
//! [`MetricError`] instead of a silent 0, NaN or infinity. Series shorter than
//! two observations are always an error.

use std::collections::BTreeMap;

use backtest_core::{MetricError, PerformanceMetrics, Trade, TradeAction};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use statrs::statistics::Statistics;

pub type MetricResult = Result<f64, MetricError>;

/// Denominators below this are treated as zero.
const EPSILON: f64 = 1e-12;

/// Tail probability used for VaR / CVaR.
pub const VAR_TAIL: f64 = 0.05;

fn require(metric: &'static str, values: &[f64]) -> Result<(), MetricError> {
    if values.len() < 2 {
        return Err(MetricError::InsufficientData {
            metric,
            len: values.len(),
        });
    }
    Ok(())
}

fn mean_of(metric: &'static str, values: &[f64]) -> MetricResult {
    require(metric, values)?;
    Ok(values.iter().mean())
}

fn std_dev_of(metric: &'static str, values: &[f64]) -> MetricResult {
    require(metric, values)?;
    Ok(values.iter().population_std_dev().max(0.0))
}

fn require_paired(metric: &'static str, r: &[f64], b: &[f64]) -> Result<(), MetricError> {
    require(metric, r)?;
    require(metric, b)?;
    if r.len() != b.len() {
        return Err(MetricError::undefined(
            metric,
            format!("series lengths differ ({} vs {})", r.len(), b.len()),
        ));
    }
    Ok(())
}

fn excess(r: &[f64], b: &[f64]) -> Vec<f64> {
    r.iter().zip(b).map(|(x, y)| x - y).collect()
}

/// Population standard deviation of returns.
pub fn volatility(returns: &[f64]) -> MetricResult {
    std_dev_of("volatility", returns)
}

/// Compounded return of the whole series from its cumulative returns.
pub fn total_return(cumulative_returns: &[f64]) -> MetricResult {
    cumulative_returns
        .last()
        .copied()
        .ok_or(MetricError::InsufficientData {
            metric: "total_return",
            len: 0,
        })
}

/// `(1 + total)^(trading_days / periods) - 1`.
pub fn annualized_return(total_return: f64, periods: usize, trading_days: u32) -> MetricResult {
    if periods == 0 {
        return Err(MetricError::InsufficientData {
            metric: "annualized_return",
            len: 0,
        });
    }
    let growth = 1.0 + total_return;
    if growth < 0.0 {
        return Err(MetricError::undefined(
            "annualized_return",
            "total loss exceeds 100%",
        ));
    }
    Ok(growth.powf(trading_days as f64 / periods as f64) - 1.0)
}

/// `(mean(r) - rf) / volatility(r)`, with `rf` per period.
pub fn sharpe_ratio(returns: &[f64], rf: f64) -> MetricResult {
    let vol = std_dev_of("sharpe_ratio", returns)?;
    if vol < EPSILON {
        return Err(MetricError::undefined(
            "sharpe_ratio",
            "volatility of returns is zero",
        ));
    }
    Ok((returns.iter().mean() - rf) / vol)
}

/// `(mean(r) - rf) / volatility({x in r : x < rf})`.
pub fn sortino_ratio(returns: &[f64], rf: f64) -> MetricResult {
    let mean = mean_of("sortino_ratio", returns)?;
    let downside: Vec<f64> = returns.iter().copied().filter(|&x| x < rf).collect();
    if downside.len() < 2 {
        return Err(MetricError::undefined(
            "sortino_ratio",
            format!("{} returns below the risk-free rate, need 2", downside.len()),
        ));
    }
    let downside_vol = downside.iter().population_std_dev();
    if downside_vol < EPSILON {
        return Err(MetricError::undefined(
            "sortino_ratio",
            "downside volatility is zero",
        ));
    }
    Ok((mean - rf) / downside_vol)
}

/// Compound daily returns into cumulative returns.
pub fn cumulative_returns(returns: &[f64]) -> Vec<f64> {
    let mut wealth = 1.0;
    returns
        .iter()
        .map(|r| {
            wealth *= 1.0 + r;
            wealth - 1.0
        })
        .collect()
}

/// Deepest peak-to-trough decline of wealth `1 + c`, as a non-positive fraction.
/// The starting wealth of 1 counts as the first peak.
pub fn max_drawdown(cumulative_returns: &[f64]) -> MetricResult {
    require("max_drawdown", cumulative_returns)?;
    let mut peak = 1.0_f64;
    let mut worst = 0.0_f64;
    for c in cumulative_returns {
        let wealth = 1.0 + c;
        if wealth > peak {
            peak = wealth;
        }
        let drawdown = wealth / peak - 1.0;
        if drawdown < worst {
            worst = drawdown;
        }
    }
    Ok(worst.min(0.0))
}

/// `annualized_return / |max_drawdown|`.
pub fn calmar_ratio(annualized_return: f64, max_drawdown: f64) -> MetricResult {
    if max_drawdown.abs() < EPSILON {
        return Err(MetricError::undefined("calmar_ratio", "no drawdown"));
    }
    Ok(annualized_return / max_drawdown.abs())
}

/// Historical value-at-risk: the `tail` percentile of sorted returns.
pub fn value_at_risk(returns: &[f64], tail: f64) -> MetricResult {
    require("var_95", returns)?;
    let mut sorted = returns.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let idx = ((sorted.len() as f64 * tail).floor() as usize).min(sorted.len() - 1);
    Ok(sorted[idx])
}

/// Mean of the returns at or below the VaR threshold.
pub fn conditional_value_at_risk(returns: &[f64], tail: f64) -> MetricResult {
    let var = value_at_risk(returns, tail).map_err(|_| MetricError::InsufficientData {
        metric: "cvar_95",
        len: returns.len(),
    })?;
    let tail_returns: Vec<f64> = returns.iter().copied().filter(|&r| r <= var).collect();
    Ok(tail_returns.iter().sum::<f64>() / tail_returns.len() as f64)
}

/// `cov(r, b) / var(b)`.
pub fn beta(returns: &[f64], benchmark: &[f64]) -> MetricResult {
    require_paired("beta", returns, benchmark)?;
    let var_b = benchmark.iter().population_variance();
    if var_b < EPSILON * EPSILON {
        return Err(MetricError::undefined("beta", "benchmark variance is zero"));
    }
    let mean_r = returns.iter().mean();
    let mean_b = benchmark.iter().mean();
    let cov = returns
        .iter()
        .zip(benchmark)
        .map(|(r, b)| (r - mean_r) * (b - mean_b))
        .sum::<f64>()
        / returns.len() as f64;
    Ok(cov / var_b)
}

/// Jensen's alpha: `mean(r) - (rf + beta * (mean(b) - rf))`.
pub fn alpha(returns: &[f64], benchmark: &[f64], rf: f64) -> MetricResult {
    let beta = beta(returns, benchmark).map_err(|e| relabel(e, "alpha"))?;
    Ok(returns.iter().mean() - (rf + beta * (benchmark.iter().mean() - rf)))
}

pub fn jensen_alpha(returns: &[f64], benchmark: &[f64], rf: f64) -> MetricResult {
    alpha(returns, benchmark, rf).map_err(|e| relabel(e, "jensen_alpha"))
}

/// Volatility of the excess return over the benchmark.
pub fn tracking_error(returns: &[f64], benchmark: &[f64]) -> MetricResult {
    require_paired("tracking_error", returns, benchmark)?;
    std_dev_of("tracking_error", &excess(returns, benchmark))
}

/// `mean(r - b) / tracking_error`.
pub fn information_ratio(returns: &[f64], benchmark: &[f64]) -> MetricResult {
    let te = tracking_error(returns, benchmark).map_err(|e| relabel(e, "information_ratio"))?;
    if te < EPSILON {
        return Err(MetricError::undefined(
            "information_ratio",
            "tracking error is zero",
        ));
    }
    Ok(excess(returns, benchmark).iter().mean() / te)
}

/// `(mean(r) - rf) / beta`.
pub fn treynor_ratio(returns: &[f64], benchmark: &[f64], rf: f64) -> MetricResult {
    let beta = beta(returns, benchmark).map_err(|e| relabel(e, "treynor_ratio"))?;
    if beta.abs() < EPSILON {
        return Err(MetricError::undefined("treynor_ratio", "beta is zero"));
    }
    Ok((returns.iter().mean() - rf) / beta)
}

fn relabel(err: MetricError, metric: &'static str) -> MetricError {
    match err {
        MetricError::InsufficientData { len, .. } => MetricError::InsufficientData { metric, len },
        MetricError::Undefined { reason, .. } => MetricError::Undefined { metric, reason },
    }
}

/// Aggregates over the realized (sell) trades of a trade log.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeStats {
    pub total_trades: usize,
    pub profitable_trades: usize,
    pub win_rate: MetricResult,
    pub average_win: MetricResult,
    pub average_loss: MetricResult,
    pub profit_factor: MetricResult,
    pub total_commission: Decimal,
    pub total_slippage: Decimal,
}

pub fn trade_stats(trades: &[Trade]) -> TradeStats {
    let realized: Vec<f64> = trades
        .iter()
        .filter(|t| t.action == TradeAction::Sell)
        .map(|t| t.pnl.to_f64().unwrap_or(0.0))
        .collect();
    let wins: Vec<f64> = realized.iter().copied().filter(|p| *p > 0.0).collect();
    let losses: Vec<f64> = realized.iter().copied().filter(|p| *p < 0.0).collect();

    let win_rate = if realized.is_empty() {
        Err(MetricError::undefined("win_rate", "no closed trades"))
    } else {
        Ok(wins.len() as f64 / realized.len() as f64)
    };
    let average_win = if wins.is_empty() {
        Err(MetricError::undefined("average_win", "no winning trades"))
    } else {
        Ok(wins.iter().sum::<f64>() / wins.len() as f64)
    };
    let average_loss = if losses.is_empty() {
        Err(MetricError::undefined("average_loss", "no losing trades"))
    } else {
        Ok(losses.iter().sum::<f64>() / losses.len() as f64)
    };
    let profit_factor = match (&average_win, &average_loss) {
        (Ok(w), Ok(l)) => Ok((w / l).abs()),
        (_, Err(_)) => Err(MetricError::undefined("profit_factor", "no losing trades")),
        (Err(_), _) => Err(MetricError::undefined("profit_factor", "no winning trades")),
    };

    TradeStats {
        total_trades: trades.len(),
        profitable_trades: trades.iter().filter(|t| t.pnl > Decimal::ZERO).count(),
        win_rate,
        average_win,
        average_loss,
        profit_factor,
        total_commission: trades.iter().map(|t| t.commission).sum(),
        total_slippage: trades.iter().map(|t| t.slippage).sum(),
    }
}

/// Apply `f` to every trailing window of `values`; `None` until the window fills
/// and wherever `f` is undefined.
pub fn rolling<F>(values: &[f64], window: usize, f: F) -> Vec<Option<f64>>
where
    F: Fn(&[f64]) -> MetricResult,
{
    (0..values.len())
        .map(|i| {
            if window == 0 || i + 1 < window {
                None
            } else {
                f(&values[i + 1 - window..=i]).ok()
            }
        })
        .collect()
}

/// Collects metric outcomes, keeping the reason of every undefined one.
#[derive(Debug, Default)]
pub struct MetricSheet {
    undefined: BTreeMap<String, String>,
}

impl MetricSheet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take(&mut self, name: &str, result: MetricResult) -> Option<f64> {
        match result {
            Ok(v) if v.is_finite() => Some(v),
            Ok(v) => {
                self.undefined
                    .insert(name.to_string(), format!("non-finite value {}", v));
                None
            }
            Err(e) => {
                self.undefined.insert(name.to_string(), e.to_string());
                None
            }
        }
    }

    pub fn mark_undefined(&mut self, name: &str, reason: &str) {
        self.undefined.insert(name.to_string(), reason.to_string());
    }

    pub fn into_undefined(self) -> BTreeMap<String, String> {
        self.undefined
    }
}

/// Inputs for the headline metric set of one run.
pub struct MetricInputs<'a> {
    pub daily_returns: &'a [f64],
    pub cumulative_returns: &'a [f64],
    pub trades: &'a [Trade],
    /// Portfolio and benchmark returns paired on benchmark trading dates.
    pub benchmark_pairs: Option<(&'a [f64], &'a [f64])>,
    /// Risk-free rate per period.
    pub rf: f64,
    pub trading_days: u32,
}

pub fn compute_performance(inputs: &MetricInputs<'_>) -> PerformanceMetrics {
    let mut sheet = MetricSheet::new();
    let r = inputs.daily_returns;
    let rf = inputs.rf;

    let total = sheet.take("total_return", total_return(inputs.cumulative_returns));
    let annualized = match total {
        Some(total) => sheet.take(
            "annualized_return",
            annualized_return(total, r.len(), inputs.trading_days),
        ),
        None => {
            sheet.mark_undefined("annualized_return", "requires total return");
            None
        }
    };
    let volatility = sheet.take("volatility", volatility(r));
    let sharpe = sheet.take("sharpe_ratio", sharpe_ratio(r, rf));
    let sortino = sheet.take("sortino_ratio", sortino_ratio(r, rf));
    let max_dd = sheet.take("max_drawdown", max_drawdown(inputs.cumulative_returns));
    let calmar = match (annualized, max_dd) {
        (Some(a), Some(d)) => sheet.take("calmar_ratio", calmar_ratio(a, d)),
        _ => {
            sheet.mark_undefined("calmar_ratio", "requires annualized return and max drawdown");
            None
        }
    };
    let var_95 = sheet.take("var_95", value_at_risk(r, VAR_TAIL));
    let cvar_95 = sheet.take("cvar_95", conditional_value_at_risk(r, VAR_TAIL));

    let relative = ["beta", "alpha", "jensen_alpha", "tracking_error", "information_ratio", "treynor_ratio"];
    let (beta_v, alpha_v, jensen_v, te_v, ir_v, treynor_v) = match inputs.benchmark_pairs {
        Some((p, b)) => (
            sheet.take("beta", beta(p, b)),
            sheet.take("alpha", alpha(p, b, rf)),
            sheet.take("jensen_alpha", jensen_alpha(p, b, rf)),
            sheet.take("tracking_error", tracking_error(p, b)),
            sheet.take("information_ratio", information_ratio(p, b)),
            sheet.take("treynor_ratio", treynor_ratio(p, b, rf)),
        ),
        None => {
            for name in relative {
                sheet.mark_undefined(name, "no benchmark series");
            }
            (None, None, None, None, None, None)
        }
    };

    let stats = trade_stats(inputs.trades);
    let win_rate = sheet.take("win_rate", stats.win_rate);
    let average_win = sheet.take("average_win", stats.average_win);
    let average_loss = sheet.take("average_loss", stats.average_loss);
    let profit_factor = sheet.take("profit_factor", stats.profit_factor);

    PerformanceMetrics {
        total_return: total,
        annualized_return: annualized,
        volatility,
        sharpe_ratio: sharpe,
        sortino_ratio: sortino,
        max_drawdown: max_dd,
        calmar_ratio: calmar,
        var_95,
        cvar_95,
        beta: beta_v,
        alpha: alpha_v,
        jensen_alpha: jensen_v,
        tracking_error: te_v,
        information_ratio: ir_v,
        treynor_ratio: treynor_v,
        total_trades: stats.total_trades,
        profitable_trades: stats.profitable_trades,
        win_rate,
        average_win,
        average_loss,
        profit_factor,
        total_commission: stats.total_commission,
        total_slippage: stats.total_slippage,
        undefined: sheet.into_undefined(),
    }
}
