use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use backtest_core::{BacktestRequest, Signal, SignalStats};
use chrono::NaiveDate;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::portfolio::{PortfolioState, PriceIndex};
use crate::simulator::{SignalOutcome, TradeSimulator};
use crate::strategy::TradingStrategy;

/// Cooperative cancellation, checked once per simulated day.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct SimulationOutcome {
    pub state: PortfolioState,
    pub stats: SignalStats,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SimulationError {
    #[error("cancelled before {date}")]
    Cancelled { date: NaiveDate },

    #[error("{message} on {date}")]
    Invalid { date: NaiveDate, message: String },
}

/// A simulation that stopped early, with everything computed up to that point.
#[derive(Debug, Clone)]
pub struct SimulationFailure {
    pub error: SimulationError,
    pub state: PortfolioState,
    pub stats: SignalStats,
}

/// Day-by-day replay of signals against historical prices.
pub struct BacktestEngine<'a> {
    request: &'a BacktestRequest,
    strategy: &'a dyn TradingStrategy,
}

impl<'a> BacktestEngine<'a> {
    pub fn new(request: &'a BacktestRequest, strategy: &'a dyn TradingStrategy) -> Self {
        Self { request, strategy }
    }

    /// Walk every calendar day of the request window.
    ///
    /// Each day: apply that day's signals in arrival order, mark positions to
    /// the day's close, run protective exits, then append one entry to every
    /// daily series. Days without bars keep the previous marks.
    pub fn run(
        &self,
        prices: &PriceIndex,
        signals: &[Signal],
        cancel: &CancelFlag,
    ) -> Result<SimulationOutcome, Box<SimulationFailure>> {
        let initial = self.request.initial_capital;
        let simulator = TradeSimulator::new(self.request, self.strategy);
        let mut state = PortfolioState::new(initial);
        let mut stats = SignalStats::default();

        let mut by_date: HashMap<NaiveDate, Vec<&Signal>> = HashMap::new();
        for signal in signals {
            by_date.entry(signal.date()).or_default().push(signal);
        }

        tracing::info!(
            "Simulating {} days, {} symbols, {} signals",
            self.request.calendar_days(),
            self.request.symbols.len(),
            signals.len()
        );

        let mut previous = initial;
        let mut peak = initial;
        let mut date = self.request.start_date;
        while date <= self.request.end_date {
            if cancel.is_cancelled() {
                tracing::info!("Simulation cancelled at {}", date);
                return Err(Box::new(SimulationFailure {
                    error: SimulationError::Cancelled { date },
                    state,
                    stats,
                }));
            }

            for signal in by_date.get(&date).into_iter().flatten() {
                let outcome =
                    simulator.process_signal(signal, prices.bar(&signal.symbol, date), &mut state);
                match &outcome {
                    SignalOutcome::Executed(trade) => tracing::debug!(
                        "{} {} {} @ {}",
                        trade.action,
                        trade.quantity,
                        trade.symbol,
                        trade.price
                    ),
                    SignalOutcome::Rejected(reason) => {
                        tracing::debug!("Signal {} for {} rejected: {}", signal.id, signal.symbol, reason)
                    }
                    _ => {}
                }
                outcome.record(&mut stats);
            }

            state.mark_to_market(prices, date);
            simulator.apply_protective_exits(date, &mut state);

            let total = state.total_value();
            if previous <= Decimal::ZERO {
                return Err(Box::new(SimulationFailure {
                    error: SimulationError::Invalid {
                        date,
                        message: format!("portfolio value {} is not positive", previous),
                    },
                    state,
                    stats,
                }));
            }
            if total > peak {
                peak = total;
            }

            let daily = ratio(total - previous, previous);
            let cumulative = ratio(total - initial, initial);
            let drawdown = ratio(total - peak, peak);
            let equity = total.to_f64();
            match (equity, daily, cumulative, drawdown) {
                (Some(equity), Some(daily), Some(cumulative), Some(drawdown)) => {
                    state.series.dates.push(date);
                    state.series.equity.push(equity);
                    state.series.daily_returns.push(daily);
                    state.series.cumulative_returns.push(cumulative);
                    state.series.drawdowns.push(drawdown);
                }
                _ => {
                    return Err(Box::new(SimulationFailure {
                        error: SimulationError::Invalid {
                            date,
                            message: "non-finite portfolio value".to_string(),
                        },
                        state,
                        stats,
                    }))
                }
            }

            previous = total;
            date = match date.succ_opt() {
                Some(next) => next,
                None => break,
            };
        }

        tracing::info!(
            "Simulation complete: {} trades, final value {}",
            state.trades.len(),
            state.total_value().round_dp(2)
        );
        Ok(SimulationOutcome { state, stats })
    }
}

fn ratio(numerator: Decimal, denominator: Decimal) -> Option<f64> {
    if denominator.is_zero() {
        return None;
    }
    numerator
        .checked_div(denominator)
        .and_then(|r| r.to_f64())
        .filter(|r| r.is_finite())
}
