//! Applies one signal (or one protective exit) to the portfolio atomically:
//! either the whole trade is applied or nothing changes.

use std::str::FromStr;

use backtest_core::{
    BacktestRequest, Position, PriceBar, Signal, SignalFilters, SignalRef, SignalStats, Trade,
    TradeAction, TradeReason,
};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;

use crate::portfolio::PortfolioState;
use crate::strategy::{DecisionContext, TradingStrategy};

/// Commission and slippage as fractions of trade notional.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostModel {
    pub commission_rate: Decimal,
    pub slippage_rate: Decimal,
}

impl CostModel {
    pub fn from_request(request: &BacktestRequest) -> Self {
        Self {
            commission_rate: rate(request.commission).unwrap_or_default(),
            slippage_rate: rate(request.slippage).unwrap_or_default(),
        }
    }

    /// `(commission, slippage)` for a trade of the given notional.
    pub fn costs(&self, notional: Decimal) -> (Decimal, Decimal) {
        (notional * self.commission_rate, notional * self.slippage_rate)
    }
}

/// Decimal form of a fractional rate, taken from its shortest decimal spelling.
fn rate(value: f64) -> Option<Decimal> {
    Decimal::from_str(&value.to_string())
        .ok()
        .or_else(|| Decimal::from_f64(value))
}

/// How a signal was disposed of.
#[derive(Debug, Clone, PartialEq)]
pub enum SignalOutcome {
    Filtered(String),
    NoPrice,
    NoDecision,
    Rejected(String),
    Executed(Trade),
}

impl SignalOutcome {
    pub fn record(&self, stats: &mut SignalStats) {
        stats.received += 1;
        match self {
            SignalOutcome::Filtered(_) => stats.filtered += 1,
            SignalOutcome::NoPrice => stats.no_price += 1,
            SignalOutcome::NoDecision => stats.no_decision += 1,
            SignalOutcome::Rejected(_) => stats.rejected += 1,
            SignalOutcome::Executed(_) => stats.executed += 1,
        }
    }
}

pub struct TradeSimulator<'a> {
    strategy: &'a dyn TradingStrategy,
    costs: CostModel,
    filters: Option<SignalFilters>,
    max_positions: usize,
    stop_loss: Option<Decimal>,
    take_profit: Option<Decimal>,
}

impl<'a> TradeSimulator<'a> {
    pub fn new(request: &BacktestRequest, strategy: &'a dyn TradingStrategy) -> Self {
        Self {
            strategy,
            costs: CostModel::from_request(request),
            filters: request.filters.clone(),
            max_positions: request.max_positions as usize,
            stop_loss: request.stop_loss.and_then(rate),
            take_profit: request.take_profit.and_then(rate),
        }
    }

    /// Reason the signal is excluded by the request filters, if any.
    pub fn filter_reason(&self, signal: &Signal, bar: Option<&PriceBar>) -> Option<String> {
        let filters = self.filters.as_ref()?;

        if let Some(min) = filters.min_score {
            if signal.score < min {
                return Some(format!("score {} below minimum {}", signal.score, min));
            }
        }
        if let (Some(max), Some(risk)) = (filters.max_risk, signal.risk) {
            if risk > max {
                return Some(format!("risk {} above maximum {}", risk, max));
            }
        }
        if let (Some(range), Some(cap)) = (&filters.market_cap, signal.market_cap) {
            if range.min.is_some_and(|min| cap < min) || range.max.is_some_and(|max| cap > max) {
                return Some(format!("market cap {} outside range", cap));
            }
        }
        if let (Some(min), Some(bar)) = (filters.min_liquidity, bar) {
            let liquidity = bar.dollar_volume();
            if liquidity < min {
                return Some(format!("dollar volume {:.0} below minimum {}", liquidity, min));
            }
        }
        None
    }

    /// Filter, price, decide and execute one signal.
    pub fn process_signal(
        &self,
        signal: &Signal,
        bar: Option<&PriceBar>,
        state: &mut PortfolioState,
    ) -> SignalOutcome {
        if let Some(reason) = self.filter_reason(signal, bar) {
            return SignalOutcome::Filtered(reason);
        }
        let price = match bar {
            Some(bar) if bar.close > Decimal::ZERO => bar.close,
            _ => return SignalOutcome::NoPrice,
        };

        let ctx = DecisionContext {
            cash: state.cash,
            price,
            position: state.position(&signal.symbol),
            open_positions: state.positions.len(),
        };
        let intent = match self.strategy.decide(signal, &ctx) {
            Some(intent) => intent,
            None => return SignalOutcome::NoDecision,
        };

        let fill = Fill {
            symbol: &signal.symbol,
            quantity: intent.quantity,
            price,
            timestamp: signal.timestamp,
            reason: TradeReason::Signal,
            signal: Some(signal.reference()),
        };
        let result = match intent.action {
            TradeAction::Buy => self.execute_buy(fill, state),
            TradeAction::Sell => self.execute_sell(fill, state),
        };
        match result {
            Ok(trade) => SignalOutcome::Executed(trade),
            Err(reason) => SignalOutcome::Rejected(reason),
        }
    }

    fn execute_buy(&self, fill: Fill<'_>, state: &mut PortfolioState) -> Result<Trade, String> {
        let Fill { symbol, quantity, price, .. } = fill;
        if quantity <= Decimal::ZERO {
            return Err("quantity must be positive".to_string());
        }
        if !state.positions.contains_key(symbol) && state.positions.len() >= self.max_positions {
            return Err(format!("max positions ({}) reached", self.max_positions));
        }

        let notional = quantity * price;
        let (commission, slippage) = self.costs.costs(notional);
        let total_cost = notional + commission + slippage;
        if total_cost > state.cash {
            return Err(format!(
                "insufficient cash: need {}, have {}",
                total_cost.round_dp(2),
                state.cash.round_dp(2)
            ));
        }

        state.cash -= total_cost;
        state
            .positions
            .entry(symbol.to_string())
            .and_modify(|pos| {
                let held = pos.quantity + quantity;
                pos.average_price = (pos.average_price * pos.quantity + price * quantity) / held;
                pos.quantity = held;
                pos.mark(price);
            })
            .or_insert_with(|| Position::open(symbol, quantity, price));

        Ok(fill.record(TradeAction::Buy, Decimal::ZERO, commission, slippage, state))
    }

    fn execute_sell(&self, fill: Fill<'_>, state: &mut PortfolioState) -> Result<Trade, String> {
        let Fill { symbol, quantity, price, .. } = fill;
        let (held, average_price) = match state.positions.get(symbol) {
            Some(pos) => (pos.quantity, pos.average_price),
            None => return Err(format!("no open position in {}", symbol)),
        };
        if quantity <= Decimal::ZERO {
            return Err("quantity must be positive".to_string());
        }
        if quantity > held {
            return Err(format!("cannot sell {} of {} held", quantity, held));
        }

        let notional = quantity * price;
        let (commission, slippage) = self.costs.costs(notional);
        let pnl = (price - average_price) * quantity - commission - slippage;

        state.cash += notional - commission - slippage;
        let remaining = held - quantity;
        if remaining.is_zero() {
            state.positions.remove(symbol);
        } else if let Some(pos) = state.positions.get_mut(symbol) {
            pos.quantity = remaining;
            pos.realized_pnl += pnl;
            pos.mark(price);
        }

        Ok(fill.record(TradeAction::Sell, pnl, commission, slippage, state))
    }

    /// Close every position whose marked price crossed the stop-loss or
    /// take-profit threshold relative to its average price. Runs after marking.
    pub fn apply_protective_exits(&self, date: NaiveDate, state: &mut PortfolioState) -> Vec<Trade> {
        if self.stop_loss.is_none() && self.take_profit.is_none() {
            return Vec::new();
        }

        let triggered: Vec<(String, Decimal, Decimal, TradeReason)> = state
            .positions
            .values()
            .filter_map(|pos| {
                if pos.average_price <= Decimal::ZERO {
                    return None;
                }
                let change = (pos.current_price - pos.average_price) / pos.average_price;
                if self.stop_loss.is_some_and(|sl| change <= -sl) {
                    Some((pos.symbol.clone(), pos.quantity, pos.current_price, TradeReason::StopLoss))
                } else if self.take_profit.is_some_and(|tp| change >= tp) {
                    Some((pos.symbol.clone(), pos.quantity, pos.current_price, TradeReason::TakeProfit))
                } else {
                    None
                }
            })
            .collect();

        let timestamp = end_of_day(date);
        let mut exits = Vec::with_capacity(triggered.len());
        for (symbol, quantity, price, reason) in triggered {
            let fill = Fill {
                symbol: &symbol,
                quantity,
                price,
                timestamp,
                reason,
                signal: None,
            };
            match self.execute_sell(fill, state) {
                Ok(trade) => {
                    tracing::debug!("{:?} exit of {} {} at {}", reason, quantity, symbol, price);
                    exits.push(trade);
                }
                Err(e) => tracing::warn!("Protective exit for {} skipped: {}", symbol, e),
            }
        }
        exits
    }
}

/// Everything about a trade that is known before costs are applied.
struct Fill<'s> {
    symbol: &'s str,
    quantity: Decimal,
    price: Decimal,
    timestamp: DateTime<Utc>,
    reason: TradeReason,
    signal: Option<SignalRef>,
}

impl Fill<'_> {
    fn record(
        self,
        action: TradeAction,
        pnl: Decimal,
        commission: Decimal,
        slippage: Decimal,
        state: &mut PortfolioState,
    ) -> Trade {
        let trade = Trade {
            id: state.next_trade_id(),
            symbol: self.symbol.to_string(),
            action,
            quantity: self.quantity,
            price: self.price,
            timestamp: self.timestamp,
            pnl,
            commission,
            slippage,
            reason: self.reason,
            signal: self.signal,
        };
        state.trades.push(trade.clone());
        trade
    }
}

fn end_of_day(date: NaiveDate) -> DateTime<Utc> {
    date.and_hms_opt(23, 59, 59)
        .unwrap_or_default()
        .and_utc()
}
