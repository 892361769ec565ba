use backtest_core::{Position, Signal, TradeAction};
use rust_decimal::Decimal;

/// What the portfolio looks like to a strategy when a signal arrives.
#[derive(Debug, Clone)]
pub struct DecisionContext<'a> {
    pub cash: Decimal,
    /// Execution price: the close of the signal day.
    pub price: Decimal,
    pub position: Option<&'a Position>,
    pub open_positions: usize,
}

/// A trade the strategy wants; the simulator decides whether it can happen.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeIntent {
    pub action: TradeAction,
    pub quantity: Decimal,
}

/// Turns a signal into an optional trade. Must be deterministic.
pub trait TradingStrategy: Send + Sync {
    fn name(&self) -> &str;

    fn decide(&self, signal: &Signal, ctx: &DecisionContext<'_>) -> Option<TradeIntent>;
}

/// Score/confidence threshold policy.
///
/// Buys whole units worth `buy_cash_fraction` of cash when the score is above
/// `buy_score`; sells `sell_position_fraction` of an existing holding when it is
/// below `sell_score`. Both require confidence above `min_confidence`.
#[derive(Debug, Clone)]
pub struct ThresholdStrategy {
    pub buy_score: f64,
    pub sell_score: f64,
    pub min_confidence: f64,
    pub buy_cash_fraction: Decimal,
    pub sell_position_fraction: Decimal,
}

impl Default for ThresholdStrategy {
    fn default() -> Self {
        Self {
            buy_score: 0.7,
            sell_score: 0.3,
            min_confidence: 0.6,
            buy_cash_fraction: Decimal::new(10, 2),
            sell_position_fraction: Decimal::new(5, 1),
        }
    }
}

impl TradingStrategy for ThresholdStrategy {
    fn name(&self) -> &str {
        "signal_threshold"
    }

    fn decide(&self, signal: &Signal, ctx: &DecisionContext<'_>) -> Option<TradeIntent> {
        if signal.confidence <= self.min_confidence || ctx.price <= Decimal::ZERO {
            return None;
        }

        if signal.score > self.buy_score {
            let quantity = (ctx.cash * self.buy_cash_fraction / ctx.price).floor();
            return (quantity > Decimal::ZERO).then_some(TradeIntent {
                action: TradeAction::Buy,
                quantity,
            });
        }

        if signal.score < self.sell_score {
            let held = ctx.position?.quantity;
            let quantity = (held * self.sell_position_fraction).floor();
            return (quantity > Decimal::ZERO).then_some(TradeIntent {
                action: TradeAction::Sell,
                quantity,
            });
        }

        None
    }
}
