use std::collections::{BTreeMap, HashMap};

use backtest_core::{DailySeries, Position, PriceBar, Trade};
use chrono::NaiveDate;
use rust_decimal::Decimal;

/// Cash, open positions, the trade log and the per-day series of one run.
///
/// Positions are keyed by symbol in sorted order so that reports and marking
/// iterate deterministically.
#[derive(Debug, Clone)]
pub struct PortfolioState {
    pub initial_capital: Decimal,
    pub cash: Decimal,
    pub positions: BTreeMap<String, Position>,
    pub trades: Vec<Trade>,
    pub series: DailySeries,
    trade_seq: u64,
}

impl PortfolioState {
    pub fn new(initial_capital: Decimal) -> Self {
        Self {
            initial_capital,
            cash: initial_capital,
            positions: BTreeMap::new(),
            trades: Vec::new(),
            series: DailySeries::default(),
            trade_seq: 0,
        }
    }

    /// Cash plus the marked value of every open position.
    pub fn total_value(&self) -> Decimal {
        self.cash + self.positions.values().map(Position::market_value).sum::<Decimal>()
    }

    pub fn position(&self, symbol: &str) -> Option<&Position> {
        self.positions.get(symbol)
    }

    /// Sequential ids keep repeated runs of the same inputs identical.
    pub(crate) fn next_trade_id(&mut self) -> String {
        self.trade_seq += 1;
        format!("trade-{:06}", self.trade_seq)
    }

    /// Revalue every position that has a bar on `date`; others keep their last mark.
    pub fn mark_to_market(&mut self, prices: &PriceIndex, date: NaiveDate) {
        for (symbol, position) in self.positions.iter_mut() {
            if let Some(bar) = prices.bar(symbol, date) {
                position.mark(bar.close);
            }
        }
    }
}

/// Daily bars per symbol with constant-time lookup by date.
#[derive(Debug, Clone, Default)]
pub struct PriceIndex {
    symbols: HashMap<String, SymbolBars>,
}

#[derive(Debug, Clone, Default)]
struct SymbolBars {
    bars: Vec<PriceBar>,
    by_date: HashMap<NaiveDate, usize>,
}

impl PriceIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index `bars` for `symbol`; input is expected sorted and de-duplicated.
    pub fn insert(&mut self, symbol: &str, bars: Vec<PriceBar>) {
        let by_date = bars.iter().enumerate().map(|(i, b)| (b.date, i)).collect();
        self.symbols
            .insert(symbol.to_string(), SymbolBars { bars, by_date });
    }

    pub fn with_bars(mut self, symbol: &str, bars: Vec<PriceBar>) -> Self {
        self.insert(symbol, bars);
        self
    }

    pub fn bar(&self, symbol: &str, date: NaiveDate) -> Option<&PriceBar> {
        let entry = self.symbols.get(symbol)?;
        entry.by_date.get(&date).map(|&i| &entry.bars[i])
    }

    /// All bars of a symbol in date order.
    pub fn bars(&self, symbol: &str) -> Option<&[PriceBar]> {
        self.symbols.get(symbol).map(|e| e.bars.as_slice())
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.symbols.contains_key(symbol)
    }

    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.symbols.keys().map(String::as_str)
    }
}

impl FromIterator<(String, Vec<PriceBar>)> for PriceIndex {
    fn from_iter<I: IntoIterator<Item = (String, Vec<PriceBar>)>>(iter: I) -> Self {
        let mut index = PriceIndex::new();
        for (symbol, bars) in iter {
            index.insert(&symbol, bars);
        }
        index
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn bar(d: u32, close: Decimal) -> PriceBar {
        PriceBar {
            date: NaiveDate::from_ymd_opt(2024, 1, d).unwrap(),
            open: close,
            high: close,
            low: close,
            close,
            volume: 1_000.0,
        }
    }

    #[test]
    fn test_total_value_includes_positions() {
        let mut state = PortfolioState::new(dec!(1000));
        state.cash = dec!(500);
        state
            .positions
            .insert("AAPL".into(), Position::open("AAPL", dec!(5), dec!(100)));
        assert_eq!(state.total_value(), dec!(1000));
    }

    #[test]
    fn test_mark_to_market_keeps_last_price_without_bar() {
        let prices = PriceIndex::new().with_bars("AAPL", vec![bar(2, dec!(110))]);
        let mut state = PortfolioState::new(dec!(1000));
        state
            .positions
            .insert("AAPL".into(), Position::open("AAPL", dec!(5), dec!(100)));

        state.mark_to_market(&prices, NaiveDate::from_ymd_opt(2024, 1, 3).unwrap());
        assert_eq!(state.positions["AAPL"].current_price, dec!(100));

        state.mark_to_market(&prices, NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
        assert_eq!(state.positions["AAPL"].current_price, dec!(110));
        assert_eq!(state.positions["AAPL"].unrealized_pnl, dec!(50));
    }

    #[test]
    fn test_trade_ids_are_sequential() {
        let mut state = PortfolioState::new(dec!(1000));
        assert_eq!(state.next_trade_id(), "trade-000001");
        assert_eq!(state.next_trade_id(), "trade-000002");
    }

    #[test]
    fn test_price_index_lookup() {
        let index: PriceIndex = vec![("MSFT".to_string(), vec![bar(2, dec!(300)), bar(3, dec!(301))])]
            .into_iter()
            .collect();
        assert!(index.contains("MSFT"));
        assert_eq!(
            index.bar("MSFT", NaiveDate::from_ymd_opt(2024, 1, 3).unwrap()).unwrap().close,
            dec!(301)
        );
        assert!(index.bar("MSFT", NaiveDate::from_ymd_opt(2024, 1, 4).unwrap()).is_none());
        assert!(index.bar("AAPL", NaiveDate::from_ymd_opt(2024, 1, 2).unwrap()).is_none());
        assert_eq!(index.bars("MSFT").unwrap().len(), 2);
    }
}
