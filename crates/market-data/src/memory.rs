use std::collections::HashMap;

use async_trait::async_trait;
use backtest_core::{DataError, MarketDataSource, PriceBar};
use chrono::NaiveDate;

/// Source backed by bars held in memory (fixtures, cached snapshots).
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    name: String,
    bars: HashMap<String, Vec<PriceBar>>,
}

impl StaticSource {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            bars: HashMap::new(),
        }
    }

    pub fn with_bars(mut self, symbol: &str, bars: Vec<PriceBar>) -> Self {
        self.insert(symbol, bars);
        self
    }

    pub fn insert(&mut self, symbol: &str, bars: Vec<PriceBar>) {
        self.bars.insert(symbol.to_uppercase(), bars);
    }
}

#[async_trait]
impl MarketDataSource for StaticSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_daily_bars(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<PriceBar>, DataError> {
        let bars = self
            .bars
            .get(&symbol.to_uppercase())
            .ok_or_else(|| DataError::not_found(&self.name, symbol))?;
        Ok(bars
            .iter()
            .filter(|b| b.date >= start && b.date <= end)
            .cloned()
            .collect())
    }
}
