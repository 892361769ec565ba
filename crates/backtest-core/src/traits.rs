use async_trait::async_trait;
use chrono::NaiveDate;

use crate::{BacktestResult, BacktestStatus, DataError, PriceBar, Signal, StoreError};

/// A vendor able to supply daily bars for a symbol.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// Short identifier used in logs and usage records.
    fn name(&self) -> &str;

    /// Daily bars for `symbol` between `start` and `end` (inclusive). The raw
    /// vendor order is kept; normalization is done by the caller.
    async fn get_daily_bars(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<PriceBar>, DataError>;
}

/// Historical trading signals, ordered by timestamp.
#[async_trait]
pub trait SignalStore: Send + Sync {
    async fn get_signals(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        symbols: Option<&[String]>,
    ) -> Result<Vec<Signal>, StoreError>;
}

/// Persistence for backtest results. Both operations are idempotent on id.
#[async_trait]
pub trait ResultStore: Send + Sync {
    async fn save_result(&self, result: &BacktestResult) -> Result<(), StoreError>;

    async fn update_status(&self, id: &str, status: BacktestStatus) -> Result<(), StoreError>;
}
