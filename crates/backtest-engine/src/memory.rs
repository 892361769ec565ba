use async_trait::async_trait;
use backtest_core::{BacktestResult, BacktestStatus, ResultStore, Signal, SignalStore, StoreError};
use chrono::NaiveDate;
use dashmap::DashMap;

/// Signals held in memory, ordered by timestamp (ties keep insertion order).
#[derive(Debug, Clone, Default)]
pub struct InMemorySignalStore {
    signals: Vec<Signal>,
}

impl InMemorySignalStore {
    pub fn new(mut signals: Vec<Signal>) -> Self {
        signals.sort_by_key(|s| s.timestamp);
        Self { signals }
    }

    pub fn len(&self) -> usize {
        self.signals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }
}

#[async_trait]
impl SignalStore for InMemorySignalStore {
    async fn get_signals(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        symbols: Option<&[String]>,
    ) -> Result<Vec<Signal>, StoreError> {
        Ok(self
            .signals
            .iter()
            .filter(|s| s.date() >= start && s.date() <= end)
            .filter(|s| symbols.map_or(true, |wanted| wanted.contains(&s.symbol)))
            .cloned()
            .collect())
    }
}

/// What the store knows about one backtest id.
#[derive(Debug, Clone)]
pub struct StoredBacktest {
    pub status: BacktestStatus,
    pub result: Option<BacktestResult>,
}

/// Result store backed by a concurrent map.
#[derive(Debug, Default)]
pub struct InMemoryResultStore {
    records: DashMap<String, StoredBacktest>,
}

impl InMemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<StoredBacktest> {
        self.records.get(id).map(|r| r.value().clone())
    }

    pub fn status(&self, id: &str) -> Option<BacktestStatus> {
        self.records.get(id).map(|r| r.status)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl ResultStore for InMemoryResultStore {
    async fn save_result(&self, result: &BacktestResult) -> Result<(), StoreError> {
        self.records.insert(
            result.id.clone(),
            StoredBacktest {
                status: result.status,
                result: Some(result.clone()),
            },
        );
        Ok(())
    }

    async fn update_status(&self, id: &str, status: BacktestStatus) -> Result<(), StoreError> {
        self.records
            .entry(id.to_string())
            .and_modify(|r| r.status = status)
            .or_insert(StoredBacktest {
                status,
                result: None,
            });
        Ok(())
    }
}
