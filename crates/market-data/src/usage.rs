use std::collections::BTreeMap;

use backtest_core::UsageRecord;
use chrono::{NaiveDate, Utc};

/// Request accounting for one backtest run, keyed by (source, operation, date).
///
/// Each run owns its own accumulator; concurrent fetches each fill a private
/// instance that the caller merges afterwards.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchUsage {
    entries: BTreeMap<(String, String, NaiveDate), UsageRecord>,
}

impl FetchUsage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one request made today.
    pub fn record(&mut self, source: &str, operation: &str, ok: bool, bars: usize) {
        self.record_on(Utc::now().date_naive(), source, operation, ok, bars);
    }

    pub fn record_on(
        &mut self,
        date: NaiveDate,
        source: &str,
        operation: &str,
        ok: bool,
        bars: usize,
    ) {
        let entry = self
            .entries
            .entry((source.to_string(), operation.to_string(), date))
            .or_insert_with(|| UsageRecord {
                source: source.to_string(),
                operation: operation.to_string(),
                date,
                requests: 0,
                failures: 0,
                bars: 0,
            });
        entry.requests += 1;
        if !ok {
            entry.failures += 1;
        }
        entry.bars += bars as u64;
    }

    pub fn merge(&mut self, other: FetchUsage) {
        for (key, rec) in other.entries {
            match self.entries.get_mut(&key) {
                Some(existing) => {
                    existing.requests += rec.requests;
                    existing.failures += rec.failures;
                    existing.bars += rec.bars;
                }
                None => {
                    self.entries.insert(key, rec);
                }
            }
        }
    }

    pub fn total_requests(&self) -> u32 {
        self.entries.values().map(|r| r.requests).sum()
    }

    pub fn total_failures(&self) -> u32 {
        self.entries.values().map(|r| r.failures).sum()
    }

    pub fn into_records(self) -> Vec<UsageRecord> {
        self.entries.into_values().collect()
    }
}
