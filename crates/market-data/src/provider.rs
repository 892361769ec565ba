use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use backtest_core::{DataError, MarketDataSource, PriceBar};
use chrono::NaiveDate;
use futures_util::stream::{self, StreamExt};
use rust_decimal::Decimal;
use thiserror::Error;

use crate::usage::FetchUsage;

const OPERATION: &str = "daily_bars";

#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Extra attempts per source for retryable failures.
    pub max_retries: u32,
    /// Base delay, doubled after every failed attempt.
    pub backoff: Duration,
    /// Symbols fetched at the same time.
    pub concurrency: usize,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff: Duration::from_millis(250),
            concurrency: 4,
        }
    }
}

/// No configured source could supply bars for a symbol.
#[derive(Debug, Clone, Error)]
#[error("no market data source could supply {symbol}: {}", describe(.errors))]
pub struct UnavailableError {
    pub symbol: String,
    pub errors: Vec<DataError>,
}

fn describe(errors: &[DataError]) -> String {
    if errors.is_empty() {
        return "no sources configured".to_string();
    }
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Prioritized, first-success-wins chain of market data sources.
#[derive(Clone)]
pub struct MarketDataProvider {
    sources: Vec<Arc<dyn MarketDataSource>>,
    config: ProviderConfig,
}

impl MarketDataProvider {
    pub fn new(sources: Vec<Arc<dyn MarketDataSource>>, config: ProviderConfig) -> Self {
        Self { sources, config }
    }

    pub fn source_names(&self) -> Vec<String> {
        self.sources.iter().map(|s| s.name().to_string()).collect()
    }

    /// Normalized daily bars for one symbol, trying each source in priority order.
    #[tracing::instrument(skip(self, usage))]
    pub async fn get_daily_bars(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
        usage: &mut FetchUsage,
    ) -> Result<Vec<PriceBar>, UnavailableError> {
        let mut errors = Vec::new();

        for source in &self.sources {
            match self.fetch_with_retry(source.as_ref(), symbol, start, end, usage).await {
                Ok(bars) => {
                    tracing::debug!("{} supplied {} bars for {}", source.name(), bars.len(), symbol);
                    return Ok(bars);
                }
                Err(e) => {
                    tracing::warn!("Failed to fetch {} from {}: {}", symbol, source.name(), e);
                    errors.push(e);
                }
            }
        }

        Err(UnavailableError {
            symbol: symbol.to_string(),
            errors,
        })
    }

    async fn fetch_with_retry(
        &self,
        source: &dyn MarketDataSource,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
        usage: &mut FetchUsage,
    ) -> Result<Vec<PriceBar>, DataError> {
        let mut attempt = 0u32;
        loop {
            let result = source
                .get_daily_bars(symbol, start, end)
                .await
                .map(|raw| normalize_bars(raw, start, end))
                .and_then(|bars| {
                    if bars.is_empty() {
                        Err(DataError::not_found(source.name(), symbol))
                    } else {
                        Ok(bars)
                    }
                });

            match result {
                Ok(bars) => {
                    usage.record(source.name(), OPERATION, true, bars.len());
                    return Ok(bars);
                }
                Err(e) => {
                    usage.record(source.name(), OPERATION, false, 0);
                    if !e.is_retryable() || attempt >= self.config.max_retries {
                        return Err(e);
                    }
                    let delay = self.config.backoff * 2u32.saturating_pow(attempt);
                    tracing::debug!(
                        "Retrying {} for {} in {:?} (attempt {}/{})",
                        source.name(),
                        symbol,
                        delay,
                        attempt + 1,
                        self.config.max_retries
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Fetch several symbols concurrently (bounded by `concurrency`).
    ///
    /// Each fetch records usage into its own accumulator; they are merged into
    /// the returned one.
    pub async fn get_many(
        &self,
        symbols: &[String],
        start: NaiveDate,
        end: NaiveDate,
    ) -> (BTreeMap<String, Result<Vec<PriceBar>, UnavailableError>>, FetchUsage) {
        let fetches = stream::iter(symbols.iter().cloned())
            .map(|symbol| async move {
                let mut usage = FetchUsage::new();
                let result = self.get_daily_bars(&symbol, start, end, &mut usage).await;
                (symbol, result, usage)
            })
            .buffer_unordered(self.config.concurrency.max(1))
            .collect::<Vec<_>>()
            .await;

        let mut usage = FetchUsage::new();
        let mut results = BTreeMap::new();
        for (symbol, result, partial) in fetches {
            usage.merge(partial);
            results.insert(symbol, result);
        }
        (results, usage)
    }
}

/// Keep bars inside `[start, end]` with a positive close, sorted ascending,
/// one bar per date (first occurrence wins).
pub fn normalize_bars(raw: Vec<PriceBar>, start: NaiveDate, end: NaiveDate) -> Vec<PriceBar> {
    let mut seen = HashSet::new();
    let mut bars: Vec<PriceBar> = raw
        .into_iter()
        .filter(|b| b.date >= start && b.date <= end && b.close > Decimal::ZERO)
        .filter(|b| seen.insert(b.date))
        .collect();
    bars.sort_by_key(|b| b.date);
    bars
}
