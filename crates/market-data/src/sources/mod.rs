//! Vendor implementations of [`MarketDataSource`].
//!
//! Each vendor module owns its URL building and response parsing. Parsers are
//! plain functions over `serde_json::Value` so they can be exercised without
//! the network.

mod alpha_vantage;
mod finnhub;
mod iex;
mod polygon;
mod quandl;
mod yahoo;

use std::sync::Arc;
use std::time::Duration;

use backtest_core::{DataError, MarketDataSource, PriceBar};
use chrono::NaiveDate;
use reqwest::Client;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde_json::Value;

pub use alpha_vantage::AlphaVantageSource;
pub use finnhub::FinnhubSource;
pub use iex::IexSource;
pub use polygon::PolygonSource;
pub use quandl::QuandlSource;
pub use yahoo::YahooSource;

/// Default priority order when none is configured.
pub const DEFAULT_SOURCE_ORDER: &[&str] =
    &["yahoo", "alpha_vantage", "quandl", "iex", "polygon", "finnhub"];

/// API credentials for the keyed vendors.
#[derive(Debug, Clone, Default)]
pub struct SourceKeys {
    pub alpha_vantage: Option<String>,
    pub quandl: Option<String>,
    pub iex: Option<String>,
    pub polygon: Option<String>,
    pub finnhub: Option<String>,
}

/// Build a source by name. Keyed vendors without a key yield `NotConfigured`.
pub fn build_source(name: &str, keys: &SourceKeys) -> Result<Arc<dyn MarketDataSource>, DataError> {
    let missing = |source: &str| DataError::NotConfigured {
        source_name: source.to_string(),
        message: "API key not set".to_string(),
    };
    let source: Arc<dyn MarketDataSource> = match name {
        "yahoo" => Arc::new(YahooSource::new()),
        "alpha_vantage" => Arc::new(AlphaVantageSource::new(
            keys.alpha_vantage.clone().ok_or_else(|| missing(name))?,
        )),
        "quandl" => Arc::new(QuandlSource::new(
            keys.quandl.clone().ok_or_else(|| missing(name))?,
        )),
        "iex" => Arc::new(IexSource::new(keys.iex.clone().ok_or_else(|| missing(name))?)),
        "polygon" => Arc::new(PolygonSource::new(
            keys.polygon.clone().ok_or_else(|| missing(name))?,
        )),
        "finnhub" => Arc::new(FinnhubSource::new(
            keys.finnhub.clone().ok_or_else(|| missing(name))?,
        )),
        other => {
            return Err(DataError::NotConfigured {
                source_name: other.to_string(),
                message: "unknown market data source".to_string(),
            })
        }
    };
    Ok(source)
}

/// Shared HTTP plumbing: one client per source, uniform status mapping.
#[derive(Clone)]
pub(crate) struct VendorHttp {
    source: &'static str,
    client: Client,
}

impl VendorHttp {
    pub(crate) fn new(source: &'static str) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36")
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { source, client }
    }

    pub(crate) async fn get_json(
        &self,
        url: &str,
        query: &[(&str, String)],
        symbol: &str,
    ) -> Result<Value, DataError> {
        let response = self
            .client
            .get(url)
            .header("Accept", "application/json")
            .query(query)
            .send()
            .await
            .map_err(|e| DataError::Transport {
                source_name: self.source.to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(DataError::RateLimited {
                source_name: self.source.to_string(),
            });
        }
        if status.as_u16() == 404 {
            return Err(DataError::not_found(self.source, symbol));
        }
        if !status.is_success() {
            return Err(DataError::Http {
                source_name: self.source.to_string(),
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| DataError::parse(self.source, e.to_string()))
    }
}

/// Build a bar from raw vendor numbers, skipping incomplete or non-finite rows.
pub(crate) fn make_bar(
    date: NaiveDate,
    open: Option<f64>,
    high: Option<f64>,
    low: Option<f64>,
    close: Option<f64>,
    volume: Option<f64>,
) -> Option<PriceBar> {
    let price = |v: Option<f64>| v.filter(|x| x.is_finite()).and_then(Decimal::from_f64);
    Some(PriceBar {
        date,
        open: price(open)?,
        high: price(high)?,
        low: price(low)?,
        close: price(close)?,
        volume: volume.filter(|v| v.is_finite()).unwrap_or(0.0),
    })
}

/// Numbers arrive as JSON numbers from most vendors and as strings from Alpha Vantage.
pub(crate) fn number(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Column of a columnar response (`[1.0, null, 2.0]`).
pub(crate) fn column(value: Option<&Value>, index: usize) -> Option<f64> {
    number(value.and_then(|v| v.get(index)))
}

pub(crate) fn unix_seconds(date: NaiveDate) -> i64 {
    date.and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc().timestamp())
        .unwrap_or_default()
}

pub(crate) fn date_from_unix(seconds: i64) -> Option<NaiveDate> {
    chrono::DateTime::from_timestamp(seconds, 0).map(|dt| dt.date_naive())
}
