use async_trait::async_trait;
use backtest_core::{DataError, MarketDataSource, PriceBar};
use chrono::{DateTime, NaiveDate};
use serde::Deserialize;
use serde_json::Value;

use super::{make_bar, VendorHttp};

const NAME: &str = "polygon";
const BASE_URL: &str = "https://api.polygon.io/v2/aggs/ticker";

#[derive(Clone)]
pub struct PolygonSource {
    api_key: String,
    http: VendorHttp,
}

impl PolygonSource {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            http: VendorHttp::new(NAME),
        }
    }
}

#[async_trait]
impl MarketDataSource for PolygonSource {
    fn name(&self) -> &str {
        NAME
    }

    async fn get_daily_bars(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<PriceBar>, DataError> {
        let url = format!(
            "{}/{}/range/1/day/{}/{}",
            BASE_URL,
            symbol,
            start.format("%Y-%m-%d"),
            end.format("%Y-%m-%d")
        );
        let query = [
            ("adjusted", "true".to_string()),
            ("sort", "asc".to_string()),
            ("limit", "50000".to_string()),
            ("apiKey", self.api_key.clone()),
        ];
        let body = self.http.get_json(&url, &query, symbol).await?;
        parse_aggregates(symbol, body)
    }
}

#[derive(Debug, Deserialize)]
struct AggregateResponse {
    #[serde(default)]
    results: Option<Vec<AggregateResult>>,
}

#[derive(Debug, Deserialize)]
struct AggregateResult {
    t: i64, // timestamp, ms
    o: f64,
    h: f64,
    l: f64,
    c: f64,
    #[serde(default)]
    v: f64,
}

/// Parse the aggregates endpoint (`results[{t,o,h,l,c,v}]`).
pub(crate) fn parse_aggregates(symbol: &str, body: Value) -> Result<Vec<PriceBar>, DataError> {
    let response: AggregateResponse =
        serde_json::from_value(body).map_err(|e| DataError::parse(NAME, e.to_string()))?;
    let results = response
        .results
        .ok_or_else(|| DataError::not_found(NAME, symbol))?;

    Ok(results
        .into_iter()
        .filter_map(|r| {
            let date = DateTime::from_timestamp_millis(r.t)?.date_naive();
            make_bar(date, Some(r.o), Some(r.h), Some(r.l), Some(r.c), Some(r.v))
        })
        .collect())
}
