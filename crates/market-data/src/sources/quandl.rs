use async_trait::async_trait;
use backtest_core::{dates::parse_date, DataError, MarketDataSource, PriceBar};
use chrono::NaiveDate;
use serde_json::Value;

use super::{column, make_bar, VendorHttp};

const NAME: &str = "quandl";
const BASE_URL: &str = "https://www.quandl.com/api/v3/datasets";

#[derive(Clone)]
pub struct QuandlSource {
    api_key: String,
    http: VendorHttp,
}

impl QuandlSource {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            http: VendorHttp::new(NAME),
        }
    }
}

#[async_trait]
impl MarketDataSource for QuandlSource {
    fn name(&self) -> &str {
        NAME
    }

    async fn get_daily_bars(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<PriceBar>, DataError> {
        let url = format!("{}/WIKI/{}.json", BASE_URL, symbol);
        let query = [
            ("start_date", start.format("%Y-%m-%d").to_string()),
            ("end_date", end.format("%Y-%m-%d").to_string()),
            ("api_key", self.api_key.clone()),
        ];
        let body = self.http.get_json(&url, &query, symbol).await?;
        parse_dataset(symbol, &body)
    }
}

/// Parse `dataset.data`: rows of `[date, open, high, low, close, volume, ...]`.
pub(crate) fn parse_dataset(symbol: &str, body: &Value) -> Result<Vec<PriceBar>, DataError> {
    if body.get("quandl_error").is_some() {
        return Err(DataError::not_found(NAME, symbol));
    }
    let rows = body
        .pointer("/dataset/data")
        .and_then(|v| v.as_array())
        .ok_or_else(|| DataError::parse(NAME, "missing dataset.data"))?;

    let bars = rows
        .iter()
        .filter_map(|row| {
            let date = parse_date(row.get(0)?.as_str()?).ok()?;
            let row = Some(row);
            make_bar(
                date,
                column(row, 1),
                column(row, 2),
                column(row, 3),
                column(row, 4),
                column(row, 5),
            )
        })
        .collect();
    Ok(bars)
}
