use async_trait::async_trait;
use backtest_core::{dates::parse_date, DataError, MarketDataSource, PriceBar};
use chrono::NaiveDate;
use serde_json::Value;

use super::{make_bar, number, VendorHttp};

const NAME: &str = "alpha_vantage";
const BASE_URL: &str = "https://www.alphavantage.co/query";

#[derive(Clone)]
pub struct AlphaVantageSource {
    api_key: String,
    http: VendorHttp,
}

impl AlphaVantageSource {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            http: VendorHttp::new(NAME),
        }
    }
}

#[async_trait]
impl MarketDataSource for AlphaVantageSource {
    fn name(&self) -> &str {
        NAME
    }

    async fn get_daily_bars(
        &self,
        symbol: &str,
        _start: NaiveDate,
        _end: NaiveDate,
    ) -> Result<Vec<PriceBar>, DataError> {
        // The endpoint has no date range; the provider trims to the window.
        let query = [
            ("function", "TIME_SERIES_DAILY".to_string()),
            ("outputsize", "full".to_string()),
            ("symbol", symbol.to_string()),
            ("apikey", self.api_key.clone()),
        ];
        let body = self.http.get_json(BASE_URL, &query, symbol).await?;
        parse_time_series(symbol, &body)
    }
}

/// Parse the `Time Series (Daily)` object keyed by date, values as strings.
pub(crate) fn parse_time_series(symbol: &str, body: &Value) -> Result<Vec<PriceBar>, DataError> {
    if body.get("Error Message").is_some() {
        return Err(DataError::not_found(NAME, symbol));
    }
    // Throttled responses come back as 200 with a Note/Information message
    if body.get("Note").is_some() || body.get("Information").is_some() {
        return Err(DataError::RateLimited {
            source_name: NAME.to_string(),
        });
    }

    let series = body
        .get("Time Series (Daily)")
        .and_then(|v| v.as_object())
        .ok_or_else(|| DataError::parse(NAME, "missing 'Time Series (Daily)'"))?;

    let bars = series
        .iter()
        .filter_map(|(date, values)| {
            let date = parse_date(date).ok()?;
            make_bar(
                date,
                number(values.get("1. open")),
                number(values.get("2. high")),
                number(values.get("3. low")),
                number(values.get("4. close")),
                number(values.get("5. volume")),
            )
        })
        .collect();
    Ok(bars)
}
