use async_trait::async_trait;
use backtest_core::{dates::parse_date, DataError, MarketDataSource, PriceBar};
use chrono::{NaiveDate, Utc};
use serde_json::Value;

use super::{make_bar, number, VendorHttp};

const NAME: &str = "iex";
const BASE_URL: &str = "https://cloud.iexapis.com/stable/stock";

#[derive(Clone)]
pub struct IexSource {
    token: String,
    http: VendorHttp,
}

impl IexSource {
    pub fn new(token: String) -> Self {
        Self {
            token,
            http: VendorHttp::new(NAME),
        }
    }
}

/// Smallest chart range that reaches back to `start`.
pub(crate) fn chart_range(start: NaiveDate, today: NaiveDate) -> &'static str {
    match (today - start).num_days() {
        d if d <= 30 => "1m",
        d if d <= 90 => "3m",
        d if d <= 180 => "6m",
        d if d <= 365 => "1y",
        d if d <= 730 => "2y",
        d if d <= 1825 => "5y",
        _ => "max",
    }
}

#[async_trait]
impl MarketDataSource for IexSource {
    fn name(&self) -> &str {
        NAME
    }

    async fn get_daily_bars(
        &self,
        symbol: &str,
        start: NaiveDate,
        _end: NaiveDate,
    ) -> Result<Vec<PriceBar>, DataError> {
        let range = chart_range(start, Utc::now().date_naive());
        let url = format!("{}/{}/chart/{}", BASE_URL, symbol, range);
        let query = [("token", self.token.clone())];
        let body = self.http.get_json(&url, &query, symbol).await?;
        parse_chart(&body)
    }
}

/// Parse an array of `{date, open, high, low, close, volume}` objects.
pub(crate) fn parse_chart(body: &Value) -> Result<Vec<PriceBar>, DataError> {
    let items = body
        .as_array()
        .ok_or_else(|| DataError::parse(NAME, "expected an array of chart points"))?;

    let bars = items
        .iter()
        .filter_map(|item| {
            let date = parse_date(item.get("date")?.as_str()?).ok()?;
            make_bar(
                date,
                number(item.get("open")),
                number(item.get("high")),
                number(item.get("low")),
                number(item.get("close")),
                number(item.get("volume")),
            )
        })
        .collect();
    Ok(bars)
}
