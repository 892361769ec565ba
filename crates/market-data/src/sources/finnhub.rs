use async_trait::async_trait;
use backtest_core::{DataError, MarketDataSource, PriceBar};
use chrono::{Duration, NaiveDate};
use serde_json::Value;

use super::{column, date_from_unix, make_bar, unix_seconds, VendorHttp};

const NAME: &str = "finnhub";
const BASE_URL: &str = "https://finnhub.io/api/v1/stock/candle";

#[derive(Clone)]
pub struct FinnhubSource {
    token: String,
    http: VendorHttp,
}

impl FinnhubSource {
    pub fn new(token: String) -> Self {
        Self {
            token,
            http: VendorHttp::new(NAME),
        }
    }
}

#[async_trait]
impl MarketDataSource for FinnhubSource {
    fn name(&self) -> &str {
        NAME
    }

    async fn get_daily_bars(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<PriceBar>, DataError> {
        let query = [
            ("symbol", symbol.to_string()),
            ("resolution", "D".to_string()),
            ("from", unix_seconds(start).to_string()),
            ("to", unix_seconds(end + Duration::days(1)).to_string()),
            ("token", self.token.clone()),
        ];
        let body = self.http.get_json(BASE_URL, &query, symbol).await?;
        parse_candles(symbol, &body)
    }
}

/// Parse columnar candles `{s, t, o, h, l, c, v}`; `s` must be `"ok"`.
pub(crate) fn parse_candles(symbol: &str, body: &Value) -> Result<Vec<PriceBar>, DataError> {
    match body.get("s").and_then(|s| s.as_str()) {
        Some("ok") => {}
        Some("no_data") => return Err(DataError::not_found(NAME, symbol)),
        _ => return Err(DataError::parse(NAME, "candle status is not 'ok'")),
    }
    let timestamps = body
        .get("t")
        .and_then(|v| v.as_array())
        .ok_or_else(|| DataError::parse(NAME, "missing timestamp column"))?;

    let bars = timestamps
        .iter()
        .enumerate()
        .filter_map(|(i, ts)| {
            let date = date_from_unix(ts.as_i64()?)?;
            make_bar(
                date,
                column(body.get("o"), i),
                column(body.get("h"), i),
                column(body.get("l"), i),
                column(body.get("c"), i),
                column(body.get("v"), i),
            )
        })
        .collect();
    Ok(bars)
}
