use async_trait::async_trait;
use backtest_core::{DataError, MarketDataSource, PriceBar};
use chrono::{Duration, NaiveDate};
use serde_json::Value;

use super::{column, date_from_unix, make_bar, unix_seconds, VendorHttp};

const NAME: &str = "yahoo";
const CHART_URL: &str = "https://query1.finance.yahoo.com/v8/finance/chart";

/// Yahoo Finance chart API. Needs no key.
#[derive(Clone)]
pub struct YahooSource {
    http: VendorHttp,
}

impl YahooSource {
    pub fn new() -> Self {
        Self {
            http: VendorHttp::new(NAME),
        }
    }
}

impl Default for YahooSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MarketDataSource for YahooSource {
    fn name(&self) -> &str {
        NAME
    }

    async fn get_daily_bars(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<PriceBar>, DataError> {
        let url = format!("{}/{}", CHART_URL, symbol);
        let query = [
            ("interval", "1d".to_string()),
            ("includePrePost", "false".to_string()),
            ("period1", unix_seconds(start).to_string()),
            // period2 is exclusive
            ("period2", unix_seconds(end + Duration::days(1)).to_string()),
        ];
        let body = self.http.get_json(&url, &query, symbol).await?;
        parse_chart(symbol, &body)
    }
}

/// Parse `chart.result[0]`: a timestamp column plus `indicators.quote[0]` columns.
pub(crate) fn parse_chart(symbol: &str, body: &Value) -> Result<Vec<PriceBar>, DataError> {
    let result = body
        .pointer("/chart/result/0")
        .filter(|v| !v.is_null())
        .ok_or_else(|| DataError::not_found(NAME, symbol))?;

    let timestamps = result
        .get("timestamp")
        .and_then(|v| v.as_array())
        .ok_or_else(|| DataError::parse(NAME, "missing chart timestamps"))?;
    let quote = result
        .pointer("/indicators/quote/0")
        .ok_or_else(|| DataError::parse(NAME, "missing indicators.quote"))?;

    let bars = timestamps
        .iter()
        .enumerate()
        .filter_map(|(i, ts)| {
            let date = date_from_unix(ts.as_i64()?)?;
            make_bar(
                date,
                column(quote.get("open"), i),
                column(quote.get("high"), i),
                column(quote.get("low"), i),
                column(quote.get("close"), i),
                column(quote.get("volume"), i),
            )
        })
        .collect();
    Ok(bars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::prelude::ToPrimitive;
    use serde_json::json;

    #[test]
    fn test_parse_chart_skips_null_rows() {
        let body = json!({
            "chart": {"result": [{
                "timestamp": [1704205800, 1704292200, 1704378600],
                "indicators": {"quote": [{
                    "open":   [187.15, null, 182.15],
                    "high":   [188.44, null, 183.09],
                    "low":    [183.89, null, 180.88],
                    "close":  [185.64, null, 181.91],
                    "volume": [82488700, null, 71983600]
                }]}
            }]}
        });
        let bars = parse_chart("AAPL", &body).unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].date, NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
        assert!((bars[0].close.to_f64().unwrap() - 185.64).abs() < 1e-9);
        assert_eq!(bars[1].date, NaiveDate::from_ymd_opt(2024, 1, 4).unwrap());
    }

    #[test]
    fn test_parse_chart_no_result_is_not_found() {
        let body = json!({"chart": {"result": null, "error": {"code": "Not Found"}}});
        assert!(matches!(
            parse_chart("NOPE", &body),
            Err(DataError::NotFound { .. })
        ));
    }
}
