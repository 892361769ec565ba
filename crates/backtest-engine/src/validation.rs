use std::collections::HashSet;

use backtest_core::{BacktestRequest, ValidationError};
use rust_decimal::Decimal;

/// Longest simulated window, in days (roughly twenty years).
pub const MAX_WINDOW_DAYS: i64 = 7320;
pub const MAX_SYMBOLS: usize = 100;
const MAX_SYMBOL_LEN: usize = 12;

fn valid_symbol(symbol: &str) -> bool {
    !symbol.is_empty()
        && symbol.len() <= MAX_SYMBOL_LEN
        && symbol
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || matches!(c, '.' | '^' | '-'))
}

fn normalize_symbol(raw: &str) -> String {
    raw.trim().to_ascii_uppercase()
}

fn check_unit_interval(
    err: &mut ValidationError,
    field: &str,
    value: f64,
    inclusive_low: bool,
) {
    let low_ok = if inclusive_low { value >= 0.0 } else { value > 0.0 };
    if !value.is_finite() || !low_ok || value > 1.0 {
        let range = if inclusive_low { "[0, 1]" } else { "(0, 1]" };
        err.push(field, format!("must be in {}, got {}", range, value));
    }
}

fn check_non_negative(err: &mut ValidationError, field: &str, value: f64) {
    if !value.is_finite() || value < 0.0 {
        err.push(field, format!("must be a finite non-negative rate, got {}", value));
    }
}

/// Check every constraint and return the normalized request.
///
/// Symbols are trimmed, upper-cased and de-duplicated (first occurrence wins).
/// All violations are reported together.
pub fn validate_request(mut request: BacktestRequest) -> Result<BacktestRequest, ValidationError> {
    let mut err = ValidationError::default();

    if request.start_date > request.end_date {
        err.push("endDate", "must not be before startDate");
    } else if request.calendar_days() > MAX_WINDOW_DAYS {
        err.push(
            "endDate",
            format!("window of {} days exceeds {}", request.calendar_days(), MAX_WINDOW_DAYS),
        );
    }

    let mut seen = HashSet::new();
    let mut symbols = Vec::with_capacity(request.symbols.len());
    for raw in &request.symbols {
        let symbol = normalize_symbol(raw);
        if !valid_symbol(&symbol) {
            err.push("symbols", format!("invalid symbol '{}'", raw));
            continue;
        }
        if seen.insert(symbol.clone()) {
            symbols.push(symbol);
        }
    }
    if request.symbols.is_empty() {
        err.push("symbols", "must not be empty");
    } else if symbols.len() > MAX_SYMBOLS {
        err.push(
            "symbols",
            format!("at most {} symbols allowed, got {}", MAX_SYMBOLS, symbols.len()),
        );
    }
    request.symbols = symbols;

    let benchmark = normalize_symbol(&request.benchmark_symbol);
    if !valid_symbol(&benchmark) {
        err.push(
            "benchmarkSymbol",
            format!("invalid symbol '{}'", request.benchmark_symbol),
        );
    }
    request.benchmark_symbol = benchmark;

    if request.initial_capital <= Decimal::ZERO {
        err.push("initialCapital", "must be greater than 0");
    }
    check_unit_interval(&mut err, "riskFreeRate", request.risk_free_rate, true);
    check_non_negative(&mut err, "commission", request.commission);
    check_non_negative(&mut err, "slippage", request.slippage);
    if request.max_positions < 1 {
        err.push("maxPositions", "must be at least 1");
    }
    if let Some(stop_loss) = request.stop_loss {
        check_unit_interval(&mut err, "stopLoss", stop_loss, false);
    }
    if let Some(take_profit) = request.take_profit {
        check_unit_interval(&mut err, "takeProfit", take_profit, false);
    }

    if let Some(filters) = &request.filters {
        if let Some(min_score) = filters.min_score {
            check_unit_interval(&mut err, "filters.minScore", min_score, true);
        }
        if let Some(max_risk) = filters.max_risk {
            check_unit_interval(&mut err, "filters.maxRisk", max_risk, true);
        }
        if filters.min_liquidity.is_some_and(|l| !l.is_finite() || l <= 0.0) {
            err.push("filters.minLiquidity", "must be greater than 0");
        }
        if let Some(range) = &filters.market_cap {
            if range.min.into_iter().chain(range.max).any(|v| !v.is_finite() || v <= 0.0) {
                err.push("filters.marketCap", "bounds must be greater than 0");
            }
            if let (Some(min), Some(max)) = (range.min, range.max) {
                if min > max {
                    err.push("filters.marketCap", "min must not exceed max");
                }
            }
        }
    }

    if err.is_empty() {
        Ok(request)
    } else {
        Err(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backtest_core::SignalFilters;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn request() -> BacktestRequest {
        BacktestRequest::new(
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 3, 31).unwrap(),
            vec!["AAPL".into()],
        )
    }

    #[test]
    fn test_valid_request_passes() {
        assert!(validate_request(request()).is_ok());
    }

    #[test]
    fn test_symbols_normalized_and_deduplicated() {
        let mut req = request();
        req.symbols = vec![" aapl".into(), "MSFT".into(), "AAPL".into(), "brk.b".into()];
        req.benchmark_symbol = "qqq".into();
        let req = validate_request(req).unwrap();
        assert_eq!(req.symbols, vec!["AAPL", "MSFT", "BRK.B"]);
        assert_eq!(req.benchmark_symbol, "QQQ");
    }

    #[test]
    fn test_reports_every_violation() {
        let mut req = request();
        req.end_date = NaiveDate::from_ymd_opt(2023, 12, 1).unwrap();
        req.initial_capital = dec!(0);
        req.commission = -0.001;
        req.max_positions = 0;
        req.symbols = vec!["AAPL$".into()];
        let err = validate_request(req).unwrap_err();
        for field in ["endDate", "initialCapital", "commission", "maxPositions", "symbols"] {
            assert!(err.has_field(field), "missing issue for {}", field);
        }
    }

    #[test]
    fn test_single_day_window_is_valid() {
        let mut req = request();
        req.end_date = req.start_date;
        assert!(validate_request(req).is_ok());
    }

    #[test]
    fn test_window_limit() {
        let mut req = request();
        req.end_date = NaiveDate::from_ymd_opt(2045, 1, 1).unwrap();
        assert!(validate_request(req).unwrap_err().has_field("endDate"));
    }

    #[test]
    fn test_empty_and_oversized_symbol_lists() {
        let mut req = request();
        req.symbols.clear();
        assert!(validate_request(req).unwrap_err().has_field("symbols"));

        let mut req = request();
        req.symbols = (0..101).map(|i| format!("S{}", i)).collect();
        assert!(validate_request(req).unwrap_err().has_field("symbols"));
    }

    #[test]
    fn test_protective_thresholds_and_filters() {
        let mut req = request();
        req.stop_loss = Some(0.0);
        req.take_profit = Some(1.5);
        req.filters = Some(SignalFilters {
            min_score: Some(1.5),
            ..Default::default()
        });
        let err = validate_request(req).unwrap_err();
        assert!(err.has_field("stopLoss"));
        assert!(err.has_field("takeProfit"));
        assert!(err.has_field("filters.minScore"));
    }
}
