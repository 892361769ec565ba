use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use backtest_core::{BacktestRequest, BacktestResult, Signal, Trade};
use backtest_engine::BacktestSummary;
use serde::{Deserialize, Serialize};

use crate::{AppError, AppState};

const DEFAULT_LIST_LIMIT: i64 = 50;
const MAX_LIST_LIMIT: i64 = 500;

pub fn backtest_routes() -> Router<AppState> {
    Router::new()
        .route("/api/backtest", post(run_backtest))
        .route("/api/backtest/results", get(list_backtests))
        .route(
            "/api/backtest/results/:id",
            get(get_backtest).delete(delete_backtest),
        )
        .route("/api/backtest/results/:id/trades", get(get_backtest_trades))
        .route("/api/signals", post(import_signals))
}

/// Run a backtest to completion and return the full result.
async fn run_backtest(
    State(state): State<AppState>,
    body: Result<Json<BacktestRequest>, JsonRejection>,
) -> Result<Json<BacktestResult>, AppError> {
    let Json(request) = body?;
    tracing::info!(
        "Backtest requested for {:?} from {} to {}",
        request.symbols,
        request.start_date,
        request.end_date
    );
    let result = state.orchestrator.run(request).await?;
    Ok(Json(result))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<i64>,
}

/// Most recent backtests first.
async fn list_backtests(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<BacktestSummary>>, AppError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .clamp(1, MAX_LIST_LIMIT);
    Ok(Json(state.db.list_backtests(limit).await?))
}

/// A stored backtest: the full result once it exists, otherwise the status row.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum StoredBacktestView {
    Complete(Box<BacktestResult>),
    Pending(BacktestSummary),
}

async fn get_backtest(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<StoredBacktestView>, AppError> {
    let record = state
        .db
        .get_backtest(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("backtest {} not found", id)))?;

    Ok(Json(match record.result {
        Some(result) => StoredBacktestView::Complete(Box::new(result)),
        None => StoredBacktestView::Pending(record.summary),
    }))
}

async fn get_backtest_trades(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Trade>>, AppError> {
    let record = state
        .db
        .get_backtest(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("backtest {} not found", id)))?;

    Ok(Json(record.result.map(|r| r.trades).unwrap_or_default()))
}

#[derive(Debug, Serialize)]
pub struct Deleted {
    pub id: String,
    pub deleted: bool,
}

async fn delete_backtest(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Deleted>, AppError> {
    if !state.db.delete_backtest(&id).await? {
        return Err(AppError::NotFound(format!("backtest {} not found", id)));
    }
    tracing::info!("Deleted backtest {}", id);
    Ok(Json(Deleted { id, deleted: true }))
}

#[derive(Debug, Serialize)]
pub struct Imported {
    pub imported: usize,
}

/// Append signals to the signal store used by later backtests.
async fn import_signals(
    State(state): State<AppState>,
    body: Result<Json<Vec<Signal>>, JsonRejection>,
) -> Result<Json<Imported>, AppError> {
    let Json(signals) = body?;
    let signals = normalize_signals(signals)?;
    let imported = state.db.insert_signals(&signals).await?;
    Ok(Json(Imported { imported }))
}

/// Upper-case symbols, fill missing ids, reject unusable entries.
fn normalize_signals(signals: Vec<Signal>) -> Result<Vec<Signal>, AppError> {
    signals
        .into_iter()
        .enumerate()
        .map(|(i, mut signal)| {
            signal.symbol = signal.symbol.trim().to_uppercase();
            if signal.symbol.is_empty() {
                return Err(AppError::BadRequest(format!("signal {}: symbol is empty", i)));
            }
            if !signal.score.is_finite() {
                return Err(AppError::BadRequest(format!("signal {}: score must be finite", i)));
            }
            if !(0.0..=1.0).contains(&signal.confidence) {
                return Err(AppError::BadRequest(format!(
                    "signal {}: confidence must be in [0, 1]",
                    i
                )));
            }
            if signal.risk.is_some_and(|r| !r.is_finite()) {
                return Err(AppError::BadRequest(format!("signal {}: risk must be finite", i)));
            }
            if signal.id.is_empty() {
                signal.id = uuid::Uuid::new_v4().to_string();
            }
            Ok(signal)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn signal(symbol: &str, confidence: f64) -> Signal {
        Signal {
            id: String::new(),
            symbol: symbol.to_string(),
            timestamp: Utc.with_ymd_and_hms(2024, 1, 2, 14, 30, 0).unwrap(),
            score: 0.9,
            confidence,
            risk: None,
            source: "import".to_string(),
            market_cap: None,
        }
    }

    #[test]
    fn test_normalize_signals() {
        let signals = normalize_signals(vec![signal(" aapl ", 0.8)]).unwrap();
        assert_eq!(signals[0].symbol, "AAPL");
        assert!(!signals[0].id.is_empty());

        let err = normalize_signals(vec![signal("AAPL", 0.8), signal("MSFT", 1.5)]).unwrap_err();
        assert!(err.to_string().contains("signal 1"));
        assert!(normalize_signals(vec![signal("  ", 0.8)]).is_err());
    }
}
