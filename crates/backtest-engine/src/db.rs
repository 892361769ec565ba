use std::str::FromStr;

use async_trait::async_trait;
use backtest_core::{BacktestResult, BacktestStatus, ResultStore, Signal, SignalStore, StoreError};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::prelude::ToPrimitive;
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite};

fn db_err(e: sqlx::Error) -> StoreError {
    StoreError::Database(e.to_string())
}

/// Headline columns of a stored backtest.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BacktestSummary {
    pub id: String,
    pub status: BacktestStatus,
    pub strategy: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub initial_capital: Option<f64>,
    pub final_capital: Option<f64>,
    pub total_return: Option<f64>,
    pub sharpe_ratio: Option<f64>,
    pub max_drawdown: Option<f64>,
    pub total_trades: Option<i64>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A stored backtest; `result` is absent while only a status has been recorded.
#[derive(Debug, Clone)]
pub struct BacktestRecord {
    pub summary: BacktestSummary,
    pub result: Option<BacktestResult>,
}

#[derive(sqlx::FromRow)]
struct BacktestRow {
    id: String,
    status: String,
    strategy: Option<String>,
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
    initial_capital: Option<f64>,
    final_capital: Option<f64>,
    total_return: Option<f64>,
    sharpe_ratio: Option<f64>,
    max_drawdown: Option<f64>,
    total_trades: Option<i64>,
    error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct StoredRow {
    #[sqlx(flatten)]
    row: BacktestRow,
    result_json: Option<String>,
}

impl TryFrom<BacktestRow> for BacktestSummary {
    type Error = StoreError;

    fn try_from(row: BacktestRow) -> Result<Self, Self::Error> {
        Ok(Self {
            status: BacktestStatus::from_str(&row.status).map_err(StoreError::Serialization)?,
            id: row.id,
            strategy: row.strategy,
            start_date: row.start_date,
            end_date: row.end_date,
            initial_capital: row.initial_capital,
            final_capital: row.final_capital,
            total_return: row.total_return,
            sharpe_ratio: row.sharpe_ratio,
            max_drawdown: row.max_drawdown,
            total_trades: row.total_trades,
            error: row.error,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct SignalRow {
    id: String,
    symbol: String,
    ts_micros: i64,
    score: f64,
    confidence: f64,
    risk: Option<f64>,
    source: String,
    market_cap: Option<f64>,
}

impl TryFrom<SignalRow> for Signal {
    type Error = StoreError;

    fn try_from(row: SignalRow) -> Result<Self, Self::Error> {
        let timestamp = DateTime::from_timestamp_micros(row.ts_micros).ok_or_else(|| {
            StoreError::Serialization(format!("invalid signal timestamp {}", row.ts_micros))
        })?;
        Ok(Signal {
            id: row.id,
            symbol: row.symbol,
            timestamp,
            score: row.score,
            confidence: row.confidence,
            risk: row.risk,
            source: row.source,
            market_cap: row.market_cap,
        })
    }
}

const SUMMARY_COLUMNS: &str = "id, status, strategy, start_date, end_date, initial_capital, \
     final_capital, total_return, sharpe_ratio, max_drawdown, total_trades, error, created_at, updated_at";

/// SQLite persistence for backtest results and imported signals.
#[derive(Clone)]
pub struct BacktestDb {
    pool: SqlitePool,
}

impl BacktestDb {
    /// Open (creating if missing) the database at `database_url` and ensure the schema.
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

        // Every connection to `:memory:` is its own database, so keep exactly one.
        let in_memory = database_url.contains(":memory:");
        let pool = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { 5 })
            .idle_timeout(if in_memory { None } else { Some(std::time::Duration::from_secs(600)) })
            .max_lifetime(if in_memory { None } else { Some(std::time::Duration::from_secs(1800)) })
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.init_schema().await?;
        Ok(db)
    }

    async fn init_schema(&self) -> Result<(), sqlx::Error> {
        let schema = include_str!("../schema.sql");
        for statement in schema.split(';') {
            let stmt = statement.trim();
            if !stmt.is_empty() {
                sqlx::query(stmt).execute(&self.pool).await?;
            }
        }
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn get_backtest(&self, id: &str) -> Result<Option<BacktestRecord>, StoreError> {
        let query = format!(
            "SELECT {}, result_json FROM backtests WHERE id = ?",
            SUMMARY_COLUMNS
        );
        let Some(stored) = sqlx::query_as::<_, StoredRow>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
        else {
            return Ok(None);
        };

        let result = stored
            .result_json
            .map(|json| serde_json::from_str::<BacktestResult>(&json))
            .transpose()?;
        Ok(Some(BacktestRecord {
            summary: stored.row.try_into()?,
            result,
        }))
    }

    /// Most recent backtests first.
    pub async fn list_backtests(&self, limit: i64) -> Result<Vec<BacktestSummary>, StoreError> {
        let query = format!(
            "SELECT {} FROM backtests ORDER BY created_at DESC, id LIMIT ?",
            SUMMARY_COLUMNS
        );
        let rows = sqlx::query_as::<_, BacktestRow>(&query)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.into_iter().map(BacktestSummary::try_from).collect()
    }

    /// Returns whether a row was deleted.
    pub async fn delete_backtest(&self, id: &str) -> Result<bool, StoreError> {
        let done = sqlx::query("DELETE FROM backtests WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(done.rows_affected() > 0)
    }

    /// Append signals in one transaction; returns how many were stored.
    pub async fn insert_signals(&self, signals: &[Signal]) -> Result<usize, StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        for signal in signals {
            sqlx::query(
                "INSERT INTO signals (
                    id, symbol, ts_micros, signal_date, score, confidence, risk, source, market_cap
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&signal.id)
            .bind(&signal.symbol)
            .bind(signal.timestamp.timestamp_micros())
            .bind(signal.date().format("%Y-%m-%d").to_string())
            .bind(signal.score)
            .bind(signal.confidence)
            .bind(signal.risk)
            .bind(&signal.source)
            .bind(signal.market_cap)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }
        tx.commit().await.map_err(db_err)?;
        tracing::info!("Stored {} signals", signals.len());
        Ok(signals.len())
    }
}

#[async_trait]
impl ResultStore for BacktestDb {
    async fn save_result(&self, result: &BacktestResult) -> Result<(), StoreError> {
        let json = serde_json::to_string(result)?;
        let now = Utc::now();

        sqlx::query(
            "INSERT INTO backtests (
                id, status, strategy, start_date, end_date, initial_capital, final_capital,
                total_return, sharpe_ratio, max_drawdown, total_trades, result_json, error,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                strategy = excluded.strategy,
                start_date = excluded.start_date,
                end_date = excluded.end_date,
                initial_capital = excluded.initial_capital,
                final_capital = excluded.final_capital,
                total_return = excluded.total_return,
                sharpe_ratio = excluded.sharpe_ratio,
                max_drawdown = excluded.max_drawdown,
                total_trades = excluded.total_trades,
                result_json = excluded.result_json,
                error = excluded.error,
                updated_at = excluded.updated_at",
        )
        .bind(&result.id)
        .bind(result.status.as_str())
        .bind(&result.strategy)
        .bind(result.request.start_date)
        .bind(result.request.end_date)
        .bind(result.initial_capital.to_f64())
        .bind(result.final_capital.to_f64())
        .bind(result.total_return)
        .bind(result.metrics.sharpe_ratio)
        .bind(result.metrics.max_drawdown)
        .bind(result.metrics.total_trades as i64)
        .bind(&json)
        .bind(&result.error)
        .bind(result.created_at)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        tracing::debug!("Saved backtest {} ({})", result.id, result.status);
        Ok(())
    }

    async fn update_status(&self, id: &str, status: BacktestStatus) -> Result<(), StoreError> {
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO backtests (id, status, created_at, updated_at) VALUES (?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET status = excluded.status, updated_at = excluded.updated_at",
        )
        .bind(id)
        .bind(status.as_str())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }
}

#[async_trait]
impl SignalStore for BacktestDb {
    async fn get_signals(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        symbols: Option<&[String]>,
    ) -> Result<Vec<Signal>, StoreError> {
        let mut query: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT id, symbol, ts_micros, score, confidence, risk, source, market_cap \
             FROM signals WHERE signal_date >= ",
        );
        query.push_bind(start.format("%Y-%m-%d").to_string());
        query.push(" AND signal_date <= ");
        query.push_bind(end.format("%Y-%m-%d").to_string());

        if let Some(symbols) = symbols {
            if symbols.is_empty() {
                return Ok(Vec::new());
            }
            query.push(" AND symbol IN (");
            let mut separated = query.separated(", ");
            for symbol in symbols {
                separated.push_bind(symbol.clone());
            }
            separated.push_unseparated(")");
        }
        query.push(" ORDER BY ts_micros, seq");

        let rows = query
            .build_query_as::<SignalRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.into_iter().map(Signal::try_from).collect()
    }
}
