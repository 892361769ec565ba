pub mod backtest_routes;
pub mod config;
pub mod request_id;

use std::sync::Arc;

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use backtest_core::{BacktestError, MarketDataSource, StoreError};
use backtest_engine::{BacktestDb, BacktestOrchestrator, EngineConfig};
use market_data::{build_source, MarketDataProvider};
use serde_json::json;
use thiserror::Error;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::ServerConfig;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: BacktestOrchestrator,
    pub db: BacktestDb,
}

/// Every failure a handler can return, rendered as
/// `{ "error": { "code", "message", "timestamp" } }`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Backtest(#[from] BacktestError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Backtest(e) => match e {
                BacktestError::Validation(_) => StatusCode::BAD_REQUEST,
                BacktestError::DataUnavailable { .. } => StatusCode::BAD_GATEWAY,
                BacktestError::Cancelled { .. } => StatusCode::CONFLICT,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            AppError::Store(StoreError::NotFound(_)) | AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Store(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::Backtest(e) => e.code(),
            AppError::Store(StoreError::NotFound(_)) | AppError::NotFound(_) => "NOT_FOUND",
            AppError::BadRequest(_) => "BAD_REQUEST",
            AppError::Store(_) => "STORE_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        } else {
            tracing::debug!("Request rejected: {}", self);
        }

        let mut error = json!({
            "code": self.code(),
            "message": self.to_string(),
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });
        match &self {
            AppError::Backtest(BacktestError::Validation(v)) => {
                error["fields"] = json!(v.issues);
            }
            AppError::Backtest(e) => {
                if let Some(result) = e.result() {
                    error["backtestId"] = json!(result.id);
                }
            }
            _ => {}
        }

        (status, Json(json!({ "error": error }))).into_response()
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .merge(backtest_routes::backtest_routes())
        .layer(middleware::from_fn(request_id::request_id_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Market data sources in configured priority order; keyed vendors without a
/// key are skipped.
fn build_sources(config: &ServerConfig) -> anyhow::Result<Vec<Arc<dyn MarketDataSource>>> {
    let mut sources = Vec::new();
    for name in &config.sources {
        match build_source(name, &config.keys) {
            Ok(source) => sources.push(source),
            Err(e) => tracing::warn!("Skipping market data source {}: {}", name, e),
        }
    }
    if sources.is_empty() {
        anyhow::bail!("no usable market data source in {:?}", config.sources);
    }
    Ok(sources)
}

pub async fn run_server() -> anyhow::Result<()> {
    let config = ServerConfig::from_env()?;
    let engine_config = EngineConfig::from_env()?;

    let db = BacktestDb::connect(&config.database_url).await?;
    tracing::info!("Connected to {}", config.database_url);

    let provider = MarketDataProvider::new(build_sources(&config)?, config.provider.clone());
    tracing::info!("Market data sources: {}", provider.source_names().join(", "));

    let store = Arc::new(db.clone());
    let orchestrator = BacktestOrchestrator::new(provider, store.clone(), store)
        .with_config(engine_config);

    let app = app(AppState { orchestrator, db });
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("Listening on {}", config.bind_addr);
    axum::serve(listener, app).await?;
    Ok(())
}
