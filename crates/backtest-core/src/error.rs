use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::types::BacktestResult;

/// One violated request constraint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldIssue {
    pub field: String,
    pub message: String,
}

/// Every constraint a request violates, collected in one pass.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ValidationError {
    pub issues: Vec<FieldIssue>,
}

impl ValidationError {
    pub fn push(&mut self, field: &str, message: impl Into<String>) {
        self.issues.push(FieldIssue {
            field: field.to_string(),
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.issues.iter().any(|i| i.field == field)
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid request")?;
        for (i, issue) in self.issues.iter().enumerate() {
            let sep = if i == 0 { ": " } else { "; " };
            write!(f, "{}{} {}", sep, issue.field, issue.message)?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

/// A metric that cannot be computed from the given series.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MetricError {
    #[error("{metric} needs at least 2 observations, got {len}")]
    InsufficientData { metric: &'static str, len: usize },

    #[error("{metric} is undefined: {reason}")]
    Undefined { metric: &'static str, reason: String },
}

impl MetricError {
    pub fn undefined(metric: &'static str, reason: impl Into<String>) -> Self {
        MetricError::Undefined {
            metric,
            reason: reason.into(),
        }
    }
}

/// Failure of a single market data source.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DataError {
    #[error("{source_name}: no data for {symbol}")]
    NotFound { source_name: String, symbol: String },

    #[error("{source_name}: HTTP {status}: {message}")]
    Http {
        source_name: String,
        status: u16,
        message: String,
    },

    #[error("{source_name}: rate limited")]
    RateLimited { source_name: String },

    #[error("{source_name}: malformed response: {message}")]
    Parse { source_name: String, message: String },

    #[error("{source_name}: transport error: {message}")]
    Transport { source_name: String, message: String },

    #[error("{source_name}: not configured: {message}")]
    NotConfigured { source_name: String, message: String },
}

impl DataError {
    /// Transient failures worth another attempt against the same source.
    pub fn is_retryable(&self) -> bool {
        match self {
            DataError::RateLimited { .. } | DataError::Transport { .. } => true,
            DataError::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }

    pub fn parse(source_name: &str, message: impl Into<String>) -> Self {
        DataError::Parse {
            source_name: source_name.to_string(),
            message: message.into(),
        }
    }

    pub fn not_found(source_name: &str, symbol: &str) -> Self {
        DataError::NotFound {
            source_name: source_name.to_string(),
            symbol: symbol.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("not found: {0}")]
    NotFound(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Failure of a whole backtest run.
#[derive(Debug, Error)]
pub enum BacktestError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("data unavailable for {symbol}: {reason}")]
    DataUnavailable { symbol: String, reason: String },

    #[error("signal store failed: {0}")]
    SignalStore(StoreError),

    #[error("computation failed: {0}")]
    Computation(#[from] MetricError),

    #[error("simulation failed: {message}")]
    Simulation {
        message: String,
        partial: Box<BacktestResult>,
    },

    #[error("backtest cancelled")]
    Cancelled { partial: Box<BacktestResult> },

    #[error("result computed but not persisted: {message}")]
    Persistence {
        message: String,
        result: Box<BacktestResult>,
    },
}

impl BacktestError {
    /// Stable machine-readable code for the error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            BacktestError::Validation(_) => "VALIDATION_ERROR",
            BacktestError::DataUnavailable { .. } => "DATA_UNAVAILABLE",
            BacktestError::SignalStore(_) => "SIGNAL_STORE_ERROR",
            BacktestError::Computation(_) => "COMPUTATION_ERROR",
            BacktestError::Simulation { .. } => "BACKTEST_ERROR",
            BacktestError::Cancelled { .. } => "BACKTEST_CANCELLED",
            BacktestError::Persistence { .. } => "PERSISTENCE_ERROR",
        }
    }

    /// The (possibly partial) result carried by the error, if any.
    pub fn result(&self) -> Option<&BacktestResult> {
        match self {
            BacktestError::Simulation { partial, .. } => Some(partial),
            BacktestError::Cancelled { partial } => Some(partial),
            BacktestError::Persistence { result, .. } => Some(result),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_lists_all_issues() {
        let mut err = ValidationError::default();
        err.push("initialCapital", "must be greater than 0");
        err.push("symbols", "must not be empty");
        assert_eq!(
            err.to_string(),
            "invalid request: initialCapital must be greater than 0; symbols must not be empty"
        );
        assert!(err.has_field("symbols"));
        assert_eq!(BacktestError::from(err).code(), "VALIDATION_ERROR");
    }

    #[test]
    fn test_data_error_retryable() {
        let http = |status| DataError::Http {
            source_name: "yahoo".into(),
            status,
            message: String::new(),
        };
        assert!(http(503).is_retryable());
        assert!(!http(404).is_retryable());
        assert!(DataError::RateLimited { source_name: "iex".into() }.is_retryable());
        assert!(!DataError::not_found("iex", "AAPL").is_retryable());
    }
}
