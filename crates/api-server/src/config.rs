use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use market_data::sources::DEFAULT_SOURCE_ORDER;
use market_data::{ProviderConfig, SourceKeys};

/// Server settings read from the environment (after `.env` is loaded).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub database_url: String,
    pub bind_addr: String,
    /// Source names in priority order.
    pub sources: Vec<String>,
    pub keys: SourceKeys,
    pub provider: ProviderConfig,
}

impl ServerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let sources = env::var("MARKET_DATA_SOURCES")
            .unwrap_or_else(|_| DEFAULT_SOURCE_ORDER.join(","))
            .split(',')
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();
        if sources.is_empty() {
            anyhow::bail!("MARKET_DATA_SOURCES names no sources");
        }

        let backoff_ms: u64 = parse_var("FETCH_BACKOFF_MS", 250)?;
        let concurrency: usize = parse_var("MARKET_DATA_CONCURRENCY", 4)?;
        if concurrency == 0 {
            anyhow::bail!("MARKET_DATA_CONCURRENCY must be at least 1");
        }

        Ok(Self {
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:backtests.db".to_string()),
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string()),
            sources,
            keys: SourceKeys {
                alpha_vantage: key("ALPHA_VANTAGE_API_KEY"),
                quandl: key("QUANDL_API_KEY"),
                iex: key("IEX_API_KEY"),
                polygon: key("POLYGON_API_KEY"),
                finnhub: key("FINNHUB_API_KEY"),
            },
            provider: ProviderConfig {
                max_retries: parse_var("FETCH_MAX_RETRIES", 2)?,
                backoff: Duration::from_millis(backoff_ms),
                concurrency,
            },
        })
    }
}

fn key(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_var<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid {}: {:?}", name, raw)),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_var() {
        assert_eq!(parse_var::<u32>("API_SERVER_TEST_UNSET_VAR", 7).unwrap(), 7);

        env::set_var("API_SERVER_TEST_BAD_VAR", "many");
        let err = parse_var::<u32>("API_SERVER_TEST_BAD_VAR", 7).unwrap_err();
        assert!(err.to_string().contains("API_SERVER_TEST_BAD_VAR"));

        env::set_var("API_SERVER_TEST_GOOD_VAR", " 12 ");
        assert_eq!(parse_var::<u32>("API_SERVER_TEST_GOOD_VAR", 7).unwrap(), 12);
    }

    #[test]
    fn test_blank_key_is_missing() {
        env::set_var("API_SERVER_TEST_BLANK_KEY", "  ");
        assert_eq!(key("API_SERVER_TEST_BLANK_KEY"), None);
    }
}
