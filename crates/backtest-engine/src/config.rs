use std::env;

use crate::benchmark::DEFAULT_BENCHMARKS;

/// Analytics settings shared by every run of an orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Periods per year for annualization and the daily risk-free rate.
    pub trading_days: u32,
    /// Window of the rolling statistics, in days.
    pub rolling_window: usize,
    /// `(display name, symbol)` pairs reported next to every run.
    pub benchmarks: Vec<(String, String)>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            trading_days: 252,
            rolling_window: 21,
            benchmarks: DEFAULT_BENCHMARKS
                .iter()
                .map(|(name, symbol)| (name.to_string(), symbol.to_string()))
                .collect(),
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by `TRADING_DAYS_PER_YEAR` and `ROLLING_WINDOW_DAYS`.
    pub fn from_env() -> anyhow::Result<Self> {
        let mut config = Self::default();
        if let Ok(raw) = env::var("TRADING_DAYS_PER_YEAR") {
            config.trading_days = raw.parse()?;
        }
        if let Ok(raw) = env::var("ROLLING_WINDOW_DAYS") {
            config.rolling_window = raw.parse()?;
        }
        if config.trading_days == 0 {
            anyhow::bail!("TRADING_DAYS_PER_YEAR must be positive");
        }
        Ok(config)
    }

    /// Per-period risk-free rate for an annual rate.
    pub fn daily_rate(&self, annual: f64) -> f64 {
        annual / self.trading_days as f64
    }
}
