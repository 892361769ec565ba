pub mod benchmark;
pub mod config;
pub mod db;
pub mod engine;
pub mod memory;
pub mod metrics;
pub mod orchestrator;
pub mod portfolio;
pub mod report;
pub mod simulator;
pub mod strategy;
pub mod validation;

pub use config::EngineConfig;
pub use db::{BacktestDb, BacktestRecord, BacktestSummary};
pub use engine::{BacktestEngine, CancelFlag, SimulationError, SimulationFailure, SimulationOutcome};
pub use memory::{InMemoryResultStore, InMemorySignalStore};
pub use orchestrator::{BacktestOrchestrator, Dataset};
pub use portfolio::{PortfolioState, PriceIndex};
pub use simulator::{CostModel, SignalOutcome, TradeSimulator};
pub use strategy::{DecisionContext, ThresholdStrategy, TradeIntent, TradingStrategy};
pub use validation::validate_request;

#[cfg(test)]
mod tests;
