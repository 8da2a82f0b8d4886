//! Grid Trading Module
//!
//! A spot grid strategy engine: a static ladder of price levels around a
//! reference price, one buy and one paired sell slot per level, reconciled
//! against an exchange once per tick.
//!
//! # Architecture
//!
//! - [`config`] - Grid configuration and validation
//! - [`types`] - Core data types (GridLevel, OrderStatus, etc.)
//! - [`errors`] - Grid-specific error types
//! - [`ladder`] - Geometric price ladder
//! - [`executor`] - Exchange abstraction (mockable for testing)
//! - [`engine`] - Per-tick reconciliation and P&L accounting
//! - [`state`] - Snapshot persistence and trade history
//! - [`runner`] - Main execution loop
//! - [`server`] - Read-only status API
//!
//! # Example Usage
//!
//! ```rust,ignore
//! use cryptogrid::grid::{GridConfig, GridRunner, RunnerConfig};
//! use cryptogrid::grid::executor::mock::MockExchange;
//!
//! // 9 levels around 10000, 1% apart, 100 USDT per level
//! let config = GridConfig::new("BTCUSDT", 10000.0, 0.01, 5, 100.0, 10000.0)
//!     .with_state_file("grid_state.json");
//!
//! let mut runner = GridRunner::new(config, MockExchange::new(10000.0), RunnerConfig::default())?;
//! runner.run_until_ctrl_c().await?;
//! ```

pub mod config;
pub mod engine;
pub mod errors;
pub mod executor;
pub mod ladder;
pub mod runner;
pub mod server;
pub mod state;
pub mod types;

// Re-export commonly used types
pub use config::GridConfig;
pub use engine::{EngineStatus, EngineSummary, StrategyEngine, TickReport};
pub use errors::{GridError, GridResult};
pub use executor::ExchangeGateway;
pub use ladder::{build_levels, generate_ladder, round_price};
pub use runner::{GridRunner, GridView, RunnerConfig, SharedView};
pub use state::{EngineSnapshot, HistoryLog, StateStore, SNAPSHOT_VERSION};
pub use types::{
    CompletedTrade, ExchangeOrder, ExchangeOrderStatus, GridLevel, HistoryRecord, OrderBook,
    OrderHandle, OrderId, OrderSide, OrderStatus, Ticker,
};
