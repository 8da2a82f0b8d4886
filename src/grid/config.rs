//! Grid trading configuration

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::errors::{GridError, GridResult};

/// Grid engine configuration. Immutable once the engine is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridConfig {
    /// Trading pair (e.g., "BTCUSDT")
    pub symbol: String,

    /// Center price of the ladder
    pub initial_price: f64,

    /// Fractional spacing between levels, e.g. 0.01 for 1%
    pub grid_size: f64,

    /// Levels on each side of the center, center included
    /// (creates `2 * grid_levels - 1` price points)
    pub grid_levels: u32,

    /// Quote amount committed per level, e.g. 100 USDT
    pub position_amount: f64,

    /// Starting quote capital
    pub initial_capital: f64,

    /// Maximum tolerated loss as a fraction of initial capital.
    /// Reported, not enforced.
    pub max_loss: f64,

    /// Number of nearest levels below price that carry a live buy
    #[serde(default = "default_buy_window")]
    pub buy_window: u32,

    /// Decimal places used when pricing the paired sell order
    #[serde(default = "default_price_decimals")]
    pub price_decimals: u32,

    /// Engine snapshot file path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_file: Option<PathBuf>,

    /// Append-only trade history file path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history_file: Option<PathBuf>,
}

fn default_buy_window() -> u32 {
    5
}

fn default_price_decimals() -> u32 {
    2
}

impl GridConfig {
    /// Create a new grid configuration with required parameters
    ///
    /// State and history files default to
    /// `grid_{symbol}_state.json` and `grid_{symbol}_history.jsonl`.
    ///
    /// # Arguments
    /// * `symbol` - Trading pair (e.g., "BTCUSDT", "BTC/USDT")
    /// * `initial_price` - Center price of the ladder
    /// * `grid_size` - Fractional spacing between levels
    /// * `grid_levels` - Levels per side, center included
    /// * `position_amount` - Quote amount per level
    /// * `initial_capital` - Starting quote capital
    pub fn new(
        symbol: impl Into<String>,
        initial_price: f64,
        grid_size: f64,
        grid_levels: u32,
        position_amount: f64,
        initial_capital: f64,
    ) -> Self {
        let symbol = symbol.into();
        let state_file = Self::default_file_name(&symbol, "state.json");
        let history_file = Self::default_file_name(&symbol, "history.jsonl");

        Self {
            symbol,
            initial_price,
            grid_size,
            grid_levels,
            position_amount,
            initial_capital,
            max_loss: 0.2,
            buy_window: default_buy_window(),
            price_decimals: default_price_decimals(),
            state_file: Some(state_file),
            history_file: Some(history_file),
        }
    }

    /// `grid_{symbol}_{suffix}` with '/' replaced for filesystem compatibility
    fn default_file_name(symbol: &str, suffix: &str) -> PathBuf {
        let safe_symbol = symbol.replace('/', "-");
        PathBuf::from(format!("grid_{}_{}", safe_symbol, suffix))
    }

    /// Timestamped history file name, one per run: `history_orders_{YYYYMMDD_HHMMSS}.jsonl`
    pub fn timestamped_history_file() -> PathBuf {
        let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
        PathBuf::from(format!("history_orders_{timestamp}.jsonl"))
    }

    /// Builder: set max loss fraction
    pub fn with_max_loss(mut self, max_loss: f64) -> Self {
        self.max_loss = max_loss;
        self
    }

    /// Builder: set buy window width
    pub fn with_buy_window(mut self, window: u32) -> Self {
        self.buy_window = window;
        self
    }

    /// Builder: set sell price precision
    pub fn with_price_decimals(mut self, decimals: u32) -> Self {
        self.price_decimals = decimals;
        self
    }

    /// Builder: override the snapshot file path
    pub fn with_state_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.state_file = Some(path.into());
        self
    }

    /// Builder: override the history file path
    pub fn with_history_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.history_file = Some(path.into());
        self
    }

    /// Builder: disable all persistence
    pub fn without_persistence(mut self) -> Self {
        self.state_file = None;
        self.history_file = None;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> GridResult<()> {
        if self.symbol.is_empty() {
            return Err(GridError::InvalidConfig("symbol cannot be empty".into()));
        }

        if !(self.initial_price > 0.0) || !self.initial_price.is_finite() {
            return Err(GridError::InvalidConfig(
                "initial_price must be positive".into(),
            ));
        }

        if !(self.grid_size > 0.0 && self.grid_size < 1.0) {
            return Err(GridError::InvalidConfig(
                "grid_size must be between 0 and 1 (exclusive)".into(),
            ));
        }

        if self.grid_levels < 1 {
            return Err(GridError::InvalidConfig(
                "grid_levels must be at least 1".into(),
            ));
        }

        if !(self.position_amount > 0.0) {
            return Err(GridError::InvalidConfig(
                "position_amount must be positive".into(),
            ));
        }

        if !(self.initial_capital > 0.0) {
            return Err(GridError::InvalidConfig(
                "initial_capital must be positive".into(),
            ));
        }

        if !(0.0..=1.0).contains(&self.max_loss) {
            return Err(GridError::InvalidConfig(
                "max_loss must be between 0.0 and 1.0".into(),
            ));
        }

        if self.buy_window < 1 {
            return Err(GridError::InvalidConfig(
                "buy_window must be at least 1".into(),
            ));
        }

        Ok(())
    }

    /// Fixed absolute spread between a level and its paired sell
    pub fn grid_step(&self) -> f64 {
        self.initial_price * self.grid_size
    }

    /// Total number of price points in the ladder
    pub fn num_levels(&self) -> u32 {
        self.grid_levels.saturating_mul(2).saturating_sub(1)
    }

    /// Base amount bought or sold for `position_amount` at `price`
    pub fn order_size_at_price(&self, price: f64) -> f64 {
        self.position_amount / price
    }

    /// Load config from JSON file
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> GridResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to JSON file
    pub fn save_to_file(&self, path: impl AsRef<std::path::Path>) -> GridResult<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
