use std::path::PathBuf;

use config::{Config, Environment, File};
pub use config::ConfigError;
use serde::Deserialize;

use crate::grid::{GridConfig, RunnerConfig};

/// Main configuration struct
#[derive(Debug, Default, Deserialize)]
pub struct Settings {
    /// Grid parameters (symbol, spacing, sizing)
    #[serde(default)]
    pub grid: GridSettings,
    /// Tick loop cadence and backoff
    #[serde(default)]
    pub runner: RunnerConfig,
    /// Simulated exchange used in paper mode
    #[serde(default)]
    pub paper: PaperConfig,
    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GridSettings {
    /// Trading pair (e.g., "BTCUSDT")
    pub symbol: String,
    /// Ladder center. When unset, the market price at startup is used.
    pub initial_price: Option<f64>,
    /// Fractional spacing between levels
    pub grid_size: f64,
    /// Levels per side, center included
    pub grid_count: u32,
    /// Quote amount per level
    pub position_amount: f64,
    pub initial_capital: f64,
    pub max_loss: f64,
    pub buy_window: u32,
    pub price_decimals: u32,
    pub state_file: Option<PathBuf>,
    pub history_file: Option<PathBuf>,
    /// Write history to a fresh timestamped file on each run
    pub timestamped_history: bool,
}

impl Default for GridSettings {
    fn default() -> Self {
        Self {
            symbol: "BTCUSDT".to_string(),
            initial_price: None,
            grid_size: 0.01,
            grid_count: 10,
            position_amount: 100.0,
            initial_capital: 10_000.0,
            max_loss: 0.2,
            buy_window: 5,
            price_decimals: 2,
            state_file: None,
            history_file: None,
            timestamped_history: false,
        }
    }
}

impl GridSettings {
    /// Build the engine configuration around `initial_price`
    pub fn to_grid_config(&self, initial_price: f64) -> GridConfig {
        let mut config = GridConfig::new(
            self.symbol.clone(),
            initial_price,
            self.grid_size,
            self.grid_count,
            self.position_amount,
            self.initial_capital,
        )
        .with_max_loss(self.max_loss)
        .with_buy_window(self.buy_window)
        .with_price_decimals(self.price_decimals);

        if let Some(path) = &self.state_file {
            config = config.with_state_file(path);
        }
        if self.timestamped_history {
            config = config.with_history_file(GridConfig::timestamped_history_file());
        } else if let Some(path) = &self.history_file {
            config = config.with_history_file(path);
        }
        config
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PaperConfig {
    /// Starting price of the simulated market
    pub initial_price: f64,
    pub quote_balance: f64,
    pub base_balance: f64,
    /// Maximum relative price move per market-data fetch
    pub volatility: f64,
    /// Fixed seed for a reproducible price path
    pub seed: Option<u64>,
}

impl Default for PaperConfig {
    fn default() -> Self {
        Self {
            initial_price: 10_000.0,
            quote_balance: 10_000.0,
            base_balance: 0.0,
            volatility: 0.005,
            seed: None,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct LogConfig {
    /// Log level: "error", "warn", "info", "debug", "trace"
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Enable the status API
    #[serde(default = "default_server_enabled")]
    pub enabled: bool,
    /// Server port (default 3000)
    #[serde(default = "default_server_port")]
    pub port: u16,
    /// Server host (default 127.0.0.1)
    #[serde(default = "default_server_host")]
    pub host: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: default_server_enabled(),
            port: default_server_port(),
            host: default_server_host(),
        }
    }
}

fn default_server_enabled() -> bool {
    false
}

fn default_server_port() -> u16 {
    3000
}

fn default_server_host() -> String {
    "127.0.0.1".to_string()
}

impl Settings {
    /// Load settings from a configuration file, with environment overrides
    pub fn new(config_path: &str) -> Result<Self, ConfigError> {
        Self::build(Some(config_path))
    }

    /// Load settings from environment variables and defaults only
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::build(None)
    }

    fn build(config_path: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path));
        }

        // e.g. APP_GRID__GRID_SIZE=0.02
        let s = builder
            .add_source(
                Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        s.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_follow_paper_setup() {
        let settings = Settings::default();
        assert_eq!(settings.grid.symbol, "BTCUSDT");
        assert_eq!(settings.grid.grid_count, 10);
        assert_eq!(settings.grid.buy_window, 5);
        assert_eq!(settings.runner.tick_interval_ms, 1000);
        assert_eq!(settings.paper.quote_balance, 10_000.0);
        assert!(!settings.server.enabled);
    }

    #[test]
    fn test_load_from_toml_file() {
        let path = std::env::temp_dir().join(format!("grid_settings_{}.toml", uuid::Uuid::new_v4()));
        std::fs::write(
            &path,
            r#"
[grid]
symbol = "ETHUSDT"
initial_price = 2000.0
grid_size = 0.02
grid_count = 4
state_file = "eth_state.json"

[runner]
tick_interval_ms = 250
backoff_max_ms = 5000

[paper]
volatility = 0.0
seed = 9

[log]
level = "debug"

[server]
enabled = true
port = 8080
"#,
        )
        .unwrap();

        let settings = Settings::new(path.to_str().unwrap()).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(settings.grid.symbol, "ETHUSDT");
        assert_eq!(settings.grid.initial_price, Some(2000.0));
        assert_eq!(settings.grid.grid_count, 4);
        assert_eq!(settings.grid.position_amount, 100.0);
        assert_eq!(settings.runner.tick_interval_ms, 250);
        assert_eq!(settings.runner.backoff_max_ms, 5000);
        assert_eq!(settings.runner.order_book_depth, 5);
        assert_eq!(settings.paper.seed, Some(9));
        assert_eq!(settings.log.level, "debug");
        assert!(settings.server.enabled);
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.server.host, "127.0.0.1");
    }

    #[test]
    fn test_grid_settings_to_config() {
        let settings = GridSettings {
            state_file: Some(PathBuf::from("custom_state.json")),
            ..GridSettings::default()
        };
        let config = settings.to_grid_config(10_000.0);

        assert!(config.validate().is_ok());
        assert_eq!(config.num_levels(), 19);
        assert_eq!(config.state_file, Some(PathBuf::from("custom_state.json")));
        assert_eq!(config.history_file, Some(PathBuf::from("grid_BTCUSDT_history.jsonl")));

        let timestamped = GridSettings {
            timestamped_history: true,
            ..GridSettings::default()
        }
        .to_grid_config(10_000.0);
        let name = timestamped.history_file.unwrap();
        assert!(name.to_string_lossy().starts_with("history_orders_"));
    }
}
