//! Engine snapshot persistence and the append-only trade history

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use super::config::GridConfig;
use super::engine::{StrategyEngine, TickReport};
use super::errors::{GridError, GridResult};
use super::types::{ExchangeOrder, GridLevel, HistoryRecord};

/// Snapshot schema written by this build
pub const SNAPSHOT_VERSION: u32 = 1;

/// Versioned record of every engine field plus the full level table
///
/// Fields missing from an older file take their defaults. Levels are stored
/// in ladder order and matched to the ladder by index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSnapshot {
    pub schema_version: u32,
    pub symbol: String,
    pub initial_price: f64,
    pub grid_size: f64,
    pub grid_step: f64,
    /// Levels per side, center included. Zero means "derive from the ladder".
    pub grid_levels: u32,
    pub position_amount: f64,
    pub initial_capital: f64,
    pub max_loss: f64,
    pub buy_window: u32,
    pub price_decimals: u32,
    pub total_assets: f64,
    pub capital: f64,
    pub position: f64,
    pub pnl: f64,
    pub pnl_rate: f64,
    pub current_price: f64,
    pub round_trips: u32,
    pub ladder: Vec<f64>,
    pub levels: Vec<GridLevel>,
    pub history_orders: Vec<ExchangeOrder>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub saved_at: Option<DateTime<Utc>>,
}

impl Default for EngineSnapshot {
    fn default() -> Self {
        Self {
            schema_version: SNAPSHOT_VERSION,
            symbol: String::new(),
            initial_price: 0.0,
            grid_size: 0.0,
            grid_step: 0.0,
            grid_levels: 0,
            position_amount: 0.0,
            initial_capital: 0.0,
            max_loss: 0.2,
            buy_window: 5,
            price_decimals: 2,
            total_assets: 0.0,
            capital: 0.0,
            position: 0.0,
            pnl: 0.0,
            pnl_rate: 0.0,
            current_price: 0.0,
            round_trips: 0,
            ladder: Vec::new(),
            levels: Vec::new(),
            history_orders: Vec::new(),
            saved_at: None,
        }
    }
}

impl EngineSnapshot {
    /// Load a snapshot, rejecting schemas newer than this build understands
    pub fn load_from_file(path: impl AsRef<Path>) -> GridResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let snapshot: Self = serde_json::from_str(&content)?;
        if snapshot.schema_version > SNAPSHOT_VERSION {
            return Err(GridError::UnsupportedSchema {
                found: snapshot.schema_version,
                supported: SNAPSHOT_VERSION,
            });
        }
        Ok(snapshot)
    }

    /// Save snapshot to file atomically (write to temp, then rename)
    pub fn save_to_file_atomic(&self, path: impl AsRef<Path>) -> GridResult<()> {
        let path = path.as_ref();
        let temp_path = path.with_extension("tmp");

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(&temp_path, content)?;
        std::fs::rename(&temp_path, path)?;

        Ok(())
    }
}

impl StrategyEngine {
    /// Capture the complete engine state
    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            schema_version: SNAPSHOT_VERSION,
            symbol: self.config.symbol.clone(),
            initial_price: self.config.initial_price,
            grid_size: self.config.grid_size,
            grid_step: self.grid_step,
            grid_levels: self.config.grid_levels,
            position_amount: self.config.position_amount,
            initial_capital: self.config.initial_capital,
            max_loss: self.config.max_loss,
            buy_window: self.config.buy_window,
            price_decimals: self.config.price_decimals,
            total_assets: self.total_assets,
            capital: self.capital,
            position: self.position,
            pnl: self.pnl,
            pnl_rate: self.pnl_rate,
            current_price: self.current_price,
            round_trips: self.round_trips,
            ladder: self.ladder.clone(),
            levels: self.levels.clone(),
            history_orders: self.history_orders.clone(),
            saved_at: Some(Utc::now()),
        }
    }

    /// Rebuild an engine from a snapshot. Nothing is recomputed: the ladder,
    /// level table and account figures are taken verbatim.
    ///
    /// The restored config carries no file paths; callers attach their own.
    pub fn restore(snapshot: EngineSnapshot) -> GridResult<Self> {
        if snapshot.schema_version > SNAPSHOT_VERSION {
            return Err(GridError::UnsupportedSchema {
                found: snapshot.schema_version,
                supported: SNAPSHOT_VERSION,
            });
        }

        if snapshot.ladder.is_empty() {
            return Err(GridError::StateCorrupt("snapshot has an empty ladder".into()));
        }
        if snapshot.levels.len() != snapshot.ladder.len() {
            return Err(GridError::StateCorrupt(format!(
                "snapshot has {} levels for a ladder of {}",
                snapshot.levels.len(),
                snapshot.ladder.len()
            )));
        }
        for (i, (level, price)) in snapshot.levels.iter().zip(&snapshot.ladder).enumerate() {
            if level.index as usize != i || level.price.to_bits() != price.to_bits() {
                return Err(GridError::StateCorrupt(format!(
                    "level {} (index {}, price {}) does not match ladder price {}",
                    i, level.index, level.price, price
                )));
            }
        }

        let grid_levels = if snapshot.grid_levels == 0 {
            (snapshot.ladder.len() as u32 + 1) / 2
        } else {
            snapshot.grid_levels
        };

        let config = GridConfig::new(
            snapshot.symbol,
            snapshot.initial_price,
            snapshot.grid_size,
            grid_levels,
            snapshot.position_amount,
            snapshot.initial_capital,
        )
        .with_max_loss(snapshot.max_loss)
        .with_buy_window(snapshot.buy_window)
        .with_price_decimals(snapshot.price_decimals)
        .without_persistence();

        config
            .validate()
            .map_err(|e| GridError::StateCorrupt(format!("snapshot parameters invalid: {}", e)))?;

        Ok(Self {
            config,
            grid_step: snapshot.grid_step,
            ladder: snapshot.ladder,
            levels: snapshot.levels,
            capital: snapshot.capital,
            position: snapshot.position,
            total_assets: snapshot.total_assets,
            pnl: snapshot.pnl,
            pnl_rate: snapshot.pnl_rate,
            current_price: snapshot.current_price,
            history_orders: snapshot.history_orders,
            round_trips: snapshot.round_trips,
        })
    }

    /// Whether a restored engine's grid parameters differ from `config`
    fn parameters_differ(&self, config: &GridConfig) -> bool {
        let ours = &self.config;
        (ours.initial_price - config.initial_price).abs() > 1e-9
            || (ours.grid_size - config.grid_size).abs() > 1e-12
            || ours.grid_levels != config.grid_levels
            || (ours.position_amount - config.position_amount).abs() > 1e-9
            || (ours.initial_capital - config.initial_capital).abs() > 1e-9
            || (ours.max_loss - config.max_loss).abs() > 1e-12
            || ours.buy_window != config.buy_window
            || ours.price_decimals != config.price_decimals
    }
}

/// Append-only JSON-lines log of fills and completed round trips
#[derive(Debug, Clone)]
pub struct HistoryLog {
    path: PathBuf,
}

impl HistoryLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append records, one JSON object per line. Prior lines are never rewritten.
    pub fn append(&self, records: &[HistoryRecord]) -> GridResult<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut buf = String::new();
        for record in records {
            buf.push_str(&serde_json::to_string(record)?);
            buf.push('\n');
        }

        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        file.write_all(buf.as_bytes())?;
        Ok(())
    }

    /// Read every parseable record. A missing file is empty; bad lines are skipped.
    pub fn read_all(&self) -> GridResult<Vec<HistoryRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let content = std::fs::read_to_string(&self.path)?;
        let mut records = Vec::new();
        for (line_no, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<HistoryRecord>(line) {
                Ok(record) => records.push(record),
                Err(e) => warn!(
                    "Skipping unreadable history line {} in {:?}: {}",
                    line_no + 1,
                    self.path,
                    e
                ),
            }
        }
        Ok(records)
    }
}

/// Where engine state lives on disk
///
/// Persistence failures are reported to the caller; the in-memory engine
/// stays authoritative either way.
#[derive(Debug, Clone, Default)]
pub struct StateStore {
    state_file: Option<PathBuf>,
    history: Option<HistoryLog>,
}

impl StateStore {
    pub fn new(config: &GridConfig) -> Self {
        Self {
            state_file: config.state_file.clone(),
            history: config.history_file.clone().map(HistoryLog::new),
        }
    }

    pub fn state_file(&self) -> Option<&Path> {
        self.state_file.as_deref()
    }

    pub fn history(&self) -> Option<&HistoryLog> {
        self.history.as_ref()
    }

    /// Load the engine from the snapshot file or create a fresh one from `config`
    ///
    /// A missing, corrupt, newer-schema or different-symbol snapshot falls back
    /// to a fresh engine. Only an invalid `config` is an error.
    pub fn load_or_create(&self, config: GridConfig) -> GridResult<StrategyEngine> {
        if let Some(mut engine) = self.load() {
            if engine.config.symbol != config.symbol {
                warn!(
                    "Snapshot is for {} but config trades {}; starting fresh",
                    engine.config.symbol, config.symbol
                );
                return StrategyEngine::new(config);
            }

            if engine.parameters_differ(&config) {
                warn!("Snapshot grid parameters differ from config; keeping the snapshot's ladder");
            }

            engine.config.state_file = config.state_file.clone();
            engine.config.history_file = config.history_file.clone();
            return Ok(engine);
        }

        info!("Creating new grid state for {}", config.symbol);
        StrategyEngine::new(config)
    }

    /// Load the engine from the snapshot file alone
    ///
    /// Returns `None`, with a logged warning, when there is nothing usable.
    pub fn load(&self) -> Option<StrategyEngine> {
        let path = self.state_file.as_ref()?;
        if !path.exists() {
            debug!("No snapshot at {:?}", path);
            return None;
        }

        info!("Loading existing state from {:?}", path);
        let restored = EngineSnapshot::load_from_file(path).and_then(StrategyEngine::restore);
        match restored {
            Ok(engine) => {
                info!(
                    "Loaded state: {} levels, capital={:.2}, position={:.8}, {} filled orders",
                    engine.levels.len(),
                    engine.capital,
                    engine.position,
                    engine.history_orders.len()
                );
                Some(engine)
            }
            Err(e) => {
                warn!("Failed to load state from {:?}: {}, starting fresh", path, e);
                None
            }
        }
    }

    /// Overwrite the snapshot with the engine's current state
    pub fn save(&self, engine: &StrategyEngine) -> GridResult<()> {
        if let Some(path) = &self.state_file {
            engine.snapshot().save_to_file_atomic(path)?;
            debug!("State saved to {:?}", path);
        }
        Ok(())
    }

    /// Append the fills and round trips observed in one sweep to the history log
    pub fn record(&self, report: &TickReport) -> GridResult<()> {
        let Some(history) = &self.history else {
            return Ok(());
        };
        if !report.changed {
            return Ok(());
        }

        let records: Vec<HistoryRecord> = report
            .fills
            .iter()
            .cloned()
            .map(HistoryRecord::Fill)
            .chain(report.completed_trades.iter().cloned().map(HistoryRecord::RoundTrip))
            .collect();

        history.append(&records)
    }
}
