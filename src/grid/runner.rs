//! Grid bot runner - fixed-cadence tick loop around the engine

use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, RwLock};
use tokio::time::{interval, sleep, MissedTickBehavior};

use super::config::GridConfig;
use super::engine::{EngineStatus, StrategyEngine, TickReport};
use super::errors::{GridError, GridResult};
use super::executor::ExchangeGateway;
use super::state::StateStore;
use super::types::GridLevel;

/// Grid bot runner configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Delay between reconciliation sweeps
    pub tick_interval_ms: u64,
    /// Order book depth requested for the price source
    pub order_book_depth: usize,
    /// Unconditional snapshot cadence, on top of saving after every changed tick
    pub state_save_interval_secs: u64,
    /// First backoff delay after a failing tick
    pub backoff_base_ms: u64,
    /// Upper bound on the backoff delay
    pub backoff_max_ms: u64,
    /// Stop after this many ticks (paper runs)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_ticks: Option<u64>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1000,
            order_book_depth: 5,
            state_save_interval_secs: 30,
            backoff_base_ms: 1000,
            backoff_max_ms: 30_000,
            max_ticks: None,
        }
    }
}

impl RunnerConfig {
    /// Backoff after `consecutive_failures` failing ticks in a row:
    /// `backoff_base_ms * 2^(n-1)`, capped at `backoff_max_ms`
    pub fn backoff_delay(&self, consecutive_failures: u32) -> Duration {
        if consecutive_failures == 0 {
            return Duration::ZERO;
        }
        let exponent = (consecutive_failures - 1).min(32);
        let delay = self
            .backoff_base_ms
            .saturating_mul(1u64 << exponent)
            .min(self.backoff_max_ms);
        Duration::from_millis(delay)
    }
}

/// Engine status plus the level table, as published after every tick
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridView {
    pub status: EngineStatus,
    pub levels: Vec<GridLevel>,
}

impl GridView {
    fn from_engine(engine: &StrategyEngine) -> Self {
        Self {
            status: engine.status(),
            levels: engine.levels().to_vec(),
        }
    }
}

/// Shared read-only view for status consumers
pub type SharedView = Arc<RwLock<GridView>>;

/// Drives one [`StrategyEngine`] against one exchange at a fixed cadence
///
/// The runner owns the engine, so ticks are strictly sequential. Readers get
/// a copy of the state through [`GridRunner::view`], swapped in whole after
/// each tick.
pub struct GridRunner<E: ExchangeGateway> {
    engine: StrategyEngine,
    exchange: Arc<E>,
    store: StateStore,
    runner_config: RunnerConfig,
    view: SharedView,
}

impl<E: ExchangeGateway + 'static> GridRunner<E> {
    /// Resume from the configured snapshot, or start a fresh grid
    pub fn new(config: GridConfig, exchange: E, runner_config: RunnerConfig) -> GridResult<Self> {
        let store = StateStore::new(&config);
        let engine = store.load_or_create(config)?;
        Ok(Self::with_engine(engine, store, Arc::new(exchange), runner_config))
    }

    pub fn with_engine(
        engine: StrategyEngine,
        store: StateStore,
        exchange: Arc<E>,
        runner_config: RunnerConfig,
    ) -> Self {
        let view = Arc::new(RwLock::new(GridView::from_engine(&engine)));
        Self {
            engine,
            exchange,
            store,
            runner_config,
            view,
        }
    }

    pub fn engine(&self) -> &StrategyEngine {
        &self.engine
    }

    pub fn exchange(&self) -> &Arc<E> {
        &self.exchange
    }

    pub fn view(&self) -> SharedView {
        self.view.clone()
    }

    /// Run until Ctrl-C, then save a final snapshot
    pub async fn run_until_ctrl_c(&mut self) -> GridResult<()> {
        let (tx, rx) = watch::channel(false);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Ctrl-C received, stopping after the current tick");
                let _ = tx.send(true);
            }
        });
        self.run(rx).await
    }

    /// Tick at the configured cadence until `shutdown` flips to true
    ///
    /// Shutdown is only observed between ticks. A final snapshot is written
    /// before returning.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> GridResult<()> {
        let config = self.engine.config();
        info!(
            "Starting grid bot for {}: {} levels, step {:.4}, {} per level",
            config.symbol,
            self.engine.levels().len(),
            self.engine.grid_step(),
            config.position_amount
        );

        let mut tick_timer = interval(Duration::from_millis(self.runner_config.tick_interval_ms.max(1)));
        tick_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut save_timer = interval(Duration::from_secs(self.runner_config.state_save_interval_secs.max(1)));
        let mut consecutive_failures = 0u32;
        let mut ticks = 0u64;

        loop {
            let mut backoff = None;

            tokio::select! {
                _ = tick_timer.tick() => {
                    let failed = match self.run_tick().await {
                        Ok(report) => report.has_failures(),
                        Err(e) => {
                            error!("Tick failed: {}", e);
                            true
                        }
                    };
                    ticks += 1;

                    if failed {
                        consecutive_failures += 1;
                        let delay = self.runner_config.backoff_delay(consecutive_failures);
                        warn!(
                            "{} consecutive failing ticks, backing off {:?}",
                            consecutive_failures, delay
                        );
                        backoff = Some(delay);
                    } else {
                        consecutive_failures = 0;
                    }
                }
                _ = save_timer.tick() => {
                    self.persist();
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Shutdown requested");
                        break;
                    }
                }
            }

            if let Some(limit) = self.runner_config.max_ticks {
                if ticks >= limit {
                    info!("Reached {} ticks, stopping", limit);
                    break;
                }
            }

            if let Some(delay) = backoff {
                let wait = sleep(delay);
                tokio::pin!(wait);
                let mut stop = false;
                loop {
                    tokio::select! {
                        _ = &mut wait => break,
                        changed = shutdown.changed() => {
                            if changed.is_err() || *shutdown.borrow() {
                                stop = true;
                                break;
                            }
                        }
                    }
                }
                if stop {
                    info!("Shutdown requested during backoff");
                    break;
                }
            }
        }

        self.persist();
        let summary = self.engine.summary();
        info!(
            "Grid bot stopped: total_assets={:.2}, pnl={:.2} ({:.2}%), round trips={}",
            summary.total_assets,
            summary.pnl,
            summary.pnl_rate * 100.0,
            self.engine.round_trips()
        );
        Ok(())
    }

    /// One full cycle: fetch price, sweep, persist, publish
    pub async fn run_tick(&mut self) -> GridResult<TickReport> {
        let price = self.fetch_price().await?;
        let report = self.engine.tick(self.exchange.as_ref(), price).await;

        if report.state_changed() {
            self.persist();
        }
        if let Err(e) = self.store.record(&report) {
            warn!("Failed to append trade history: {}", e);
        }

        for trade in &report.completed_trades {
            info!(
                "Trade completed at level {:.2}: profit {:.4}",
                trade.rung_price, trade.profit
            );
        }

        if self.engine.max_loss_breached() {
            warn!(
                "Loss {:.2}% exceeds max loss {:.2}%",
                -self.engine.pnl_rate() * 100.0,
                self.engine.config().max_loss * 100.0
            );
        }

        let view = GridView::from_engine(&self.engine);
        *self.view.write().await = view;

        debug!(
            "Tick at {:.2}: total_assets={:.2}, pnl={:.2}",
            price,
            self.engine.total_assets(),
            self.engine.pnl()
        );

        Ok(report)
    }

    /// Best bid from the order book, falling back to the last trade price
    async fn fetch_price(&self) -> GridResult<f64> {
        let symbol = &self.engine.config().symbol;

        match self
            .exchange
            .fetch_order_book(symbol, self.runner_config.order_book_depth)
            .await
        {
            Ok(book) => {
                if let Some(bid) = book.best_bid() {
                    return Ok(bid);
                }
                debug!("Order book for {} has no bids, using ticker", symbol);
            }
            Err(e) => warn!("Failed to fetch order book for {}: {}, using ticker", symbol, e),
        }

        let ticker = self.exchange.fetch_ticker(symbol).await?;
        if !(ticker.last > 0.0) {
            return Err(GridError::Exchange(format!(
                "invalid ticker price {} for {}",
                ticker.last, symbol
            )));
        }
        Ok(ticker.last)
    }

    fn persist(&self) {
        if let Err(e) = self.store.save(&self.engine) {
            warn!("Failed to save state: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::executor::mock::MockExchange;
    use crate::grid::state::EngineSnapshot;

    fn paper_config() -> GridConfig {
        GridConfig::new("BTCUSDT", 10000.0, 0.01, 5, 100.0, 10000.0).without_persistence()
    }

    fn fast_runner_config() -> RunnerConfig {
        RunnerConfig {
            tick_interval_ms: 5,
            backoff_base_ms: 5,
            backoff_max_ms: 20,
            ..RunnerConfig::default()
        }
    }

    #[test]
    fn test_backoff_is_exponential_and_capped() {
        let config = RunnerConfig {
            backoff_base_ms: 100,
            backoff_max_ms: 1000,
            ..RunnerConfig::default()
        };
        assert_eq!(config.backoff_delay(0), Duration::ZERO);
        assert_eq!(config.backoff_delay(1), Duration::from_millis(100));
        assert_eq!(config.backoff_delay(2), Duration::from_millis(200));
        assert_eq!(config.backoff_delay(4), Duration::from_millis(800));
        assert_eq!(config.backoff_delay(5), Duration::from_millis(1000));
        assert_eq!(config.backoff_delay(500), Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn test_tick_uses_best_bid_and_publishes_view() {
        let mut runner = GridRunner::new(paper_config(), MockExchange::new(10000.0), fast_runner_config()).unwrap();
        let view = runner.view();

        let report = runner.run_tick().await.unwrap();
        assert_eq!(report.orders_placed, 4);

        // 0.1% below the mock mid price
        assert!((runner.engine().current_price() - 9990.0).abs() < 1e-9);

        let view = view.read().await;
        assert_eq!(view.status.open_buys, 4);
        assert_eq!(view.levels.len(), 9);
        assert!((view.status.current_price - 9990.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_empty_book_falls_back_to_ticker() {
        let runner_config = RunnerConfig {
            order_book_depth: 0,
            ..fast_runner_config()
        };
        let mut runner = GridRunner::new(paper_config(), MockExchange::new(10000.0), runner_config).unwrap();
        runner.run_tick().await.unwrap();
        assert_eq!(runner.engine().current_price(), 10000.0);
    }

    #[tokio::test]
    async fn test_price_failure_is_an_error() {
        let exchange = MockExchange::new(10000.0);
        exchange.set_should_fail(true).await;
        let mut runner = GridRunner::new(paper_config(), exchange, fast_runner_config()).unwrap();

        let err = runner.run_tick().await.unwrap_err();
        assert!(err.is_retryable());
        assert!(runner.engine().levels().iter().all(|l| l.is_empty()));
    }

    #[tokio::test]
    async fn test_run_stops_after_max_ticks_and_saves() {
        let state = std::env::temp_dir().join(format!("grid_runner_{}.json", uuid::Uuid::new_v4()));
        let config = paper_config().with_state_file(&state);
        let runner_config = RunnerConfig {
            max_ticks: Some(3),
            ..fast_runner_config()
        };
        let mut runner = GridRunner::new(config, MockExchange::new(10000.0), runner_config).unwrap();

        let (_tx, rx) = watch::channel(false);
        runner.run(rx).await.unwrap();

        let snapshot = EngineSnapshot::load_from_file(&state).unwrap();
        std::fs::remove_file(&state).ok();
        assert_eq!(snapshot.symbol, "BTCUSDT");
        assert_eq!(snapshot.levels.iter().filter(|l| l.has_open_buy()).count(), 4);
    }

    #[tokio::test]
    async fn test_shutdown_signal_stops_loop() {
        let exchange = MockExchange::new(10000.0);
        exchange.set_should_fail(true).await;
        let mut runner = GridRunner::new(paper_config(), exchange, fast_runner_config()).unwrap();

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            runner.run(rx).await.unwrap();
            runner
        });

        sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();
        let runner = handle.await.unwrap();

        // Every tick failed; nothing was placed
        assert!(runner.engine().levels().iter().all(|l| l.is_empty()));
    }

    #[tokio::test]
    async fn test_false_signal_does_not_cut_backoff_short() {
        let exchange = MockExchange::new(10000.0);
        exchange.set_should_fail(true).await;
        let runner_config = RunnerConfig {
            backoff_base_ms: 500,
            backoff_max_ms: 500,
            ..fast_runner_config()
        };
        let mut runner = GridRunner::new(paper_config(), exchange, runner_config).unwrap();

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(async move { runner.run(rx).await });

        sleep(Duration::from_millis(20)).await;
        tx.send(false).unwrap();
        sleep(Duration::from_millis(20)).await;
        assert!(!handle.is_finished());

        tx.send(true).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_unwritable_paths_keep_trading_in_memory() {
        let missing_dir = std::env::temp_dir().join(format!("grid_missing_{}", uuid::Uuid::new_v4()));
        let state = missing_dir.join("state.json");
        let history = missing_dir.join("history.jsonl");
        let config = paper_config().with_state_file(&state).with_history_file(&history);
        let mut runner = GridRunner::new(config, MockExchange::new(10000.0), fast_runner_config()).unwrap();

        let report = runner.run_tick().await.unwrap();
        assert_eq!(report.orders_placed, 4);
        assert!(!state.exists());

        runner.exchange().set_price(9899.0).await;
        let report = runner.run_tick().await.unwrap();
        assert_eq!(report.fills.len(), 1);
        assert!(!history.exists());
        assert!(!missing_dir.exists());

        let engine = runner.engine();
        assert_eq!(engine.history_orders().len(), 1);
        assert!((engine.capital() - 9900.0).abs() < 1e-9);
        assert_eq!(engine.levels().iter().filter(|l| l.has_open_buy()).count(), 3);
        assert_eq!(runner.view().read().await.status.filled_orders, 1);
    }

    #[tokio::test]
    async fn test_resumed_grid_on_fresh_exchange_does_not_back_off() {
        let first = MockExchange::new(10000.0);
        let mut engine = StrategyEngine::new(paper_config()).unwrap();
        engine.tick(&first, 10000.0).await;
        first.set_price(9899.0).await;
        engine.tick(&first, 9899.0).await;
        let restored = StrategyEngine::restore(engine.snapshot()).unwrap();

        let mut runner = GridRunner::with_engine(
            restored,
            StateStore::default(),
            Arc::new(MockExchange::new(10000.0)),
            fast_runner_config(),
        );

        let report = runner.run_tick().await.unwrap();
        assert_eq!(report.rejected_calls, 4);
        assert!(!report.has_failures());

        for _ in 0..5 {
            let report = runner.run_tick().await.unwrap();
            assert!(!report.has_failures());
            assert_eq!(report.rejected_calls, 0);
        }
        assert_eq!(runner.engine().history_orders().len(), 1);
        assert!((runner.engine().capital() - 9900.0).abs() < 1e-9);
    }
}
