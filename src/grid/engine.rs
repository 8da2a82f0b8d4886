//! Grid strategy engine - per-tick reconciliation over the static ladder

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::config::GridConfig;
use super::errors::{GridError, GridResult};
use super::executor::ExchangeGateway;
use super::ladder::{build_levels, generate_ladder, round_price};
use super::types::{CompletedTrade, ExchangeOrder, GridLevel, OrderSide, OrderStatus};

/// Account figures, as reported by [`StrategyEngine::summary`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EngineSummary {
    pub total_assets: f64,
    pub capital: f64,
    pub position: f64,
    pub pnl: f64,
    pub pnl_rate: f64,
}

/// Read-only view of the engine published after every tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineStatus {
    pub symbol: String,
    pub current_price: f64,
    pub initial_capital: f64,
    pub grid_step: f64,
    #[serde(flatten)]
    pub summary: EngineSummary,
    pub num_levels: usize,
    pub open_buys: usize,
    pub open_sells: usize,
    pub round_trips: u32,
    pub filled_orders: usize,
    pub max_loss_breached: bool,
    pub updated_at: DateTime<Utc>,
}

/// What happened during one reconciliation sweep
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    /// An order slot transitioned to FILLED or CLOSED
    pub changed: bool,
    /// Orders newly observed as filled, in sweep order
    pub fills: Vec<ExchangeOrder>,
    /// Levels whose round trip closed during this sweep
    pub completed_trades: Vec<CompletedTrade>,
    pub orders_placed: u32,
    pub orders_cancelled: u32,
    /// Transient exchange failures (network/API)
    pub exchange_errors: u32,
    /// Placements rejected for lack of balance
    pub balance_rejections: u32,
    /// Calls the exchange refused outright, e.g. an unknown order id
    pub rejected_calls: u32,
    /// Inconsistent level states that were force-reset
    pub warnings: u32,
}

impl TickReport {
    /// Whether anything in the engine's persisted state moved
    pub fn state_changed(&self) -> bool {
        self.changed || self.orders_placed > 0 || self.orders_cancelled > 0
    }

    /// Whether any exchange call failed transiently during the sweep.
    /// Balance rejections do not count: they clear when orders fill.
    pub fn has_failures(&self) -> bool {
        self.exchange_errors > 0
    }

    fn record_error(&mut self, err: &GridError) {
        match err {
            GridError::InsufficientBalance { .. } => self.balance_rejections += 1,
            e if e.is_retryable() => self.exchange_errors += 1,
            _ => self.rejected_calls += 1,
        }
    }
}

/// Grid strategy engine for one symbol on one exchange
///
/// Owns the ladder and every level's order state. [`tick`](Self::tick) takes
/// `&mut self`, so two sweeps over the same engine can never interleave.
#[derive(Debug, Clone)]
pub struct StrategyEngine {
    pub(super) config: GridConfig,
    pub(super) grid_step: f64,
    pub(super) ladder: Vec<f64>,
    pub(super) levels: Vec<GridLevel>,
    pub(super) capital: f64,
    pub(super) position: f64,
    pub(super) total_assets: f64,
    pub(super) pnl: f64,
    pub(super) pnl_rate: f64,
    pub(super) current_price: f64,
    pub(super) history_orders: Vec<ExchangeOrder>,
    pub(super) round_trips: u32,
}

impl StrategyEngine {
    /// Build a fresh engine: compute the ladder and start every level empty
    pub fn new(config: GridConfig) -> GridResult<Self> {
        config.validate()?;
        let ladder = generate_ladder(config.initial_price, config.grid_size, config.grid_levels)?;
        let levels = build_levels(&ladder);

        info!(
            "Initialized {} grid levels for {} from {:.2} to {:.2}",
            ladder.len(),
            config.symbol,
            ladder.last().copied().unwrap_or_default(),
            ladder.first().copied().unwrap_or_default()
        );

        Ok(Self {
            grid_step: config.grid_step(),
            capital: config.initial_capital,
            position: 0.0,
            total_assets: config.initial_capital,
            pnl: 0.0,
            pnl_rate: 0.0,
            current_price: config.initial_price,
            history_orders: Vec::new(),
            round_trips: 0,
            ladder,
            levels,
            config,
        })
    }

    /// Run one reconciliation sweep over the whole ladder at `current_price`
    ///
    /// Levels are visited in descending price order. For each level: reconcile
    /// its orders, refresh P&L, place the paired sell if the buy has filled,
    /// then keep a live buy on the nearest `buy_window` levels below price and
    /// cancel open buys further away. Exchange failures are logged and leave
    /// the level as it was, to be retried on the next sweep.
    pub async fn tick<E: ExchangeGateway + ?Sized>(&mut self, exchange: &E, current_price: f64) -> TickReport {
        self.current_price = current_price;
        let mut report = TickReport::default();
        let mut budget = self.config.buy_window as i64;

        for idx in 0..self.levels.len() {
            self.reconcile_level(exchange, idx, &mut report).await;
            self.update_pnl(current_price);

            if self.levels[idx].needs_sell() {
                self.place_sell_order(exchange, idx, &mut report).await;
            }

            if self.levels[idx].price < current_price {
                if budget > 0 {
                    if self.levels[idx].buy_order_status == OrderStatus::None {
                        self.place_buy_order(exchange, idx, &mut report).await;
                    }
                } else if self.levels[idx].has_open_buy() {
                    self.cancel_buy_order(exchange, idx, &mut report).await;
                }
                budget -= 1;
            }
        }

        if report.state_changed() {
            debug!(
                "Tick at {:.2}: {} fills, {} placed, {} cancelled, {} round trips",
                current_price,
                report.fills.len(),
                report.orders_placed,
                report.orders_cancelled,
                report.completed_trades.len()
            );
        }

        report
    }

    /// Query the exchange for both order slots of a level and apply transitions
    async fn reconcile_level<E: ExchangeGateway + ?Sized>(
        &mut self,
        exchange: &E,
        idx: usize,
        report: &mut TickReport,
    ) {
        for side in [OrderSide::Buy, OrderSide::Sell] {
            let (order_id, status) = {
                let (id, status) = self.levels[idx].slot(side);
                (id.cloned(), status)
            };
            let Some(order_id) = order_id else { continue };
            if !status.is_live() {
                continue;
            }

            let order = match exchange.fetch_order(&order_id, &self.config.symbol).await {
                Ok(order) => order,
                Err(e @ GridError::OrderNotFound(_)) => {
                    warn!(
                        "{} order {} at {:.2} unknown to exchange; clearing slot",
                        side.as_str(),
                        order_id,
                        self.levels[idx].price
                    );
                    report.record_error(&e);
                    self.clear_slot(idx, side);
                    report.changed = true;
                    continue;
                }
                Err(e) => {
                    error!(
                        "Failed to check {} order {} at {:.2}: {}",
                        side.as_str(),
                        order_id,
                        self.levels[idx].price,
                        e
                    );
                    report.record_error(&e);
                    continue;
                }
            };

            if !self.order_matches_slot(idx, side, &order) {
                warn!(
                    "Exchange returned {} order {} at {:.2} for the {} slot at {:.2}; clearing slot",
                    order.side.as_str(),
                    order.id,
                    order.price,
                    side.as_str(),
                    self.levels[idx].price
                );
                report.warnings += 1;
                self.clear_slot(idx, side);
                report.changed = true;
                continue;
            }

            let new_status = OrderStatus::from(order.status);
            if new_status == OrderStatus::Open {
                // Still resting
                continue;
            }

            self.levels[idx].set_status(side, new_status);
            report.changed = true;

            match new_status {
                OrderStatus::Filled => {
                    self.apply_fill(idx, side, &order);
                    report.fills.push(order);
                }
                OrderStatus::Closed => {
                    info!(
                        "{} order {} at {:.2} closed",
                        side.as_str(),
                        order_id,
                        self.levels[idx].price
                    );
                }
                _ => {}
            }
        }

        let level = &mut self.levels[idx];
        if level.round_trip_complete() {
            let trade = Self::completed_trade(level);
            info!(
                "Round trip complete at {:.2}: bought {:.2}, sold {:.2}, profit {:.4}",
                trade.rung_price, trade.buy_executed_price, trade.sell_executed_price, trade.profit
            );
            level.reset();
            self.round_trips += 1;
            report.completed_trades.push(trade);
        } else if level.buy_order_status == OrderStatus::Closed {
            if level.sell_order_status != OrderStatus::None {
                warn!(
                    "Buy order at {:.2} closed but sell status is {:?}; resetting level",
                    level.price, level.sell_order_status
                );
                report.warnings += 1;
            }
            level.reset();
        } else if level.buy_order_status == OrderStatus::Filled && level.sell_order_status == OrderStatus::Closed {
            warn!(
                "Sell order at {:.2} closed before filling; re-placing exit",
                level.price
            );
            level.reset_sell();
        }
    }

    /// Whether a fetched order is the one this slot placed: same side, same limit price
    fn order_matches_slot(&self, idx: usize, side: OrderSide, order: &ExchangeOrder) -> bool {
        if order.side != side {
            return false;
        }
        let expected = match side {
            OrderSide::Buy => self.levels[idx].price,
            OrderSide::Sell => self.sell_price_for(idx),
        };
        (order.price - expected).abs() <= expected.abs() * 1e-9
    }

    /// Forget one slot's order. A live buy has no sell yet, so it takes the whole level.
    fn clear_slot(&mut self, idx: usize, side: OrderSide) {
        match side {
            OrderSide::Buy => self.levels[idx].reset(),
            OrderSide::Sell => self.levels[idx].reset_sell(),
        }
    }

    fn sell_price_for(&self, idx: usize) -> f64 {
        round_price(self.levels[idx].price + self.grid_step, self.config.price_decimals)
    }

    /// Move capital and position for a newly filled order
    fn apply_fill(&mut self, idx: usize, side: OrderSide, order: &ExchangeOrder) {
        let amount = self.config.position_amount;
        let level = &mut self.levels[idx];
        let units = amount / level.price;

        match side {
            OrderSide::Buy => {
                self.capital -= amount;
                self.position += units;
                level.buy_executed_price = Some(order.price);
                level.amount = order.amount;
            }
            OrderSide::Sell => {
                self.capital += amount;
                self.position -= units;
                level.sell_executed_price = Some(order.price);
            }
        }

        info!(
            "{} order {} filled at {:.2} (level {:.2}): capital={:.2}, position={:.8}",
            side.as_str(),
            order.id,
            order.price,
            level.price,
            self.capital,
            self.position
        );

        self.history_orders.push(order.clone());
    }

    fn completed_trade(level: &GridLevel) -> CompletedTrade {
        let buy_price = level.buy_executed_price.unwrap_or(level.price);
        let sell_price = level.sell_executed_price.unwrap_or(level.price);

        CompletedTrade {
            id: Uuid::new_v4(),
            rung_price: level.price,
            buy_executed_price: buy_price,
            sell_executed_price: sell_price,
            amount: level.amount,
            profit: (sell_price - buy_price) * level.amount,
            timestamp: Utc::now(),
        }
    }

    async fn place_buy_order<E: ExchangeGateway + ?Sized>(
        &mut self,
        exchange: &E,
        idx: usize,
        report: &mut TickReport,
    ) {
        let price = self.levels[idx].price;
        let amount = self.config.order_size_at_price(price);

        match exchange
            .create_limit_buy_order(&self.config.symbol, amount, price)
            .await
        {
            Ok(handle) => {
                info!(
                    "Placed buy at {:.2} for {} (amount {:.8}), order id {}",
                    price, self.config.position_amount, amount, handle.id
                );
                self.levels[idx].mark_buy_open(handle.id);
                report.orders_placed += 1;
            }
            Err(e) => {
                error!("Failed to place buy at {:.2}: {}", price, e);
                report.record_error(&e);
            }
        }
    }

    async fn place_sell_order<E: ExchangeGateway + ?Sized>(
        &mut self,
        exchange: &E,
        idx: usize,
        report: &mut TickReport,
    ) {
        let sell_price = self.sell_price_for(idx);
        let amount = self.config.order_size_at_price(sell_price);

        match exchange
            .create_limit_sell_order(&self.config.symbol, amount, sell_price)
            .await
        {
            Ok(handle) => {
                info!(
                    "Placed sell at {:.2} for {} (amount {:.8}), order id {}",
                    sell_price, self.config.position_amount, amount, handle.id
                );
                self.levels[idx].mark_sell_open(handle.id);
                report.orders_placed += 1;
            }
            Err(e) => {
                error!("Failed to place sell at {:.2}: {}", sell_price, e);
                report.record_error(&e);
            }
        }
    }

    async fn cancel_buy_order<E: ExchangeGateway + ?Sized>(
        &mut self,
        exchange: &E,
        idx: usize,
        report: &mut TickReport,
    ) {
        let price = self.levels[idx].price;
        let Some(order_id) = self.levels[idx].buy_order_id.clone() else {
            return;
        };

        match exchange.cancel_order(&order_id, &self.config.symbol).await {
            Ok(()) => {
                info!("Cancelling buy order {} at {:.2}", order_id, price);
                self.levels[idx].buy_order_status = OrderStatus::PendingCancel;
                report.orders_cancelled += 1;
            }
            Err(GridError::OrderNotFound(_)) => {
                warn!(
                    "Buy order {} at {:.2} unknown to exchange; resetting level",
                    order_id, price
                );
                self.levels[idx].reset();
                report.changed = true;
            }
            Err(e) => {
                error!("Failed to cancel buy order {} at {:.2}: {}", order_id, price, e);
                report.record_error(&e);
            }
        }
    }

    /// Recompute total assets and P&L at `price`
    pub fn update_pnl(&mut self, price: f64) {
        self.total_assets = self.capital + self.position * price;
        self.pnl = self.total_assets - self.config.initial_capital;
        self.pnl_rate = self.pnl / self.config.initial_capital;
    }

    /// Whether the loss exceeds the configured maximum. Reported, not acted on.
    pub fn max_loss_breached(&self) -> bool {
        self.pnl_rate <= -self.config.max_loss
    }

    pub fn summary(&self) -> EngineSummary {
        EngineSummary {
            total_assets: self.total_assets,
            capital: self.capital,
            position: self.position,
            pnl: self.pnl,
            pnl_rate: self.pnl_rate,
        }
    }

    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            symbol: self.config.symbol.clone(),
            current_price: self.current_price,
            initial_capital: self.config.initial_capital,
            grid_step: self.grid_step,
            summary: self.summary(),
            num_levels: self.levels.len(),
            open_buys: self.levels.iter().filter(|l| l.has_open_buy()).count(),
            open_sells: self.levels.iter().filter(|l| l.has_open_sell()).count(),
            round_trips: self.round_trips,
            filled_orders: self.history_orders.len(),
            max_loss_breached: self.max_loss_breached(),
            updated_at: Utc::now(),
        }
    }

    /// Levels holding a filled buy whose sell has not filled yet
    pub fn open_positions(&self) -> usize {
        self.levels
            .iter()
            .filter(|l| l.buy_order_status == OrderStatus::Filled && l.sell_order_status != OrderStatus::Filled)
            .count()
    }

    pub fn config(&self) -> &GridConfig {
        &self.config
    }

    pub fn ladder(&self) -> &[f64] {
        &self.ladder
    }

    pub fn levels(&self) -> &[GridLevel] {
        &self.levels
    }

    pub fn level(&self, index: u32) -> GridResult<&GridLevel> {
        self.levels
            .get(index as usize)
            .ok_or(GridError::LevelNotFound(index))
    }

    pub fn grid_step(&self) -> f64 {
        self.grid_step
    }

    pub fn capital(&self) -> f64 {
        self.capital
    }

    pub fn position(&self) -> f64 {
        self.position
    }

    pub fn total_assets(&self) -> f64 {
        self.total_assets
    }

    pub fn pnl(&self) -> f64 {
        self.pnl
    }

    pub fn pnl_rate(&self) -> f64 {
        self.pnl_rate
    }

    pub fn current_price(&self) -> f64 {
        self.current_price
    }

    pub fn history_orders(&self) -> &[ExchangeOrder] {
        &self.history_orders
    }

    pub fn round_trips(&self) -> u32 {
        self.round_trips
    }
}
