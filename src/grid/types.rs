//! Core data types for grid trading

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque order handle in the exchange's namespace
pub type OrderId = String;

/// Order side for grid orders
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// Convert to exchange side string
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        }
    }
}

/// Status of one order slot (buy or sell) on a grid level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// No order placed in this slot
    #[default]
    None,
    /// Order accepted by the exchange and resting
    Open,
    /// Cancel requested, waiting for the exchange to report it closed
    PendingCancel,
    /// Order fully executed
    Filled,
    /// Order cancelled on the exchange
    Closed,
}

impl OrderStatus {
    /// Whether the exchange may still fill this order
    pub fn is_live(&self) -> bool {
        matches!(self, OrderStatus::Open | OrderStatus::PendingCancel)
    }
}

/// Order status as reported by the exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeOrderStatus {
    Open,
    Filled,
    /// Cancelled. Named after the exchange's own wording.
    Closed,
}

impl From<ExchangeOrderStatus> for OrderStatus {
    fn from(status: ExchangeOrderStatus) -> Self {
        match status {
            ExchangeOrderStatus::Open => OrderStatus::Open,
            ExchangeOrderStatus::Filled => OrderStatus::Filled,
            ExchangeOrderStatus::Closed => OrderStatus::Closed,
        }
    }
}

/// Individual grid level tracking
///
/// The price is fixed once the ladder is built. Levels are addressed by
/// `index` (position in the descending ladder), never by price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridLevel {
    /// Index of this level in the ladder (0 = highest price)
    pub index: u32,
    /// Limit price of this level
    pub price: f64,
    /// Base amount bought at this level (for completed-trade reporting)
    #[serde(default)]
    pub amount: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buy_order_id: Option<OrderId>,
    #[serde(default)]
    pub buy_order_status: OrderStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buy_executed_price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sell_order_id: Option<OrderId>,
    #[serde(default)]
    pub sell_order_status: OrderStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sell_executed_price: Option<f64>,
}

impl GridLevel {
    /// Create a new, empty grid level
    pub fn new(index: u32, price: f64) -> Self {
        Self {
            index,
            price,
            amount: 0.0,
            buy_order_id: None,
            buy_order_status: OrderStatus::None,
            buy_executed_price: None,
            sell_order_id: None,
            sell_order_status: OrderStatus::None,
            sell_executed_price: None,
        }
    }

    /// Reset the level to its initial empty state. The price is kept.
    pub fn reset(&mut self) {
        *self = Self::new(self.index, self.price);
    }

    /// Clear the sell slot only
    pub fn reset_sell(&mut self) {
        self.sell_order_id = None;
        self.sell_order_status = OrderStatus::None;
        self.sell_executed_price = None;
    }

    /// Whether the level carries no order at all
    pub fn is_empty(&self) -> bool {
        self.buy_order_id.is_none()
            && self.sell_order_id.is_none()
            && self.buy_order_status == OrderStatus::None
            && self.sell_order_status == OrderStatus::None
    }

    /// Check if this level has a resting buy order
    pub fn has_open_buy(&self) -> bool {
        self.buy_order_status == OrderStatus::Open
    }

    /// Check if this level has a resting sell order
    pub fn has_open_sell(&self) -> bool {
        self.sell_order_status == OrderStatus::Open
    }

    /// Buy filled and the paired exit has not been placed yet
    pub fn needs_sell(&self) -> bool {
        self.buy_order_status == OrderStatus::Filled && self.sell_order_status == OrderStatus::None
    }

    /// Both legs filled: the round trip is complete
    pub fn round_trip_complete(&self) -> bool {
        self.buy_order_status == OrderStatus::Filled && self.sell_order_status == OrderStatus::Filled
    }

    /// Mark the buy slot as resting with the given exchange id
    pub fn mark_buy_open(&mut self, id: OrderId) {
        self.buy_order_id = Some(id);
        self.buy_order_status = OrderStatus::Open;
    }

    /// Mark the sell slot as resting with the given exchange id
    pub fn mark_sell_open(&mut self, id: OrderId) {
        self.sell_order_id = Some(id);
        self.sell_order_status = OrderStatus::Open;
    }

    /// Order id and status for one side
    pub fn slot(&self, side: OrderSide) -> (Option<&OrderId>, OrderStatus) {
        match side {
            OrderSide::Buy => (self.buy_order_id.as_ref(), self.buy_order_status),
            OrderSide::Sell => (self.sell_order_id.as_ref(), self.sell_order_status),
        }
    }

    /// Set the status of one side
    pub fn set_status(&mut self, side: OrderSide, status: OrderStatus) {
        match side {
            OrderSide::Buy => self.buy_order_status = status,
            OrderSide::Sell => self.sell_order_status = status,
        }
    }
}

/// Result of placing an order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderHandle {
    pub id: OrderId,
    pub status: ExchangeOrderStatus,
}

/// Order as reported by the exchange's fetch call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeOrder {
    pub id: OrderId,
    pub side: OrderSide,
    pub price: f64,
    pub amount: f64,
    pub status: ExchangeOrderStatus,
    /// Milliseconds since the epoch at which the exchange last reported on the order
    #[serde(default)]
    pub timestamp: i64,
}

/// Ticker snapshot
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Ticker {
    pub last: f64,
}

/// Order book snapshot: `[price, qty]` pairs, best first
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderBook {
    pub bids: Vec<[f64; 2]>,
    pub asks: Vec<[f64; 2]>,
}

impl OrderBook {
    /// Best bid price, the price source the runner feeds into the engine
    pub fn best_bid(&self) -> Option<f64> {
        self.bids.first().map(|level| level[0])
    }

    pub fn best_ask(&self) -> Option<f64> {
        self.asks.first().map(|level| level[0])
    }
}

/// A fully round-tripped grid level
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedTrade {
    pub id: Uuid,
    pub rung_price: f64,
    pub buy_executed_price: f64,
    pub sell_executed_price: f64,
    pub amount: f64,
    /// Gain on the bought amount, marked at the sell price
    pub profit: f64,
    pub timestamp: DateTime<Utc>,
}

/// One line of the append-only history log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HistoryRecord {
    /// An order observed as filled
    Fill(ExchangeOrder),
    /// A level whose buy and sell both filled
    RoundTrip(CompletedTrade),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_reset_keeps_price() {
        let mut level = GridLevel::new(3, 9900.0);
        level.mark_buy_open("1".into());
        level.buy_order_status = OrderStatus::Filled;
        level.buy_executed_price = Some(9900.0);
        level.amount = 0.0101;
        level.mark_sell_open("2".into());

        assert!(!level.is_empty());
        level.reset();

        assert!(level.is_empty());
        assert_eq!(level.index, 3);
        assert_eq!(level.price, 9900.0);
        assert_eq!(level.amount, 0.0);
        assert_eq!(level.buy_executed_price, None);
    }

    #[test]
    fn test_level_slot_helpers() {
        let mut level = GridLevel::new(0, 100.0);
        assert!(!level.needs_sell());

        level.mark_buy_open("7".into());
        assert!(level.has_open_buy());
        assert_eq!(level.slot(OrderSide::Buy), (Some(&"7".to_string()), OrderStatus::Open));

        level.set_status(OrderSide::Buy, OrderStatus::Filled);
        assert!(level.needs_sell());

        level.mark_sell_open("8".into());
        level.set_status(OrderSide::Sell, OrderStatus::Filled);
        assert!(level.round_trip_complete());
    }

    #[test]
    fn test_exchange_status_mapping() {
        assert_eq!(OrderStatus::from(ExchangeOrderStatus::Open), OrderStatus::Open);
        assert_eq!(OrderStatus::from(ExchangeOrderStatus::Filled), OrderStatus::Filled);
        assert_eq!(OrderStatus::from(ExchangeOrderStatus::Closed), OrderStatus::Closed);
        assert!(OrderStatus::PendingCancel.is_live());
        assert!(!OrderStatus::Filled.is_live());
    }

    #[test]
    fn test_history_record_is_tagged() {
        let order = ExchangeOrder {
            id: "5".into(),
            side: OrderSide::Buy,
            price: 9900.0,
            amount: 0.01,
            status: ExchangeOrderStatus::Filled,
            timestamp: 0,
        };
        let json = serde_json::to_string(&HistoryRecord::Fill(order.clone())).unwrap();
        assert!(json.contains("\"kind\":\"fill\""));
        assert!(json.contains("\"side\":\"buy\""));

        let back: HistoryRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, HistoryRecord::Fill(order));
    }

    #[test]
    fn test_order_book_best_prices() {
        let book = OrderBook {
            bids: vec![[99.9, 1.0], [99.8, 2.0]],
            asks: vec![[100.1, 1.0]],
        };
        assert_eq!(book.best_bid(), Some(99.9));
        assert_eq!(book.best_ask(), Some(100.1));
        assert_eq!(OrderBook::default().best_bid(), None);
    }
}
