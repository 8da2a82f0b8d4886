//! Exchange abstraction for grid trading - enables mocking for tests

use async_trait::async_trait;

use super::errors::GridResult;
use super::types::{ExchangeOrder, OrderBook, OrderHandle, Ticker};

/// Exchange operations consumed by the grid engine
///
/// Every call is a request/response round trip. Implementations report
/// balance rejections as [`GridError::InsufficientBalance`](super::GridError),
/// unknown ids as [`GridError::OrderNotFound`](super::GridError) and
/// everything else as [`GridError::Exchange`](super::GridError).
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    /// Latest traded price
    async fn fetch_ticker(&self, symbol: &str) -> GridResult<Ticker>;

    /// Top `depth` levels of the book, best first
    async fn fetch_order_book(&self, symbol: &str, depth: usize) -> GridResult<OrderBook>;

    /// Place a limit buy for `amount` base units at `price`
    async fn create_limit_buy_order(&self, symbol: &str, amount: f64, price: f64) -> GridResult<OrderHandle>;

    /// Place a limit sell for `amount` base units at `price`
    async fn create_limit_sell_order(&self, symbol: &str, amount: f64, price: f64) -> GridResult<OrderHandle>;

    /// Cancel an order by id
    async fn cancel_order(&self, order_id: &str, symbol: &str) -> GridResult<()>;

    /// Current state of an order by id
    async fn fetch_order(&self, order_id: &str, symbol: &str) -> GridResult<ExchangeOrder>;
}

// ============================================================================
// Mock Implementation for Testing and Paper Trading
// ============================================================================

/// Simulated exchange for testing grid bots without a real exchange connection.
pub mod mock {
    use super::*;
    use crate::grid::errors::GridError;
    use crate::grid::types::{ExchangeOrderStatus, OrderSide};
    use log::info;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;
    use tokio::sync::Mutex;
    use uuid::Uuid;

    /// Spread applied around the mid price in the simulated book
    const BOOK_SPREAD: f64 = 0.001;

    /// Quote and base balances available for new orders
    #[derive(Debug, Clone, Copy, PartialEq)]
    pub struct MockBalance {
        pub quote: f64,
        pub base: f64,
    }

    /// Order as tracked by the mock exchange
    #[derive(Debug, Clone)]
    struct MockOrder {
        order: ExchangeOrder,
        /// Balance reserved at placement (quote for buys, base for sells)
        reserved: f64,
    }

    /// Paper exchange that matches resting orders against a simulated price
    ///
    /// Buys fill once their limit is at or above the market price, sells once
    /// their limit is at or below it. Matching happens lazily inside
    /// [`ExchangeGateway::fetch_order`].
    pub struct MockExchange {
        pub price: Arc<Mutex<f64>>,
        pub balance: Arc<Mutex<MockBalance>>,
        orders: Arc<Mutex<Vec<MockOrder>>>,
        pub cancelled_ids: Arc<Mutex<Vec<String>>>,
        volatility: f64,
        rng: Mutex<StdRng>,
        /// Per-instance id prefix, so ids never repeat across restarts
        session: String,
        next_id: AtomicU64,
        pub should_fail: Arc<Mutex<bool>>,
    }

    impl MockExchange {
        /// Deterministic exchange with the default 10000 quote / 0 base balance
        pub fn new(price: f64) -> Self {
            Self::with_balance(price, 10_000.0, 0.0)
        }

        pub fn with_balance(price: f64, quote: f64, base: f64) -> Self {
            Self {
                price: Arc::new(Mutex::new(price)),
                balance: Arc::new(Mutex::new(MockBalance { quote, base })),
                orders: Arc::new(Mutex::new(Vec::new())),
                cancelled_ids: Arc::new(Mutex::new(Vec::new())),
                volatility: 0.0,
                rng: Mutex::new(StdRng::from_entropy()),
                session: Uuid::new_v4().simple().to_string()[..8].to_string(),
                next_id: AtomicU64::new(1),
                should_fail: Arc::new(Mutex::new(false)),
            }
        }

        /// Builder: random-walk the price by up to `volatility` per market-data fetch
        pub fn with_volatility(mut self, volatility: f64, seed: Option<u64>) -> Self {
            self.volatility = volatility;
            if let Some(seed) = seed {
                self.rng = Mutex::new(StdRng::seed_from_u64(seed));
            }
            self
        }

        pub async fn set_price(&self, price: f64) {
            *self.price.lock().await = price;
        }

        pub async fn current_price(&self) -> f64 {
            *self.price.lock().await
        }

        pub async fn set_should_fail(&self, fail: bool) {
            *self.should_fail.lock().await = fail;
        }

        pub async fn balance(&self) -> MockBalance {
            *self.balance.lock().await
        }

        /// All orders ever placed, in placement order
        pub async fn orders(&self) -> Vec<ExchangeOrder> {
            self.orders.lock().await.iter().map(|o| o.order.clone()).collect()
        }

        /// Orders still resting on the simulated book
        pub async fn open_orders(&self) -> Vec<ExchangeOrder> {
            self.orders
                .lock()
                .await
                .iter()
                .filter(|o| o.order.status == ExchangeOrderStatus::Open)
                .map(|o| o.order.clone())
                .collect()
        }

        /// Force an order into a given status, bypassing price matching
        pub async fn force_status(&self, order_id: &str, status: ExchangeOrderStatus) -> GridResult<()> {
            let mut orders = self.orders.lock().await;
            let entry = orders
                .iter_mut()
                .find(|o| o.order.id == order_id)
                .ok_or_else(|| GridError::OrderNotFound(order_id.to_string()))?;
            entry.order.status = status;
            Ok(())
        }

        async fn check_failure(&self) -> GridResult<()> {
            if *self.should_fail.lock().await {
                return Err(GridError::Exchange("Mock failure".into()));
            }
            Ok(())
        }

        async fn step_price(&self) -> f64 {
            let mut price = self.price.lock().await;
            if self.volatility > 0.0 {
                let change = self.rng.lock().await.gen_range(-self.volatility..=self.volatility);
                *price *= 1.0 + change;
            }
            *price
        }

        async fn place(&self, side: OrderSide, amount: f64, price: f64) -> GridResult<OrderHandle> {
            self.check_failure().await?;

            let reserved = {
                let mut balance = self.balance.lock().await;
                match side {
                    OrderSide::Buy => {
                        let cost = amount * price;
                        if balance.quote < cost {
                            return Err(GridError::InsufficientBalance {
                                required: cost,
                                available: balance.quote,
                            });
                        }
                        balance.quote -= cost;
                        cost
                    }
                    OrderSide::Sell => {
                        if balance.base < amount {
                            return Err(GridError::InsufficientBalance {
                                required: amount,
                                available: balance.base,
                            });
                        }
                        balance.base -= amount;
                        amount
                    }
                }
            };

            let seq = self.next_id.fetch_add(1, Ordering::SeqCst);
            let id = format!("{}-{}", self.session, seq);
            let order = ExchangeOrder {
                id: id.clone(),
                side,
                price,
                amount,
                status: ExchangeOrderStatus::Open,
                timestamp: chrono::Utc::now().timestamp_millis(),
            };
            self.orders.lock().await.push(MockOrder { order, reserved });

            info!("Mock {} order {}: {} @ {}", side.as_str(), id, amount, price);

            Ok(OrderHandle {
                id,
                status: ExchangeOrderStatus::Open,
            })
        }
    }

    #[async_trait]
    impl ExchangeGateway for MockExchange {
        async fn fetch_ticker(&self, _symbol: &str) -> GridResult<Ticker> {
            self.check_failure().await?;
            Ok(Ticker {
                last: self.step_price().await,
            })
        }

        async fn fetch_order_book(&self, _symbol: &str, depth: usize) -> GridResult<OrderBook> {
            self.check_failure().await?;
            let price = self.step_price().await;
            let spread = price * BOOK_SPREAD;
            Ok(OrderBook {
                bids: vec![[price - spread, 1.0]; depth],
                asks: vec![[price + spread, 1.0]; depth],
            })
        }

        async fn create_limit_buy_order(&self, _symbol: &str, amount: f64, price: f64) -> GridResult<OrderHandle> {
            self.place(OrderSide::Buy, amount, price).await
        }

        async fn create_limit_sell_order(&self, _symbol: &str, amount: f64, price: f64) -> GridResult<OrderHandle> {
            self.place(OrderSide::Sell, amount, price).await
        }

        async fn cancel_order(&self, order_id: &str, _symbol: &str) -> GridResult<()> {
            self.check_failure().await?;

            let mut orders = self.orders.lock().await;
            let entry = orders
                .iter_mut()
                .find(|o| o.order.id == order_id)
                .ok_or_else(|| GridError::OrderNotFound(order_id.to_string()))?;

            if entry.order.status == ExchangeOrderStatus::Open {
                let mut balance = self.balance.lock().await;
                match entry.order.side {
                    OrderSide::Buy => balance.quote += entry.reserved,
                    OrderSide::Sell => balance.base += entry.reserved,
                }
                entry.order.status = ExchangeOrderStatus::Closed;
            }
            self.cancelled_ids.lock().await.push(order_id.to_string());
            Ok(())
        }

        async fn fetch_order(&self, order_id: &str, _symbol: &str) -> GridResult<ExchangeOrder> {
            self.check_failure().await?;
            let market = *self.price.lock().await;

            let mut orders = self.orders.lock().await;
            let entry = orders
                .iter_mut()
                .find(|o| o.order.id == order_id)
                .ok_or_else(|| GridError::OrderNotFound(order_id.to_string()))?;

            if entry.order.status == ExchangeOrderStatus::Open {
                let crossed = match entry.order.side {
                    OrderSide::Buy => entry.order.price >= market,
                    OrderSide::Sell => entry.order.price <= market,
                };
                if crossed {
                    let mut balance = self.balance.lock().await;
                    match entry.order.side {
                        OrderSide::Buy => balance.base += entry.order.amount,
                        OrderSide::Sell => balance.quote += entry.order.amount * entry.order.price,
                    }
                    entry.order.status = ExchangeOrderStatus::Filled;
                    entry.order.timestamp = chrono::Utc::now().timestamp_millis();
                }
            }

            Ok(entry.order.clone())
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[tokio::test]
        async fn test_buy_reserves_quote_and_fills_on_cross() {
            let exchange = MockExchange::new(100.0);
            let handle = exchange.create_limit_buy_order("BTCUSDT", 1.0, 95.0).await.unwrap();
            assert_eq!(handle.status, ExchangeOrderStatus::Open);
            assert!((exchange.balance().await.quote - 9905.0).abs() < 1e-9);

            let order = exchange.fetch_order(&handle.id, "BTCUSDT").await.unwrap();
            assert_eq!(order.status, ExchangeOrderStatus::Open);

            exchange.set_price(94.0).await;
            let order = exchange.fetch_order(&handle.id, "BTCUSDT").await.unwrap();
            assert_eq!(order.status, ExchangeOrderStatus::Filled);
            assert!((exchange.balance().await.base - 1.0).abs() < 1e-12);
        }

        #[tokio::test]
        async fn test_sell_requires_base_balance() {
            let exchange = MockExchange::new(100.0);
            let err = exchange.create_limit_sell_order("BTCUSDT", 1.0, 105.0).await.unwrap_err();
            assert!(matches!(err, GridError::InsufficientBalance { .. }));

            let exchange = MockExchange::with_balance(100.0, 0.0, 2.0);
            let handle = exchange.create_limit_sell_order("BTCUSDT", 1.0, 105.0).await.unwrap();
            exchange.set_price(106.0).await;
            let order = exchange.fetch_order(&handle.id, "BTCUSDT").await.unwrap();
            assert_eq!(order.status, ExchangeOrderStatus::Filled);
            assert!((exchange.balance().await.quote - 105.0).abs() < 1e-9);
        }

        #[tokio::test]
        async fn test_cancel_refunds_and_closes() {
            let exchange = MockExchange::new(100.0);
            let handle = exchange.create_limit_buy_order("BTCUSDT", 2.0, 90.0).await.unwrap();
            exchange.cancel_order(&handle.id, "BTCUSDT").await.unwrap();

            assert!((exchange.balance().await.quote - 10_000.0).abs() < 1e-9);
            let order = exchange.fetch_order(&handle.id, "BTCUSDT").await.unwrap();
            assert_eq!(order.status, ExchangeOrderStatus::Closed);
            assert!(exchange.open_orders().await.is_empty());

            let err = exchange.cancel_order("missing", "BTCUSDT").await.unwrap_err();
            assert!(matches!(err, GridError::OrderNotFound(_)));
        }

        #[tokio::test]
        async fn test_order_ids_unique_across_instances() {
            let first = MockExchange::new(100.0);
            let second = MockExchange::new(100.0);

            let a1 = first.create_limit_buy_order("BTCUSDT", 1.0, 90.0).await.unwrap();
            let a2 = first.create_limit_buy_order("BTCUSDT", 1.0, 89.0).await.unwrap();
            let b1 = second.create_limit_buy_order("BTCUSDT", 1.0, 90.0).await.unwrap();

            assert_ne!(a1.id, a2.id);
            assert_ne!(a1.id, b1.id);
            let err = second.fetch_order(&a1.id, "BTCUSDT").await.unwrap_err();
            assert!(matches!(err, GridError::OrderNotFound(_)));
        }

        #[tokio::test]
        async fn test_order_book_depth_and_spread() {
            let exchange = MockExchange::new(10_000.0);
            let book = exchange.fetch_order_book("BTCUSDT", 5).await.unwrap();
            assert_eq!(book.bids.len(), 5);
            assert_eq!(book.asks.len(), 5);
            assert!((book.best_bid().unwrap() - 9990.0).abs() < 1e-9);
            assert!((book.best_ask().unwrap() - 10_010.0).abs() < 1e-9);
        }

        #[tokio::test]
        async fn test_seeded_random_walk_is_reproducible() {
            let a = MockExchange::new(100.0).with_volatility(0.005, Some(42));
            let b = MockExchange::new(100.0).with_volatility(0.005, Some(42));
            for _ in 0..10 {
                let pa = a.fetch_ticker("BTCUSDT").await.unwrap().last;
                let pb = b.fetch_ticker("BTCUSDT").await.unwrap().last;
                assert_eq!(pa, pb);
                assert!(pa > 90.0 && pa < 110.0);
            }
        }

        #[tokio::test]
        async fn test_failure_injection() {
            let exchange = MockExchange::new(100.0);
            exchange.set_should_fail(true).await;
            let err = exchange.fetch_ticker("BTCUSDT").await.unwrap_err();
            assert!(err.is_retryable());
        }
    }
}
