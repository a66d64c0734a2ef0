// =============================================================================
// Exchange collaborators: the seams the trade engine depends on
// =============================================================================
//
// The engine only needs a price and the four basic order shapes. The HTTP
// surface additionally lists tickers and balances for diagnostics.
// `CoinDcxClient` provides all of these against the real exchange;
// `PaperExchange` simulates fills for demo mode.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::coindcx::Ticker;
use crate::types::BalanceInfo;

/// Confirmation that the exchange accepted an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderAck {
    pub order_id: String,
}

#[async_trait]
pub trait PriceOracle: Send + Sync {
    /// Last traded price for `symbol`. Errors mean "unavailable right now".
    async fn get_price(&self, symbol: &str) -> Result<f64>;
}

#[async_trait]
pub trait OrderPlacement: Send + Sync {
    /// Buy spending `quote_amount` of the quote currency.
    async fn place_market_buy(&self, market: &str, quote_amount: f64) -> Result<OrderAck>;
    /// Sell `quantity` of the base currency.
    async fn place_market_sell(&self, market: &str, quantity: f64) -> Result<OrderAck>;
    async fn place_limit_buy(&self, market: &str, price: f64, quantity: f64) -> Result<OrderAck>;
    async fn place_limit_sell(&self, market: &str, price: f64, quantity: f64) -> Result<OrderAck>;
}

#[async_trait]
pub trait BalanceQuery: Send + Sync {
    async fn get_balances(&self) -> Result<Vec<BalanceInfo>>;
}

#[async_trait]
pub trait TickerFeed: Send + Sync {
    /// Last prices of every USDT-quoted market.
    async fn usdt_tickers(&self) -> Result<Vec<Ticker>>;
}

/// An order resting on the book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenOrder {
    pub id: String,
    pub market: String,
    pub side: String,
    pub order_type: String,
    pub price_per_unit: f64,
    pub total_quantity: f64,
    pub remaining_quantity: f64,
    pub status: String,
}

/// Manual housekeeping of resting orders. The trade engine never calls
/// these; they back the operator endpoints.
#[async_trait]
pub trait OrderAdmin: Send + Sync {
    /// Open orders, optionally restricted to one market.
    async fn active_orders(&self, market: Option<&str>) -> Result<Vec<OpenOrder>>;
    async fn cancel_order(&self, order_id: &str) -> Result<()>;
    async fn cancel_all_orders(&self, market: &str) -> Result<()>;
}

// =============================================================================
// Paper exchange (demo mode)
// =============================================================================

const PAPER_QUOTE_CURRENCY: &str = "USDT";
const PAPER_STARTING_BALANCE: f64 = 1000.0;

/// Fills every order instantly at the live (or limit) price and keeps a small
/// in-memory ledger so balances move like they would on the exchange.
pub struct PaperExchange {
    prices: Arc<dyn PriceOracle>,
    ledger: Mutex<HashMap<String, f64>>,
}

impl PaperExchange {
    pub fn new(prices: Arc<dyn PriceOracle>) -> Self {
        let mut ledger = HashMap::new();
        ledger.insert(PAPER_QUOTE_CURRENCY.to_string(), PAPER_STARTING_BALANCE);
        Self {
            prices,
            ledger: Mutex::new(ledger),
        }
    }

    fn fill(&self, market: &str, side: &str, price: f64, quantity: f64) -> OrderAck {
        {
            let mut ledger = self.ledger.lock();
            let sign = if side == "buy" { 1.0 } else { -1.0 };
            *ledger.entry(market.to_string()).or_insert(0.0) += sign * quantity;
            *ledger.entry(PAPER_QUOTE_CURRENCY.to_string()).or_insert(0.0) -=
                sign * quantity * price;
        }

        let order_id = format!("paper-{}", Uuid::new_v4());
        info!(market, side, price, quantity, order_id = %order_id, "paper fill");
        OrderAck { order_id }
    }

    async fn market_price(&self, market: &str) -> Result<f64> {
        self.prices
            .get_price(market)
            .await
            .with_context(|| format!("paper fill needs a price for {market}"))
    }
}

#[async_trait]
impl OrderPlacement for PaperExchange {
    async fn place_market_buy(&self, market: &str, quote_amount: f64) -> Result<OrderAck> {
        let price = self.market_price(market).await?;
        Ok(self.fill(market, "buy", price, quote_amount / price))
    }

    async fn place_market_sell(&self, market: &str, quantity: f64) -> Result<OrderAck> {
        let price = self.market_price(market).await?;
        Ok(self.fill(market, "sell", price, quantity))
    }

    async fn place_limit_buy(&self, market: &str, price: f64, quantity: f64) -> Result<OrderAck> {
        Ok(self.fill(market, "buy", price, quantity))
    }

    async fn place_limit_sell(&self, market: &str, price: f64, quantity: f64) -> Result<OrderAck> {
        Ok(self.fill(market, "sell", price, quantity))
    }
}

#[async_trait]
impl BalanceQuery for PaperExchange {
    async fn get_balances(&self) -> Result<Vec<BalanceInfo>> {
        let ledger = self.ledger.lock();
        let mut balances: Vec<BalanceInfo> = ledger
            .iter()
            .map(|(currency, balance)| BalanceInfo {
                currency: currency.clone(),
                balance: *balance,
                locked_balance: 0.0,
            })
            .collect();
        balances.sort_by(|a, b| a.currency.cmp(&b.currency));
        Ok(balances)
    }
}

/// Paper fills are instant, so nothing ever rests on the book.
#[async_trait]
impl OrderAdmin for PaperExchange {
    async fn active_orders(&self, _market: Option<&str>) -> Result<Vec<OpenOrder>> {
        Ok(Vec::new())
    }

    async fn cancel_order(&self, order_id: &str) -> Result<()> {
        anyhow::bail!("no open paper order {order_id}")
    }

    async fn cancel_all_orders(&self, market: &str) -> Result<()> {
        info!(market, "paper cancel-all: nothing open");
        Ok(())
    }
}

// =============================================================================
// Test double
// =============================================================================

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::collections::HashSet;
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq)]
    pub enum OrderKind {
        MarketBuy,
        MarketSell,
        LimitBuy,
        LimitSell,
    }

    #[derive(Debug, Clone, PartialEq)]
    pub struct PlacedOrder {
        pub kind: OrderKind,
        pub market: String,
        /// Quote amount for market buys, base quantity otherwise.
        pub amount: f64,
        pub price: Option<f64>,
    }

    /// Scripted exchange: settable prices, per-market rejections, optional
    /// order latency, and a record of every accepted order.
    #[derive(Default)]
    pub struct MockExchange {
        prices: Mutex<HashMap<String, f64>>,
        rejected_markets: Mutex<HashSet<String>>,
        reject_all: Mutex<bool>,
        order_delay: Mutex<Option<Duration>>,
        orders: Mutex<Vec<PlacedOrder>>,
        attempts: Mutex<Vec<String>>,
        resting: Mutex<Vec<OpenOrder>>,
    }

    impl MockExchange {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set_price(&self, symbol: &str, price: f64) {
            self.prices.lock().insert(symbol.to_string(), price);
        }

        pub fn clear_price(&self, symbol: &str) {
            self.prices.lock().remove(symbol);
        }

        pub fn reject_market(&self, market: &str) {
            self.rejected_markets.lock().insert(market.to_string());
        }

        pub fn set_reject_all(&self, reject: bool) {
            *self.reject_all.lock() = reject;
        }

        pub fn set_order_delay(&self, delay: Option<Duration>) {
            *self.order_delay.lock() = delay;
        }

        pub fn orders(&self) -> Vec<PlacedOrder> {
            self.orders.lock().clone()
        }

        /// Every market an order was attempted on, accepted or not.
        pub fn attempts(&self) -> Vec<String> {
            self.attempts.lock().clone()
        }

        /// Put a limit order on the simulated book.
        pub fn rest_order(&self, id: &str, market: &str, price: f64, quantity: f64) {
            self.resting.lock().push(OpenOrder {
                id: id.to_string(),
                market: market.to_string(),
                side: "sell".to_string(),
                order_type: "limit_order".to_string(),
                price_per_unit: price,
                total_quantity: quantity,
                remaining_quantity: quantity,
                status: "open".to_string(),
            });
        }

        pub fn resting_orders(&self) -> Vec<OpenOrder> {
            self.resting.lock().clone()
        }

        async fn record(&self, order: PlacedOrder) -> Result<OrderAck> {
            self.attempts.lock().push(order.market.clone());
            let delay = *self.order_delay.lock();
            if let Some(d) = delay {
                tokio::time::sleep(d).await;
            }
            if *self.reject_all.lock() || self.rejected_markets.lock().contains(&order.market) {
                anyhow::bail!("market {} rejected the order", order.market);
            }
            let mut orders = self.orders.lock();
            orders.push(order);
            Ok(OrderAck {
                order_id: format!("mock-{}", orders.len()),
            })
        }
    }

    #[async_trait]
    impl PriceOracle for MockExchange {
        async fn get_price(&self, symbol: &str) -> Result<f64> {
            self.prices
                .lock()
                .get(symbol)
                .copied()
                .with_context(|| format!("no price for {symbol}"))
        }
    }

    #[async_trait]
    impl TickerFeed for MockExchange {
        async fn usdt_tickers(&self) -> Result<Vec<Ticker>> {
            let mut tickers: Vec<Ticker> = self
                .prices
                .lock()
                .iter()
                .filter(|(market, _)| market.contains("USDT"))
                .map(|(market, price)| Ticker {
                    market: market.clone(),
                    last_price: *price,
                })
                .collect();
            tickers.sort_by(|a, b| a.market.cmp(&b.market));
            Ok(tickers)
        }
    }

    #[async_trait]
    impl BalanceQuery for MockExchange {
        async fn get_balances(&self) -> Result<Vec<BalanceInfo>> {
            if *self.reject_all.lock() {
                anyhow::bail!("authentication failed");
            }
            Ok(vec![BalanceInfo {
                currency: "USDT".to_string(),
                balance: 250.0,
                locked_balance: 0.0,
            }])
        }
    }

    #[async_trait]
    impl OrderAdmin for MockExchange {
        async fn active_orders(&self, market: Option<&str>) -> Result<Vec<OpenOrder>> {
            if *self.reject_all.lock() {
                anyhow::bail!("authentication failed");
            }
            Ok(self
                .resting
                .lock()
                .iter()
                .filter(|o| market.map_or(true, |m| o.market == m))
                .cloned()
                .collect())
        }

        async fn cancel_order(&self, order_id: &str) -> Result<()> {
            let mut resting = self.resting.lock();
            let before = resting.len();
            resting.retain(|o| o.id != order_id);
            if resting.len() == before {
                anyhow::bail!("order {order_id} not found");
            }
            Ok(())
        }

        async fn cancel_all_orders(&self, market: &str) -> Result<()> {
            if *self.reject_all.lock() {
                anyhow::bail!("authentication failed");
            }
            self.resting.lock().retain(|o| o.market != market);
            Ok(())
        }
    }

    #[async_trait]
    impl OrderPlacement for MockExchange {
        async fn place_market_buy(&self, market: &str, quote_amount: f64) -> Result<OrderAck> {
            self.record(PlacedOrder {
                kind: OrderKind::MarketBuy,
                market: market.to_string(),
                amount: quote_amount,
                price: None,
            })
            .await
        }

        async fn place_market_sell(&self, market: &str, quantity: f64) -> Result<OrderAck> {
            self.record(PlacedOrder {
                kind: OrderKind::MarketSell,
                market: market.to_string(),
                amount: quantity,
                price: None,
            })
            .await
        }

        async fn place_limit_buy(&self, market: &str, price: f64, quantity: f64) -> Result<OrderAck> {
            self.record(PlacedOrder {
                kind: OrderKind::LimitBuy,
                market: market.to_string(),
                amount: quantity,
                price: Some(price),
            })
            .await
        }

        async fn place_limit_sell(&self, market: &str, price: f64, quantity: f64) -> Result<OrderAck> {
            self.record(PlacedOrder {
                kind: OrderKind::LimitSell,
                market: market.to_string(),
                amount: quantity,
                price: Some(price),
            })
            .await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::MockExchange;
    use super::*;

    fn balance_of(balances: &[BalanceInfo], currency: &str) -> f64 {
        balances
            .iter()
            .find(|b| b.currency == currency)
            .map(|b| b.balance)
            .unwrap_or(0.0)
    }

    #[tokio::test]
    async fn paper_market_round_trip_moves_ledger() {
        let prices = Arc::new(MockExchange::new());
        prices.set_price("BTCUSDT", 50_000.0);
        let paper = PaperExchange::new(prices.clone());

        let ack = paper.place_market_buy("BTCUSDT", 100.0).await.unwrap();
        assert!(ack.order_id.starts_with("paper-"));

        let balances = paper.get_balances().await.unwrap();
        assert!((balance_of(&balances, "USDT") - 900.0).abs() < 1e-9);
        assert!((balance_of(&balances, "BTCUSDT") - 0.002).abs() < 1e-12);

        prices.set_price("BTCUSDT", 55_000.0);
        paper.place_market_sell("BTCUSDT", 0.002).await.unwrap();
        let balances = paper.get_balances().await.unwrap();
        assert!((balance_of(&balances, "USDT") - 1010.0).abs() < 1e-9);
        assert!(balance_of(&balances, "BTCUSDT").abs() < 1e-12);
    }

    #[tokio::test]
    async fn paper_limit_fills_at_limit_price() {
        let prices = Arc::new(MockExchange::new());
        let paper = PaperExchange::new(prices);
        paper.place_limit_sell("ETHUSDT", 3_000.0, 0.5).await.unwrap();
        let balances = paper.get_balances().await.unwrap();
        assert!((balance_of(&balances, "USDT") - 2_500.0).abs() < 1e-9);
        assert!((balance_of(&balances, "ETHUSDT") + 0.5).abs() < 1e-12);
    }

    #[tokio::test]
    async fn paper_market_order_needs_price() {
        let paper = PaperExchange::new(Arc::new(MockExchange::new()));
        assert!(paper.place_market_buy("NOPEUSDT", 10.0).await.is_err());
    }

    #[tokio::test]
    async fn paper_book_is_always_empty() {
        let paper = PaperExchange::new(Arc::new(MockExchange::new()));
        paper.place_limit_buy("BTCUSDT", 40_000.0, 0.01).await.unwrap();
        assert!(paper.active_orders(None).await.unwrap().is_empty());
        assert!(paper.cancel_order("paper-1").await.is_err());
        assert!(paper.cancel_all_orders("BTCUSDT").await.is_ok());
    }
}
