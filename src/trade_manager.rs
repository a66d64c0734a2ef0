// =============================================================================
// Trade Manager: opens, stores and closes trailing-stop trades
// =============================================================================
//
// Owns the in-memory trade table (one coarse lock) and the exchange seams.
// Order placement of every kind goes through a single async "order gate" so a
// manual close, a TP/SL exit and a partial booking can never interleave.
//
// The trailing monitor (see `monitor.rs`) is started lazily by the first
// trade and works against the same table through the crate-visible helpers
// at the bottom of this file.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::clock::{Clock, TradeIdGenerator};
use crate::coindcx::canonical_symbol_variants;
use crate::error::TradeError;
use crate::events::{BotEvent, EventSink};
use crate::exchange::{OrderAck, OrderPlacement, PriceOracle};
use crate::ladder::{build_levels, LadderInputs, LadderRung};
use crate::monitor::run_trailing_monitor;
use crate::runtime_config::RuntimeConfig;
use crate::trade::{ExitReason, LogEntry, Trade, TradePlan, DUST_QUANTITY};
use crate::types::{EntryType, LogLevel, Side};

fn default_leverage() -> f64 {
    1.0
}

/// Parameters of `POST /bot/start`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartTradeRequest {
    pub coin: String,
    pub trade_type: Side,
    #[serde(default)]
    pub entry_type: EntryType,
    /// Required for limit entries, ignored for market entries.
    #[serde(default)]
    pub entry_price: Option<f64>,
    pub capital: f64,
    pub stop_loss: f64,
    /// Absent or non-positive means "derive at 2R".
    #[serde(default)]
    pub take_profit: Option<f64>,
    #[serde(default = "default_leverage")]
    pub leverage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CloseOutcome {
    pub trade_id: String,
    pub exit_price: f64,
    pub pnl: f64,
}

/// Manager knobs taken from `RuntimeConfig`.
#[derive(Debug, Clone)]
pub struct ManagerSettings {
    pub ladder: Vec<LadderRung>,
    pub poll_interval: Duration,
    pub order_timeout: Duration,
    pub price_timeout: Duration,
}

impl ManagerSettings {
    pub fn from_config(cfg: &RuntimeConfig) -> Self {
        Self {
            ladder: cfg.ladder.clone(),
            poll_interval: cfg.poll_interval(),
            order_timeout: cfg.order_timeout(),
            price_timeout: cfg.price_timeout(),
        }
    }
}

/// One order shape, independent of which market spelling it is sent to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum OrderSpec {
    MarketBuy { quote_amount: f64 },
    MarketSell { quantity: f64 },
    LimitBuy { price: f64, quantity: f64 },
    LimitSell { price: f64, quantity: f64 },
}

impl OrderSpec {
    fn opening(plan: &TradePlan) -> Self {
        match (plan.side, plan.entry_type) {
            (Side::Long, EntryType::Market) => Self::MarketBuy {
                quote_amount: plan.capital,
            },
            (Side::Long, EntryType::Limit) => Self::LimitBuy {
                price: plan.entry_price,
                quantity: plan.quantity,
            },
            (Side::Short, EntryType::Market) => Self::MarketSell {
                quantity: plan.quantity,
            },
            (Side::Short, EntryType::Limit) => Self::LimitSell {
                price: plan.entry_price,
                quantity: plan.quantity,
            },
        }
    }

    /// Reduce a position by `quantity`. Shorts buy back the quote equivalent
    /// at `reference_price`.
    pub(crate) fn closing(side: Side, quantity: f64, reference_price: f64) -> Self {
        match side {
            Side::Long => Self::MarketSell { quantity },
            Side::Short => Self::MarketBuy {
                quote_amount: quantity * reference_price,
            },
        }
    }

    async fn send(&self, orders: &dyn OrderPlacement, market: &str) -> Result<OrderAck> {
        match *self {
            Self::MarketBuy { quote_amount } => orders.place_market_buy(market, quote_amount).await,
            Self::MarketSell { quantity } => orders.place_market_sell(market, quantity).await,
            Self::LimitBuy { price, quantity } => {
                orders.place_limit_buy(market, price, quantity).await
            }
            Self::LimitSell { price, quantity } => {
                orders.place_limit_sell(market, price, quantity).await
            }
        }
    }
}

pub struct TradeManager {
    trades: Mutex<HashMap<String, Trade>>,
    prices: Arc<dyn PriceOracle>,
    orders: Arc<dyn OrderPlacement>,
    sink: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
    ids: TradeIdGenerator,
    settings: ManagerSettings,
    /// Held for the whole of any order placement. Never taken while the
    /// trade-table lock is held.
    order_gate: tokio::sync::Mutex<()>,
    /// Stop signal of the running monitor, if any.
    monitor: Mutex<Option<watch::Sender<bool>>>,
}

impl TradeManager {
    pub fn new(
        settings: ManagerSettings,
        prices: Arc<dyn PriceOracle>,
        orders: Arc<dyn OrderPlacement>,
        sink: Arc<dyn EventSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            trades: Mutex::new(HashMap::new()),
            prices,
            orders,
            sink,
            clock,
            ids: TradeIdGenerator::new(),
            settings,
            order_gate: tokio::sync::Mutex::new(()),
            monitor: Mutex::new(None),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        self.settings.poll_interval
    }

    pub fn ladder(&self) -> &[LadderRung] {
        &self.settings.ladder
    }

    // -------------------------------------------------------------------------
    // Opening
    // -------------------------------------------------------------------------

    pub async fn start_trade(self: &Arc<Self>, req: StartTradeRequest) -> Result<Trade, TradeError> {
        let symbol = req.coin.trim().to_uppercase();
        if symbol.is_empty() {
            return Err(TradeError::InvalidInput("coin must not be empty".to_string()));
        }

        let trade_id = self.ids.next_id(self.clock.now());
        let mut pending: Vec<LogEntry> = Vec::new();
        let mut note = |msg: String, level: LogLevel| pending.push(LogEntry::new(self.clock.now(), msg, level));

        note(
            format!("🚀 Starting {} on {} with ${}", req.trade_type, symbol, req.capital),
            LogLevel::Info,
        );

        let current_price = self
            .fetch_price(&symbol)
            .await
            .ok_or_else(|| TradeError::PriceUnavailable(symbol.clone()))?;
        note(format!("📊 Current price: ${current_price}"), LogLevel::Info);

        let entry_price = match req.entry_type {
            EntryType::Market => current_price,
            EntryType::Limit => req.entry_price.ok_or_else(|| {
                TradeError::InvalidPrice("limit entry requires entry_price".to_string())
            })?,
        };

        let plan = TradePlan::compute(
            req.trade_type,
            req.entry_type,
            entry_price,
            req.capital,
            req.stop_loss,
            req.take_profit,
            req.leverage,
        )?;

        note(format!("📦 Quantity calculated: {:.6}", plan.quantity), LogLevel::Info);
        note(
            format!("⚠️ Risk: ${:.2} ({:.2}%)", plan.risk_amount, plan.risk_percent),
            LogLevel::Info,
        );
        if plan.auto_take_profit {
            note(format!("🎯 Auto TP set at 2R: ${:.2}", plan.take_profit), LogLevel::Info);
        }
        note(format!("📝 Placing {} order...", plan.entry_type), LogLevel::Info);

        let (ack, market) = {
            let _gate = self.order_gate.lock().await;
            self.place_with_variants(&symbol, OrderSpec::opening(&plan)).await
        }
        .map_err(|e| {
            error!(trade_id = %trade_id, symbol = %symbol, error = %e, "opening order failed");
            TradeError::OrderRejected(format!("{e:#}"))
        })?;
        note(format!("✅ Order placed! ID: {}", ack.order_id), LogLevel::Success);

        let levels = build_levels(
            &LadderInputs {
                entry: plan.entry_price,
                stop_loss: plan.stop_loss,
                risk_per_unit: plan.risk_per_unit,
                quantity: plan.quantity,
                leverage: plan.leverage,
                side: plan.side,
            },
            &self.settings.ladder,
        );

        let mut trade = Trade::new(
            trade_id.clone(),
            symbol.clone(),
            &plan,
            levels,
            ack.order_id,
            self.clock.now(),
        );
        for entry in &pending {
            trade.push_log(entry.clone());
        }

        self.trades.lock().insert(trade_id.clone(), trade.clone());

        info!(
            trade_id = %trade_id,
            symbol = %symbol,
            market = %market,
            side = %plan.side,
            entry = plan.entry_price,
            quantity = plan.quantity,
            stop_loss = plan.stop_loss,
            take_profit = plan.take_profit,
            "trade opened"
        );

        self.ensure_monitor();

        self.sink.publish(BotEvent::TradeStarted(Box::new(trade.clone())));
        for log in pending {
            self.sink.publish(BotEvent::Log {
                trade_id: trade_id.clone(),
                log,
            });
        }

        Ok(trade)
    }

    // -------------------------------------------------------------------------
    // Closing
    // -------------------------------------------------------------------------

    /// Close the whole remaining position at market.
    ///
    /// Holds the order gate throughout, so a concurrent booking either
    /// finishes first (and the close sees the reduced quantity) or finds the
    /// trade closed and skips.
    pub async fn close_trade(&self, trade_id: &str) -> Result<CloseOutcome, TradeError> {
        let _gate = self.order_gate.lock().await;

        let (coin, side, quantity, entry_price) = {
            let mut trades = self.trades.lock();
            let trade = trades
                .get_mut(trade_id)
                .ok_or_else(|| TradeError::TradeNotFound(trade_id.to_string()))?;
            if trade.status.is_terminal() || trade.closing {
                return Err(TradeError::TradeAlreadyClosed(trade_id.to_string()));
            }
            trade.closing = true;
            (trade.coin.clone(), trade.trade_type, trade.quantity, trade.entry_price)
        };

        let exit_price = match self.fetch_price(&coin).await {
            Some(p) => p,
            None => {
                warn!(trade_id, coin = %coin, "no live price for close, using entry price");
                entry_price
            }
        };

        if quantity > DUST_QUANTITY {
            let spec = OrderSpec::closing(side, quantity, exit_price);
            if let Err(e) = self.place_with_variants(&coin, spec).await {
                if let Some(trade) = self.trades.lock().get_mut(trade_id) {
                    trade.closing = false;
                }
                let msg = format!("{e:#}");
                error!(trade_id, error = %msg, "closing order failed, trade stays active");
                self.log(trade_id, format!("❌ Close failed: {msg}"), LogLevel::Error);
                return Err(TradeError::OrderRejected(msg));
            }
        }

        let pnl = {
            let mut trades = self.trades.lock();
            let trade = trades
                .get_mut(trade_id)
                .ok_or_else(|| TradeError::TradeNotFound(trade_id.to_string()))?;
            let pnl = trade.reading(exit_price).pnl;
            trade.close(ExitReason::Manual, exit_price, self.clock.now())?;
            pnl
        };

        info!(trade_id, exit_price, pnl, "trade closed manually");
        self.log(trade_id, format!("✅ Closed at ${exit_price:.2}"), LogLevel::Success);
        self.sink.publish(BotEvent::TradeClosed {
            trade_id: trade_id.to_string(),
            reason: ExitReason::Manual.label().to_string(),
            exit_price,
            pnl,
        });

        Ok(CloseOutcome {
            trade_id: trade_id.to_string(),
            exit_price,
            pnl,
        })
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    pub fn get_trade_status(&self, trade_id: &str) -> Result<Trade, TradeError> {
        self.trades
            .lock()
            .get(trade_id)
            .cloned()
            .ok_or_else(|| TradeError::TradeNotFound(trade_id.to_string()))
    }

    /// Every trade ever opened in this process, oldest first.
    pub fn get_all_trades(&self) -> Vec<Trade> {
        let mut trades: Vec<Trade> = self.trades.lock().values().cloned().collect();
        trades.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        trades
    }

    // -------------------------------------------------------------------------
    // Monitor lifecycle
    // -------------------------------------------------------------------------

    /// Spawn the trailing monitor unless one is already running.
    pub fn ensure_monitor(self: &Arc<Self>) {
        let mut slot = self.monitor.lock();
        if slot.as_ref().is_some_and(|tx| !tx.is_closed()) {
            return;
        }
        let (tx, rx) = watch::channel(false);
        *slot = Some(tx);
        drop(slot);

        info!(interval = ?self.settings.poll_interval, "starting trailing monitor");
        tokio::spawn(run_trailing_monitor(Arc::clone(self), rx));
    }

    pub fn stop_monitor(&self) {
        if let Some(tx) = self.monitor.lock().take() {
            let _ = tx.send(true);
            info!("trailing monitor stop requested");
        }
    }

    pub fn monitor_running(&self) -> bool {
        self.monitor
            .lock()
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }

    // -------------------------------------------------------------------------
    // Crate-internal helpers (shared with the monitor)
    // -------------------------------------------------------------------------

    /// Live price, or `None` when the oracle fails, times out or returns a
    /// non-positive value.
    pub(crate) async fn fetch_price(&self, symbol: &str) -> Option<f64> {
        match tokio::time::timeout(self.settings.price_timeout, self.prices.get_price(symbol)).await
        {
            Ok(Ok(p)) if p.is_finite() && p > 0.0 => Some(p),
            Ok(Ok(p)) => {
                debug!(symbol, price = p, "ignoring non-positive price");
                None
            }
            Ok(Err(e)) => {
                debug!(symbol, error = %e, "price unavailable");
                None
            }
            Err(_) => {
                warn!(symbol, timeout = ?self.settings.price_timeout, "price lookup timed out");
                None
            }
        }
    }

    /// Send `spec` to each spelling of `symbol` in turn until one is
    /// accepted. Only an explicit rejection moves on to the next spelling;
    /// a timeout ends the attempt. Callers must hold the order gate.
    pub(crate) async fn place_with_variants(
        &self,
        symbol: &str,
        spec: OrderSpec,
    ) -> Result<(OrderAck, String)> {
        let variants = canonical_symbol_variants(symbol);
        let mut last_err = anyhow::anyhow!("no market spelling for {symbol}");

        for market in variants {
            let attempt = tokio::time::timeout(
                self.settings.order_timeout,
                spec.send(self.orders.as_ref(), &market),
            )
            .await;
            match attempt {
                Ok(Ok(ack)) => {
                    debug!(market = %market, order_id = %ack.order_id, ?spec, "order accepted");
                    return Ok((ack, market));
                }
                Ok(Err(e)) => {
                    warn!(market = %market, error = %e, "order attempt failed");
                    last_err = e;
                }
                Err(_) => {
                    // The exchange may still fill a stalled order, so another
                    // spelling must not be sent.
                    warn!(market = %market, timeout = ?self.settings.order_timeout, "order attempt timed out");
                    anyhow::bail!("order on {market} timed out, outcome unknown");
                }
            }
        }
        Err(last_err)
    }

    pub(crate) async fn lock_orders(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.order_gate.lock().await
    }

    /// Ids of trades the monitor should look at this tick.
    pub(crate) fn monitorable_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .trades
            .lock()
            .values()
            .filter(|t| t.is_monitorable())
            .map(|t| t.id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Run `f` against one trade under the table lock.
    pub(crate) fn with_trade<R>(&self, trade_id: &str, f: impl FnOnce(&mut Trade) -> R) -> Option<R> {
        self.trades.lock().get_mut(trade_id).map(f)
    }

    pub(crate) fn now(&self) -> chrono::DateTime<chrono::Utc> {
        self.clock.now()
    }

    pub(crate) fn publish(&self, event: BotEvent) {
        self.sink.publish(event);
    }

    /// Append a line to the trade's history and publish it.
    pub(crate) fn log(&self, trade_id: &str, message: impl Into<String>, level: LogLevel) {
        let entry = LogEntry::new(self.clock.now(), message, level);
        match level {
            LogLevel::Error => warn!(trade_id, message = %entry.message, "trade log"),
            _ => debug!(trade_id, message = %entry.message, "trade log"),
        }
        self.with_trade(trade_id, |t| t.push_log(entry.clone()));
        self.sink.publish(BotEvent::Log {
            trade_id: trade_id.to_string(),
            log: entry,
        });
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use crate::clock::testing::ManualClock;
    use crate::events::testing::RecordingSink;
    use crate::exchange::testing::MockExchange;
    use crate::ladder::default_ladder;
    use chrono::TimeZone;

    pub struct Harness {
        pub manager: Arc<TradeManager>,
        pub exchange: Arc<MockExchange>,
        pub sink: Arc<RecordingSink>,
        pub clock: Arc<ManualClock>,
    }

    impl Harness {
        /// Manager wired to mocks. The monitor interval is long enough that
        /// tests drive ticks by hand.
        pub fn new() -> Self {
            Self::with_poll_interval(Duration::from_secs(3600))
        }

        pub fn with_poll_interval(poll_interval: Duration) -> Self {
            let exchange = Arc::new(MockExchange::new());
            let sink = Arc::new(RecordingSink::default());
            let clock = Arc::new(ManualClock::new(
                chrono::Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
            ));
            let settings = ManagerSettings {
                ladder: default_ladder(),
                poll_interval,
                order_timeout: Duration::from_millis(200),
                price_timeout: Duration::from_millis(200),
            };
            let manager = Arc::new(TradeManager::new(
                settings,
                exchange.clone(),
                exchange.clone(),
                sink.clone(),
                clock.clone(),
            ));
            Self {
                manager,
                exchange,
                sink,
                clock,
            }
        }
    }

    pub fn request(coin: &str, side: Side, capital: f64, stop: f64, leverage: f64) -> StartTradeRequest {
        StartTradeRequest {
            coin: coin.to_string(),
            trade_type: side,
            entry_type: EntryType::Market,
            entry_price: None,
            capital,
            stop_loss: stop,
            take_profit: None,
            leverage,
        }
    }
}
