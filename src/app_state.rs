// =============================================================================
// Central Application State: trailing-stop bot
// =============================================================================
//
// Ties the trade manager, the exchange collaborators and the event feed
// together for the HTTP API and WebSocket handlers. Shared across all async
// tasks via `Arc<AppState>`.
// =============================================================================

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::warn;

use crate::events::BroadcastNotifier;
use crate::exchange::{BalanceQuery, OrderAdmin, TickerFeed};
use crate::runtime_config::RuntimeConfig;
use crate::trade_manager::TradeManager;
use crate::types::{AccountMode, TradeStatus};

/// Exchange-facing handles used outside the trade engine. Prices go
/// through the manager so lookups share its timeout.
#[derive(Clone)]
pub struct ExchangeHandles {
    pub tickers: Arc<dyn TickerFeed>,
    pub balances: Arc<dyn BalanceQuery>,
    /// Resting-order housekeeping for operators.
    pub orders: Arc<dyn OrderAdmin>,
}

pub struct AppState {
    // ── Configuration ───────────────────────────────────────────────────
    pub runtime_config: Arc<RwLock<RuntimeConfig>>,
    pub config_path: PathBuf,

    /// Expected bearer token. Empty means every authenticated call is
    /// rejected.
    pub admin_token: String,

    // ── Engine ──────────────────────────────────────────────────────────
    pub manager: Arc<TradeManager>,
    pub exchange: ExchangeHandles,
    pub notifier: BroadcastNotifier,

    // ── Operational Status ──────────────────────────────────────────────
    pub ws_clients: AtomicU64,

    /// Instant when the bot was started. Used for uptime calculations.
    pub start_time: std::time::Instant,
}

/// Body of `GET /health`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub status: &'static str,
    pub account_mode: AccountMode,
    pub active_trades: usize,
    pub total_trades: usize,
    pub monitor_running: bool,
    pub ws_clients: u64,
    pub uptime_secs: u64,
    pub server_time: i64,
}

impl AppState {
    pub fn new(
        config: RuntimeConfig,
        config_path: PathBuf,
        admin_token: String,
        manager: Arc<TradeManager>,
        exchange: ExchangeHandles,
        notifier: BroadcastNotifier,
    ) -> Self {
        if admin_token.is_empty() {
            warn!("TRAILSTOP_ADMIN_TOKEN is not set, all authenticated requests will be rejected");
        }
        Self {
            runtime_config: Arc::new(RwLock::new(config)),
            config_path,
            admin_token,
            manager,
            exchange,
            notifier,
            ws_clients: AtomicU64::new(0),
            start_time: std::time::Instant::now(),
        }
    }

    pub fn account_mode(&self) -> AccountMode {
        self.runtime_config.read().account_mode
    }

    pub fn ws_connected(&self) -> u64 {
        self.ws_clients.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn ws_disconnected(&self) -> u64 {
        self.ws_clients.fetch_sub(1, Ordering::Relaxed).saturating_sub(1)
    }

    pub fn health(&self) -> HealthSnapshot {
        let trades = self.manager.get_all_trades();
        HealthSnapshot {
            status: "ok",
            account_mode: self.account_mode(),
            active_trades: trades
                .iter()
                .filter(|t| t.status == TradeStatus::Active)
                .count(),
            total_trades: trades.len(),
            monitor_running: self.manager.monitor_running(),
            ws_clients: self.ws_clients.load(Ordering::Relaxed),
            uptime_secs: self.start_time.elapsed().as_secs(),
            server_time: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Persist the current runtime config (best-effort).
    pub fn save_config(&self) {
        let config = self.runtime_config.read().clone();
        if let Err(e) = config.save(&self.config_path) {
            warn!(error = %e, path = %self.config_path.display(), "failed to save runtime config");
        }
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use crate::trade_manager::testing::Harness;

    pub const TEST_TOKEN: &str = "test-token";

    /// AppState over a mock harness, with a fresh notifier.
    pub fn state_with(h: &Harness) -> Arc<AppState> {
        let exchange = ExchangeHandles {
            tickers: h.exchange.clone(),
            balances: h.exchange.clone(),
            orders: h.exchange.clone(),
        };
        Arc::new(AppState::new(
            RuntimeConfig::default(),
            std::env::temp_dir().join(format!("trailstop-{}.json", uuid::Uuid::new_v4())),
            TEST_TOKEN.to_string(),
            h.manager.clone(),
            exchange,
            BroadcastNotifier::new(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::testing::state_with;
    use crate::trade_manager::testing::{request, Harness};
    use crate::types::Side;

    #[tokio::test]
    async fn health_counts_trades() {
        let h = Harness::new();
        h.exchange.set_price("BTCUSDT", 50_000.0);
        let state = state_with(&h);

        let trade = h
            .manager
            .start_trade(request("BTCUSDT", Side::Long, 100.0, 49_000.0, 10.0))
            .await
            .unwrap();
        let health = state.health();
        assert_eq!(health.active_trades, 1);
        assert_eq!(health.total_trades, 1);
        assert!(health.monitor_running);

        h.manager.close_trade(&trade.id).await.unwrap();
        let health = state.health();
        assert_eq!(health.active_trades, 0);
        assert_eq!(health.total_trades, 1);
        h.manager.stop_monitor();
    }

    #[test]
    fn ws_client_counter() {
        let h = Harness::new();
        let state = state_with(&h);
        assert_eq!(state.ws_connected(), 1);
        assert_eq!(state.ws_connected(), 2);
        assert_eq!(state.ws_disconnected(), 1);
    }
}
