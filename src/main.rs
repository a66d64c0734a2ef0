// =============================================================================
// Trailstop: Main Entry Point
// =============================================================================
//
// The bot starts in Demo mode unless the config file or
// `TRAILSTOP_ACCOUNT_MODE` says otherwise. Demo fills orders against an
// in-memory paper ledger at live CoinDCX prices; Live sends signed orders.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod app_state;
mod clock;
mod coindcx;
mod error;
mod events;
mod exchange;
mod ladder;
mod monitor;
mod runtime_config;
mod trade;
mod trade_manager;
mod types;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::{AppState, ExchangeHandles};
use crate::clock::SystemClock;
use crate::coindcx::CoinDcxClient;
use crate::events::BroadcastNotifier;
use crate::exchange::{BalanceQuery, OrderAdmin, OrderPlacement, PaperExchange};
use crate::runtime_config::{RuntimeConfig, DEFAULT_CONFIG_PATH};
use crate::trade_manager::{ManagerSettings, TradeManager};
use crate::types::AccountMode;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        Trailstop: CoinDCX trailing stop bot              ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let config_path = PathBuf::from(
        std::env::var("TRAILSTOP_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string()),
    );
    let mut config = RuntimeConfig::load_or_default(&config_path);
    config.apply_env_overrides(|key| std::env::var(key).ok());
    config.validate().context("invalid runtime config")?;

    let admin_token = std::env::var("TRAILSTOP_ADMIN_TOKEN").unwrap_or_default();

    info!(
        mode = %config.account_mode,
        poll_secs = config.poll_interval_secs,
        rungs = config.ladder.len(),
        "configuration ready"
    );

    // ── 2. Exchange ──────────────────────────────────────────────────────
    let client = Arc::new(CoinDcxClient::new(
        std::env::var("COINDCX_API_KEY").unwrap_or_default(),
        std::env::var("COINDCX_API_SECRET").unwrap_or_default(),
    )?);

    let (orders, balances, order_admin): (
        Arc<dyn OrderPlacement>,
        Arc<dyn BalanceQuery>,
        Arc<dyn OrderAdmin>,
    ) = match config.account_mode {
        AccountMode::Demo => {
            let paper = Arc::new(PaperExchange::new(client.clone()));
            (
                paper.clone() as Arc<dyn OrderPlacement>,
                paper.clone() as Arc<dyn BalanceQuery>,
                paper as Arc<dyn OrderAdmin>,
            )
        }
        AccountMode::Live => {
            if !client.has_credentials() {
                warn!("Live mode without COINDCX_API_KEY / COINDCX_API_SECRET, orders will be rejected");
            }
            (
                client.clone() as Arc<dyn OrderPlacement>,
                client.clone() as Arc<dyn BalanceQuery>,
                client.clone() as Arc<dyn OrderAdmin>,
            )
        }
    };

    // ── 3. Trade engine ──────────────────────────────────────────────────
    let notifier = BroadcastNotifier::new();
    let manager = Arc::new(TradeManager::new(
        ManagerSettings::from_config(&config),
        client.clone(),
        orders,
        Arc::new(notifier.clone()),
        Arc::new(SystemClock),
    ));

    let exchange = ExchangeHandles {
        tickers: client.clone(),
        balances,
        orders: order_admin,
    };

    let bind_addr = config.bind_addr.clone();
    let state = Arc::new(AppState::new(
        config,
        config_path,
        admin_token,
        manager.clone(),
        exchange,
        notifier,
    ));

    // ── 4. API server ────────────────────────────────────────────────────
    let app = api::rest::router(state.clone());
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind API server on {bind_addr}"))?;
    info!(addr = %bind_addr, "API server listening. Press Ctrl+C to stop.");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for shutdown signal");
            }
            warn!("Shutdown signal received, stopping gracefully");
        })
        .await
        .context("API server failed")?;

    // ── 5. Graceful shutdown ─────────────────────────────────────────────
    manager.stop_monitor();
    state.save_config();

    info!("Trailstop shut down complete.");
    Ok(())
}
