// =============================================================================
// Trailing Monitor: periodic price check, exits and level ladder
// =============================================================================
//
// Runs as a background Tokio task, waking every `poll_interval` to:
//   1. Snapshot the ids of all monitorable trades.
//   2. Fetch a price per trade (skip the trade this tick if unavailable).
//   3. Publish a price update, then check take-profit before stop-loss.
//   4. Otherwise advance through any newly reached levels, trailing the stop
//      and booking partial profit.
//
// State changes happen under the trade-table lock; orders are sent afterwards
// through the manager's order gate. The task ends when the stop signal fires
// or its sender is dropped.
// =============================================================================

use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::error::TradeError;
use crate::events::BotEvent;
use crate::ladder::Level;
use crate::trade::{booking_quantity, ExitReason, LevelAdvance, PriceReading, DUST_QUANTITY};
use crate::trade_manager::{OrderSpec, TradeManager};
use crate::types::{LogLevel, Side};

pub async fn run_trailing_monitor(manager: Arc<TradeManager>, mut stop: watch::Receiver<bool>) {
    let period = manager.poll_interval();
    info!(interval = ?period, "Trailing monitor started");

    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => check_all_trades(&manager).await,
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
            }
        }
    }

    info!("Trailing monitor stopped");
}

/// One monitor tick over every monitorable trade. A failure on one trade is
/// logged and does not affect the others.
pub async fn check_all_trades(manager: &TradeManager) {
    let ids = manager.monitorable_ids();
    if ids.is_empty() {
        debug!("Trailing monitor: no active trades");
        return;
    }

    for id in ids {
        if let Err(e) = check_trade(manager, &id).await {
            warn!(trade_id = %id, error = %e, "trade check failed");
        }
    }
}

/// What a tick decided for one trade, computed under the table lock.
enum TickOutcome {
    /// Closed by hand, already terminal, or mid-close.
    Skip,
    Exit {
        reason: ExitReason,
        reading: PriceReading,
        current_sl: f64,
        take_profit: f64,
        side: Side,
        quantity: f64,
        coin: String,
    },
    Progress {
        reading: PriceReading,
        current_sl: f64,
        take_profit: f64,
        advances: Vec<LevelAdvance>,
    },
}

async fn check_trade(manager: &TradeManager, trade_id: &str) -> Result<(), TradeError> {
    let coin = manager
        .with_trade(trade_id, |t| t.is_monitorable().then(|| t.coin.clone()))
        .ok_or_else(|| TradeError::TradeNotFound(trade_id.to_string()))?;
    let Some(coin) = coin else {
        return Ok(());
    };

    let Some(price) = manager.fetch_price(&coin).await else {
        debug!(trade_id, coin = %coin, "no price this tick, skipping");
        return Ok(());
    };

    let now = manager.now();
    let outcome = manager
        .with_trade(trade_id, |t| {
            // Re-check: a manual close may have started while we fetched.
            if !t.is_monitorable() {
                return TickOutcome::Skip;
            }
            t.last_price = Some(price);
            let reading = t.reading(price);
            let current_sl = t.current_sl;
            let take_profit = t.take_profit;

            if let Some(reason) = t.exit_trigger(price) {
                // Terminal under the lock: nothing else can claim this trade.
                if t.close(reason, price, now).is_err() {
                    return TickOutcome::Skip;
                }
                return TickOutcome::Exit {
                    reason,
                    reading,
                    current_sl,
                    take_profit,
                    side: t.trade_type,
                    quantity: t.quantity,
                    coin: t.coin.clone(),
                };
            }

            TickOutcome::Progress {
                reading,
                current_sl,
                take_profit,
                advances: t.advance_levels(reading.current_r),
            }
        })
        .ok_or_else(|| TradeError::TradeNotFound(trade_id.to_string()))?;

    match outcome {
        TickOutcome::Skip => Ok(()),
        TickOutcome::Exit {
            reason,
            reading,
            current_sl,
            take_profit,
            side,
            quantity,
            coin,
        } => {
            publish_price_update(manager, trade_id, &reading, current_sl, take_profit);
            handle_exit(manager, trade_id, reason, &reading, side, quantity, &coin).await;
            Ok(())
        }
        TickOutcome::Progress {
            reading,
            current_sl,
            take_profit,
            advances,
        } => {
            publish_price_update(manager, trade_id, &reading, current_sl, take_profit);
            for advance in advances {
                // A booking may have waited on the gate behind a manual close.
                let still_open = manager
                    .with_trade(trade_id, |t| t.is_monitorable())
                    .unwrap_or(false);
                if !still_open {
                    debug!(trade_id, rr = advance.level.rr, "trade closed mid-tick, dropping remaining levels");
                    break;
                }
                handle_level_reached(manager, trade_id, advance).await;
            }
            Ok(())
        }
    }
}

fn publish_price_update(
    manager: &TradeManager,
    trade_id: &str,
    reading: &PriceReading,
    current_sl: f64,
    take_profit: f64,
) {
    manager.publish(BotEvent::PriceUpdate {
        trade_id: trade_id.to_string(),
        current_price: reading.price,
        current_rr: reading.current_r,
        pnl: reading.pnl,
        pnl_percent: reading.pnl_percent,
        current_sl,
        take_profit,
    });
}

// ── Exits ──────────────────────────────────────────────────────────────────

/// The trade is already terminal; announce it and flatten the position.
async fn handle_exit(
    manager: &TradeManager,
    trade_id: &str,
    reason: ExitReason,
    reading: &PriceReading,
    side: Side,
    quantity: f64,
    coin: &str,
) {
    let price = reading.price;
    info!(
        trade_id,
        coin,
        reason = %reason,
        exit_price = price,
        pnl = reading.pnl,
        "EXIT TRIGGERED, closing position"
    );

    match reason {
        ExitReason::TakeProfit => manager.log(
            trade_id,
            format!("🎉 TAKE PROFIT HIT at ${price:.2}! Profit: ${:.2}", reading.pnl),
            LogLevel::Success,
        ),
        _ => manager.log(
            trade_id,
            format!("⚠️ STOP LOSS HIT at ${price:.2}"),
            LogLevel::Error,
        ),
    }

    manager.publish(BotEvent::TradeClosed {
        trade_id: trade_id.to_string(),
        reason: reason.label().to_string(),
        exit_price: price,
        pnl: reading.pnl,
    });

    if quantity <= DUST_QUANTITY {
        return;
    }

    let result = {
        let _gate = manager.lock_orders().await;
        manager
            .place_with_variants(coin, OrderSpec::closing(side, quantity, price))
            .await
    };
    match result {
        Ok((ack, market)) => manager.log(
            trade_id,
            format!("✅ Position closed on {market} (order {})", ack.order_id),
            LogLevel::Success,
        ),
        Err(e) => {
            warn!(trade_id, error = %e, "exit order failed");
            manager.log(
                trade_id,
                format!("❌ Exit order failed: {e:#}"),
                LogLevel::Error,
            );
        }
    }
}

// ── Levels ─────────────────────────────────────────────────────────────────

async fn handle_level_reached(manager: &TradeManager, trade_id: &str, advance: LevelAdvance) {
    let LevelAdvance {
        index,
        level,
        stop_change,
    } = advance;

    match stop_change {
        Some((old_sl, new_sl)) => {
            info!(trade_id, index, rr = level.rr, old_sl, new_sl, "level reached, stop trailed");
            manager.log(
                trade_id,
                format!("🎯 {}R HIT! Trail SL: ${old_sl:.2} → ${new_sl:.2}", level.rr),
                LogLevel::Alert,
            );
            manager.publish(BotEvent::LevelReached {
                trade_id: trade_id.to_string(),
                action: level.action.clone(),
                level: level.clone(),
                old_sl,
                new_sl,
            });
        }
        None => {
            debug!(trade_id, index, rr = level.rr, "level reached, stop unchanged");
            manager.log(
                trade_id,
                format!("📍 {}R reached: {}", level.rr, level.action),
                LogLevel::Info,
            );
        }
    }

    if level.book_percent > 0.0 {
        book_profit(manager, trade_id, &level).await;
    }
}

/// Close a damped slice of the remaining position. Failure is logged and the
/// trade carries on with its quantity unchanged.
async fn book_profit(manager: &TradeManager, trade_id: &str, level: &Level) {
    let _gate = manager.lock_orders().await;

    // Re-read under the gate: a manual close may have finished meanwhile.
    let plan = manager
        .with_trade(trade_id, |t| {
            if !t.is_monitorable() {
                return None;
            }
            booking_quantity(t.quantity, level.book_percent)
                .map(|qty| (qty, t.trade_type, t.entry_price, t.coin.clone()))
        })
        .flatten();

    let Some((qty, side, entry_price, coin)) = plan else {
        debug!(trade_id, rr = level.rr, "nothing to book");
        return;
    };

    manager.log(
        trade_id,
        format!("💰 Booking {}% profit...", level.book_percent),
        LogLevel::Success,
    );

    match manager
        .place_with_variants(&coin, OrderSpec::closing(side, qty, entry_price))
        .await
    {
        Ok((ack, _market)) => {
            let remaining = manager
                .with_trade(trade_id, |t| t.reduce_quantity(qty))
                .unwrap_or(0.0);
            info!(trade_id, booked = qty, remaining, order_id = %ack.order_id, "profit booked");
            manager.log(
                trade_id,
                format!("✅ Profit booked! Remaining: {remaining:.6}"),
                LogLevel::Success,
            );
        }
        Err(e) => {
            let err = TradeError::BookingFailed(format!("{e:#}"));
            warn!(trade_id, error = %err, "booking failed, trade continues");
            manager.log(trade_id, format!("⚠️ Booking failed: {err}"), LogLevel::Error);
        }
    }
}
