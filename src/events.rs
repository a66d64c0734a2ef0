// =============================================================================
// Events: typed notifications pushed to observers
// =============================================================================
//
// The engine publishes through the `EventSink` trait and never waits on the
// transport. `BroadcastNotifier` fans events out over a tokio broadcast
// channel; the WebSocket handler is one subscriber among any number.
// =============================================================================

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use crate::ladder::Level;
use crate::trade::{LogEntry, Trade};

/// Channel capacity; slow subscribers lag and drop the oldest events.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum BotEvent {
    TradeStarted(Box<Trade>),
    PriceUpdate {
        trade_id: String,
        current_price: f64,
        current_rr: f64,
        pnl: f64,
        pnl_percent: f64,
        current_sl: f64,
        take_profit: f64,
    },
    LevelReached {
        trade_id: String,
        level: Level,
        old_sl: f64,
        new_sl: f64,
        action: String,
    },
    TradeClosed {
        trade_id: String,
        reason: String,
        exit_price: f64,
        pnl: f64,
    },
    Log {
        trade_id: String,
        log: LogEntry,
    },
}

impl BotEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::TradeStarted(_) => "trade_started",
            Self::PriceUpdate { .. } => "price_update",
            Self::LevelReached { .. } => "level_reached",
            Self::TradeClosed { .. } => "trade_closed",
            Self::Log { .. } => "log",
        }
    }

    pub fn trade_id(&self) -> &str {
        match self {
            Self::TradeStarted(trade) => &trade.id,
            Self::PriceUpdate { trade_id, .. }
            | Self::LevelReached { trade_id, .. }
            | Self::TradeClosed { trade_id, .. }
            | Self::Log { trade_id, .. } => trade_id,
        }
    }
}

/// Fire-and-forget event sink.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: BotEvent);
}

/// Broadcast-channel sink shared by all WebSocket clients.
#[derive(Debug, Clone)]
pub struct BroadcastNotifier {
    tx: broadcast::Sender<BotEvent>,
}

impl BroadcastNotifier {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BotEvent> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for BroadcastNotifier {
    fn publish(&self, event: BotEvent) {
        debug!(event = event.name(), trade_id = %event.trade_id(), "publishing event");
        // No subscribers is fine.
        let _ = self.tx.send(event);
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LogLevel;

    #[test]
    fn wire_format_is_tagged() {
        let ev = BotEvent::TradeClosed {
            trade_id: "trade_1".into(),
            reason: "Manual Close".into(),
            exit_price: 101.5,
            pnl: 1.5,
        };
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["event"], "trade_closed");
        assert_eq!(v["data"]["trade_id"], "trade_1");
        assert_eq!(v["data"]["reason"], "Manual Close");
        assert_eq!(ev.name(), "trade_closed");
    }

    #[tokio::test]
    async fn broadcast_reaches_subscribers() {
        let notifier = BroadcastNotifier::new();
        let mut rx = notifier.subscribe();
        notifier.publish(BotEvent::Log {
            trade_id: "trade_9".into(),
            log: LogEntry {
                time: "00:00:00".into(),
                message: "hello".into(),
                level: LogLevel::Info,
            },
        });
        let got = rx.recv().await.unwrap();
        assert_eq!(got.name(), "log");
        assert_eq!(got.trade_id(), "trade_9");
    }

    #[test]
    fn publish_without_subscribers_is_harmless() {
        let notifier = BroadcastNotifier::new();
        notifier.publish(BotEvent::PriceUpdate {
            trade_id: "t".into(),
            current_price: 1.0,
            current_rr: 0.0,
            pnl: 0.0,
            pnl_percent: 0.0,
            current_sl: 0.9,
            take_profit: 1.2,
        });
    }
}
