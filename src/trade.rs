// =============================================================================
// Trade: state machine for a single trailing-stop position
// =============================================================================
//
// Life-cycle:
//   ACTIVE  ->  CLOSED_TP | CLOSED_SL | CLOSED_MANUAL   (all terminal)
//
// While ACTIVE:
//   - current_level only increases; each level is processed at most once.
//   - current_sl only moves in the trade's favour.
//   - quantity only decreases and never goes below zero.
//
// Everything in this module is synchronous and free of I/O so the manager can
// apply it under the trade-table lock.
// =============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TradeError;
use crate::ladder::Level;
use crate::types::{EntryType, LogLevel, Side, TradeStatus};

/// Fraction of the nominal booking percentage actually closed per rung.
/// Consecutive rungs compound on the remaining quantity, so the ladder alone
/// never fully exits the position.
pub const BOOKING_DAMPING: f64 = 0.30;
/// Quantities below this are not worth an order.
pub const DUST_QUANTITY: f64 = 1e-5;
/// Maximum number of log lines retained per trade.
pub const MAX_TRADE_LOGS: usize = 200;
/// Take-profit distance, in R, used when the caller does not supply one.
pub const AUTO_TAKE_PROFIT_R: f64 = 2.0;

// ---------------------------------------------------------------------------
// Log entries
// ---------------------------------------------------------------------------

/// One line of a trade's user-visible history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Wall-clock time, `HH:MM:SS`.
    pub time: String,
    pub message: String,
    #[serde(rename = "type")]
    pub level: LogLevel,
}

impl LogEntry {
    pub fn new(at: DateTime<Utc>, message: impl Into<String>, level: LogLevel) -> Self {
        Self {
            time: at.format("%H:%M:%S").to_string(),
            message: message.into(),
            level,
        }
    }
}

// ---------------------------------------------------------------------------
// Sizing and validation
// ---------------------------------------------------------------------------

/// Validated sizing for a new trade, before any order is placed.
#[derive(Debug, Clone, PartialEq)]
pub struct TradePlan {
    pub side: Side,
    pub entry_type: EntryType,
    pub entry_price: f64,
    pub capital: f64,
    pub leverage: f64,
    pub quantity: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    /// True when `take_profit` was derived at 2R rather than supplied.
    pub auto_take_profit: bool,
    pub risk_per_unit: f64,
    pub risk_amount: f64,
    pub risk_percent: f64,
}

impl TradePlan {
    /// Validate inputs and derive quantity, risk and take-profit.
    ///
    /// `entry_price` is the already-resolved entry (market price or the
    /// caller's limit price).
    pub fn compute(
        side: Side,
        entry_type: EntryType,
        entry_price: f64,
        capital: f64,
        stop_loss: f64,
        take_profit: Option<f64>,
        leverage: f64,
    ) -> Result<Self, TradeError> {
        if !(capital.is_finite() && capital > 0.0) {
            return Err(TradeError::InvalidInput(format!(
                "capital must be positive, got {capital}"
            )));
        }
        if !(leverage.is_finite() && leverage > 0.0) {
            return Err(TradeError::InvalidInput(format!(
                "leverage must be positive, got {leverage}"
            )));
        }

        match side {
            Side::Long if stop_loss >= entry_price => {
                return Err(TradeError::InvalidStopLoss(
                    "For LONG, SL must be below entry".to_string(),
                ));
            }
            Side::Short if stop_loss <= entry_price => {
                return Err(TradeError::InvalidStopLoss(
                    "For SHORT, SL must be above entry".to_string(),
                ));
            }
            _ => {}
        }

        if !(entry_price.is_finite() && entry_price > 0.0) {
            return Err(TradeError::InvalidPrice(format!(
                "entry price must be positive, got {entry_price}"
            )));
        }

        let quantity = capital * leverage / entry_price;
        let risk_per_unit = (entry_price - stop_loss).abs();
        let risk_amount = risk_per_unit * quantity;
        let risk_percent = (risk_per_unit / entry_price) * 100.0 * leverage;

        let (take_profit, auto_take_profit) = match take_profit {
            Some(tp) if tp > 0.0 => (tp, false),
            _ => (
                entry_price + side.direction() * risk_per_unit * AUTO_TAKE_PROFIT_R,
                true,
            ),
        };

        Ok(Self {
            side,
            entry_type,
            entry_price,
            capital,
            leverage,
            quantity,
            stop_loss,
            take_profit,
            auto_take_profit,
            risk_per_unit,
            risk_amount,
            risk_percent,
        })
    }
}

// ---------------------------------------------------------------------------
// Exit reasons and monitor outputs
// ---------------------------------------------------------------------------

/// Why a trade left the ACTIVE state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    TakeProfit,
    StopLoss,
    Manual,
}

impl ExitReason {
    pub fn status(self) -> TradeStatus {
        match self {
            Self::TakeProfit => TradeStatus::ClosedTp,
            Self::StopLoss => TradeStatus::ClosedSl,
            Self::Manual => TradeStatus::ClosedManual,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::TakeProfit => "Take Profit Hit",
            Self::StopLoss => "Stop Loss Hit",
            Self::Manual => "Manual Close",
        }
    }
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Derived metrics for a trade at a given price.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceReading {
    pub price: f64,
    /// Move in the trade's favour (negative when losing).
    pub price_change: f64,
    pub current_r: f64,
    pub pnl: f64,
    pub pnl_percent: f64,
}

/// A level processed by [`Trade::advance_levels`].
#[derive(Debug, Clone, PartialEq)]
pub struct LevelAdvance {
    pub index: usize,
    pub level: Level,
    /// `(old_sl, new_sl)` when the level tightened the stop.
    pub stop_change: Option<(f64, f64)>,
}

/// Quantity to close for a booking rung, or `None` when it would be dust.
pub fn booking_quantity(quantity: f64, book_percent: f64) -> Option<f64> {
    if book_percent <= 0.0 || quantity <= 0.0 {
        return None;
    }
    let qty = quantity * (book_percent / 100.0) * BOOKING_DAMPING;
    if qty < DUST_QUANTITY {
        None
    } else {
        Some(qty.min(quantity))
    }
}

// ---------------------------------------------------------------------------
// Trade model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    /// Unique identifier, `trade_<unix-millis>`.
    pub id: String,
    pub coin: String,
    pub trade_type: Side,
    pub entry_type: EntryType,
    pub entry_price: f64,
    pub capital: f64,
    pub leverage: f64,
    pub initial_quantity: f64,
    /// Remaining open quantity (reduced by partial bookings).
    pub quantity: f64,
    /// Stop-loss at creation.
    pub stop_loss: f64,
    /// Stop-loss currently enforced by the monitor.
    pub current_sl: f64,
    pub take_profit: f64,
    pub risk_per_unit: f64,
    pub risk_amount: f64,
    pub risk_percent: f64,
    pub trailing_levels: Vec<Level>,
    /// Index of the highest processed level, -1 before any.
    pub current_level: i32,
    pub order_id: String,
    pub status: TradeStatus,
    pub created_at: String,
    #[serde(default)]
    pub last_price: Option<f64>,
    #[serde(default)]
    pub closed_at: Option<String>,
    #[serde(default)]
    pub exit_price: Option<f64>,
    #[serde(default)]
    pub close_reason: Option<String>,
    #[serde(default)]
    pub logs: Vec<LogEntry>,
    /// Set while a manual close is in flight; the monitor leaves the trade alone.
    #[serde(skip)]
    pub closing: bool,
}

impl Trade {
    pub fn new(
        id: String,
        coin: String,
        plan: &TradePlan,
        levels: Vec<Level>,
        order_id: String,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            coin,
            trade_type: plan.side,
            entry_type: plan.entry_type,
            entry_price: plan.entry_price,
            capital: plan.capital,
            leverage: plan.leverage,
            initial_quantity: plan.quantity,
            quantity: plan.quantity,
            stop_loss: plan.stop_loss,
            current_sl: plan.stop_loss,
            take_profit: plan.take_profit,
            risk_per_unit: plan.risk_per_unit,
            risk_amount: plan.risk_amount,
            risk_percent: plan.risk_percent,
            trailing_levels: levels,
            current_level: -1,
            order_id,
            status: TradeStatus::Active,
            created_at: created_at.to_rfc3339(),
            last_price: None,
            closed_at: None,
            exit_price: None,
            close_reason: None,
            logs: Vec::new(),
            closing: false,
        }
    }

    pub fn is_long(&self) -> bool {
        self.trade_type.is_long()
    }

    /// ACTIVE and not currently being closed by hand.
    pub fn is_monitorable(&self) -> bool {
        self.status == TradeStatus::Active && !self.closing
    }

    pub fn push_log(&mut self, entry: LogEntry) {
        self.logs.push(entry);
        if self.logs.len() > MAX_TRADE_LOGS {
            let excess = self.logs.len() - MAX_TRADE_LOGS;
            self.logs.drain(..excess);
        }
    }

    /// Compute R-multiple and P/L at `price`.
    pub fn reading(&self, price: f64) -> PriceReading {
        let price_change = self.trade_type.direction() * (price - self.entry_price);
        let current_r = if self.risk_per_unit > 0.0 {
            price_change / self.risk_per_unit
        } else {
            0.0
        };
        PriceReading {
            price,
            price_change,
            current_r,
            pnl: price_change * self.quantity,
            pnl_percent: (price_change / self.entry_price) * 100.0 * self.leverage,
        }
    }

    /// Take-profit is checked before stop-loss.
    pub fn exit_trigger(&self, price: f64) -> Option<ExitReason> {
        let long = self.is_long();

        if self.take_profit > 0.0 {
            let tp_hit = if long {
                price >= self.take_profit
            } else {
                price <= self.take_profit
            };
            if tp_hit {
                return Some(ExitReason::TakeProfit);
            }
        }

        let sl_hit = if long {
            price <= self.current_sl
        } else {
            price >= self.current_sl
        };
        if sl_hit {
            return Some(ExitReason::StopLoss);
        }

        None
    }

    /// Process every not-yet-processed level whose threshold is at or below
    /// `current_r`, in ascending order. Returns the levels processed.
    pub fn advance_levels(&mut self, current_r: f64) -> Vec<LevelAdvance> {
        let mut advanced = Vec::new();
        if self.status.is_terminal() {
            return advanced;
        }

        for index in 0..self.trailing_levels.len() {
            if (index as i32) <= self.current_level || self.trailing_levels[index].rr > current_r {
                continue;
            }

            self.current_level = index as i32;
            self.trailing_levels[index].reached = true;
            let level = self.trailing_levels[index].clone();

            let stop_change = self.tighten_stop(level.new_sl);
            advanced.push(LevelAdvance {
                index,
                level,
                stop_change,
            });
        }

        advanced
    }

    /// Move the stop to `new_sl` only if that is strictly more favourable.
    fn tighten_stop(&mut self, new_sl: f64) -> Option<(f64, f64)> {
        let tighter = if self.is_long() {
            new_sl > self.current_sl
        } else {
            new_sl < self.current_sl
        };
        if !tighter {
            return None;
        }
        let old = self.current_sl;
        self.current_sl = new_sl;
        Some((old, new_sl))
    }

    /// Atomic ACTIVE -> terminal transition. Fails if already terminal.
    pub fn close(
        &mut self,
        reason: ExitReason,
        exit_price: f64,
        at: DateTime<Utc>,
    ) -> Result<(), TradeError> {
        if self.status.is_terminal() {
            return Err(TradeError::TradeAlreadyClosed(self.id.clone()));
        }
        self.status = reason.status();
        self.closing = false;
        self.exit_price = Some(exit_price);
        self.last_price = Some(exit_price);
        self.close_reason = Some(reason.label().to_string());
        self.closed_at = Some(at.to_rfc3339());
        Ok(())
    }

    /// Reduce the open quantity by `qty` (clamped so it never goes negative).
    /// Returns the remaining quantity.
    pub fn reduce_quantity(&mut self, qty: f64) -> f64 {
        if qty > 0.0 {
            self.quantity = (self.quantity - qty).max(0.0);
        }
        self.quantity
    }
}
