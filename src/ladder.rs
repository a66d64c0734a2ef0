// =============================================================================
// Level Ladder: precomputed R-multiple trigger levels for a trade
// =============================================================================
//
// Each rung of the configured table becomes one `Level`:
//
//   target_price = entry ± R × risk
//   new_sl       = entry ± stop_move × risk   (R >= 1.0)
//                = initial stop               (R <  1.0)
//
// The signs follow the trade direction. Building is a pure function of its
// inputs; the same inputs always produce the same ladder.
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::types::Side;

/// R threshold from which a rung is allowed to move the stop.
const STOP_MOVE_MIN_R: f64 = 1.0;

/// One row of the static ladder configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LadderRung {
    /// Risk multiple that triggers this rung.
    pub rr: f64,
    /// Where the stop moves to, in R from entry (only applied for rr >= 1).
    pub sl_move: f64,
    /// Percentage of the position nominally booked at this rung.
    pub book_percent: f64,
    /// Human-readable instruction shown to the user.
    pub action: String,
}

impl LadderRung {
    pub fn new(rr: f64, sl_move: f64, book_percent: f64, action: &str) -> Self {
        Self {
            rr,
            sl_move,
            book_percent,
            action: action.to_string(),
        }
    }
}

/// The ladder observed in production use.
pub fn default_ladder() -> Vec<LadderRung> {
    vec![
        LadderRung::new(0.5, 0.0, 0.0, "Watch closely"),
        LadderRung::new(1.0, 0.0, 0.0, "Move SL to Entry (Breakeven)"),
        LadderRung::new(1.5, 1.0, 25.0, "Book 25% profit"),
        LadderRung::new(2.0, 1.0, 50.0, "Book 50%, Trail SL to 1:1"),
        LadderRung::new(2.5, 1.5, 50.0, "Trail SL to 1.5R"),
        LadderRung::new(3.0, 1.5, 65.0, "Book more profits"),
        LadderRung::new(3.5, 2.0, 75.0, "Trail SL to 2.0R"),
        LadderRung::new(4.0, 2.0, 85.0, "Near final target"),
        LadderRung::new(5.0, 3.0, 100.0, "FINAL - Full exit"),
    ]
}

/// A materialised rung for a specific trade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Level {
    pub rr: f64,
    pub target_price: f64,
    pub new_sl: f64,
    pub action: String,
    pub book_percent: f64,
    pub profit_amount: f64,
    pub profit_percent: f64,
    /// Flips to true exactly once, when the monitor processes this level.
    pub reached: bool,
}

/// Inputs needed to lay out a ladder.
#[derive(Debug, Clone, Copy)]
pub struct LadderInputs {
    pub entry: f64,
    pub stop_loss: f64,
    pub risk_per_unit: f64,
    pub quantity: f64,
    pub leverage: f64,
    pub side: Side,
}

/// Build the ordered level table for a trade from the configured rungs.
///
/// Rungs are expected in ascending `rr` order (enforced by
/// `RuntimeConfig::validate`); the output preserves that order.
pub fn build_levels(inputs: &LadderInputs, rungs: &[LadderRung]) -> Vec<Level> {
    let dir = inputs.side.direction();
    let risk = inputs.risk_per_unit;

    rungs
        .iter()
        .map(|rung| {
            let target_price = inputs.entry + dir * risk * rung.rr;
            let new_sl = if rung.rr >= STOP_MOVE_MIN_R {
                inputs.entry + dir * risk * rung.sl_move
            } else {
                inputs.stop_loss
            };

            Level {
                rr: rung.rr,
                target_price,
                new_sl,
                action: rung.action.clone(),
                book_percent: rung.book_percent,
                profit_amount: risk * rung.rr * inputs.quantity,
                profit_percent: (rung.rr * risk / inputs.entry) * 100.0 * inputs.leverage,
                reached: false,
            }
        })
        .collect()
}
