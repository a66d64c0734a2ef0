// =============================================================================
// Trade Errors: domain failure taxonomy
// =============================================================================
//
// Input and order failures during creation abort the trade before anything is
// stored. Monitoring failures (price, booking) are logged per trade per tick
// and never surface here as fatal.
// =============================================================================

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TradeError {
    #[error("could not fetch price for {0}")]
    PriceUnavailable(String),

    #[error("{0}")]
    InvalidStopLoss(String),

    #[error("invalid price: {0}")]
    InvalidPrice(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("order rejected: {0}")]
    OrderRejected(String),

    #[error("trade not found: {0}")]
    TradeNotFound(String),

    #[error("trade {0} is already closed")]
    TradeAlreadyClosed(String),

    #[error("profit booking failed: {0}")]
    BookingFailed(String),
}

impl TradeError {
    /// Stable machine-readable code for API consumers.
    pub fn code(&self) -> &'static str {
        match self {
            Self::PriceUnavailable(_) => "PRICE_UNAVAILABLE",
            Self::InvalidStopLoss(_) => "INVALID_STOP_LOSS",
            Self::InvalidPrice(_) => "INVALID_PRICE",
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::OrderRejected(_) => "ORDER_REJECTED",
            Self::TradeNotFound(_) => "TRADE_NOT_FOUND",
            Self::TradeAlreadyClosed(_) => "TRADE_ALREADY_CLOSED",
            Self::BookingFailed(_) => "BOOKING_FAILED",
        }
    }

    /// True for errors caused by the caller's request rather than upstream.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidStopLoss(_) | Self::InvalidPrice(_) | Self::InvalidInput(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_distinct() {
        let errs = [
            TradeError::PriceUnavailable("x".into()),
            TradeError::InvalidStopLoss("x".into()),
            TradeError::InvalidPrice("x".into()),
            TradeError::InvalidInput("x".into()),
            TradeError::OrderRejected("x".into()),
            TradeError::TradeNotFound("x".into()),
            TradeError::TradeAlreadyClosed("x".into()),
            TradeError::BookingFailed("x".into()),
        ];
        let mut codes: Vec<&str> = errs.iter().map(|e| e.code()).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errs.len());
    }

    #[test]
    fn display_messages() {
        let e = TradeError::TradeAlreadyClosed("trade_1".into());
        assert_eq!(e.to_string(), "trade trade_1 is already closed");
        assert!(TradeError::InvalidInput("capital".into()).is_client_error());
        assert!(!TradeError::OrderRejected("nope".into()).is_client_error());
    }
}
