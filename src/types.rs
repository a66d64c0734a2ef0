// =============================================================================
// Shared types used across the trailing-stop engine
// =============================================================================

use serde::{Deserialize, Serialize};

/// Balance snapshot for a single currency from the exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceInfo {
    pub currency: String,
    #[serde(default)]
    pub balance: f64,
    #[serde(default)]
    pub locked_balance: f64,
}

/// Direction of a leveraged position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    pub fn is_long(self) -> bool {
        matches!(self, Self::Long)
    }

    /// +1.0 for longs, -1.0 for shorts. Multiplying a raw price move by this
    /// yields the move in the trade's favour.
    pub fn direction(self) -> f64 {
        match self {
            Self::Long => 1.0,
            Self::Short => -1.0,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Long => write!(f, "LONG"),
            Self::Short => write!(f, "SHORT"),
        }
    }
}

/// How the opening order is placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EntryType {
    Market,
    Limit,
}

impl Default for EntryType {
    fn default() -> Self {
        Self::Market
    }
}

impl std::fmt::Display for EntryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Market => write!(f, "MARKET"),
            Self::Limit => write!(f, "LIMIT"),
        }
    }
}

/// Lifecycle status of a trade. Every non-`Active` status is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeStatus {
    Active,
    ClosedTp,
    ClosedSl,
    ClosedManual,
}

impl TradeStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Active)
    }
}

impl std::fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "ACTIVE"),
            Self::ClosedTp => write!(f, "CLOSED_TP"),
            Self::ClosedSl => write!(f, "CLOSED_SL"),
            Self::ClosedManual => write!(f, "CLOSED_MANUAL"),
        }
    }
}

/// Whether orders go to the real exchange or are simulated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountMode {
    Demo,
    Live,
}

impl Default for AccountMode {
    fn default() -> Self {
        Self::Demo
    }
}

impl std::fmt::Display for AccountMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Demo => write!(f, "Demo"),
            Self::Live => write!(f, "Live"),
        }
    }
}

/// Severity of a user-visible trade log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Success,
    Alert,
    Error,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn side_serialises_uppercase() {
        assert_eq!(serde_json::to_string(&Side::Long).unwrap(), "\"LONG\"");
        let side: Side = serde_json::from_str("\"SHORT\"").unwrap();
        assert_eq!(side, Side::Short);
    }

    #[test]
    fn status_wire_names() {
        assert_eq!(
            serde_json::to_string(&TradeStatus::ClosedManual).unwrap(),
            "\"CLOSED_MANUAL\""
        );
        assert_eq!(serde_json::to_string(&TradeStatus::ClosedTp).unwrap(), "\"CLOSED_TP\"");
        assert_eq!(TradeStatus::ClosedSl.to_string(), "CLOSED_SL");
    }

    #[test]
    fn only_active_is_non_terminal() {
        assert!(!TradeStatus::Active.is_terminal());
        assert!(TradeStatus::ClosedTp.is_terminal());
        assert!(TradeStatus::ClosedSl.is_terminal());
        assert!(TradeStatus::ClosedManual.is_terminal());
    }

    #[test]
    fn direction_sign() {
        assert_eq!(Side::Long.direction(), 1.0);
        assert_eq!(Side::Short.direction(), -1.0);
    }
}
