// =============================================================================
// Runtime Configuration: bot settings with atomic save
// =============================================================================
//
// Every tunable of the trailing-stop bot lives here: account mode, listen
// address, monitor cadence, exchange call bounds, the R ladder and the list
// of offered pairs.
//
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash. All fields carry serde defaults so that adding new fields never
// breaks loading an older config file.
//
// =============================================================================

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::ladder::{default_ladder, LadderRung};
use crate::types::AccountMode;

pub const DEFAULT_CONFIG_PATH: &str = "trailstop.json";

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_bind_addr() -> String {
    "0.0.0.0:5000".to_string()
}

fn default_poll_interval_secs() -> u64 {
    2
}

fn default_order_timeout_secs() -> u64 {
    10
}

fn default_price_timeout_secs() -> u64 {
    5
}

fn default_pairs() -> Vec<PairInfo> {
    [
        ("BTCUSDT", "Bitcoin", "₿"),
        ("ETHUSDT", "Ethereum", "Ξ"),
        ("SOLUSDT", "Solana", "◎"),
        ("XRPUSDT", "XRP", "✕"),
        ("DOGEUSDT", "Dogecoin", "Ð"),
        ("MATICUSDT", "Polygon", "⬡"),
        ("ADAUSDT", "Cardano", "₳"),
        ("AVAXUSDT", "Avalanche", "🔺"),
    ]
    .into_iter()
    .map(|(symbol, name, icon)| PairInfo {
        symbol: symbol.to_string(),
        name: name.to_string(),
        icon: icon.to_string(),
    })
    .collect()
}

// =============================================================================
// PairInfo
// =============================================================================

/// A futures pair offered in the UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairInfo {
    pub symbol: String,
    pub name: String,
    #[serde(default)]
    pub icon: String,
}

// =============================================================================
// RuntimeConfig
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    // --- Operational modes ---------------------------------------------------

    /// Whether orders hit the real exchange or the paper ledger.
    #[serde(default)]
    pub account_mode: AccountMode,

    /// HTTP listen address.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    // --- Timing --------------------------------------------------------------

    /// Seconds between trailing-monitor ticks.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Upper bound on a single order placement call.
    #[serde(default = "default_order_timeout_secs")]
    pub order_timeout_secs: u64,

    /// Upper bound on a single price lookup.
    #[serde(default = "default_price_timeout_secs")]
    pub price_timeout_secs: u64,

    // --- Trading tables ------------------------------------------------------

    /// R ladder, ascending by `rr`.
    #[serde(default = "default_ladder")]
    pub ladder: Vec<LadderRung>,

    #[serde(default = "default_pairs")]
    pub pairs: Vec<PairInfo>,

    /// Static frontend to serve at `/`, if any.
    #[serde(default)]
    pub frontend_dir: Option<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            account_mode: AccountMode::Demo,
            bind_addr: default_bind_addr(),
            poll_interval_secs: default_poll_interval_secs(),
            order_timeout_secs: default_order_timeout_secs(),
            price_timeout_secs: default_price_timeout_secs(),
            ladder: default_ladder(),
            pairs: default_pairs(),
            frontend_dir: None,
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read runtime config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse runtime config from {}", path.display()))?;

        info!(
            path = %path.display(),
            account_mode = %config.account_mode,
            rungs = config.ladder.len(),
            "runtime config loaded"
        );

        Ok(config)
    }

    /// `load`, falling back to defaults when the file is missing or broken.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match Self::load(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "using default runtime config");
                Self::default()
            }
        }
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise runtime config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "runtime config saved (atomic)");
        Ok(())
    }

    /// Apply `TRAILSTOP_BIND_ADDR` and `TRAILSTOP_ACCOUNT_MODE` on top of the
    /// file values. `lookup` is `std::env::var` in production.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(addr) = lookup("TRAILSTOP_BIND_ADDR").filter(|a| !a.trim().is_empty()) {
            self.bind_addr = addr.trim().to_string();
        }
        if let Some(mode) = lookup("TRAILSTOP_ACCOUNT_MODE") {
            match mode.trim().to_ascii_lowercase().as_str() {
                "demo" => self.account_mode = AccountMode::Demo,
                "live" => self.account_mode = AccountMode::Live,
                other => warn!(value = other, "ignoring unknown TRAILSTOP_ACCOUNT_MODE"),
            }
        }
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.ladder.is_empty() {
            anyhow::bail!("ladder must contain at least one rung");
        }
        for pair in self.ladder.windows(2) {
            if pair[1].rr <= pair[0].rr {
                anyhow::bail!(
                    "ladder R values must be strictly ascending ({} then {})",
                    pair[0].rr,
                    pair[1].rr
                );
            }
        }
        for rung in &self.ladder {
            if !rung.rr.is_finite() || rung.rr <= 0.0 {
                anyhow::bail!("ladder R value {} must be positive", rung.rr);
            }
            if !(0.0..=100.0).contains(&rung.book_percent) {
                anyhow::bail!(
                    "book_percent {} at {}R is outside 0..=100",
                    rung.book_percent,
                    rung.rr
                );
            }
        }
        if self.poll_interval_secs == 0 {
            anyhow::bail!("poll_interval_secs must be positive");
        }
        if self.order_timeout_secs == 0 || self.price_timeout_secs == 0 {
            anyhow::bail!("exchange timeouts must be positive");
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn order_timeout(&self) -> Duration {
        Duration::from_secs(self.order_timeout_secs)
    }

    pub fn price_timeout(&self) -> Duration {
        Duration::from_secs(self.price_timeout_secs)
    }
}
