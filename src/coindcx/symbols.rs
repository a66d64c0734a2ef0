// =============================================================================
// Symbol formats: CoinDCX market naming quirks
// =============================================================================
//
// The same pair shows up as `BTCUSDT` (spot style) and `B-BTC_USDT` (futures
// style). Callers try the variants in order; the trading logic only ever
// sees the symbol the user typed.
// =============================================================================

use serde::{Deserialize, Serialize};

const FUTURES_PREFIX: &str = "B-";
const QUOTE_ASSET: &str = "USDT";

/// Last traded price for one market, as listed by the ticker endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticker {
    pub market: String,
    pub last_price: f64,
}

impl Ticker {
    /// Parse one entry of the ticker array. CoinDCX sends prices as strings.
    pub fn from_value(val: &serde_json::Value) -> Option<Self> {
        let market = val.get("market")?.as_str()?.to_string();
        let raw = val.get("last_price")?;
        let last_price = match raw.as_str() {
            Some(s) => s.parse::<f64>().ok()?,
            None => raw.as_f64()?,
        };
        Some(Self { market, last_price })
    }
}

/// Ordered candidate market names for `symbol`: the symbol itself, then the
/// futures form when it is a plain `<BASE>USDT` pair.
pub fn canonical_symbol_variants(symbol: &str) -> Vec<String> {
    let primary = symbol.trim().to_uppercase();
    if primary.is_empty() {
        return Vec::new();
    }

    let mut variants = vec![primary.clone()];
    if primary.starts_with(FUTURES_PREFIX) {
        return variants;
    }

    if let Some(base) = primary.strip_suffix(QUOTE_ASSET) {
        if !base.is_empty() {
            let base = base.trim_end_matches('_');
            variants.push(format!("{FUTURES_PREFIX}{base}_{QUOTE_ASSET}"));
        }
    }
    variants
}

/// `B-BTC_USDT` -> `BTCUSDT`.
fn flatten(market: &str) -> String {
    market
        .trim_start_matches(FUTURES_PREFIX)
        .replace('_', "")
        .to_uppercase()
}

/// Find the last price for `symbol`, trying each variant for an exact match
/// first and then any market whose flattened name equals the symbol's.
/// Non-positive prices count as missing.
pub fn find_price(tickers: &[Ticker], symbol: &str) -> Option<f64> {
    let variants = canonical_symbol_variants(symbol);

    for variant in &variants {
        if let Some(t) = tickers
            .iter()
            .find(|t| &t.market == variant && t.last_price > 0.0)
        {
            return Some(t.last_price);
        }
    }

    let wanted = flatten(variants.first()?);
    tickers
        .iter()
        .find(|t| t.last_price > 0.0 && flatten(&t.market) == wanted)
        .map(|t| t.last_price)
}
