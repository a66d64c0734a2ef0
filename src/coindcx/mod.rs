pub mod client;
pub mod symbols;

pub use client::CoinDcxClient;
pub use symbols::{canonical_symbol_variants, Ticker};
