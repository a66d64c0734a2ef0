// =============================================================================
// CoinDCX REST API Client: HMAC-SHA256 signed JSON requests
// =============================================================================
//
// SECURITY: The secret key is never logged or serialized. Signed requests
// carry a millisecond timestamp inside the JSON body; the signature covers the
// exact body bytes that go over the wire.
// =============================================================================

use anyhow::{Context, Result};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::header::CONTENT_TYPE;
use serde::Serialize;
use serde_json::{json, Value};
use sha2::Sha256;
use tracing::{debug, instrument, warn};

use super::symbols::{find_price, Ticker};
use crate::exchange::{
    BalanceQuery, OpenOrder, OrderAck, OrderAdmin, OrderPlacement, PriceOracle, TickerFeed,
};
use crate::types::BalanceInfo;

type HmacSha256 = Hmac<Sha256>;

const DEFAULT_BASE_URL: &str = "https://api.coindcx.com";
const HTTP_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    MarketOrder,
    LimitOrder,
}

/// Body of `POST /exchange/v1/orders/create` (before the timestamp is added).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderRequest {
    pub side: OrderSide,
    pub order_type: OrderType,
    pub market: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_per_unit: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quantity: Option<f64>,
    /// Quote-currency amount; only used by market buys.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_quantity: Option<f64>,
}

impl OrderRequest {
    pub fn market_buy(market: &str, quote_amount: f64) -> Self {
        Self {
            side: OrderSide::Buy,
            order_type: OrderType::MarketOrder,
            market: market.to_string(),
            price_per_unit: None,
            quantity: None,
            total_quantity: Some(quote_amount),
        }
    }

    pub fn market_sell(market: &str, quantity: f64) -> Self {
        Self {
            side: OrderSide::Sell,
            order_type: OrderType::MarketOrder,
            market: market.to_string(),
            price_per_unit: None,
            quantity: Some(quantity),
            total_quantity: None,
        }
    }

    pub fn limit(side: OrderSide, market: &str, price: f64, quantity: f64) -> Self {
        Self {
            side,
            order_type: OrderType::LimitOrder,
            market: market.to_string(),
            price_per_unit: Some(price),
            quantity: Some(quantity),
            total_quantity: None,
        }
    }
}

/// CoinDCX REST API client.
#[derive(Clone)]
pub struct CoinDcxClient {
    api_key: String,
    secret: String,
    base_url: String,
    client: reqwest::Client,
}

impl CoinDcxClient {
    // -------------------------------------------------------------------------
    // Construction
    // -------------------------------------------------------------------------

    pub fn new(api_key: impl Into<String>, secret: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()
            .context("failed to build reqwest client")?;

        debug!(base_url = DEFAULT_BASE_URL, "CoinDcxClient initialised");

        Ok(Self {
            api_key: api_key.into(),
            secret: secret.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            client,
        })
    }

    pub fn has_credentials(&self) -> bool {
        !self.api_key.is_empty() && !self.secret.is_empty()
    }

    // -------------------------------------------------------------------------
    // Signing helpers
    // -------------------------------------------------------------------------

    /// HMAC-SHA256 hex signature of `payload`.
    pub fn sign(&self, payload: &str) -> Result<String> {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|e| anyhow::anyhow!("invalid HMAC key: {e}"))?;
        mac.update(payload.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    pub fn timestamp_ms() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    /// Serialise `body` with a `timestamp` field into the exact compact JSON
    /// string that gets signed and sent.
    fn signed_body(body: Value, timestamp: i64) -> Result<String> {
        let mut obj = match body {
            Value::Object(map) => map,
            Value::Null => serde_json::Map::new(),
            other => anyhow::bail!("signed body must be a JSON object, got {other}"),
        };
        obj.insert("timestamp".to_string(), Value::from(timestamp));
        serde_json::to_string(&Value::Object(obj)).context("failed to encode request body")
    }

    async fn post_signed(&self, endpoint: &str, body: Value) -> Result<(bool, Value)> {
        let payload = Self::signed_body(body, Self::timestamp_ms())?;
        let signature = self.sign(&payload)?;
        let url = format!("{}{}", self.base_url, endpoint);

        let resp = self
            .client
            .post(&url)
            .header(CONTENT_TYPE, "application/json")
            .header("X-AUTH-APIKEY", &self.api_key)
            .header("X-AUTH-SIGNATURE", signature)
            .body(payload)
            .send()
            .await
            .with_context(|| format!("POST {endpoint} request failed"))?;

        let status = resp.status();
        let body: Value = resp
            .json()
            .await
            .with_context(|| format!("failed to parse {endpoint} response"))?;

        if !status.is_success() {
            warn!(endpoint, %status, "CoinDCX returned an error status");
        }
        Ok((status.is_success(), body))
    }

    // -------------------------------------------------------------------------
    // Public market data
    // -------------------------------------------------------------------------

    /// GET /exchange/ticker (public). Entries that fail to parse are skipped.
    #[instrument(skip(self), name = "coindcx::get_tickers")]
    pub async fn get_tickers(&self) -> Result<Vec<Ticker>> {
        let url = format!("{}/exchange/ticker", self.base_url);

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .context("GET /exchange/ticker request failed")?;

        let status = resp.status();
        let body: Value = resp
            .json()
            .await
            .context("failed to parse ticker response")?;

        if !status.is_success() {
            anyhow::bail!("CoinDCX GET /exchange/ticker returned {}: {}", status, body);
        }

        let raw = body.as_array().context("ticker response is not an array")?;
        let tickers: Vec<Ticker> = raw.iter().filter_map(Ticker::from_value).collect();

        debug!(count = tickers.len(), "tickers fetched");
        Ok(tickers)
    }

    /// Tickers for USDT-quoted markets only.
    pub async fn get_usdt_tickers(&self) -> Result<Vec<Ticker>> {
        let mut tickers = self.get_tickers().await?;
        tickers.retain(|t| t.market.contains("USDT"));
        Ok(tickers)
    }

    // -------------------------------------------------------------------------
    // Account / orders
    // -------------------------------------------------------------------------

    /// POST /exchange/v1/users/balances (signed).
    #[instrument(skip(self), name = "coindcx::get_balances")]
    pub async fn fetch_balances(&self) -> Result<Vec<BalanceInfo>> {
        let (ok, body) = self
            .post_signed("/exchange/v1/users/balances", Value::Null)
            .await?;
        if !ok {
            anyhow::bail!("CoinDCX balances request rejected: {body}");
        }
        parse_balances(&body)
    }

    /// POST /exchange/v1/orders/create (signed).
    #[instrument(skip(self), name = "coindcx::place_order")]
    pub async fn place_order(&self, order: &OrderRequest) -> Result<OrderAck> {
        let body = serde_json::to_value(order).context("failed to encode order")?;
        let (ok, resp) = self.post_signed("/exchange/v1/orders/create", body).await?;
        let ack = parse_order_ack(ok, &resp)?;
        debug!(market = %order.market, order_id = %ack.order_id, "order placed successfully");
        Ok(ack)
    }

    /// POST /exchange/v1/orders/active_orders (signed).
    #[instrument(skip(self), name = "coindcx::active_orders")]
    pub async fn fetch_active_orders(&self, market: Option<&str>) -> Result<Vec<OpenOrder>> {
        let (ok, body) = self
            .post_signed("/exchange/v1/orders/active_orders", active_orders_body(market))
            .await?;
        if !ok {
            anyhow::bail!("CoinDCX active orders request rejected: {body}");
        }
        parse_open_orders(&body)
    }

    /// POST /exchange/v1/orders/cancel (signed).
    #[instrument(skip(self), name = "coindcx::cancel_order")]
    pub async fn cancel(&self, order_id: &str) -> Result<()> {
        let (ok, body) = self
            .post_signed("/exchange/v1/orders/cancel", json!({ "id": order_id }))
            .await?;
        expect_success(ok, &body, "cancel")
    }

    /// POST /exchange/v1/orders/cancel_all (signed).
    #[instrument(skip(self), name = "coindcx::cancel_all")]
    pub async fn cancel_all(&self, market: &str) -> Result<()> {
        let (ok, body) = self
            .post_signed("/exchange/v1/orders/cancel_all", json!({ "market": market }))
            .await?;
        expect_success(ok, &body, "cancel_all")
    }
}

fn active_orders_body(market: Option<&str>) -> Value {
    match market {
        Some(m) if !m.is_empty() => json!({ "market": m }),
        _ => json!({}),
    }
}

fn expect_success(ok: bool, body: &Value, what: &str) -> Result<()> {
    if ok {
        return Ok(());
    }
    let message = body
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| body.to_string());
    anyhow::bail!("CoinDCX {what} rejected: {message}")
}

/// Accepts either `{"orders": [...]}` or a bare array.
fn parse_open_orders(body: &Value) -> Result<Vec<OpenOrder>> {
    let raw = body
        .get("orders")
        .unwrap_or(body)
        .as_array()
        .context("active orders response is not an array")?;

    let text = |o: &Value, key: &str| {
        o.get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    let num = |o: &Value, key: &str| o.get(key).and_then(parse_str_f64).unwrap_or(0.0);

    Ok(raw
        .iter()
        .filter_map(|o| {
            let id = match o.get("id")? {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                _ => return None,
            };
            Some(OpenOrder {
                id,
                market: text(o, "market"),
                side: text(o, "side"),
                order_type: text(o, "order_type"),
                price_per_unit: num(o, "price_per_unit"),
                total_quantity: num(o, "total_quantity"),
                remaining_quantity: num(o, "remaining_quantity"),
                status: text(o, "status"),
            })
        })
        .collect())
}

/// Parse a JSON value that may be either a string or a number into `f64`.
fn parse_str_f64(val: &Value) -> Option<f64> {
    match val.as_str() {
        Some(s) => s.parse::<f64>().ok(),
        None => val.as_f64(),
    }
}

fn parse_balances(body: &Value) -> Result<Vec<BalanceInfo>> {
    let raw = body
        .as_array()
        .context("balances response is not an array")?;

    Ok(raw
        .iter()
        .filter_map(|b| {
            let currency = b.get("currency")?.as_str()?.to_string();
            Some(BalanceInfo {
                currency,
                balance: b.get("balance").and_then(parse_str_f64).unwrap_or(0.0),
                locked_balance: b
                    .get("locked_balance")
                    .and_then(parse_str_f64)
                    .unwrap_or(0.0),
            })
        })
        .collect())
}

/// An order counts as placed only on a 2xx response carrying a non-empty
/// `orders` array; the first order's id is the acknowledgement.
pub fn parse_order_ack(status_ok: bool, body: &Value) -> Result<OrderAck> {
    let first = body
        .get("orders")
        .and_then(Value::as_array)
        .and_then(|orders| orders.first());

    match (status_ok, first) {
        (true, Some(order)) => {
            let order_id = match order.get("id") {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Number(n)) => n.to_string(),
                _ => anyhow::bail!("order response missing id: {body}"),
            };
            Ok(OrderAck { order_id })
        }
        _ => {
            let message = body
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| body.to_string());
            anyhow::bail!("order not accepted: {message}")
        }
    }
}

#[async_trait]
impl PriceOracle for CoinDcxClient {
    async fn get_price(&self, symbol: &str) -> Result<f64> {
        let tickers = self.get_tickers().await?;
        find_price(&tickers, symbol).with_context(|| format!("no ticker price for {symbol}"))
    }
}

#[async_trait]
impl OrderPlacement for CoinDcxClient {
    async fn place_market_buy(&self, market: &str, quote_amount: f64) -> Result<OrderAck> {
        self.place_order(&OrderRequest::market_buy(market, quote_amount))
            .await
    }

    async fn place_market_sell(&self, market: &str, quantity: f64) -> Result<OrderAck> {
        self.place_order(&OrderRequest::market_sell(market, quantity))
            .await
    }

    async fn place_limit_buy(&self, market: &str, price: f64, quantity: f64) -> Result<OrderAck> {
        self.place_order(&OrderRequest::limit(OrderSide::Buy, market, price, quantity))
            .await
    }

    async fn place_limit_sell(&self, market: &str, price: f64, quantity: f64) -> Result<OrderAck> {
        self.place_order(&OrderRequest::limit(OrderSide::Sell, market, price, quantity))
            .await
    }
}

#[async_trait]
impl BalanceQuery for CoinDcxClient {
    async fn get_balances(&self) -> Result<Vec<BalanceInfo>> {
        self.fetch_balances().await
    }
}

#[async_trait]
impl OrderAdmin for CoinDcxClient {
    async fn active_orders(&self, market: Option<&str>) -> Result<Vec<OpenOrder>> {
        self.fetch_active_orders(market).await
    }

    async fn cancel_order(&self, order_id: &str) -> Result<()> {
        self.cancel(order_id).await
    }

    async fn cancel_all_orders(&self, market: &str) -> Result<()> {
        self.cancel_all(market).await
    }
}

#[async_trait]
impl TickerFeed for CoinDcxClient {
    async fn usdt_tickers(&self) -> Result<Vec<Ticker>> {
        self.get_usdt_tickers().await
    }
}

impl std::fmt::Debug for CoinDcxClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoinDcxClient")
            .field("api_key", &"<redacted>")
            .field("secret", &"<redacted>")
            .field("base_url", &self.base_url)
            .finish()
    }
}
