// =============================================================================
// REST API Endpoints: Axum 0.7
// =============================================================================
//
// All endpoints live under `/api/v1/`. Health is public; everything else
// requires a valid Bearer token checked via the `AuthBearer` extractor.
//
// CORS is permissive. When `frontend_dir` is configured, unmatched paths fall
// through to the static frontend.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Json, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tracing::{info, warn};

use crate::api::auth::AuthBearer;
use crate::app_state::AppState;
use crate::error::TradeError;
use crate::trade_manager::StartTradeRequest;

// =============================================================================
// Router construction
// =============================================================================

/// Build the full REST API router with CORS middleware and shared state.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let frontend_dir = state.runtime_config.read().frontend_dir.clone();

    let mut app = Router::new()
        // ── Public ──────────────────────────────────────────────────
        .route("/api/v1/health", get(health))
        // ── Market data ─────────────────────────────────────────────
        .route("/api/v1/ticker", get(ticker))
        .route("/api/v1/price/:market", get(price))
        .route("/api/v1/balances", get(balances))
        .route("/api/v1/pairs", get(pairs))
        .route("/api/v1/ladder", get(ladder))
        .route("/api/v1/test", get(connection_test))
        // ── Bot control ─────────────────────────────────────────────
        .route("/api/v1/bot/start", post(start_bot))
        .route("/api/v1/bot/stop/:trade_id", post(stop_bot))
        .route("/api/v1/bot/status/:trade_id", get(trade_status))
        .route("/api/v1/bot/trades", get(all_trades))
        // ── Resting orders ──────────────────────────────────────────
        .route("/api/v1/orders/active", get(active_orders))
        .route("/api/v1/orders/cancel/:order_id", post(cancel_order))
        .route("/api/v1/orders/cancel-all/:market", post(cancel_all_orders))
        // ── WebSocket ───────────────────────────────────────────────
        .route("/api/v1/ws", get(crate::api::ws::ws_handler));

    if let Some(dir) = frontend_dir {
        info!(dir = %dir, "serving static frontend");
        app = app.fallback_service(ServeDir::new(dir));
    }

    app.layer(cors).with_state(state)
}

// =============================================================================
// Error mapping
// =============================================================================

impl IntoResponse for TradeError {
    fn into_response(self) -> Response {
        let status = match &self {
            TradeError::InvalidStopLoss(_)
            | TradeError::InvalidPrice(_)
            | TradeError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            TradeError::TradeNotFound(_) => StatusCode::NOT_FOUND,
            TradeError::TradeAlreadyClosed(_) => StatusCode::CONFLICT,
            TradeError::PriceUnavailable(_)
            | TradeError::OrderRejected(_)
            | TradeError::BookingFailed(_) => StatusCode::BAD_GATEWAY,
        };
        if !self.is_client_error() {
            warn!(code = self.code(), error = %self, "request failed upstream");
        }
        let body = serde_json::json!({
            "success": false,
            "error": self.to_string(),
            "code": self.code(),
        });
        (status, Json(body)).into_response()
    }
}

fn upstream_error(message: String) -> Response {
    let body = serde_json::json!({ "success": false, "error": message });
    (StatusCode::BAD_GATEWAY, Json(body)).into_response()
}

// =============================================================================
// Health (public)
// =============================================================================

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.health())
}

// =============================================================================
// Market data (authenticated)
// =============================================================================

async fn ticker(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> Response {
    match state.exchange.tickers.usdt_tickers().await {
        Ok(tickers) => Json(tickers).into_response(),
        Err(e) => {
            warn!(error = %e, "ticker fetch failed");
            upstream_error(format!("{e:#}"))
        }
    }
}

async fn price(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Path(market): Path<String>,
) -> Response {
    let market = market.trim().to_uppercase();
    match state.manager.fetch_price(&market).await {
        Some(price) => Json(serde_json::json!({ "market": market, "price": price })).into_response(),
        None => TradeError::PriceUnavailable(market).into_response(),
    }
}

async fn balances(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> Response {
    match state.exchange.balances.get_balances().await {
        Ok(balances) => Json(balances).into_response(),
        Err(e) => {
            warn!(error = %e, "balance fetch failed");
            upstream_error(format!("{e:#}"))
        }
    }
}

async fn pairs(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.runtime_config.read().pairs.clone())
}

async fn ladder(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.manager.ladder().to_vec())
}

/// Connectivity check: one price lookup plus one authenticated call.
async fn connection_test(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let btc_price = state.manager.fetch_price("BTCUSDT").await;
    let auth_status = match state.exchange.balances.get_balances().await {
        Ok(_) => "ok".to_string(),
        Err(e) => format!("failed: {e:#}"),
    };
    Json(serde_json::json!({
        "status": if btc_price.is_some() { "connected" } else { "degraded" },
        "btc_price": btc_price,
        "auth_status": auth_status,
        "account_mode": state.account_mode(),
    }))
}

// =============================================================================
// Bot control (authenticated)
// =============================================================================

async fn start_bot(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    payload: Result<Json<StartTradeRequest>, JsonRejection>,
) -> Result<impl IntoResponse, TradeError> {
    // Unknown sides or entry types surface as input errors, not 422s.
    let Json(req) = payload.map_err(|e| TradeError::InvalidInput(e.body_text()))?;
    let trade = state.manager.start_trade(req).await?;
    info!(trade_id = %trade.id, coin = %trade.coin, "trade started via API");
    Ok(Json(serde_json::json!({
        "success": true,
        "trade_id": trade.id,
        "trade": trade,
    })))
}

async fn stop_bot(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Path(trade_id): Path<String>,
) -> Result<impl IntoResponse, TradeError> {
    let outcome = state.manager.close_trade(&trade_id).await?;
    info!(trade_id = %outcome.trade_id, pnl = outcome.pnl, "trade closed via API");
    Ok(Json(serde_json::json!({
        "success": true,
        "trade_id": outcome.trade_id,
        "exit_price": outcome.exit_price,
        "pnl": outcome.pnl,
    })))
}

async fn trade_status(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Path(trade_id): Path<String>,
) -> Result<impl IntoResponse, TradeError> {
    Ok(Json(state.manager.get_trade_status(&trade_id)?))
}

async fn all_trades(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.manager.get_all_trades())
}

// =============================================================================
// Resting orders (authenticated)
// =============================================================================

#[derive(Debug, Deserialize)]
struct ActiveOrdersQuery {
    market: Option<String>,
}

async fn active_orders(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Query(query): Query<ActiveOrdersQuery>,
) -> Response {
    let market = query.market.map(|m| m.trim().to_uppercase());
    match state.exchange.orders.active_orders(market.as_deref()).await {
        Ok(orders) => Json(orders).into_response(),
        Err(e) => {
            warn!(error = %e, "active orders fetch failed");
            upstream_error(format!("{e:#}"))
        }
    }
}

async fn cancel_order(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<String>,
) -> Response {
    match state.exchange.orders.cancel_order(&order_id).await {
        Ok(()) => {
            info!(order_id = %order_id, "order cancelled via API");
            Json(serde_json::json!({ "success": true, "order_id": order_id })).into_response()
        }
        Err(e) => {
            warn!(order_id = %order_id, error = %e, "cancel failed");
            upstream_error(format!("{e:#}"))
        }
    }
}

async fn cancel_all_orders(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Path(market): Path<String>,
) -> Response {
    let market = market.trim().to_uppercase();
    match state.exchange.orders.cancel_all_orders(&market).await {
        Ok(()) => {
            info!(market = %market, "all orders cancelled via API");
            Json(serde_json::json!({ "success": true, "market": market })).into_response()
        }
        Err(e) => {
            warn!(market = %market, error = %e, "cancel-all failed");
            upstream_error(format!("{e:#}"))
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app_state::testing::{state_with, TEST_TOKEN};
    use crate::trade_manager::testing::Harness;
    use axum::body::Body;
    use axum::http::{header, Request};
    use tower::ServiceExt;

    fn authed(method: &str, uri: &str, body: Option<serde_json::Value>) -> Request<Body> {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {TEST_TOKEN}"));
        match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn call(app: Router, req: Request<Body>) -> (StatusCode, serde_json::Value) {
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn health_is_public() {
        let h = Harness::new();
        let app = router(state_with(&h));
        let req = Request::get("/api/v1/health").body(Body::empty()).unwrap();
        let (status, body) = call(app, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["total_trades"], 0);
    }

    #[tokio::test]
    async fn protected_routes_need_token() {
        let h = Harness::new();
        let app = router(state_with(&h));

        let req = Request::get("/api/v1/bot/trades").body(Body::empty()).unwrap();
        let (status, body) = call(app.clone(), req).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["success"], false);

        let req = Request::get("/api/v1/bot/trades")
            .header(header::AUTHORIZATION, "Bearer wrong")
            .body(Body::empty())
            .unwrap();
        let (status, _) = call(app, req).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn start_status_stop_flow() {
        let h = Harness::new();
        h.exchange.set_price("ETHUSDT", 3_000.0);
        let app = router(state_with(&h));

        let (status, body) = call(
            app.clone(),
            authed(
                "POST",
                "/api/v1/bot/start",
                Some(serde_json::json!({
                    "coin": "ethusdt",
                    "trade_type": "LONG",
                    "capital": 100.0,
                    "stop_loss": 2_900.0,
                    "leverage": 5.0,
                })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["success"], true);
        let trade_id = body["trade_id"].as_str().unwrap().to_string();
        assert_eq!(body["trade"]["coin"], "ETHUSDT");

        let (status, body) = call(
            app.clone(),
            authed("GET", &format!("/api/v1/bot/status/{trade_id}"), None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ACTIVE");

        h.exchange.set_price("ETHUSDT", 3_050.0);
        let (status, body) = call(
            app.clone(),
            authed("POST", &format!("/api/v1/bot/stop/{trade_id}"), None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["exit_price"], 3_050.0);
        assert!(body["pnl"].as_f64().unwrap() > 0.0);

        let (status, body) = call(
            app.clone(),
            authed("POST", &format!("/api/v1/bot/stop/{trade_id}"), None),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], "TRADE_ALREADY_CLOSED");

        let (status, body) = call(app, authed("GET", "/api/v1/bot/trades", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 1);
        h.manager.stop_monitor();
    }

    #[tokio::test]
    async fn domain_errors_map_to_status_codes() {
        let h = Harness::new();
        h.exchange.set_price("BTCUSDT", 50_000.0);
        let app = router(state_with(&h));

        let (status, body) = call(
            app.clone(),
            authed("GET", "/api/v1/bot/status/trade_missing", None),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "TRADE_NOT_FOUND");

        // Stop above entry on a long.
        let (status, body) = call(
            app.clone(),
            authed(
                "POST",
                "/api/v1/bot/start",
                Some(serde_json::json!({
                    "coin": "BTCUSDT",
                    "trade_type": "LONG",
                    "capital": 100.0,
                    "stop_loss": 51_000.0,
                })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "INVALID_STOP_LOSS");

        let (status, body) = call(
            app.clone(),
            authed(
                "POST",
                "/api/v1/bot/start",
                Some(serde_json::json!({
                    "coin": "NOPEUSDT",
                    "trade_type": "SHORT",
                    "capital": 100.0,
                    "stop_loss": 1.0,
                })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["code"], "PRICE_UNAVAILABLE");

        let (status, body) = call(
            app,
            authed(
                "POST",
                "/api/v1/bot/start",
                Some(serde_json::json!({
                    "coin": "BTCUSDT",
                    "trade_type": "SIDEWAYS",
                    "capital": 100.0,
                    "stop_loss": 1.0,
                })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "INVALID_INPUT");
    }

    #[tokio::test]
    async fn market_data_endpoints() {
        let h = Harness::new();
        h.exchange.set_price("BTCUSDT", 50_000.0);
        let app = router(state_with(&h));

        let (status, body) = call(app.clone(), authed("GET", "/api/v1/price/btcusdt", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["market"], "BTCUSDT");
        assert_eq!(body["price"], 50_000.0);

        let (status, _) = call(app.clone(), authed("GET", "/api/v1/price/XYZUSDT", None)).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);

        let (status, body) = call(app.clone(), authed("GET", "/api/v1/ladder", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert!(!body.as_array().unwrap().is_empty());

        let (status, body) = call(app.clone(), authed("GET", "/api/v1/pairs", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["symbol"], "BTCUSDT");

        let (status, body) = call(app.clone(), authed("GET", "/api/v1/test", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["btc_price"], 50_000.0);
        assert_eq!(body["auth_status"], "ok");

        h.exchange.set_reject_all(true);
        let (status, body) = call(app, authed("GET", "/api/v1/balances", None)).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn resting_order_endpoints() {
        let h = Harness::new();
        h.exchange.rest_order("ord-1", "BTCUSDT", 52_000.0, 0.01);
        h.exchange.rest_order("ord-2", "BTCUSDT", 53_000.0, 0.01);
        h.exchange.rest_order("ord-3", "ETHUSDT", 3_200.0, 0.5);
        let app = router(state_with(&h));

        let (status, body) = call(app.clone(), authed("GET", "/api/v1/orders/active", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 3);

        let (_, body) = call(
            app.clone(),
            authed("GET", "/api/v1/orders/active?market=ethusdt", None),
        )
        .await;
        assert_eq!(body.as_array().unwrap().len(), 1);
        assert_eq!(body[0]["id"], "ord-3");

        let (status, body) =
            call(app.clone(), authed("POST", "/api/v1/orders/cancel/ord-3", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);

        let (status, body) =
            call(app.clone(), authed("POST", "/api/v1/orders/cancel/ord-3", None)).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["success"], false);

        let (status, body) =
            call(app.clone(), authed("POST", "/api/v1/orders/cancel-all/btcusdt", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["market"], "BTCUSDT");
        assert!(h.exchange.resting_orders().is_empty());

        let req = Request::get("/api/v1/orders/active").body(Body::empty()).unwrap();
        let (status, _) = call(app, req).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }
}
