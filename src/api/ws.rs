// =============================================================================
// WebSocket Handler: live bot events
// =============================================================================
//
// Clients connect to `/api/v1/ws?token=<token>` and receive:
//   1. A `connected` message.
//   2. Every `BotEvent` published afterwards, as JSON text
//      (`{"event": "...", "data": {...}}`).
//
// The handler also answers Ping frames and keeps the connected-client count
// on `AppState` current. A client that falls behind the broadcast buffer
// skips the missed events and carries on.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::api::auth::validate_token;
use crate::app_state::AppState;
use crate::events::BotEvent;

#[derive(Deserialize)]
pub struct WsQuery {
    token: Option<String>,
}

/// Validates the `?token=` query parameter before upgrading.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(query): Query<WsQuery>,
) -> impl IntoResponse {
    let token = query.token.unwrap_or_default();
    if !validate_token(&state.admin_token, &token) {
        warn!("WebSocket connection rejected: invalid token");
        return (
            axum::http::StatusCode::FORBIDDEN,
            "Invalid or missing token",
        )
            .into_response();
    }

    ws.on_upgrade(move |socket| handle_ws_connection(socket, state))
        .into_response()
}

fn connected_frame() -> String {
    serde_json::json!({
        "event": "connected",
        "data": { "status": "Connected" },
    })
    .to_string()
}

fn event_frame(event: &BotEvent) -> Option<String> {
    match serde_json::to_string(event) {
        Ok(json) => Some(json),
        Err(e) => {
            warn!(event = event.name(), error = %e, "failed to serialize event");
            None
        }
    }
}

async fn handle_ws_connection(socket: WebSocket, state: Arc<AppState>) {
    let clients = state.ws_connected();
    info!(clients, "WebSocket client connected");

    // Subscribe before greeting so nothing published in between is lost.
    let mut events = state.notifier.subscribe();
    let (mut sender, mut receiver) = socket.split();

    if let Err(e) = sender.send(Message::Text(connected_frame())).await {
        debug!(error = %e, "failed to greet WebSocket client");
        state.ws_disconnected();
        return;
    }

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Ok(event) => {
                        let Some(json) = event_frame(&event) else { continue };
                        if let Err(e) = sender.send(Message::Text(json)).await {
                            debug!(error = %e, "WebSocket send failed, disconnecting");
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "WebSocket client lagging, events dropped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = sender.send(Message::Pong(data)).await {
                            debug!(error = %e, "failed to send Pong, disconnecting");
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket receive error, disconnecting");
                        break;
                    }
                }
            }
        }
    }

    let clients = state.ws_disconnected();
    info!(clients, "WebSocket client disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connected_frame_shape() {
        let v: serde_json::Value = serde_json::from_str(&connected_frame()).unwrap();
        assert_eq!(v["event"], "connected");
        assert_eq!(v["data"]["status"], "Connected");
    }

    #[test]
    fn event_frame_is_tagged_json() {
        let json = event_frame(&BotEvent::TradeClosed {
            trade_id: "trade_7".into(),
            reason: "Stop Loss Hit".into(),
            exit_price: 48_000.0,
            pnl: -20.0,
        })
        .unwrap();
        let v: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(v["event"], "trade_closed");
        assert_eq!(v["data"]["pnl"], -20.0);
    }
}
