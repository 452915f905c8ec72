use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::models::ServerMessage;
use crate::state::AppState;
use crate::websocket::connection::Connection;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WsParams {
    pub session_id: Option<String>,
}

/// WebSocket handler
pub async fn websocket_handler(
    Query(params): Query<WsParams>,
    ws: WebSocketUpgrade,
    State(app_state): State<Arc<AppState>>,
) -> Response {
    info!("New WebSocket connection attempt");
    ws.on_upgrade(move |socket| handle_socket(socket, params.session_id, app_state))
}

fn encode(message: &ServerMessage) -> Option<String> {
    match serde_json::to_string(message) {
        Ok(text) => Some(text),
        Err(e) => {
            error!("Failed to serialize outbound message: {}", e);
            None
        }
    }
}

/// Handle WebSocket connection
async fn handle_socket(socket: WebSocket, session_id: Option<String>, app_state: Arc<AppState>) {
    let _gauge = app_state.metrics.track_connection();

    // Split the socket into sender and receiver
    let (mut sender, mut receiver) = socket.split();
    let (outbox, mut outbox_rx) = mpsc::channel::<ServerMessage>(app_state.config.outbox_capacity.max(1));

    let mut connection = match Connection::open(app_state.clone(), session_id.as_deref(), outbox) {
        Ok(connection) => connection,
        Err(payload) => {
            warn!("Refusing WebSocket connection: {}", payload.message);
            let reason = payload.message.clone();
            if let Some(text) = encode(&ServerMessage::Error(payload)) {
                let _ = sender.send(Message::Text(text)).await;
            }
            let _ = sender
                .send(Message::Close(Some(CloseFrame { code: close_code::POLICY, reason: reason.into() })))
                .await;
            return;
        }
    };

    // Drain the outbox into the socket
    let mut send_task = tokio::spawn(async move {
        while let Some(message) = outbox_rx.recv().await {
            let Some(text) = encode(&message) else {
                continue;
            };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = sender.close().await;
    });

    let period = (app_state.config.idle_after() / 2).max(Duration::from_secs(1));
    let mut idle_tick = tokio::time::interval(period);

    // Inbound messages are handled one at a time, in arrival order
    loop {
        tokio::select! {
            inbound = receiver.next() => match inbound {
                Some(Ok(Message::Text(text))) => connection.handle_text(&text).await,
                Some(Ok(Message::Binary(_))) => connection.reject_binary().await,
                Some(Ok(Message::Close(_))) | None => break,
                // Ping and pong are answered by the transport
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!("WebSocket error on connection {}: {}", connection.id(), e);
                    break;
                }
            },
            _ = &mut send_task => break,
            _ = idle_tick.tick() => connection.refresh_idle(Instant::now()),
        }
    }

    connection.disconnect().await;
    drop(connection);
    send_task.abort();
    info!("WebSocket connection terminated");
}
