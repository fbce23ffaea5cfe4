//! Realtime channel. Clients send `join <exhibitionId>` / `leave
//! <exhibitionId>` text frames and receive stall events as JSON. Delivery is
//! best-effort: a subscriber that lags far enough to drop events simply
//! re-fetches the stall snapshot after reconnecting, since no event is
//! authoritative on its own.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::realtime::StallEvent;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/ws", get(ws_upgrade))
}

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sink, mut stream) = socket.split();
    let (event_tx, mut event_rx) = mpsc::channel::<StallEvent>(64);
    let mut rooms: HashMap<i64, JoinHandle<()>> = HashMap::new();

    loop {
        tokio::select! {
            Some(event) = event_rx.recv() => {
                let text = match serde_json::to_string(&event) {
                    Ok(text) => text,
                    Err(err) => {
                        debug!("failed to encode stall event: {err}");
                        continue;
                    }
                };
                if sink.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        handle_command(text.as_str(), &state, &event_tx, &mut rooms);
                    }
                    Some(Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Binary(_))) => {}
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                }
            }
        }
    }

    for (_, forwarder) in rooms {
        forwarder.abort();
    }
}

fn handle_command(
    command: &str,
    state: &Arc<AppState>,
    event_tx: &mpsc::Sender<StallEvent>,
    rooms: &mut HashMap<i64, JoinHandle<()>>,
) {
    let mut parts = command.split_whitespace();
    match (parts.next(), parts.next().and_then(|id| id.parse::<i64>().ok())) {
        (Some("join"), Some(exhibition_id)) => {
            if rooms.contains_key(&exhibition_id) {
                return;
            }
            let mut receiver = state.hub.join(exhibition_id);
            let tx = event_tx.clone();
            let forwarder = tokio::spawn(async move {
                loop {
                    match receiver.recv().await {
                        Ok(event) => {
                            if tx.send(event).await.is_err() {
                                break;
                            }
                        }
                        // Lagged: events were dropped for this subscriber.
                        // The client notices the gap and re-fetches state.
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                            debug!(missed, "subscriber lagged, events dropped");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    }
                }
            });
            rooms.insert(exhibition_id, forwarder);
            debug!(exhibition_id, "subscriber joined exhibition room");
        }
        (Some("leave"), Some(exhibition_id)) => {
            if let Some(forwarder) = rooms.remove(&exhibition_id) {
                forwarder.abort();
                debug!(exhibition_id, "subscriber left exhibition room");
            }
        }
        _ => debug!(command, "ignoring malformed realtime command"),
    }
}
