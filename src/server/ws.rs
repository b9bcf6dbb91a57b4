//! WebSocket fan-out of the broadcast hub.
//!
//! Each connection holds one hub subscription and one writer; only the
//! writer half ever sends on the socket. A subscriber that lags far enough
//! to lose events, or whose send fails, is dropped and its slot closed.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures::sink::SinkExt;
use futures::stream::StreamExt;
use log::{debug, warn};
use tokio::sync::broadcast::error::RecvError;

use crate::event::WireEvent;

use super::AppState;

/// WebSocket upgrade handler.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(socket, state))
}

async fn handle_ws(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let mut rx = state.hub.subscribe();
    debug!("websocket subscriber connected");

    // Replay the on-connect events before live traffic.
    for event in state.hub.connect_replay() {
        if send_event(&mut sender, &event).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            event = rx.recv() => {
                match event {
                    Ok(event) => {
                        if send_event(&mut sender, &event).await.is_err() {
                            debug!("websocket subscriber went away");
                            break;
                        }
                    }
                    Err(RecvError::Lagged(missed)) => {
                        // Best-effort delivery: a subscriber this slow is cut.
                        warn!("websocket subscriber lagged by {} events, dropping", missed);
                        break;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    // Pings are answered by axum; other client messages are ignored.
                    _ => {}
                }
            }
        }
    }
    debug!("websocket subscriber closed");
}

async fn send_event(
    sender: &mut futures::stream::SplitSink<WebSocket, Message>,
    event: &WireEvent,
) -> Result<(), ()> {
    let Ok(text) = serde_json::to_string(event) else {
        return Ok(());
    };
    sender.send(Message::Text(text.into())).await.map_err(|_| ())
}
