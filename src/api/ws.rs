//! `/ws` live feed.

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use super::state::AppState;
use crate::feed::FeedMessage;

pub async fn feed_socket(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| serve_socket(socket, state))
}

async fn send(socket: &mut WebSocket, message: &FeedMessage) -> bool {
    let text = match serde_json::to_string(message) {
        Ok(text) => text,
        Err(err) => {
            warn!(%err, "failed to encode feed message");
            return true;
        }
    };
    socket.send(Message::Text(text.into())).await.is_ok()
}

async fn serve_socket(mut socket: WebSocket, state: AppState) {
    // subscribe before the snapshot so no update falls in between
    let mut updates = state.feed.subscribe();
    let mut shutdown = state.shutdown.subscribe();

    if !send(&mut socket, &state.feed.status()).await {
        return;
    }
    debug!("feed observer connected");

    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Ok(message) => {
                    if !send(&mut socket, &message).await {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "observer lagged, resending status");
                    if !send(&mut socket, &state.feed.status()).await {
                        break;
                    }
                }
                Err(RecvError::Closed) => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            },
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow_and_update() {
                    let _ = socket.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    }
    debug!("feed observer disconnected");
}
