//! WebSocket bridge: `/ws/route-updates` streams live update frames.
//!
//! Each connection gets its own broadcast subscription. A client that
//! cannot keep up overruns its buffer, observes the lag on receive, and is
//! disconnected; it must reconnect for a fresh subscription. Client
//! messages (heartbeat pings) are consumed and otherwise ignored.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use super::handlers::ApiState;

/// GET /ws/route-updates - upgrade to the live update stream
pub async fn ws_route_updates(ws: WebSocketUpgrade, State(state): State<ApiState>) -> Response {
    ws.on_upgrade(move |socket| stream_updates(socket, state))
}

async fn stream_updates(mut socket: WebSocket, state: ApiState) {
    let mut subscription = state.broadcaster.subscribe();
    info!("WebSocket subscriber connected");

    loop {
        tokio::select! {
            update = subscription.recv() => {
                match update {
                    Ok(update) => {
                        let frame = match serde_json::to_string(&update) {
                            Ok(frame) => frame,
                            Err(e) => {
                                warn!(error = %e, "Failed to serialize live update");
                                continue;
                            }
                        };
                        if socket.send(Message::Text(frame)).await.is_err() {
                            debug!("WebSocket send failed, closing");
                            break;
                        }
                    }
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed, "WebSocket subscriber too slow, unsubscribing");
                        let _ = socket
                            .send(Message::Close(Some(axum::extract::ws::CloseFrame {
                                code: axum::extract::ws::close_code::AGAIN,
                                reason: "subscriber lagged, reconnect".into(),
                            })))
                            .await;
                        break;
                    }
                    Err(RecvError::Closed) => {
                        debug!("Broadcast channel closed");
                        break;
                    }
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    // Client heartbeats ({"type":"ping"}) and pongs are consumed
                    Some(Ok(Message::Text(_) | Message::Ping(_) | Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("WebSocket closed by client");
                        break;
                    }
                    Some(Ok(Message::Binary(_))) => {}
                    Some(Err(e)) => {
                        debug!(error = %e, "WebSocket receive error");
                        break;
                    }
                }
            }
        }
    }

    info!("WebSocket subscriber disconnected");
}
