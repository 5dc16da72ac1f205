use axum::extract::ws::{Message as ClientMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::Message as UpstreamMessage;
use tracing::{debug, warn};

use crate::routes::ApiError;
use crate::state::AppState;

/// Reverse-proxy the websocket endpoint to the configured internal
/// upstream. The upgrade is preserved on the client side and a fresh
/// client handshake (with the upstream's own Host) is made inward.
pub async fn ws_proxy(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let Some(upstream) = state.ws_upstream.clone() else {
        return ApiError::service_unavailable("websocket upstream not configured").into_response();
    };
    ws.on_upgrade(move |socket| relay(socket, upstream))
}

async fn relay(client: WebSocket, upstream_url: String) {
    let (upstream, _) = match connect_async(upstream_url.as_str()).await {
        Ok(connected) => connected,
        Err(err) => {
            warn!(url = %upstream_url, error = %err, "websocket upstream unreachable");
            return;
        }
    };
    debug!(url = %upstream_url, "websocket relay established");

    let (mut client_sink, mut client_stream) = client.split();
    let (mut upstream_sink, mut upstream_stream) = upstream.split();

    loop {
        tokio::select! {
            inbound = client_stream.next() => {
                match inbound {
                    Some(Ok(message)) => {
                        let forward = match message {
                            ClientMessage::Text(text) => Some(UpstreamMessage::Text(text)),
                            ClientMessage::Binary(data) => Some(UpstreamMessage::Binary(data)),
                            ClientMessage::Close(_) => {
                                let _ = upstream_sink.send(UpstreamMessage::Close(None)).await;
                                break;
                            }
                            _ => None,
                        };
                        if let Some(frame) = forward {
                            if upstream_sink.send(frame).await.is_err() {
                                break;
                            }
                        }
                    }
                    _ => {
                        let _ = upstream_sink.send(UpstreamMessage::Close(None)).await;
                        break;
                    }
                }
            }
            outbound = upstream_stream.next() => {
                match outbound {
                    Some(Ok(message)) => {
                        let forward = match message {
                            UpstreamMessage::Text(text) => Some(ClientMessage::Text(text)),
                            UpstreamMessage::Binary(data) => Some(ClientMessage::Binary(data)),
                            UpstreamMessage::Close(_) => {
                                let _ = client_sink.send(ClientMessage::Close(None)).await;
                                break;
                            }
                            _ => None,
                        };
                        if let Some(frame) = forward {
                            if client_sink.send(frame).await.is_err() {
                                break;
                            }
                        }
                    }
                    _ => {
                        let _ = client_sink.send(ClientMessage::Close(None)).await;
                        break;
                    }
                }
            }
        }
    }
    debug!("websocket relay closed");
}
