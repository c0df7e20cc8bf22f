use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{HeaderName, HeaderValue};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::set_header::SetResponseHeaderLayer;

use crate::connection::Connection;
use crate::hub::Hub;
use crate::protocol::{decode_frame, encode_frame, Packet};

/// Shared app state passed to each WebSocket handler
#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<Hub>,
}

/// `/ws` for game clients. With a client directory, every other path serves
/// the static web build, with the isolation headers it needs.
pub fn router(hub: Arc<Hub>, client_dir: Option<PathBuf>) -> Router {
    let app = Router::new()
        .route("/ws", get(ws_handler))
        .with_state(AppState { hub });

    let app = match client_dir {
        Some(dir) => {
            tracing::info!("Serving client files from {}", dir.display());
            app.fallback_service(ServeDir::new(dir))
                .layer(SetResponseHeaderLayer::if_not_present(
                    HeaderName::from_static("cross-origin-opener-policy"),
                    HeaderValue::from_static("same-origin"),
                ))
                .layer(SetResponseHeaderLayer::if_not_present(
                    HeaderName::from_static("cross-origin-embedder-policy"),
                    HeaderValue::from_static("require-corp"),
                ))
        }
        None => app,
    };

    app.layer(CorsLayer::permissive())
}

/// HTTP handler for WebSocket upgrade
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(app_state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, app_state))
}

async fn handle_socket(socket: WebSocket, app_state: AppState) {
    let (sink, stream) = socket.split();

    let (conn, outbound) = Connection::new(app_state.hub.clone());
    let Some(id) = app_state.hub.register(conn.clone()).await else {
        tracing::error!("Failed to register connection");
        return;
    };
    tracing::info!("Client {} connected", id);

    let writer = tokio::spawn(write_pump(conn.clone(), sink, outbound));
    read_pump(&conn, stream).await;

    conn.close("client went away");
    if let Err(e) = writer.await {
        tracing::error!("Client {}: write pump failed: {}", id, e);
    }
    tracing::info!("Client {} disconnected", id);
}

/// Client -> server. Frames that don't parse are skipped.
async fn read_pump(conn: &Arc<Connection>, mut stream: SplitStream<WebSocket>) {
    let shutdown = conn.shutdown_token();

    loop {
        let frame = tokio::select! {
            _ = shutdown.cancelled() => break,
            frame = stream.next() => frame,
        };

        let packet = match frame {
            Some(Ok(Message::Text(text))) => decode_frame(text.as_str().as_bytes()),
            Some(Ok(Message::Binary(data))) => decode_frame(&data),
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => continue, // ping/pong
            Some(Err(e)) => {
                tracing::debug!("Client {}: read error: {}", conn.id(), e);
                break;
            }
        };

        let packet = match packet {
            Ok(packet) => packet,
            Err(e) => {
                tracing::warn!("Client {}: skipping malformed frame: {}", conn.id(), e);
                continue;
            }
        };

        let sender_id = match packet.sender_id {
            0 => conn.id(),
            id if id == conn.id() => id,
            forged => {
                tracing::warn!(
                    "Client {}: dropping {} claiming to be from {}",
                    conn.id(),
                    packet.msg.kind(),
                    forged
                );
                continue;
            }
        };
        conn.deliver(sender_id, packet.msg);
    }
}

/// Server -> client, one text frame per queued message.
async fn write_pump(
    conn: Arc<Connection>,
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<Packet>,
) {
    let shutdown = conn.shutdown_token();

    loop {
        let packet = tokio::select! {
            _ = shutdown.cancelled() => break,
            packet = outbound.recv() => match packet {
                Some(packet) => packet,
                None => break,
            },
        };

        let frame = match encode_frame(&packet) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!("Client {}: failed to encode {}: {}", conn.id(), packet.msg.kind(), e);
                continue;
            }
        };
        if let Err(e) = sink.send(Message::Text(frame.into())).await {
            tracing::debug!("Client {}: write error: {}", conn.id(), e);
            break;
        }
    }

    if let Err(e) = sink.close().await {
        tracing::debug!("Client {}: error closing socket: {}", conn.id(), e);
    }
    conn.close("write pump stopped");
}
