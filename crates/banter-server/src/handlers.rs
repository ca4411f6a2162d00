//! Connection handlers for the banter server.
//!
//! This module bridges WebSocket connections to the core engine. Transport
//! I/O runs concurrently per connection, but every state-touching step -
//! register, envelope handling, disconnect - locks the one engine mutex,
//! which is the serialization domain the core is designed around.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::Result;
use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use banter_core::{ConnectionHandle, ConnectionId, Engine, JsonStore, Outbound};
use banter_protocol::codec;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// The chat engine. The mutex is held for the whole handling of one
    /// envelope or lifecycle event; no engine method suspends.
    pub engine: Mutex<Engine<JsonStore>>,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let store = JsonStore::new(
            config.storage.users_path.as_str(),
            config.storage.banned_path.as_str(),
        );

        Self {
            engine: Mutex::new(Engine::new(store)),
            config,
        }
    }
}

/// Run the WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start; this is the only fatal
/// condition in the system.
pub async fn run_server(config: Config) -> Result<()> {
    let state = Arc::new(AppState::new(config.clone()));

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;

    info!("banter server listening on {}", addr);
    info!("WebSocket endpoint: ws://{}/", addr);

    serve(listener, state).await
}

/// Serve connections from an already-bound listener.
///
/// # Errors
///
/// Returns an error if accepting connections fails.
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> Result<()> {
    let app = Router::new()
        .route("/", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_websocket(socket, state))
}

/// Handle a WebSocket connection from accept to close.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>) {
    // Record connection metrics
    let _metrics_guard = ConnectionMetricsGuard::new();

    let conn = ConnectionId::next();
    let (handle, mut outbound) = ConnectionHandle::channel();

    state.engine.lock().await.connect(conn, handle);

    // Split the WebSocket
    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            biased;

            // Instructions from the engine: deliver an envelope or close.
            instruction = outbound.recv() => match instruction {
                Some(Outbound::Deliver(envelope)) => match codec::encode(&envelope) {
                    Ok(text) => {
                        metrics::record_message(text.len(), "outbound");
                        if sender.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        error!(connection = %conn, error = %err, "failed to encode outbound envelope");
                        metrics::record_error("encode");
                    }
                },
                Some(Outbound::Close { reason }) => {
                    debug!(connection = %conn, reason = %reason, "closing connection");
                    let _ = sender
                        .send(Message::Close(Some(CloseFrame {
                            code: close_code::NORMAL,
                            reason: reason.into(),
                        })))
                        .await;
                    break;
                }
                None => break,
            },

            // Receive from WebSocket
            msg = receiver.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    metrics::record_message(text.len(), "inbound");
                    state.engine.lock().await.handle_text(conn, &text);
                }
                Some(Ok(Message::Binary(data))) => {
                    // The protocol is JSON text; tolerate clients that flag
                    // their frames as binary.
                    metrics::record_message(data.len(), "inbound");
                    let text = String::from_utf8_lossy(&data).into_owned();
                    state.engine.lock().await.handle_text(conn, &text);
                }
                Some(Ok(Message::Ping(data))) => {
                    if sender.send(Message::Pong(data)).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Pong(_))) => {
                    // Ignore pongs
                }
                Some(Ok(Message::Close(_))) => {
                    debug!(connection = %conn, "received close frame");
                    break;
                }
                Some(Err(err)) => {
                    warn!(connection = %conn, error = %err, "WebSocket error");
                    metrics::record_error("websocket");
                    break;
                }
                None => {
                    debug!(connection = %conn, "WebSocket stream ended");
                    break;
                }
            }
        }
    }

    state.engine.lock().await.disconnect(conn);
}
