//! Connection handlers for Herald server.
//!
//! This module handles the connection lifecycle: it accepts websocket
//! upgrades, decodes inbound packets into work items for the dispatch
//! workers, and drains each connection's outbound queue onto the socket.

use crate::config::Config;
use crate::events::build_websocket;
use crate::hub::{Hub, Packet};
use crate::metrics::{self, ConnectionMetricsGuard};
use crate::worker::{Inbound, Worker, Workers};
use anyhow::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use futures_util::{SinkExt, StreamExt};
use herald_core::{ConnectionId, MemoryRoomStore, RoomConfig};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// Live connections and their outbound queues.
    pub hub: Arc<Hub>,
    /// Room membership shared by every worker.
    pub rooms: Arc<MemoryRoomStore>,
    /// Dispatch workers.
    pub workers: Workers,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state and spawn the dispatch workers.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured middleware cannot be resolved.
    pub fn new(config: Config) -> Result<Self> {
        let room_config = RoomConfig {
            max_rooms_per_connection: config.limits.max_rooms_per_connection,
            auto_delete_empty_rooms: true,
        };
        let rooms = Arc::new(MemoryRoomStore::with_config(room_config));
        let hub = Arc::new(Hub::new());

        let workers = (0..config.worker_count())
            .map(|id| -> Result<Worker> {
                let ws = build_websocket(rooms.clone(), hub.clone(), &config.dispatch.middleware)?;
                Ok(Worker::new(id, ws, rooms.clone(), hub.clone()))
            })
            .collect::<Result<Vec<_>>>()?;

        info!(workers = workers.len(), "Spawning dispatch workers");

        Ok(Self {
            hub,
            rooms,
            workers: Workers::spawn(workers),
            config,
        })
    }
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let state = Arc::new(AppState::new(config.clone())?);

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let app = Router::new()
        .route(&config.transport.websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state);

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;

    info!("Herald server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    axum::serve(listener, app).await?;

    Ok(())
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let rooms = state.rooms.stats();
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "connections": state.hub.len(),
        "rooms": rooms.room_count,
        "workers": state.workers.len(),
    }))
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    if state.hub.len() >= state.config.limits.max_connections {
        warn!("Connection limit reached, refusing upgrade");
        metrics::record_error("connection_limit");
        return (StatusCode::SERVICE_UNAVAILABLE, "connection limit reached").into_response();
    }

    ws.max_message_size(state.config.limits.max_message_size)
        .on_upgrade(move |socket| handle_websocket(socket, state))
}

/// Handle a WebSocket connection.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>) {
    let _metrics_guard = ConnectionMetricsGuard::new();

    let (connection_id, mut outbound) = state.hub.register();
    debug!(connection = %connection_id, "WebSocket connected");

    let (mut sender, mut receiver) = socket.split();
    state.workers.route(Inbound::Connected(connection_id));

    loop {
        tokio::select! {
            biased;

            // Packets queued by the dispatch workers
            Some(text) = outbound.recv() => {
                if sender.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }

            // Receive from WebSocket
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        handle_text(&state, connection_id, &text);
                    }
                    Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                        Ok(text) => handle_text(&state, connection_id, text),
                        Err(_) => reject_packet(
                            &state,
                            connection_id,
                            "binary packets must be UTF-8 JSON",
                        ),
                    },
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) => {
                        debug!(connection = %connection_id, "Received close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(connection = %connection_id, error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        break;
                    }
                    None => {
                        debug!(connection = %connection_id, "WebSocket stream ended");
                        break;
                    }
                }
            }
        }
    }

    state.hub.unregister(connection_id);
    state.workers.route(Inbound::Disconnected(connection_id));

    debug!(connection = %connection_id, "WebSocket disconnected");
}

/// Decode a text packet and queue it on the connection's worker.
fn handle_text(state: &AppState, connection_id: ConnectionId, text: &str) {
    match Packet::decode(text) {
        Ok(packet) => {
            let routed = state.workers.route(Inbound::Event {
                sender: connection_id,
                event: packet.event,
                data: packet.data,
            });
            if !routed {
                error!(connection = %connection_id, "Dispatch worker unavailable");
                metrics::record_error("worker");
            }
        }
        Err(e) => reject_packet(state, connection_id, &e.to_string()),
    }
}

fn reject_packet(state: &AppState, connection_id: ConnectionId, reason: &str) {
    warn!(connection = %connection_id, reason = %reason, "Invalid packet");
    metrics::record_error("decode");
    state
        .hub
        .send_packet(connection_id, &Packet::error("", "decode", reason));
}
