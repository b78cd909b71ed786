use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use uuid::Uuid;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(90);

/// Unique connection identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub String);

impl Default for ConnectionId {
    fn default() -> Self {
        Self(format!("conn_{}", Uuid::now_v7()))
    }
}

impl ConnectionId {
    pub fn new() -> Self {
        Self::default()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A connected WebSocket client.
pub struct Connection {
    pub id: ConnectionId,
    tx: mpsc::Sender<String>,
    connected: AtomicBool,
    last_pong: AtomicU64,
}

impl Connection {
    fn new(id: ConnectionId, tx: mpsc::Sender<String>) -> Self {
        Self {
            id,
            tx,
            connected: AtomicBool::new(true),
            last_pong: AtomicU64::new(now_secs()),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    fn record_pong(&self) {
        self.last_pong.store(now_secs(), Ordering::Relaxed);
    }

    fn is_alive(&self) -> bool {
        let last = self.last_pong.load(Ordering::Relaxed);
        now_secs().saturating_sub(last) < CLIENT_TIMEOUT.as_secs()
    }
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Registry of all connected WebSocket clients.
pub struct ClientRegistry {
    connections: DashMap<ConnectionId, Arc<Connection>>,
    max_send_queue: usize,
}

impl ClientRegistry {
    pub fn new(max_send_queue: usize) -> Self {
        Self {
            connections: DashMap::new(),
            max_send_queue,
        }
    }

    /// Register a new connection and return its ID + receive half.
    pub fn register(&self) -> (ConnectionId, mpsc::Receiver<String>) {
        let id = ConnectionId::new();
        let (tx, rx) = mpsc::channel(self.max_send_queue);
        let connection = Arc::new(Connection::new(id.clone(), tx));
        self.connections.insert(id.clone(), connection);
        (id, rx)
    }

    /// Remove a connection by ID. Dropping the entry closes its send
    /// queue, which ends the writer task and the socket.
    pub fn unregister(&self, id: &ConnectionId) {
        if let Some((_, connection)) = self.connections.remove(id) {
            connection.connected.store(false, Ordering::Relaxed);
        }
    }

    fn connection(&self, id: &ConnectionId) -> Option<Arc<Connection>> {
        self.connections.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Send a message to a specific connection. Full queues drop the
    /// message rather than block.
    pub fn send_to(&self, id: &ConnectionId, message: String) -> bool {
        let Some(connection) = self.connection(id) else {
            return false;
        };
        match connection.tx.try_send(message) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(msg)) => {
                tracing::warn!(
                    connection_id = %id,
                    msg_len = msg.len(),
                    "send queue full, dropping message"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Send a message to every connection except the originating one.
    pub fn broadcast_except(&self, origin: &ConnectionId, message: &str) -> usize {
        let mut sent = 0;
        for entry in self.connections.iter() {
            let connection = entry.value();
            if &connection.id != origin
                && connection.is_connected()
                && connection.tx.try_send(message.to_string()).is_ok()
            {
                sent += 1;
            }
        }
        sent
    }

    /// Number of live connections.
    pub fn count(&self) -> usize {
        self.connections.len()
    }

    /// Remove connections that haven't answered pings within the timeout.
    pub fn cleanup_dead_clients(&self) -> usize {
        let dead: Vec<ConnectionId> = self
            .connections
            .iter()
            .filter(|entry| !entry.value().is_alive())
            .map(|entry| entry.key().clone())
            .collect();

        let removed = dead.len();
        for id in dead {
            self.unregister(&id);
            tracing::info!(connection_id = %id, "cleaned up dead connection");
        }
        removed
    }
}

/// Handle a WebSocket connection: split into reader/writer, manage
/// lifecycle with heartbeat, funnel inbound events to the orchestrator.
pub async fn handle_ws_connection(
    socket: WebSocket,
    connection_id: ConnectionId,
    mut rx: mpsc::Receiver<String>,
    registry: Arc<ClientRegistry>,
    on_event: mpsc::Sender<(ConnectionId, String)>,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    // Writer task: forward queued messages + periodic ping.
    let writer_connection = registry.connection(&connection_id);
    let writer_cid = connection_id.clone();
    let writer = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(HEARTBEAT_INTERVAL);
        ping_interval.tick().await; // consume first immediate tick

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    match msg {
                        Some(text) => {
                            if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = ping_interval.tick() => {
                    if ws_tx.send(WsMessage::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                    tracing::trace!(connection_id = %writer_cid, "sent ping");
                }
            }
        }

        if let Some(connection) = writer_connection {
            connection.connected.store(false, Ordering::Relaxed);
        }
    });

    // Reader task: forward inbound events, track pongs.
    let reader_connection = registry.connection(&connection_id);
    let reader_cid = connection_id.clone();
    let reader = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_rx.next().await {
            match msg {
                WsMessage::Text(text) => {
                    let _ = on_event.send((reader_cid.clone(), text.to_string())).await;
                }
                WsMessage::Pong(_) => {
                    if let Some(connection) = &reader_connection {
                        connection.record_pong();
                    }
                }
                WsMessage::Close(_) => break,
                WsMessage::Ping(_) => {} // axum answers pongs automatically
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = writer => {},
        _ = reader => {},
    }

    registry.unregister(&connection_id);
}

/// Start a background task that periodically sweeps dead connections.
pub fn start_cleanup_task(
    registry: Arc<ClientRegistry>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let removed = registry.cleanup_dead_clients();
            if removed > 0 {
                tracing::info!(removed = removed, "dead connection cleanup");
            }
        }
    })
}
