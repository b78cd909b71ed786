//! Connection orchestration: handshake, mode dispatch, session arena.
//!
//! Every accepted connection starts in an awaiting-handshake state. The
//! `init` event selects its mode: hotword connections are pure
//! pass-through triggers with no pipeline; any other mode constructs one
//! Session owning one pipeline instance, keyed by connection id.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use aria_core::bus::StatusBus;
use aria_core::config::{Config, DEFAULT_LOCALE, DEFAULT_MODEL_PATH};
use aria_core::status::{Destination, EntryKind, StatusMessage};
use aria_nlu::{IntentPipeline, Pipeline};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::client::{ClientRegistry, ConnectionId};
use crate::session::{EnqueueError, Session};
use crate::wire::{ClientEvent, QueryPayload, ServerEvent};

/// Creates a pipeline variant bound to a locale. Seam for tests.
pub trait PipelineFactory: Send + Sync {
    fn create(&self, locale: &str) -> Box<dyn Pipeline>;
}

/// Production factory backed by the intent pipeline.
pub struct IntentPipelineFactory;

impl PipelineFactory for IntentPipelineFactory {
    fn create(&self, locale: &str) -> Box<dyn Pipeline> {
        Box::new(IntentPipeline::new(locale))
    }
}

/// Orchestrator tuning knobs.
#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    pub locale: String,
    pub model_path: PathBuf,
    pub queue_capacity: usize,
    pub handshake_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            locale: DEFAULT_LOCALE.into(),
            model_path: PathBuf::from(DEFAULT_MODEL_PATH),
            queue_capacity: 64,
            handshake_timeout: Duration::from_secs(30),
        }
    }
}

impl OrchestratorConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            locale: config.locale.clone(),
            model_path: config.model_path.clone(),
            ..Default::default()
        }
    }
}

enum ConnState {
    AwaitingInit { since: Instant },
    Hotword,
    Query(Session),
}

/// Routes per-connection events into sessions and the status bus.
pub struct Orchestrator {
    registry: Arc<ClientRegistry>,
    bus: StatusBus,
    factory: Arc<dyn PipelineFactory>,
    config: OrchestratorConfig,
    connections: DashMap<ConnectionId, ConnState>,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<ClientRegistry>,
        bus: StatusBus,
        factory: Arc<dyn PipelineFactory>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            registry,
            bus,
            factory,
            config,
            connections: DashMap::new(),
        }
    }

    /// Track a newly accepted connection; the handshake clock starts now.
    pub fn connection_opened(&self, id: ConnectionId) {
        tracing::info!(connection_id = %id, "connection opened");
        self.connections.insert(
            id,
            ConnState::AwaitingInit {
                since: Instant::now(),
            },
        );
    }

    /// Forget a connection. Its session, if any, stops scheduling work.
    pub fn connection_closed(&self, id: &ConnectionId) {
        if let Some((_, state)) = self.connections.remove(id) {
            if let ConnState::Query(session) = state {
                session.shutdown();
            }
            tracing::info!(connection_id = %id, "connection closed");
        }
    }

    /// Handle one raw inbound event from a connection.
    pub async fn handle_event(&self, id: ConnectionId, raw: &str) {
        let event: ClientEvent = match serde_json::from_str(raw) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(connection_id = %id, error = %e, "unparseable client event");
                self.send(&id, &ServerEvent::error("invalid-payload", "malformed event"));
                return;
            }
        };

        enum Mode {
            Awaiting,
            Hotword,
            Query,
        }
        let mode = match self.connections.get(&id) {
            Some(state) => match &*state {
                ConnState::AwaitingInit { .. } => Mode::Awaiting,
                ConnState::Hotword => Mode::Hotword,
                ConnState::Query(_) => Mode::Query,
            },
            None => {
                tracing::debug!(connection_id = %id, "event from untracked connection dropped");
                return;
            }
        };

        match (mode, event) {
            (Mode::Awaiting, ClientEvent::Init { mode }) => {
                self.finish_handshake(id, &mode).await;
            }
            (Mode::Awaiting, _) => {
                self.send(
                    &id,
                    &ServerEvent::error("handshake-required", "send init before other events"),
                );
            }
            (Mode::Hotword, ClientEvent::HotwordDetected) => self.on_hotword(&id),
            (Mode::Hotword, ClientEvent::Query(_)) => {
                tracing::warn!(connection_id = %id, "query on hotword connection rejected");
                self.send(
                    &id,
                    &ServerEvent::error("not-query-mode", "hotword connections cannot query"),
                );
            }
            (Mode::Query, ClientEvent::Query(payload)) => self.on_query(&id, payload),
            (Mode::Query, ClientEvent::HotwordDetected) => {
                tracing::debug!(connection_id = %id, "hotword event on query connection ignored");
            }
            (Mode::Hotword, ClientEvent::Init { .. }) | (Mode::Query, ClientEvent::Init { .. }) => {
                self.send(
                    &id,
                    &ServerEvent::error("already-initialized", "mode already selected"),
                );
            }
        }
    }

    async fn finish_handshake(&self, id: ConnectionId, mode: &str) {
        if mode == "hotword" {
            tracing::info!(connection_id = %id, "hotword trigger attached");
            self.connections.insert(id, ConnState::Hotword);
            return;
        }

        let session = self.create_session(id.clone()).await;
        // The connection may have vanished while the model was loading;
        // only keep the session if it is still tracked.
        match self.connections.entry(id) {
            Entry::Occupied(mut entry) => {
                entry.insert(ConnState::Query(session));
            }
            Entry::Vacant(_) => session.shutdown(),
        }
    }

    async fn create_session(&self, id: ConnectionId) -> Session {
        let mut pipeline = self.factory.create(&self.config.locale);
        let ready = match pipeline.load(&self.config.model_path).await {
            Ok(()) => {
                tracing::info!(
                    connection_id = %id,
                    locale = %self.config.locale,
                    "session pipeline ready"
                );
                true
            }
            Err(e) => {
                tracing::warn!(connection_id = %id, error = %e, "pipeline model failed to load");
                self.bus.emit(
                    StatusMessage::single(
                        EntryKind::Warning,
                        "orchestrator",
                        "Pipeline",
                        e.to_string(),
                    )
                    .addressed_to(Destination::Any),
                );
                false
            }
        };

        Session::spawn(
            id,
            pipeline,
            ready,
            Arc::clone(&self.registry),
            self.config.queue_capacity,
        )
    }

    fn on_hotword(&self, id: &ConnectionId) {
        self.bus.emit(
            StatusMessage::single(EntryKind::Success, "orchestrator", "Hotword", "hotword detected")
                .addressed_to(Destination::Any),
        );
        if let Some(json) = ServerEvent::Record.encode() {
            let notified = self.registry.broadcast_except(id, &json);
            tracing::info!(connection_id = %id, notified = notified, "record signal broadcast");
        }
    }

    fn on_query(&self, id: &ConnectionId, payload: QueryPayload) {
        self.bus.emit(
            StatusMessage::single(
                EntryKind::Info,
                "orchestrator",
                "Query",
                format!("{:?} from {}", payload.value, payload.client),
            )
            .addressed_to(Destination::Any),
        );

        // Acknowledge before the result is ready so the UI can react.
        self.send(
            id,
            &ServerEvent::Thinking {
                on: true,
                payload: payload.clone(),
            },
        );

        let Some(state) = self.connections.get(id) else {
            return;
        };
        let ConnState::Query(session) = &*state else {
            return;
        };
        match session.enqueue(payload) {
            Ok(()) => {}
            Err(EnqueueError::Full(p)) => {
                tracing::warn!(connection_id = %id, "session queue full, rejecting query");
                self.send(id, &ServerEvent::Busy { payload: p });
            }
            Err(EnqueueError::Closed(_)) => {
                tracing::debug!(connection_id = %id, "session queue closed, query dropped");
            }
        }
    }

    /// Drop connections that never completed the handshake in time.
    /// Returns how many were removed.
    pub fn sweep_stale_handshakes(&self) -> usize {
        let stale: Vec<ConnectionId> = self
            .connections
            .iter()
            .filter_map(|entry| match entry.value() {
                ConnState::AwaitingInit { since }
                    if since.elapsed() > self.config.handshake_timeout =>
                {
                    Some(entry.key().clone())
                }
                _ => None,
            })
            .collect();

        let removed = stale.len();
        for id in stale {
            self.connections.remove(&id);
            self.registry.unregister(&id);
            tracing::info!(connection_id = %id, "handshake timeout, connection dropped");
        }
        removed
    }

    /// Whether the connection has a live query-mode session.
    pub fn has_session(&self, id: &ConnectionId) -> bool {
        matches!(
            self.connections.get(id).as_deref(),
            Some(ConnState::Query(_))
        )
    }

    /// Number of tracked connections in any state.
    pub fn tracked_connections(&self) -> usize {
        self.connections.len()
    }

    fn send(&self, id: &ConnectionId, event: &ServerEvent) {
        if let Some(json) = event.encode() {
            if !self.registry.send_to(id, json) {
                tracing::debug!(connection_id = %id, "send to disconnected client dropped");
            }
        }
    }
}

/// Start a background task that periodically sweeps stale handshakes.
pub fn start_handshake_sweep(
    orchestrator: Arc<Orchestrator>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let removed = orchestrator.sweep_stale_handshakes();
            if removed > 0 {
                tracing::info!(removed = removed, "stale handshake sweep");
            }
        }
    })
}
