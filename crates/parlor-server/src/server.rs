//! Server assembly and connection lifecycle.
//!
//! [`SessionServer`] ties the registries, the worker pool, and the delivery
//! queue together behind three transport-facing callbacks:
//! `connection_opened`, `message_received`, and `connection_closed`. Each
//! callback only records the event and submits a unit of work; application
//! logic never runs on the transport's I/O thread.
//!
//! Events for one connection go through a per-connection FIFO drained under
//! a per-connection gate, so a connection's open is always processed before
//! its first frame and frames are processed in receipt order. Command
//! execution additionally holds the client's own gate (see `router`), which
//! keeps one client's commands mutually exclusive across a reconnect.

use std::{
    collections::VecDeque,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{
        Arc, Weak,
        atomic::{AtomicU64, Ordering},
    },
};

use dashmap::DashMap;
use parking_lot::Mutex;
use parlor_proto::OutboundEnvelope;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::{
    connection::{Connection, ConnectionId},
    dispatch::TaskDispatcher,
    error::ServerError,
    lobby::{CommandInterpreter, Lobby, LobbyFactory},
    lobby_registry::LobbyRegistry,
    outbound::DeliveryQueue,
    registry::{BindOutcome, ClientRegistry},
};

/// Tunables for one server instance.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Connections beyond this are refused with a `connection_error` frame
    /// and closed.
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { max_connections: 10_000 }
    }
}

/// One accepted connection: its sink plus the inbound event FIFO.
struct ConnSlot {
    sink: Arc<dyn Connection>,
    events: Mutex<VecDeque<ConnEvent>>,
    /// Serializes event processing for this connection.
    gate: Mutex<()>,
}

enum ConnEvent {
    Opened { requested_id: Option<String> },
    Frame(String),
    Closed,
}

/// The embeddable session server.
///
/// Cheap to clone; all clones share one instance. The worker pool is
/// injected so embedders control sizing and tests can pin it to one worker.
#[derive(Clone)]
pub struct SessionServer {
    inner: Arc<ServerInner>,
}

pub(crate) struct ServerInner {
    pub(crate) clients: ClientRegistry,
    pub(crate) lobbies: LobbyRegistry,
    pub(crate) interpreter: Arc<dyn CommandInterpreter>,
    connections: DashMap<ConnectionId, Arc<ConnSlot>>,
    outbound: DeliveryQueue,
    dispatcher: Arc<TaskDispatcher>,
    config: ServerConfig,
    next_conn_id: AtomicU64,
    /// Back-reference for minting handles and owning Arcs inside jobs.
    self_ref: Weak<ServerInner>,
}

impl SessionServer {
    /// Assemble a server from its injected collaborators.
    pub fn new(
        config: ServerConfig,
        dispatcher: Arc<TaskDispatcher>,
        lobby_factory: LobbyFactory,
        interpreter: Arc<dyn CommandInterpreter>,
    ) -> Result<Self, ServerError> {
        let outbound = DeliveryQueue::spawn()?;
        let inner = Arc::new_cyclic(|self_ref| ServerInner {
            clients: ClientRegistry::new(),
            lobbies: LobbyRegistry::new(lobby_factory),
            interpreter,
            connections: DashMap::new(),
            outbound,
            dispatcher,
            config,
            next_conn_id: AtomicU64::new(1),
            self_ref: self_ref.clone(),
        });

        Ok(Self { inner })
    }

    /// A cheap handle for lobbies and embedding code.
    pub fn handle(&self) -> ServerHandle {
        ServerHandle::new(Arc::downgrade(&self.inner))
    }

    /// Transport callback: a connection was accepted.
    ///
    /// `requested_id` is the client identity the connection presented (for
    /// the WebSocket adapter, a `client_id` query parameter); `None` has
    /// the server mint one. Returns the handle to tag later events with.
    pub fn connection_opened(
        &self,
        sink: Arc<dyn Connection>,
        requested_id: Option<String>,
    ) -> ConnectionId {
        let conn = ConnectionId::new(self.inner.next_conn_id.fetch_add(1, Ordering::Relaxed));

        if self.inner.connections.len() >= self.inner.config.max_connections {
            warn!(%conn, "refusing connection, server at capacity");
            self.inner.outbound.enqueue(
                conn,
                Arc::clone(&sink),
                OutboundEnvelope::error("connection_error", "server is at capacity").encode(),
            );
            sink.close();
            return conn;
        }

        let slot = Arc::new(ConnSlot {
            sink,
            events: Mutex::new(VecDeque::new()),
            gate: Mutex::new(()),
        });
        self.inner.connections.insert(conn, slot);
        self.inner.push_event(conn, ConnEvent::Opened { requested_id });
        conn
    }

    /// Transport callback: a text frame arrived on `conn`.
    pub fn message_received(&self, conn: ConnectionId, text: String) {
        self.inner.push_event(conn, ConnEvent::Frame(text));
    }

    /// Transport callback: `conn` is gone.
    ///
    /// Frames received before the close are still processed; the slot is
    /// dropped once the close event itself is handled.
    pub fn connection_closed(&self, conn: ConnectionId) {
        self.inner.push_event(conn, ConnEvent::Closed);
    }

    /// Number of currently registered connections.
    pub fn connection_count(&self) -> usize {
        self.inner.connections.len()
    }
}

impl std::fmt::Debug for SessionServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionServer")
            .field("connections", &self.inner.connections.len())
            .field("lobbies", &self.inner.lobbies)
            .finish_non_exhaustive()
    }
}

impl ServerInner {
    /// Queue one connection event and submit a drain job for it.
    fn push_event(&self, conn: ConnectionId, event: ConnEvent) {
        let Some(slot) = self.connections.get(&conn).map(|s| Arc::clone(&s)) else {
            debug!(%conn, "event for unknown connection dropped");
            return;
        };
        slot.events.lock().push_back(event);

        let Some(inner) = self.self_ref.upgrade() else { return };
        self.dispatcher.submit(move || inner.drain_one(conn, &slot));
    }

    /// Process exactly one queued event for `conn`, in FIFO order.
    fn drain_one(&self, conn: ConnectionId, slot: &Arc<ConnSlot>) {
        let _gate = slot.gate.lock();
        let Some(event) = slot.events.lock().pop_front() else { return };

        match event {
            ConnEvent::Opened { requested_id } => self.process_open(conn, requested_id.as_deref()),
            ConnEvent::Frame(raw) => self.process_frame(conn, &raw),
            ConnEvent::Closed => self.process_closed(conn),
        }
    }

    fn process_open(&self, conn: ConnectionId, requested_id: Option<&str>) {
        match self.clients.bind(conn, requested_id) {
            Ok(outcome) => {
                let client = Arc::clone(outcome.record());
                self.send_to_conn(
                    conn,
                    &OutboundEnvelope::ok("notify_id", json!({ "client_id": client.id() })),
                );

                if matches!(outcome, BindOutcome::Reconnected(_)) {
                    info!(client_id = client.id(), %conn, "client reconnected");
                    if let Some(entry) = client.lobby() {
                        guarded("client_reconnected", || {
                            entry.lobby().client_reconnected(client.id());
                        });
                    }
                } else {
                    info!(client_id = client.id(), %conn, "client connected");
                }

                if client.lobby().is_none() {
                    self.push_lobby_list(conn);
                }
            },
            Err(err) => {
                warn!(%conn, %err, "identity binding refused");
                self.send_to_conn(conn, &OutboundEnvelope::error("notify_id", err.to_string()));
            },
        }
    }

    fn process_closed(&self, conn: ConnectionId) {
        self.connections.remove(&conn);

        match self.clients.disconnect(conn) {
            Some(client) => {
                info!(client_id = client.id(), %conn, "client disconnected");
                if let Some(entry) = client.lobby() {
                    guarded("client_disconnected", || {
                        entry.lobby().client_disconnected(client.id());
                    });
                }
            },
            None => debug!(%conn, "unbound connection closed"),
        }
    }

    /// A handle onto this server, for lobby factories.
    pub(crate) fn server_handle(&self) -> ServerHandle {
        ServerHandle::new(self.self_ref.clone())
    }

    /// Queue an envelope for one connection.
    pub(crate) fn send_to_conn(&self, conn: ConnectionId, envelope: &OutboundEnvelope) {
        let Some(slot) = self.connections.get(&conn) else {
            debug!(%conn, command = %envelope.command, "dropping frame for closed connection");
            return;
        };
        self.outbound.enqueue(conn, Arc::clone(&slot.sink), envelope.encode());
    }

    /// Send the open-lobby listing to one connection.
    pub(crate) fn push_lobby_list(&self, conn: ConnectionId) {
        self.send_to_conn(conn, &OutboundEnvelope::ok("get_lobbies", self.lobby_listing()));
    }

    /// Wire form of all open lobbies.
    pub(crate) fn lobby_listing(&self) -> Value {
        let lobbies: Vec<Value> = self
            .lobbies
            .open_entries()
            .iter()
            .filter_map(|entry| guarded("serialize", || entry.lobby().serialize()))
            .collect();
        Value::Array(lobbies)
    }
}

/// Run application code, converting a panic into a logged `None`.
///
/// This is the router-boundary net of the error design: nothing a lobby or
/// interpreter does may take down a worker or leak into another session.
pub(crate) fn guarded<R>(what: &'static str, f: impl FnOnce() -> R) -> Option<R> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::error!(what, "application code panicked");
            None
        },
    }
}

/// Capability handle passed to lobbies and embedding code.
///
/// Holds a weak reference, so a lobby keeping its handle alive does not keep
/// the server alive; calls after shutdown are logged no-ops.
#[derive(Clone)]
pub struct ServerHandle {
    inner: Weak<ServerInner>,
}

impl ServerHandle {
    pub(crate) fn new(inner: Weak<ServerInner>) -> Self {
        Self { inner }
    }

    #[cfg(test)]
    pub(crate) fn detached() -> Self {
        Self { inner: Weak::new() }
    }

    fn with_inner(&self, f: impl FnOnce(&Arc<ServerInner>)) {
        match self.inner.upgrade() {
            Some(inner) => f(&inner),
            None => debug!("server handle used after shutdown"),
        }
    }

    /// Queue an envelope for the named client's current connection.
    ///
    /// Dropped with a log line when the client is unknown or disconnected.
    pub fn send_to_client(&self, client_id: &str, envelope: &OutboundEnvelope) {
        self.with_inner(|inner| match inner.clients.by_id(client_id) {
            Some(client) => match client.connection() {
                Some(conn) => inner.send_to_conn(conn, envelope),
                None => debug!(client_id, "dropping frame for disconnected client"),
            },
            None => debug!(client_id, "dropping frame for unknown client"),
        });
    }

    /// Ids of all open lobbies.
    pub fn open_lobby_ids(&self) -> Vec<String> {
        let mut ids = Vec::new();
        self.with_inner(|inner| ids = inner.lobbies.open_ids());
        ids
    }

    /// The live lobby registered under `lobby_id`, if any.
    pub fn lobby(&self, lobby_id: &str) -> Option<Arc<dyn Lobby>> {
        let mut found = None;
        self.with_inner(|inner| {
            found = inner.lobbies.get(lobby_id).map(|entry| Arc::clone(entry.lobby()));
        });
        found
    }

    /// Evict a lobby unconditionally.
    ///
    /// Members keep their `currentLobby` reference until they leave or the
    /// embedding logic moves them; the id becomes available immediately.
    pub fn close_lobby(&self, lobby_id: &str) {
        self.with_inner(|inner| inner.lobbies.remove(lobby_id));
    }

    /// Forget a client record, connected or not.
    ///
    /// This is how embedding lobby logic discards participants that will
    /// not return; the server itself only drops lobbyless clients on
    /// disconnect.
    pub fn drop_client(&self, client_id: &str) {
        self.with_inner(|inner| inner.clients.discard(client_id));
    }

    /// Push the open-lobby listing to every connected client that is not in
    /// a lobby.
    pub fn broadcast_lobbies(&self) {
        self.with_inner(|inner| {
            for client in inner.clients.lobbyless_connected() {
                if let Some(conn) = client.connection() {
                    inner.push_lobby_list(conn);
                }
            }
        });
    }
}

impl std::fmt::Debug for ServerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerHandle").finish_non_exhaustive()
    }
}
