//! Client records.
//!
//! A client is one external participant: an identity string, the connection
//! currently carrying it (if any), and the lobby it belongs to. The record
//! outlives its connection so a participant can drop and come back under
//! the same id while its lobby keeps a seat for it.

use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use crate::{connection::ConnectionId, lobby_registry::LobbyEntry};

/// One known participant.
///
/// Mutable fields live behind the record's own mutex; command handling for
/// the client is additionally serialized through
/// [`ClientRecord::lock_commands`], so two commands from one client never
/// execute concurrently even across a reconnect.
pub(crate) struct ClientRecord {
    id: String,
    state: Mutex<ClientState>,
    gate: Mutex<()>,
}

#[derive(Default)]
struct ClientState {
    conn: Option<ConnectionId>,
    lobby: Option<Arc<LobbyEntry>>,
    connected: bool,
}

impl ClientRecord {
    pub(crate) fn new(id: impl Into<String>, conn: ConnectionId) -> Self {
        Self {
            id: id.into(),
            state: Mutex::new(ClientState { conn: Some(conn), lobby: None, connected: true }),
            gate: Mutex::new(()),
        }
    }

    pub(crate) fn id(&self) -> &str {
        &self.id
    }

    pub(crate) fn connection(&self) -> Option<ConnectionId> {
        self.state.lock().conn
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    pub(crate) fn lobby(&self) -> Option<Arc<LobbyEntry>> {
        self.state.lock().lobby.clone()
    }

    pub(crate) fn set_lobby(&self, lobby: Option<Arc<LobbyEntry>>) {
        self.state.lock().lobby = lobby;
    }

    /// Attach a fresh connection after a disconnect.
    pub(crate) fn reconnect(&self, conn: ConnectionId) {
        let mut state = self.state.lock();
        state.conn = Some(conn);
        state.connected = true;
    }

    /// Detach `conn`, keeping identity and lobby membership.
    ///
    /// Returns `false` when `conn` is not the client's current connection
    /// (a newer connection already rebound the identity); the state is left
    /// alone in that case.
    pub(crate) fn detach_connection(&self, conn: ConnectionId) -> bool {
        let mut state = self.state.lock();
        if state.conn != Some(conn) {
            return false;
        }
        state.conn = None;
        state.connected = false;
        true
    }

    /// Mutual-exclusion scope for this client's command handling.
    pub(crate) fn lock_commands(&self) -> MutexGuard<'_, ()> {
        self.gate.lock()
    }
}

impl std::fmt::Debug for ClientRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ClientRecord")
            .field("id", &self.id)
            .field("conn", &state.conn)
            .field("connected", &state.connected)
            .field("in_lobby", &state.lobby.is_some())
            .finish()
    }
}
