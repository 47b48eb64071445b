//! Lobby registry.
//!
//! Maps lobby ids to live lobby instances. Creation goes through the
//! injected factory; removal is lazy: a lobby reports itself closed and the
//! next operation that touches its id sweeps it out. The server never
//! closes a lobby on its own.
//!
//! The backing map is guarded by the scoped read/write lock. `create` holds
//! the lock's upgradable scope across its whole check/build/insert
//! sequence, so two concurrent creates for one id serialize and the map can
//! never bind an id to two lobbies.

use std::{collections::HashMap, sync::Arc};

use parking_lot::{Mutex, MutexGuard};
use serde_json::Value;

use crate::{
    error::InputError,
    lobby::{Lobby, LobbyFactory},
    lock::ScopedRwLock,
    server::ServerHandle,
};

/// A registered lobby plus the server-side state attached to it.
pub(crate) struct LobbyEntry {
    id: String,
    lobby: Arc<dyn Lobby>,
    /// Join/leave sequences for this lobby run under this gate so two
    /// membership changes never interleave (§ per-lobby mutual exclusion).
    membership: Mutex<()>,
}

impl LobbyEntry {
    fn new(id: impl Into<String>, lobby: Arc<dyn Lobby>) -> Self {
        Self { id: id.into(), lobby, membership: Mutex::new(()) }
    }

    pub(crate) fn id(&self) -> &str {
        &self.id
    }

    pub(crate) fn lobby(&self) -> &Arc<dyn Lobby> {
        &self.lobby
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.lobby.is_closed()
    }

    /// Mutual-exclusion scope for membership changes on this lobby.
    pub(crate) fn lock_membership(&self) -> MutexGuard<'_, ()> {
        self.membership.lock()
    }
}

impl std::fmt::Debug for LobbyEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LobbyEntry").field("id", &self.id).finish_non_exhaustive()
    }
}

/// Failure modes of [`LobbyRegistry::create`].
#[derive(Debug, thiserror::Error)]
pub(crate) enum CreateError {
    /// The id is bound to a lobby that has not closed.
    #[error("lobby id in use")]
    IdInUse,

    /// The new lobby rejected its creation arguments; nothing was inserted.
    #[error(transparent)]
    Init(#[from] InputError),
}

/// Registry of all live lobbies for one server.
pub(crate) struct LobbyRegistry {
    entries: ScopedRwLock<HashMap<String, Arc<LobbyEntry>>>,
    factory: LobbyFactory,
}

impl LobbyRegistry {
    pub(crate) fn new(factory: LobbyFactory) -> Self {
        Self { entries: ScopedRwLock::new(HashMap::new()), factory }
    }

    /// Create and register a lobby under `id`.
    ///
    /// A stale closed entry under the same id is replaced; a live one makes
    /// this fail with [`CreateError::IdInUse`]. When the request carried
    /// `arguments`, the new lobby's `init` runs before the entry is
    /// published, and an init failure leaves the registry unchanged.
    ///
    /// The upgradable scope is held across factory and init, so a slow
    /// `init` briefly serializes other creates (reads stay concurrent).
    /// That is the price of never observing two lobbies under one id.
    pub(crate) fn create(
        &self,
        handle: ServerHandle,
        id: &str,
        init_args: Option<&Value>,
    ) -> Result<Arc<LobbyEntry>, CreateError> {
        let scope = self.entries.upgradable_scope();

        if let Some(existing) = scope.get(id) {
            if !existing.is_closed() {
                return Err(CreateError::IdInUse);
            }
            // Stale entry: it is replaced by the insert below, under the
            // same scope, so no window exists where the id is unbound.
        }

        let lobby = (self.factory)(handle, id);
        if let Some(args) = init_args {
            lobby.init(args)?;
        }

        let entry = Arc::new(LobbyEntry::new(id, lobby));
        let mut scope = scope.upgrade();
        scope.insert(id.to_owned(), Arc::clone(&entry));

        Ok(entry)
    }

    /// Look up a live lobby, sweeping a closed one encountered under `id`.
    pub(crate) fn get(&self, id: &str) -> Option<Arc<LobbyEntry>> {
        let entry = {
            let scope = self.entries.read_scope();
            scope.get(id).cloned()
        };

        let entry = entry?;
        if !entry.is_closed() {
            return Some(entry);
        }

        let mut scope = self.entries.write_scope();
        // Re-check under the write scope: a concurrent create may already
        // have replaced the stale entry with a live lobby.
        if scope.get(id).is_some_and(|current| current.is_closed()) {
            scope.remove(id);
        }
        None
    }

    /// All live entries, sweeping the closed ones encountered.
    pub(crate) fn open_entries(&self) -> Vec<Arc<LobbyEntry>> {
        let (live, stale) = {
            let scope = self.entries.read_scope();
            let mut live = Vec::new();
            let mut stale = Vec::new();
            for (id, entry) in scope.iter() {
                if entry.is_closed() {
                    stale.push(id.clone());
                } else {
                    live.push(Arc::clone(entry));
                }
            }
            (live, stale)
        };

        if !stale.is_empty() {
            let mut scope = self.entries.write_scope();
            for id in stale {
                if scope.get(&id).is_some_and(|current| current.is_closed()) {
                    scope.remove(&id);
                }
            }
        }

        live
    }

    /// Ids of all live lobbies.
    pub(crate) fn open_ids(&self) -> Vec<String> {
        self.open_entries().iter().map(|entry| entry.id().to_owned()).collect()
    }

    /// Unconditional eviction.
    pub(crate) fn remove(&self, id: &str) {
        self.entries.write_scope().remove(id);
    }
}

impl std::fmt::Debug for LobbyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LobbyRegistry")
            .field("lobby_count", &self.entries.read_scope().len())
            .finish_non_exhaustive()
    }
}
