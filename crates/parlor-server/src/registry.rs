//! Client registry.
//!
//! Concurrent maps from connection handle and from client id to the shared
//! [`ClientRecord`]. Binding is where identity rules live: a connection may
//! present the id of a disconnected client to resume it, a fresh id to
//! register it, or nothing to have one minted. Presenting the id of a
//! client that is still connected is refused.

use std::sync::Arc;

use dashmap::{DashMap, mapref::entry::Entry};

use crate::{client::ClientRecord, connection::ConnectionId, error::SessionError};

/// Outcome of binding a connection to a client identity.
#[derive(Debug)]
pub(crate) enum BindOutcome {
    /// A new client record was created.
    New(Arc<ClientRecord>),
    /// An existing disconnected client was resumed under its old id.
    Reconnected(Arc<ClientRecord>),
}

impl BindOutcome {
    pub(crate) fn record(&self) -> &Arc<ClientRecord> {
        match self {
            Self::New(record) | Self::Reconnected(record) => record,
        }
    }
}

/// Registry of all currently known clients.
#[derive(Default)]
pub(crate) struct ClientRegistry {
    by_conn: DashMap<ConnectionId, Arc<ClientRecord>>,
    by_id: DashMap<String, Arc<ClientRecord>>,
}

impl ClientRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Bind `conn` to the requested identity, minting one when absent.
    pub(crate) fn bind(
        &self,
        conn: ConnectionId,
        requested_id: Option<&str>,
    ) -> Result<BindOutcome, SessionError> {
        match requested_id {
            Some(id) => self.bind_named(conn, id),
            None => loop {
                // Collisions on a fresh 64-bit id are vanishingly rare; loop
                // anyway so uniqueness never depends on luck.
                match self.bind_named(conn, &generated_client_id()) {
                    Err(SessionError::IdentityInUse) => {},
                    outcome => break outcome,
                }
            },
        }
    }

    fn bind_named(&self, conn: ConnectionId, id: &str) -> Result<BindOutcome, SessionError> {
        match self.by_id.entry(id.to_owned()) {
            Entry::Occupied(entry) => {
                let record = Arc::clone(entry.get());
                if record.is_connected() {
                    return Err(SessionError::IdentityInUse);
                }
                record.reconnect(conn);
                drop(entry);
                self.by_conn.insert(conn, Arc::clone(&record));
                Ok(BindOutcome::Reconnected(record))
            },
            Entry::Vacant(entry) => {
                let record = Arc::new(ClientRecord::new(id, conn));
                entry.insert(Arc::clone(&record));
                self.by_conn.insert(conn, Arc::clone(&record));
                Ok(BindOutcome::New(record))
            },
        }
    }

    pub(crate) fn by_connection(&self, conn: ConnectionId) -> Option<Arc<ClientRecord>> {
        self.by_conn.get(&conn).map(|entry| Arc::clone(&entry))
    }

    pub(crate) fn by_id(&self, id: &str) -> Option<Arc<ClientRecord>> {
        self.by_id.get(id).map(|entry| Arc::clone(&entry))
    }

    /// Detach a connection from its client.
    ///
    /// The record survives while it has a lobby (the participant may come
    /// back); a lobbyless client has nothing referencing it and is dropped
    /// outright. Returns the affected record, or `None` when the connection
    /// was unknown or its identity had already been rebound by a newer
    /// connection.
    pub(crate) fn disconnect(&self, conn: ConnectionId) -> Option<Arc<ClientRecord>> {
        let (_, record) = self.by_conn.remove(&conn)?;
        if !record.detach_connection(conn) {
            return None;
        }
        if record.lobby().is_none() {
            self.by_id.remove(record.id());
        }
        Some(record)
    }

    /// Forget a client entirely, whatever its state.
    pub(crate) fn discard(&self, id: &str) {
        if let Some((_, record)) = self.by_id.remove(id) {
            if let Some(conn) = record.connection() {
                self.by_conn.remove(&conn);
            }
        }
    }

    /// Connected clients that are not in any lobby.
    pub(crate) fn lobbyless_connected(&self) -> Vec<Arc<ClientRecord>> {
        self.by_id
            .iter()
            .filter(|entry| entry.is_connected() && entry.lobby().is_none())
            .map(|entry| Arc::clone(&entry))
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.by_id.len()
    }
}

/// Mint a 16-hex-digit client id from OS randomness.
fn generated_client_id() -> String {
    let mut bytes = [0u8; 8];
    // A failed OS RNG leaves zeroed bytes; uniqueness is still enforced by
    // the registry insert, so this stays total rather than fallible.
    let _ = getrandom::fill(&mut bytes);
    format!("{:016x}", u64::from_le_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn(raw: u64) -> ConnectionId {
        ConnectionId::new(raw)
    }

    #[test]
    fn binding_a_fresh_id_creates_a_client() {
        let registry = ClientRegistry::new();

        let outcome = registry.bind(conn(1), Some("ada")).unwrap();
        assert!(matches!(outcome, BindOutcome::New(_)));
        assert_eq!(outcome.record().id(), "ada");
        assert_eq!(registry.by_connection(conn(1)).unwrap().id(), "ada");
    }

    #[test]
    fn binding_without_an_id_mints_one() {
        let registry = ClientRegistry::new();

        let first = registry.bind(conn(1), None).unwrap();
        let second = registry.bind(conn(2), None).unwrap();

        assert_eq!(first.record().id().len(), 16);
        assert_ne!(first.record().id(), second.record().id());
    }

    #[test]
    fn connected_identity_cannot_be_taken_over() {
        let registry = ClientRegistry::new();
        registry.bind(conn(1), Some("ada")).unwrap();

        let err = registry.bind(conn(2), Some("ada")).unwrap_err();
        assert!(matches!(err, SessionError::IdentityInUse));
        // The original binding is untouched.
        assert_eq!(registry.by_connection(conn(1)).unwrap().id(), "ada");
        assert!(registry.by_connection(conn(2)).is_none());
    }

    #[test]
    fn lobbyless_disconnect_forgets_the_client() {
        let registry = ClientRegistry::new();
        registry.bind(conn(1), Some("ada")).unwrap();

        registry.disconnect(conn(1));

        assert!(registry.by_id("ada").is_none());
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn discard_drops_both_mappings() {
        let registry = ClientRegistry::new();
        registry.bind(conn(1), Some("ada")).unwrap();

        registry.discard("ada");

        assert!(registry.by_id("ada").is_none());
        assert!(registry.by_connection(conn(1)).is_none());
    }

    #[test]
    fn concurrent_binds_of_one_id_admit_exactly_one_client() {
        use std::{sync::Barrier, thread};

        let registry = std::sync::Arc::new(ClientRegistry::new());
        let barrier = std::sync::Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|n| {
                let registry = std::sync::Arc::clone(&registry);
                let barrier = std::sync::Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    registry.bind(conn(n), Some("ada")).is_ok()
                })
            })
            .collect();

        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|&admitted| admitted)
            .count();
        assert_eq!(admitted, 1);
        assert_eq!(registry.len(), 1);
    }
}
