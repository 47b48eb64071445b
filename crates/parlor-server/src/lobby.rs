//! Pluggable lobby and interpreter capability traits.
//!
//! The core knows nothing about what a lobby *is* beyond this interface:
//! membership callbacks, a closing flag, and a wire representation. All
//! game or application rules live behind it, supplied through a
//! [`LobbyFactory`] at server construction.

use std::{any::Any, sync::Arc};

use parlor_proto::InboundEnvelope;
use serde_json::Value;

use crate::{error::InputError, server::ServerHandle};

/// An application-defined multi-client session unit.
///
/// Implementations own their membership and internal state and guard it
/// themselves (methods take `&self`; the server may call them from any
/// worker thread). The server adds a per-lobby mutual-exclusion scope
/// around join/leave sequences, so `add_client`/`remove_client` pairs from
/// different clients never interleave on one lobby.
///
/// Methods must not call back into the lobby registry (create, close,
/// list); doing so from `init` would deadlock the registry's create scope.
/// Sending frames through [`ServerHandle::send_to_client`] is always safe.
pub trait Lobby: Send + Sync {
    /// Validate and apply creation arguments.
    ///
    /// Runs once, before the lobby is published in the registry. An
    /// [`InputError`] aborts creation and is relayed to the requesting
    /// client; the registry is left untouched.
    fn init(&self, args: &Value) -> Result<(), InputError> {
        let _ = args;
        Ok(())
    }

    /// Whether this lobby is finished.
    ///
    /// Once `true`, the registry evicts the entry lazily on the next touch.
    /// Must be cheap; it is called under registry lock scopes. The server
    /// never closes a lobby itself.
    fn is_closed(&self) -> bool;

    /// A client was added to the membership.
    fn add_client(&self, client_id: &str);

    /// A client was removed from the membership.
    fn remove_client(&self, client_id: &str);

    /// A member's connection came back under the same client id.
    fn client_reconnected(&self, client_id: &str) {
        let _ = client_id;
    }

    /// A member's connection dropped; the client record survives for a
    /// possible reconnect.
    fn client_disconnected(&self, client_id: &str) {
        let _ = client_id;
    }

    /// Wire representation for lobby listings.
    fn serialize(&self) -> Value {
        Value::Null
    }

    /// Downcast support for application interpreters.
    fn as_any(&self) -> &dyn Any;
}

/// Application verb handling for commands the core does not recognize.
///
/// One interpreter instance serves the whole server; the lobby the sending
/// client belongs to is passed in per call. Returning an [`InputError`]
/// sends the message to the originating client; panics are caught at the
/// router boundary and surfaced as an internal error.
pub trait CommandInterpreter: Send + Sync {
    /// Act on one application command from `client_id`.
    fn interpret(
        &self,
        lobby: &Arc<dyn Lobby>,
        client_id: &str,
        envelope: &InboundEnvelope,
    ) -> Result<(), InputError>;
}

/// Constructor for application lobbies, supplied once at server
/// construction.
///
/// Receives a [`ServerHandle`] for sending frames later and the id the
/// lobby will be registered under. Construction itself cannot fail;
/// argument validation belongs in [`Lobby::init`].
pub type LobbyFactory = Arc<dyn Fn(ServerHandle, &str) -> Arc<dyn Lobby> + Send + Sync>;
