//! Server error types.
//!
//! Four failure families reach clients, always as an `error_message` on an
//! outbound envelope addressed to the offending connection only:
//! protocol errors (malformed frames, from `parlor-proto`), session errors
//! (registry and membership misuse), application errors ([`InputError`]
//! raised by pluggable lobby code), and internal errors (anything caught at
//! the router boundary, including panics). None of them are fatal to the
//! process or visible to other clients.

use parlor_proto::ProtocolError;

/// An application-defined rejection of client input.
///
/// Raised by lobby `init` and by command interpreters; the message goes to
/// the originating client verbatim.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct InputError(String);

impl InputError {
    /// Wrap a client-facing message.
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Session-management failures.
///
/// All recoverable: the client is told what went wrong and no other state
/// changes.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// `start_lobby` named an id bound to a live lobby.
    #[error("lobby id in use")]
    LobbyIdInUse,

    /// `join_lobby` named an id with no live lobby behind it.
    #[error("no lobby with specified id exists")]
    UnknownLobby,

    /// `leave_lobby` from a client that has no lobby.
    #[error("this client is not registered with any lobby")]
    NotInLobby,

    /// An application command arrived before the client joined a lobby.
    #[error("must join a lobby first")]
    MustJoinFirst,

    /// A command arrived on a connection that never bound an identity.
    #[error("cannot continue without unique id")]
    NoIdentity,

    /// A connection presented the id of a client that is still connected.
    #[error("don't steal identities")]
    IdentityInUse,

    /// A required payload field is absent or has the wrong type.
    #[error("no {0} provided")]
    MissingField(&'static str),
}

/// Fatal-to-the-operation errors surfaced by the embedding API
/// (construction and the transport adapter), never by command handling.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Spawning a server thread or binding a socket failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Transport-level failure in the WebSocket adapter.
    #[error("transport error: {0}")]
    Transport(String),
}

/// Internal classification of a failed command, used by the router to pick
/// the `error_message` it sends back.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CommandError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Application(#[from] InputError),

    /// Caught panic or other unexpected failure; the message is best-effort.
    #[error("internal server error")]
    Internal,
}
