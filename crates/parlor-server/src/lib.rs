//! Embeddable real-time session server.
//!
//! parlor-server accepts many persistent client connections, groups clients
//! into named lobbies whose behavior is supplied by the embedder, and
//! routes structured commands between clients and the lobby that owns
//! them. Game or application rules never live here; they arrive through
//! the [`Lobby`] and [`CommandInterpreter`] traits and a [`LobbyFactory`]
//! handed over at construction.
//!
//! # Architecture
//!
//! Transport callbacks (connect, message, disconnect) are wrapped as units
//! of work and run on an injected [`TaskDispatcher`] worker pool; the I/O
//! thread never executes application logic. The command router serializes
//! handling per client in receipt order and answers every failure with an
//! `error_message` envelope to the offending connection only. All outbound
//! frames funnel through a single-consumer delivery queue that preserves
//! per-connection ordering regardless of which worker produced them. The
//! lobby registry is guarded by a scoped read/write lock ([`lock`]) and
//! evicts lobbies lazily once they report themselves closed.
//!
//! # Embedding
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use parlor_server::*;
//! # struct MyLobby;
//! # impl Lobby for MyLobby {
//! #     fn is_closed(&self) -> bool { false }
//! #     fn add_client(&self, _: &str) {}
//! #     fn remove_client(&self, _: &str) {}
//! #     fn as_any(&self) -> &dyn std::any::Any { self }
//! # }
//! # struct MyInterpreter;
//! # impl CommandInterpreter for MyInterpreter {
//! #     fn interpret(
//! #         &self,
//! #         _: &Arc<dyn Lobby>,
//! #         _: &str,
//! #         _: &parlor_proto::InboundEnvelope,
//! #     ) -> Result<(), InputError> { Ok(()) }
//! # }
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let dispatcher = Arc::new(TaskDispatcher::with_hardware_parallelism()?);
//! let server = SessionServer::new(
//!     ServerConfig::default(),
//!     dispatcher,
//!     Arc::new(|_handle, _id| Arc::new(MyLobby) as Arc<dyn Lobby>),
//!     Arc::new(MyInterpreter),
//! )?;
//! # Ok(()) }
//! ```
//!
//! Wire a transport by calling [`SessionServer::connection_opened`],
//! [`SessionServer::message_received`] and
//! [`SessionServer::connection_closed`], or use the bundled
//! [`transport::WsTransport`] WebSocket adapter.

mod client;
mod connection;
mod dispatch;
mod error;
mod lobby;
mod lobby_registry;
pub mod lock;
mod outbound;
mod registry;
mod router;
mod server;
pub mod transport;

pub use connection::{Connection, ConnectionError, ConnectionId};
pub use dispatch::TaskDispatcher;
pub use error::{InputError, ServerError, SessionError};
pub use lobby::{CommandInterpreter, Lobby, LobbyFactory};
pub use outbound::DeliveryQueue;
pub use server::{ServerConfig, ServerHandle, SessionServer};
