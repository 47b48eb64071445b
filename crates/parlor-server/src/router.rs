//! Command routing.
//!
//! Every inbound frame lands here after the connection's open event has
//! been processed. The router validates the envelope, handles the fixed set
//! of session commands itself, and forwards everything else to the
//! application interpreter bound to the client's current lobby.
//!
//! Failure handling is strictly per-sender: protocol, session, application,
//! and internal errors all become a non-empty `error_message` on a response
//! to the originating connection, and nothing else changes. Session
//! commands answer under `<command>_response`; malformed frames and failed
//! application commands answer under `command_error`.

use std::sync::Arc;

use parlor_proto::{InboundEnvelope, OutboundEnvelope};
use serde_json::Value;
use tracing::{debug, info};

use crate::{
    client::ClientRecord,
    connection::ConnectionId,
    error::{CommandError, SessionError},
    lobby_registry::CreateError,
    server::{ServerInner, guarded},
};

/// The session commands handled by the core, matched case-insensitively.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SessionCommand {
    StartLobby,
    JoinLobby,
    LeaveLobby,
    GetLobbies,
}

impl SessionCommand {
    pub(crate) fn parse(name: &str) -> Option<Self> {
        if name.eq_ignore_ascii_case("start_lobby") {
            Some(Self::StartLobby)
        } else if name.eq_ignore_ascii_case("join_lobby") {
            Some(Self::JoinLobby)
        } else if name.eq_ignore_ascii_case("leave_lobby") {
            Some(Self::LeaveLobby)
        } else if name.eq_ignore_ascii_case("get_lobbies") {
            Some(Self::GetLobbies)
        } else {
            None
        }
    }

    pub(crate) fn response_command(self) -> &'static str {
        match self {
            Self::StartLobby => "start_lobby_response",
            Self::JoinLobby => "join_lobby_response",
            Self::LeaveLobby => "leave_lobby_response",
            Self::GetLobbies => "get_lobbies_response",
        }
    }
}

impl From<CreateError> for CommandError {
    fn from(err: CreateError) -> Self {
        match err {
            CreateError::IdInUse => Self::Session(SessionError::LobbyIdInUse),
            CreateError::Init(input) => Self::Application(input),
        }
    }
}

impl ServerInner {
    /// Handle one raw frame from `conn`.
    pub(crate) fn process_frame(&self, conn: ConnectionId, raw: &str) {
        let envelope = match InboundEnvelope::parse(raw) {
            Ok(envelope) => envelope,
            Err(err) => {
                let err = CommandError::Protocol(err);
                debug!(%conn, %err, "rejecting malformed frame");
                self.send_to_conn(conn, &OutboundEnvelope::error("command_error", err.to_string()));
                return;
            },
        };

        let Some(client) = self.clients.by_connection(conn) else {
            // The connection never bound an identity (its bind was refused).
            self.send_to_conn(
                conn,
                &OutboundEnvelope::error("command_error", SessionError::NoIdentity.to_string()),
            );
            return;
        };

        // Everything below is mutually exclusive per client.
        let _commands = client.lock_commands();

        match SessionCommand::parse(&envelope.command) {
            Some(command) => {
                let response = command.response_command();
                match self.run_session_command(&client, command, &envelope) {
                    Ok(payload) => {
                        self.send_to_conn(conn, &OutboundEnvelope::ok(response, payload));
                    },
                    Err(err) => {
                        debug!(
                            client_id = client.id(),
                            command = %envelope.command,
                            %err,
                            "session command failed"
                        );
                        self.send_to_conn(conn, &OutboundEnvelope::error(response, err.to_string()));
                    },
                }
            },
            None => {
                if let Err(err) = self.forward_to_lobby(&client, &envelope) {
                    debug!(
                        client_id = client.id(),
                        command = %envelope.command,
                        %err,
                        "application command failed"
                    );
                    self.send_to_conn(
                        conn,
                        &OutboundEnvelope::error("command_error", err.to_string()),
                    );
                }
            },
        }
    }

    fn run_session_command(
        &self,
        client: &Arc<ClientRecord>,
        command: SessionCommand,
        envelope: &InboundEnvelope,
    ) -> Result<Value, CommandError> {
        match command {
            SessionCommand::StartLobby => self.start_lobby(client, envelope),
            SessionCommand::JoinLobby => self.join_lobby(client, envelope),
            SessionCommand::LeaveLobby => self.leave_lobby(client),
            SessionCommand::GetLobbies => Ok(self.lobby_listing()),
        }
    }

    /// `start_lobby {lobby_id, arguments?}`: create, then seat the
    /// requesting client as the first member.
    fn start_lobby(
        &self,
        client: &Arc<ClientRecord>,
        envelope: &InboundEnvelope,
    ) -> Result<Value, CommandError> {
        let lobby_id = envelope
            .str_field("lobby_id")
            .ok_or(SessionError::MissingField("lobby_id"))?;
        let init_args = envelope.field("arguments");

        let handle = self.server_handle();
        let entry = guarded("lobby creation", || {
            self.lobbies.create(handle, lobby_id, init_args)
        })
        .ok_or(CommandError::Internal)??;

        {
            let _membership = entry.lock_membership();
            guarded("add_client", || entry.lobby().add_client(client.id()))
                .ok_or(CommandError::Internal)?;
        }
        client.set_lobby(Some(Arc::clone(&entry)));

        info!(client_id = client.id(), lobby_id, "lobby started");
        Ok(Value::Null)
    }

    /// `join_lobby {lobby_id}`: migrate the client into an existing lobby.
    fn join_lobby(
        &self,
        client: &Arc<ClientRecord>,
        envelope: &InboundEnvelope,
    ) -> Result<Value, CommandError> {
        let lobby_id = envelope
            .str_field("lobby_id")
            .ok_or(SessionError::MissingField("lobby_id"))?;
        let entry = self.lobbies.get(lobby_id).ok_or(SessionError::UnknownLobby)?;

        if let Some(previous) = client.lobby() {
            // Taken and released before the target's gate: holding both at
            // once would let two opposite migrations deadlock.
            let _membership = previous.lock_membership();
            guarded("remove_client", || previous.lobby().remove_client(client.id()))
                .ok_or(CommandError::Internal)?;
        }

        {
            let _membership = entry.lock_membership();
            guarded("add_client", || entry.lobby().add_client(client.id()))
                .ok_or(CommandError::Internal)?;
        }
        client.set_lobby(Some(Arc::clone(&entry)));

        info!(client_id = client.id(), lobby_id, "client joined lobby");
        Ok(Value::Null)
    }

    /// `leave_lobby {}`: drop membership and clear the client's lobby.
    fn leave_lobby(&self, client: &Arc<ClientRecord>) -> Result<Value, CommandError> {
        let entry = client.lobby().ok_or(SessionError::NotInLobby)?;

        {
            let _membership = entry.lock_membership();
            guarded("remove_client", || entry.lobby().remove_client(client.id()))
                .ok_or(CommandError::Internal)?;
        }
        client.set_lobby(None);

        info!(client_id = client.id(), lobby_id = entry.id(), "client left lobby");
        Ok(Value::Null)
    }

    /// Hand an unrecognized command to the interpreter bound to the
    /// client's lobby.
    fn forward_to_lobby(
        &self,
        client: &Arc<ClientRecord>,
        envelope: &InboundEnvelope,
    ) -> Result<(), CommandError> {
        let entry = client.lobby().ok_or(SessionError::MustJoinFirst)?;
        let lobby = Arc::clone(entry.lobby());

        match guarded("interpret", || self.interpreter.interpret(&lobby, client.id(), envelope)) {
            Some(Ok(())) => Ok(()),
            Some(Err(input)) => Err(CommandError::Application(input)),
            None => Err(CommandError::Internal),
        }
    }
}
