//! Chat-room application on top of parlor-server.
//!
//! The smallest useful embedding: a lobby is a chat room, the interpreter
//! understands `message` (broadcast to everyone else in the room) and
//! `whisper` (direct to one member). A room closes itself when its last
//! member leaves, which is what makes the server's lazy eviction kick in.

use std::{any::Any, sync::Arc};

use parking_lot::Mutex;
use parlor_proto::{InboundEnvelope, OutboundEnvelope};
use parlor_server::{CommandInterpreter, InputError, Lobby, LobbyFactory, ServerHandle};
use serde_json::{Value, json};
use tracing::debug;

/// One chat room.
pub struct ChatLobby {
    id: String,
    handle: ServerHandle,
    state: Mutex<RoomState>,
}

#[derive(Default)]
struct RoomState {
    members: Vec<String>,
    /// Set once the room has been occupied and emptied again.
    closed: bool,
}

impl ChatLobby {
    /// Create an empty room. Rooms are built through [`chat_lobby_factory`]
    /// in a running server.
    pub fn new(handle: ServerHandle, id: impl Into<String>) -> Self {
        Self { id: id.into(), handle, state: Mutex::new(RoomState::default()) }
    }

    /// Room members, in join order.
    pub fn members(&self) -> Vec<String> {
        self.state.lock().members.clone()
    }

    /// Broadcast `text` from `sender` to every other member.
    pub fn send_message(&self, sender: &str, text: &str) {
        let recipients: Vec<String> = self
            .state
            .lock()
            .members
            .iter()
            .filter(|member| member.as_str() != sender)
            .cloned()
            .collect();

        let envelope = OutboundEnvelope::ok(
            "message",
            json!({ "sender": sender, "message": text }),
        );
        for recipient in recipients {
            self.handle.send_to_client(&recipient, &envelope);
        }
    }

    /// Deliver `text` from `sender` to `recipient` alone.
    pub fn whisper(&self, sender: &str, recipient: &str, text: &str) -> Result<(), InputError> {
        if !self.state.lock().members.iter().any(|member| member == recipient) {
            return Err(InputError::new("no such member in this room"));
        }

        let envelope = OutboundEnvelope::ok(
            "whisper",
            json!({ "sender": sender, "message": text }),
        );
        self.handle.send_to_client(recipient, &envelope);
        Ok(())
    }
}

impl Lobby for ChatLobby {
    fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    fn add_client(&self, client_id: &str) {
        let mut state = self.state.lock();
        if !state.members.iter().any(|member| member == client_id) {
            state.members.push(client_id.to_owned());
        }
    }

    fn remove_client(&self, client_id: &str) {
        let mut state = self.state.lock();
        state.members.retain(|member| member != client_id);
        if state.members.is_empty() {
            // Last one out turns off the lights; the registry sweeps the
            // room on its next touch.
            state.closed = true;
        }
    }

    fn client_disconnected(&self, client_id: &str) {
        debug!(room = self.id, client_id, "member went offline");
    }

    fn serialize(&self) -> Value {
        let state = self.state.lock();
        json!({ "lobby_id": self.id, "member_count": state.members.len() })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Factory wiring [`ChatLobby`] into a server.
pub fn chat_lobby_factory() -> LobbyFactory {
    Arc::new(|handle, id| Arc::new(ChatLobby::new(handle, id)) as Arc<dyn Lobby>)
}

/// Verb handling for chat rooms.
pub struct ChatInterpreter;

impl CommandInterpreter for ChatInterpreter {
    fn interpret(
        &self,
        lobby: &Arc<dyn Lobby>,
        client_id: &str,
        envelope: &InboundEnvelope,
    ) -> Result<(), InputError> {
        let room = lobby
            .as_any()
            .downcast_ref::<ChatLobby>()
            .ok_or_else(|| InputError::new("not a chat room"))?;

        if envelope.command.eq_ignore_ascii_case("message") {
            let text = envelope
                .str_field("message")
                .ok_or_else(|| InputError::new("no message provided"))?;
            room.send_message(client_id, text);
            Ok(())
        } else if envelope.command.eq_ignore_ascii_case("whisper") {
            let text = envelope
                .str_field("message")
                .ok_or_else(|| InputError::new("no message provided"))?;
            let recipient = envelope
                .str_field("recipient")
                .ok_or_else(|| InputError::new("no recipient provided"))?;
            room.whisper(client_id, recipient, text)
        } else {
            Err(InputError::new(format!("unknown command '{}'", envelope.command)))
        }
    }
}
