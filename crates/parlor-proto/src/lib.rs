//! Wire envelope types for the parlor session protocol.
//!
//! Every message between a client and the server is a UTF-8 JSON object.
//! Inbound frames carry `{"command": <string>, "payload": <object>}`;
//! outbound frames add an `error_message` field that is the empty string on
//! success. Framing (how a text message is delimited on the wire) belongs to
//! the transport and is out of scope here.
//!
//! This crate performs structural validation only: a parsed
//! [`InboundEnvelope`] is guaranteed to have a string command and an object
//! payload, nothing more. What a command means is decided by the server core
//! or by the application interpreter bound to a lobby.

mod envelope;
mod error;

pub use envelope::{InboundEnvelope, OutboundEnvelope};
pub use error::ProtocolError;
