//! Inbound and outbound message envelopes.
//!
//! The two shapes differ only in that outbound frames carry an
//! `error_message` field. Inbound validation is strict: `command` must be a
//! string and `payload` must be an object, anything else is a
//! [`ProtocolError`] and never reaches command handling.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ProtocolError;

/// A validated client-to-server frame.
///
/// Obtained through [`InboundEnvelope::parse`], which enforces the wire
/// shape `{"command": <string>, "payload": <object>}`. Extra top-level
/// fields are ignored; the payload is handed to command handling verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InboundEnvelope {
    /// Command name. Matching against built-in commands is case-insensitive,
    /// but the original casing is preserved for application interpreters.
    pub command: String,

    /// Command arguments, always a JSON object.
    pub payload: Map<String, Value>,
}

impl InboundEnvelope {
    /// Parse and validate a raw text frame.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(text)?;

        let Value::Object(mut fields) = value else {
            return Err(ProtocolError::NotAnObject);
        };

        let command = match fields.remove("command") {
            Some(Value::String(command)) => command,
            Some(_) => return Err(ProtocolError::CommandNotAString),
            None => return Err(ProtocolError::MissingCommand),
        };

        let payload = match fields.remove("payload") {
            Some(Value::Object(payload)) => payload,
            Some(_) => return Err(ProtocolError::PayloadNotAnObject),
            None => return Err(ProtocolError::MissingPayload),
        };

        Ok(Self { command, payload })
    }

    /// String-typed payload field, `None` when absent or not a string.
    pub fn str_field(&self, name: &str) -> Option<&str> {
        self.payload.get(name).and_then(Value::as_str)
    }

    /// Raw payload field, `None` when absent.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.payload.get(name)
    }
}

/// A server-to-client frame.
///
/// `error_message` is the empty string on success; a non-empty value means
/// the command failed and `payload` should not be relied on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundEnvelope {
    /// Response or notification command name.
    pub command: String,

    /// Empty on success, a human-readable reason otherwise.
    pub error_message: String,

    /// Response data. `Value::Null` when the command has none.
    pub payload: Value,
}

impl OutboundEnvelope {
    /// A successful frame with the given payload.
    pub fn ok(command: impl Into<String>, payload: Value) -> Self {
        Self { command: command.into(), error_message: String::new(), payload }
    }

    /// A failed frame carrying only the error message.
    pub fn error(command: impl Into<String>, message: impl Into<String>) -> Self {
        Self { command: command.into(), error_message: message.into(), payload: Value::Null }
    }

    /// Whether this frame reports success.
    pub fn is_ok(&self) -> bool {
        self.error_message.is_empty()
    }

    /// Serialize to wire text.
    pub fn encode(&self) -> String {
        // Value-backed structs serialize infallibly; the fallback is for the
        // type system, not an expected path.
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"command":"command_error","error_message":"encoding failure","payload":null}"#
                .to_owned()
        })
    }
}
