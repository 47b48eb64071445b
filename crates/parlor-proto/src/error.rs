//! Protocol-level errors.

/// Errors raised while validating an inbound wire frame.
///
/// All of these mean the frame was rejected before any server state was
/// touched; the sender gets the message back in an `error_message` field and
/// no other connection is affected.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The frame was not valid JSON at all.
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),

    /// The frame parsed as JSON but the top level was not an object.
    #[error("frame must be a json object")]
    NotAnObject,

    /// The `command` field is absent.
    #[error("frame is missing the 'command' field")]
    MissingCommand,

    /// The `command` field is present but not a string.
    #[error("the 'command' field must be a string")]
    CommandNotAString,

    /// The `payload` field is absent.
    #[error("frame is missing the 'payload' field")]
    MissingPayload,

    /// The `payload` field is present but not an object.
    #[error("the 'payload' field must be an object")]
    PayloadNotAnObject,
}
