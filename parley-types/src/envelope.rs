//! Push envelope - the payload delivered through push notifications.

use serde::{Deserialize, Serialize};

use crate::{Message, TypesError};

/// Outer wrapper of a push payload: `{ "parley": { "type": ..., "object": ... } }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushEnvelope {
    /// The typed payload
    pub parley: RemotePayload,
}

/// What a push carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "object", rename_all = "lowercase")]
pub enum RemotePayload {
    /// A new message
    Message(Message),
    /// A conversation event such as agent typing
    Event(RemoteEvent),
}

/// A conversation event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEvent {
    /// Which event happened
    pub name: EventName,
}

/// Known event names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventName {
    /// The agent started typing
    StartTyping,
    /// The agent stopped typing
    StopTyping,
    /// Any event this client does not handle
    #[serde(other)]
    Unknown,
}

impl PushEnvelope {
    /// Decode from JSON bytes.
    pub fn from_json(bytes: &[u8]) -> Result<Self, TypesError> {
        serde_json::from_slice(bytes).map_err(TypesError::JsonDecode)
    }

    /// Encode to JSON bytes.
    pub fn to_json(&self) -> Result<Vec<u8>, TypesError> {
        serde_json::to_vec(self).map_err(TypesError::JsonEncode)
    }
}
