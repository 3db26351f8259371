//! Remote API payloads: the response envelope and message pages.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::{Message, TypesError};

/// Opaque paging tokens returned with a message page.
///
/// `before` points at the next older page; an empty token means there is
/// nothing older to load.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Paging {
    /// Token for the previous (older) page
    #[serde(default)]
    pub before: String,
    /// Token for the next (newer) page
    #[serde(default)]
    pub after: String,
}

impl Paging {
    /// Whether an older page exists.
    pub fn can_load_more(&self) -> bool {
        !self.before.is_empty()
    }

    /// Encode for the key-value store.
    pub fn to_json(&self) -> Result<Vec<u8>, TypesError> {
        serde_json::to_vec(self).map_err(TypesError::JsonEncode)
    }

    /// Decode from the key-value store.
    pub fn from_json(bytes: &[u8]) -> Result<Self, TypesError> {
        serde_json::from_slice(bytes).map_err(TypesError::JsonDecode)
    }
}

/// A notification attached to an API response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// Notification type, e.g. `error` or `warning`
    #[serde(default, rename = "type")]
    pub kind: String,
    /// Human readable text
    #[serde(default)]
    pub message: String,
}

/// Envelope around every remote API response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    /// `SUCCESS` or `ERROR`
    #[serde(default)]
    pub status: Option<String>,
    /// The endpoint-specific payload
    #[serde(default = "Option::default")]
    pub data: Option<T>,
    /// Paging tokens for list endpoints
    #[serde(default)]
    pub paging: Option<Paging>,
    /// Welcome text configured for the conversation
    #[serde(default)]
    pub welcome_message: Option<String>,
    /// Text pinned above the conversation
    #[serde(default)]
    pub sticky_message: Option<String>,
    /// Errors and warnings
    #[serde(default)]
    pub notifications: Vec<Notification>,
}

impl<T: DeserializeOwned> ApiResponse<T> {
    /// Decode from JSON bytes.
    pub fn from_json(bytes: &[u8]) -> Result<Self, TypesError> {
        serde_json::from_slice(bytes).map_err(TypesError::JsonDecode)
    }
}

impl<T> ApiResponse<T> {
    /// First error text the server attached, if any.
    pub fn error_message(&self) -> Option<&str> {
        self.notifications
            .iter()
            .find(|n| n.kind.eq_ignore_ascii_case("error"))
            .or_else(|| self.notifications.first())
            .map(|n| n.message.as_str())
    }

    /// Take the payload, failing if the server sent none.
    pub fn into_data(self) -> Result<T, TypesError> {
        self.data
            .ok_or_else(|| TypesError::InvalidData("response carries no data".into()))
    }
}

/// One page of messages plus the conversation metadata sent with it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageCollection {
    /// Messages in the page
    pub messages: Vec<Message>,
    /// Paging tokens
    pub paging: Paging,
    /// Welcome text
    pub welcome_message: Option<String>,
    /// Sticky text
    pub sticky_message: Option<String>,
}

impl From<ApiResponse<Vec<Message>>> for MessageCollection {
    fn from(response: ApiResponse<Vec<Message>>) -> Self {
        Self {
            messages: response.data.unwrap_or_default(),
            paging: response.paging.unwrap_or_default(),
            welcome_message: response.welcome_message,
            sticky_message: response.sticky_message,
        }
    }
}

impl MessageCollection {
    /// Decode a message-list response.
    pub fn from_json(bytes: &[u8]) -> Result<Self, TypesError> {
        ApiResponse::<Vec<Message>>::from_json(bytes).map(Self::from)
    }
}
