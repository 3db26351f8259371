//! Chat messages.
//!
//! A [`Message`] has an immutable client-side identity ([`LocalId`]) and a
//! set of mutable fields that change as the message moves through the send
//! pipeline or is refreshed from the remote side.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::{LocalId, RemoteId, TypesError};

/// Who authored a message.
///
/// Encoded on the wire as the numeric `typeId`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum MessageKind {
    /// Written by the local user
    User = 1,
    /// Written by a human agent
    #[default]
    Agent = 2,
    /// Automatic message from the remote system
    Auto = 3,
    /// System message shown on the user side
    SystemUser = 4,
    /// System message shown on the agent side
    SystemAgent = 5,
}

impl TryFrom<u8> for MessageKind {
    type Error = TypesError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(MessageKind::User),
            2 => Ok(MessageKind::Agent),
            3 => Ok(MessageKind::Auto),
            4 => Ok(MessageKind::SystemUser),
            5 => Ok(MessageKind::SystemAgent),
            _ => Err(TypesError::InvalidMessageKind(value)),
        }
    }
}

impl From<MessageKind> for u8 {
    fn from(kind: MessageKind) -> Self {
        kind as u8
    }
}

/// Delivery state of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SendStatus {
    /// Authored locally, not yet confirmed by the remote side
    Pending,
    /// The remote side rejected the message
    Failed,
    /// Stored remotely
    #[default]
    Success,
}

/// Media that has been uploaded and is referenced by id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Media {
    /// Remote media identifier (a path on the media endpoint)
    pub id: String,
    /// Optional caption
    #[serde(default)]
    pub description: Option<String>,
    /// MIME type of the media
    #[serde(default)]
    pub mime_type: String,
}

/// Media attached locally that still has to be uploaded.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalMedia {
    /// Raw file contents
    pub bytes: Vec<u8>,
    /// MIME type of the file
    pub mime_type: String,
    /// File name sent with the upload
    pub file_name: String,
}

impl std::fmt::Debug for LocalMedia {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalMedia")
            .field("bytes", &format!("[{} bytes]", self.bytes.len()))
            .field("mime_type", &self.mime_type)
            .field("file_name", &self.file_name)
            .finish()
    }
}

/// Kind of action attached to a button.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ButtonKind {
    /// Dial the payload
    #[serde(rename = "phonenumber")]
    PhoneNumber,
    /// Open the payload as a URL
    #[serde(rename = "webUrl")]
    WebUrl,
    /// Send the payload back as a user message
    #[default]
    #[serde(rename = "reply")]
    Reply,
    /// Any type this client does not know about
    #[serde(other)]
    Unknown,
}

/// An interactive button under a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Button {
    /// Label shown to the user
    pub title: String,
    /// Action payload
    #[serde(default)]
    pub payload: Option<String>,
    /// What the payload means
    #[serde(default, rename = "type")]
    pub kind: ButtonKind,
}

/// The agent who wrote a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentInfo {
    /// Agent identifier
    pub id: i64,
    /// Display name
    #[serde(default)]
    pub name: Option<String>,
    /// Avatar media path
    #[serde(default)]
    pub avatar: Option<String>,
}

/// A chat message.
///
/// Equality is by [`LocalId`] only. Deduplication against other copies of
/// the same message uses [`Message::same_identity`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Stable client-side identity
    #[serde(default)]
    pub local_id: LocalId,
    /// Server identity, once stored remotely
    #[serde(default, rename = "id")]
    pub remote_id: Option<RemoteId>,
    /// Authoring time
    #[serde(default = "Utc::now", with = "chrono::serde::ts_seconds")]
    pub time: DateTime<Utc>,
    /// Optional heading
    #[serde(default)]
    pub title: Option<String>,
    /// Text body
    #[serde(default, rename = "message")]
    pub body: Option<String>,
    /// Uploaded media
    #[serde(default)]
    pub media: Option<Media>,
    /// Media waiting for upload
    #[serde(default)]
    pub upload: Option<LocalMedia>,
    /// Interactive buttons
    #[serde(default, deserialize_with = "null_as_empty")]
    pub buttons: Vec<Button>,
    /// Nested carousel messages
    #[serde(default, deserialize_with = "null_as_empty")]
    pub carousel: Vec<Message>,
    /// Suggested replies
    #[serde(default, deserialize_with = "null_as_empty")]
    pub quick_replies: Vec<String>,
    /// Author kind
    #[serde(default, rename = "typeId")]
    pub kind: MessageKind,
    /// Delivery state
    #[serde(default)]
    pub send_status: SendStatus,
    /// Authoring agent
    #[serde(default, rename = "agent")]
    pub agent_info: Option<AgentInfo>,
    /// Page the user was on when sending
    #[serde(default)]
    pub referrer: Option<String>,
    /// Server-provided reason for a failed send
    #[serde(default)]
    pub failure_reason: Option<String>,
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

impl PartialEq for Message {
    fn eq(&self, other: &Self) -> bool {
        self.local_id == other.local_id
    }
}

impl Eq for Message {}

impl Message {
    /// Create an empty message of the given kind, authored now.
    pub fn new(kind: MessageKind) -> Self {
        Self {
            local_id: LocalId::new(),
            remote_id: None,
            time: Utc::now(),
            title: None,
            body: None,
            media: None,
            upload: None,
            buttons: Vec::new(),
            carousel: Vec::new(),
            quick_replies: Vec::new(),
            kind,
            send_status: SendStatus::Success,
            agent_info: None,
            referrer: None,
            failure_reason: None,
        }
    }

    /// Create a pending user message with a text body.
    pub fn user_text(body: impl Into<String>) -> Self {
        let mut message = Self::new(MessageKind::User);
        message.body = Some(body.into());
        message.send_status = SendStatus::Pending;
        message
    }

    /// Create a pending user message carrying media that still needs uploading.
    pub fn user_media(upload: LocalMedia) -> Self {
        let mut message = Self::new(MessageKind::User);
        message.upload = Some(upload);
        message.send_status = SendStatus::Pending;
        message
    }

    /// Set the authoring time.
    pub fn with_time(mut self, time: DateTime<Utc>) -> Self {
        self.time = time;
        self
    }

    /// Set the remote id.
    pub fn with_remote_id(mut self, id: i64) -> Self {
        self.remote_id = Some(RemoteId::new(id));
        self
    }

    /// Set the text body.
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Set the delivery state.
    pub fn with_status(mut self, status: SendStatus) -> Self {
        self.send_status = status;
        self
    }

    /// Whether `other` denotes the same message.
    ///
    /// Compares remote ids when both sides have one, local ids otherwise.
    pub fn same_identity(&self, other: &Message) -> bool {
        match (self.remote_id, other.remote_id) {
            (Some(a), Some(b)) => a == b,
            _ => self.local_id == other.local_id,
        }
    }

    /// Whether anything besides quick replies would be shown.
    pub fn has_content(&self) -> bool {
        non_empty(&self.title)
            || non_empty(&self.body)
            || self.media.is_some()
            || self.upload.is_some()
            || !self.buttons.is_empty()
            || !self.carousel.is_empty()
    }

    /// Automatic and system messages without content are dropped entirely.
    pub fn is_ignored(&self) -> bool {
        matches!(
            self.kind,
            MessageKind::Auto | MessageKind::SystemUser | MessageKind::SystemAgent
        ) && !self.has_content()
    }

    /// A message that only carries suggested replies.
    pub fn has_only_quick_replies(&self) -> bool {
        !self.has_content() && !self.quick_replies.is_empty()
    }

    /// Whether the message produces a cell in a display snapshot.
    pub fn is_displayable(&self) -> bool {
        !self.is_ignored() && !self.has_only_quick_replies()
    }

    /// Pending or failed: authored locally and not confirmed.
    pub fn is_unsent(&self) -> bool {
        matches!(self.send_status, SendStatus::Pending | SendStatus::Failed)
    }

    /// Media is attached but not uploaded yet.
    pub fn needs_upload(&self) -> bool {
        self.upload.is_some()
    }

    /// Serialize to MessagePack bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, TypesError> {
        rmp_serde::to_vec_named(self).map_err(TypesError::Serialization)
    }

    /// Deserialize from MessagePack bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TypesError> {
        rmp_serde::from_slice(bytes).map_err(TypesError::Deserialization)
    }

    /// Serialize a list of messages to MessagePack bytes.
    pub fn list_to_bytes(messages: &[Message]) -> Result<Vec<u8>, TypesError> {
        rmp_serde::to_vec_named(messages).map_err(TypesError::Serialization)
    }

    /// Deserialize a list of messages from MessagePack bytes.
    pub fn list_from_bytes(bytes: &[u8]) -> Result<Vec<Message>, TypesError> {
        rmp_serde::from_slice(bytes).map_err(TypesError::Deserialization)
    }

    /// Request body used to store this message remotely.
    pub fn outgoing(&self) -> OutgoingMessage<'_> {
        OutgoingMessage {
            time: self.time.timestamp(),
            message: self.body.as_deref(),
            title: self.title.as_deref(),
            media: self.media.as_ref().map(|m| m.id.as_str()),
            type_id: self.kind.into(),
            referrer: self.referrer.as_deref(),
        }
    }
}

fn non_empty(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|s| !s.is_empty())
}

/// JSON body of a store-message request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingMessage<'a> {
    /// Unix timestamp (seconds)
    pub time: i64,
    /// Text body
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<&'a str>,
    /// Heading
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<&'a str>,
    /// Uploaded media id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media: Option<&'a str>,
    /// Author kind discriminator
    pub type_id: u8,
    /// Referrer URL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referrer: Option<&'a str>,
}

impl OutgoingMessage<'_> {
    /// Encode as JSON bytes.
    pub fn to_json(&self) -> Result<Vec<u8>, TypesError> {
        serde_json::to_vec(self).map_err(TypesError::JsonEncode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn decodes_remote_json() {
        let json = r#"{
            "id": 7,
            "time": 1700000000,
            "message": "Hello",
            "typeId": 2,
            "agent": { "id": 3, "name": "Ann" },
            "buttons": null,
            "quickReplies": ["Yes", "No"]
        }"#;
        let message: Message = serde_json::from_str(json).unwrap();

        assert_eq!(message.remote_id, Some(RemoteId::new(7)));
        assert_eq!(message.time, Utc.timestamp_opt(1_700_000_000, 0).unwrap());
        assert_eq!(message.body.as_deref(), Some("Hello"));
        assert_eq!(message.kind, MessageKind::Agent);
        assert_eq!(message.send_status, SendStatus::Success);
        assert!(message.buttons.is_empty());
        assert_eq!(message.quick_replies.len(), 2);
        assert_eq!(message.agent_info.unwrap().name.as_deref(), Some("Ann"));
    }

    #[test]
    fn unknown_type_id_is_rejected() {
        let json = r#"{ "id": 1, "time": 0, "typeId": 9 }"#;
        assert!(serde_json::from_str::<Message>(json).is_err());
    }

    #[test]
    fn msgpack_keeps_local_state() {
        let mut message = Message::user_text("hi").with_time(Utc.timestamp_opt(10, 0).unwrap());
        message.failure_reason = Some("quota".into());

        let restored = Message::from_bytes(&message.to_bytes().unwrap()).unwrap();

        assert_eq!(restored.local_id, message.local_id);
        assert_eq!(restored.send_status, SendStatus::Pending);
        assert_eq!(restored.failure_reason.as_deref(), Some("quota"));
        assert_eq!(restored.time, message.time);
    }

    #[test]
    fn equality_is_by_local_id() {
        let a = Message::user_text("same");
        let b = Message::user_text("same");
        assert_ne!(a, b);

        let mut c = a.clone();
        c.body = Some("edited".into());
        assert_eq!(a, c);
    }

    #[test]
    fn identity_prefers_remote_id() {
        let a = Message::new(MessageKind::Agent).with_remote_id(5);
        let b = Message::new(MessageKind::Agent).with_remote_id(5);
        let c = Message::new(MessageKind::Agent).with_remote_id(6);

        assert!(a.same_identity(&b));
        assert!(!a.same_identity(&c));

        // Without a remote id on one side the local id decides
        let mut pending = a.clone();
        pending.remote_id = None;
        assert!(pending.same_identity(&a));
        assert!(!pending.same_identity(&b));
    }

    #[test]
    fn empty_system_messages_are_ignored() {
        assert!(Message::new(MessageKind::Auto).is_ignored());
        assert!(Message::new(MessageKind::SystemAgent).is_ignored());
        assert!(!Message::new(MessageKind::Auto).with_body("x").is_ignored());
        assert!(!Message::new(MessageKind::Agent).is_ignored());
    }

    #[test]
    fn quick_reply_only_messages_are_not_displayable() {
        let mut message = Message::new(MessageKind::Agent);
        message.quick_replies = vec!["Yes".into()];
        assert!(message.has_only_quick_replies());
        assert!(!message.is_displayable());

        message.body = Some("Pick one".into());
        assert!(message.is_displayable());
    }

    #[test]
    fn outgoing_body_skips_missing_fields() {
        let message = Message::user_text("hey").with_time(Utc.timestamp_opt(100, 0).unwrap());
        let json: serde_json::Value =
            serde_json::from_slice(&message.outgoing().to_json().unwrap()).unwrap();

        assert_eq!(json["message"], "hey");
        assert_eq!(json["time"], 100);
        assert_eq!(json["typeId"], 1);
        assert!(json.get("media").is_none());
    }

    #[test]
    fn local_media_debug_hides_bytes() {
        let media = LocalMedia {
            bytes: vec![0xDE, 0xAD],
            mime_type: "image/png".into(),
            file_name: "a.png".into(),
        };
        let debug = format!("{:?}", media);
        assert!(debug.contains("[2 bytes]"));
    }
}
