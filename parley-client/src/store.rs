//! Conversation persistence adapter.
//!
//! Executes the [`StoreOp`]s produced by the conversation merge rules and
//! reads the cached conversation back, degrading each field on its own.
//! Also keeps the session values (secret, device id, authorization).

use std::sync::Arc;

use parley_core::{CachedConversation, StoreOp};
use parley_types::{DeviceId, Paging};
use tracing::{debug, warn};

use crate::error::StorageError;
use crate::storage::{KeyValueStore, MessageStore};

/// Cached account secret.
pub const KEY_SECRET: &str = "secret";
/// Cached user authorization token.
pub const KEY_USER_AUTHORIZATION: &str = "user_authorization";
/// Cached device id.
pub const KEY_DEVICE_ID: &str = "device_id";
/// Cached welcome text.
pub const KEY_WELCOME_MESSAGE: &str = "welcome_message";
/// Cached paging cursor (JSON).
pub const KEY_PAGING: &str = "paging";

/// Persistence for one conversation and its session.
#[derive(Clone)]
pub struct ConversationStore {
    kv: Arc<dyn KeyValueStore>,
    messages: Arc<dyn MessageStore>,
}

impl std::fmt::Debug for ConversationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationStore").finish_non_exhaustive()
    }
}

impl ConversationStore {
    /// Wrap the two persistence ports.
    pub fn new(kv: Arc<dyn KeyValueStore>, messages: Arc<dyn MessageStore>) -> Self {
        Self { kv, messages }
    }

    /// Read the cached conversation.
    ///
    /// A field that cannot be read or decoded comes back as `None`; the
    /// other fields are unaffected.
    pub fn load_cached(&self) -> CachedConversation {
        let messages = match self.messages.all() {
            Ok(messages) => messages,
            Err(e) => {
                warn!("Dropping cached messages: {}", e);
                None
            }
        };

        let welcome_message = match self.kv.get_string(KEY_WELCOME_MESSAGE) {
            Ok(welcome) => welcome,
            Err(e) => {
                warn!("Dropping cached welcome message: {}", e);
                None
            }
        };

        let paging = match self.kv.get(KEY_PAGING) {
            Ok(Some(bytes)) => match Paging::from_json(&bytes) {
                Ok(paging) => Some(paging),
                Err(e) => {
                    warn!("Dropping cached paging cursor: {}", e);
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!("Dropping cached paging cursor: {}", e);
                None
            }
        };

        debug!(
            messages = messages.as_ref().map_or(0, Vec::len),
            has_welcome = welcome_message.is_some(),
            has_paging = paging.is_some(),
            "Loaded cached conversation"
        );

        CachedConversation {
            messages,
            welcome_message,
            paging,
        }
    }

    /// Execute persistence operations in order.
    ///
    /// Failures are logged and skipped; the in-memory state stays
    /// authoritative until the next full save.
    pub fn apply(&self, ops: impl IntoIterator<Item = StoreOp>) {
        for op in ops {
            if let Err(e) = self.apply_one(&op) {
                warn!("Failed to persist {}: {}", op_name(&op), e);
            }
        }
    }

    fn apply_one(&self, op: &StoreOp) -> Result<(), StorageError> {
        match op {
            StoreOp::SaveMessages(messages) => self.messages.save(messages),
            StoreOp::InsertMessage { message, at } => self.messages.insert(message, *at),
            StoreOp::UpdateMessage(message) => self.messages.update(message),
            StoreOp::SetWelcome(Some(text)) => self.kv.set_string(KEY_WELCOME_MESSAGE, text),
            StoreOp::SetWelcome(None) => self.kv.remove(KEY_WELCOME_MESSAGE),
            StoreOp::SetPaging(Some(paging)) => self.kv.set(KEY_PAGING, &paging.to_json()?),
            StoreOp::SetPaging(None) => self.kv.remove(KEY_PAGING),
        }
    }

    /// Forget the cached conversation, keeping the session.
    pub fn clear_conversation(&self) -> Result<(), StorageError> {
        self.messages.clear()?;
        self.kv.remove(KEY_WELCOME_MESSAGE)?;
        self.kv.remove(KEY_PAGING)
    }

    /// Forget everything.
    pub fn clear_all(&self) -> Result<(), StorageError> {
        self.messages.clear()?;
        self.kv.clear()
    }

    /// Cached secret.
    pub fn secret(&self) -> Result<Option<String>, StorageError> {
        self.kv.get_string(KEY_SECRET)
    }

    /// Cache the secret.
    pub fn set_secret(&self, secret: &str) -> Result<(), StorageError> {
        self.kv.set_string(KEY_SECRET, secret)
    }

    /// Cached device id. An unreadable value reads as absent.
    pub fn device_id(&self) -> Result<Option<DeviceId>, StorageError> {
        Ok(self
            .kv
            .get_string(KEY_DEVICE_ID)?
            .and_then(|encoded| DeviceId::parse(&encoded)))
    }

    /// Cache the device id.
    pub fn set_device_id(&self, device_id: &DeviceId) -> Result<(), StorageError> {
        self.kv.set_string(KEY_DEVICE_ID, &device_id.to_string())
    }

    /// Cached user authorization.
    pub fn authorization(&self) -> Result<Option<String>, StorageError> {
        self.kv.get_string(KEY_USER_AUTHORIZATION)
    }

    /// Cache or clear the user authorization.
    pub fn set_authorization(&self, authorization: Option<&str>) -> Result<(), StorageError> {
        match authorization {
            Some(token) => self.kv.set_string(KEY_USER_AUTHORIZATION, token),
            None => self.kv.remove(KEY_USER_AUTHORIZATION),
        }
    }
}

fn op_name(op: &StoreOp) -> &'static str {
    match op {
        StoreOp::SaveMessages(_) => "message list",
        StoreOp::InsertMessage { .. } => "message insert",
        StoreOp::UpdateMessage(_) => "message update",
        StoreOp::SetWelcome(_) => "welcome message",
        StoreOp::SetPaging(_) => "paging cursor",
    }
}
