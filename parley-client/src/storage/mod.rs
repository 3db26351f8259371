//! Persistence ports.
//!
//! Two capabilities back the conversation cache:
//! - [`KeyValueStore`] holds small values (secret, device id, user
//!   authorization, welcome text, paging cursor)
//! - [`MessageStore`] holds the message list, most recent first
//!
//! Both are synchronous: the coordinator owns them and calls them between
//! network suspension points.

mod encrypted;
mod memory;

pub use encrypted::{open_encrypted, open_with_passphrase, EncryptedKeyValueStore, EncryptedMessageStore};
pub use memory::{MemoryKeyValueStore, MemoryMessageStore};

use parley_types::Message;

use crate::error::StorageError;

/// Key-value persistence port.
pub trait KeyValueStore: Send + Sync {
    /// Read a value.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Write a value.
    fn set(&self, key: &str, value: &[u8]) -> Result<(), StorageError>;

    /// Delete a value.
    fn remove(&self, key: &str) -> Result<(), StorageError>;

    /// Delete everything.
    fn clear(&self) -> Result<(), StorageError>;

    /// Read a UTF-8 value. Invalid UTF-8 reads as absent.
    fn get_string(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.get(key)?.and_then(|bytes| String::from_utf8(bytes).ok()))
    }

    /// Write a UTF-8 value.
    fn set_string(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.set(key, value.as_bytes())
    }
}

/// Message-list persistence port.
///
/// Index 0 is the most recent message.
pub trait MessageStore: Send + Sync {
    /// The whole list, or `None` if nothing was ever saved.
    fn all(&self) -> Result<Option<Vec<Message>>, StorageError>;

    /// Replace the whole list.
    fn save(&self, messages: &[Message]) -> Result<(), StorageError>;

    /// Insert one message at `at`, clamped to the list length.
    fn insert(&self, message: &Message, at: usize) -> Result<(), StorageError>;

    /// Replace the stored copy of a message. No-op when absent.
    fn update(&self, message: &Message) -> Result<(), StorageError>;

    /// Delete the list.
    fn clear(&self) -> Result<(), StorageError>;
}

/// Insert into a most-recent-first list, clamping the index.
pub(crate) fn insert_clamped(list: &mut Vec<Message>, message: &Message, at: usize) {
    let at = at.min(list.len());
    list.insert(at, message.clone());
}

/// Replace the entry with the same identity. Returns whether one was found.
pub(crate) fn replace_by_identity(list: &mut [Message], message: &Message) -> bool {
    match list.iter_mut().find(|m| m.same_identity(message)) {
        Some(slot) => {
            *slot = message.clone();
            true
        }
        None => false,
    }
}
