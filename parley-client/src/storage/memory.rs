//! In-memory stores, used when the offline cache is disabled and in tests.

use std::collections::HashMap;
use std::sync::Mutex;

use parley_types::Message;

use super::{insert_clamped, replace_by_identity, KeyValueStore, MessageStore};
use crate::error::StorageError;

fn poisoned<T>(_: T) -> StorageError {
    StorageError::Backend("store lock poisoned".into())
}

/// Key-value store kept in a map.
#[derive(Debug, Default)]
pub struct MemoryKeyValueStore {
    values: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryKeyValueStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.values.lock().map_err(poisoned)?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        self.values
            .lock()
            .map_err(poisoned)?
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.values.lock().map_err(poisoned)?.remove(key);
        Ok(())
    }

    fn clear(&self) -> Result<(), StorageError> {
        self.values.lock().map_err(poisoned)?.clear();
        Ok(())
    }
}

/// Message list kept in a vector.
#[derive(Debug, Default)]
pub struct MemoryMessageStore {
    messages: Mutex<Option<Vec<Message>>>,
}

impl MemoryMessageStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl MessageStore for MemoryMessageStore {
    fn all(&self) -> Result<Option<Vec<Message>>, StorageError> {
        Ok(self.messages.lock().map_err(poisoned)?.clone())
    }

    fn save(&self, messages: &[Message]) -> Result<(), StorageError> {
        *self.messages.lock().map_err(poisoned)? = Some(messages.to_vec());
        Ok(())
    }

    fn insert(&self, message: &Message, at: usize) -> Result<(), StorageError> {
        let mut guard = self.messages.lock().map_err(poisoned)?;
        insert_clamped(guard.get_or_insert_with(Vec::new), message, at);
        Ok(())
    }

    fn update(&self, message: &Message) -> Result<(), StorageError> {
        let mut guard = self.messages.lock().map_err(poisoned)?;
        if let Some(list) = guard.as_mut() {
            replace_by_identity(list, message);
        }
        Ok(())
    }

    fn clear(&self) -> Result<(), StorageError> {
        *self.messages.lock().map_err(poisoned)? = None;
        Ok(())
    }
}
