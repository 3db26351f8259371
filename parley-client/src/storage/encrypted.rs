//! Encrypted-at-rest stores over sled.
//!
//! Every value is sealed with the [`StorageKey`]; key names are blinded.
//! The message list is one sealed MessagePack blob.

use std::path::Path;
use std::sync::Arc;

use parley_types::Message;
use tracing::debug;

use super::{insert_clamped, replace_by_identity, KeyValueStore, MessageStore};
use crate::crypto::StorageKey;
use crate::error::StorageError;

const KV_TREE: &str = "parley-kv";
const MESSAGES_TREE: &str = "parley-messages";
const META_TREE: &str = "parley-meta";
const SALT_KEY: &[u8] = b"salt";
const MESSAGES_KEY: &str = "messages";
const SALT_SIZE: usize = 16;

/// Open both encrypted stores in the database at `path`.
pub fn open_encrypted(
    path: &Path,
    key: StorageKey,
) -> Result<(EncryptedKeyValueStore, EncryptedMessageStore), StorageError> {
    let db = sled::open(path)?;
    open_in(&db, key)
}

/// Open both encrypted stores, deriving the key from a passphrase.
///
/// The Argon2 salt is generated on first use and kept next to the data.
pub fn open_with_passphrase(
    path: &Path,
    passphrase: &str,
) -> Result<(EncryptedKeyValueStore, EncryptedMessageStore), StorageError> {
    let db = sled::open(path)?;
    let meta = db.open_tree(META_TREE)?;
    let salt = match meta.get(SALT_KEY)? {
        Some(salt) => salt.to_vec(),
        None => {
            let mut salt = [0u8; SALT_SIZE];
            getrandom::getrandom(&mut salt)
                .map_err(|e| StorageError::Backend(format!("random source failed: {}", e)))?;
            meta.insert(SALT_KEY, &salt[..])?;
            debug!("Generated new cache salt");
            salt.to_vec()
        }
    };
    let key = StorageKey::from_passphrase(passphrase, &salt)?;
    open_in(&db, key)
}

fn open_in(
    db: &sled::Db,
    key: StorageKey,
) -> Result<(EncryptedKeyValueStore, EncryptedMessageStore), StorageError> {
    let key = Arc::new(key);
    Ok((
        EncryptedKeyValueStore {
            tree: db.open_tree(KV_TREE)?,
            key: Arc::clone(&key),
        },
        EncryptedMessageStore {
            tree: db.open_tree(MESSAGES_TREE)?,
            key,
        },
    ))
}

/// Key-value store sealing each value independently.
#[derive(Debug, Clone)]
pub struct EncryptedKeyValueStore {
    tree: sled::Tree,
    key: Arc<StorageKey>,
}

impl KeyValueStore for EncryptedKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        match self.tree.get(self.key.blind(key))? {
            Some(sealed) => Ok(Some(self.key.open(&sealed)?)),
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        let sealed = self.key.seal(value)?;
        self.tree.insert(self.key.blind(key), sealed)?;
        self.tree.flush()?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.tree.remove(self.key.blind(key))?;
        self.tree.flush()?;
        Ok(())
    }

    fn clear(&self) -> Result<(), StorageError> {
        self.tree.clear()?;
        self.tree.flush()?;
        Ok(())
    }
}

/// Message list stored as one sealed blob.
#[derive(Debug, Clone)]
pub struct EncryptedMessageStore {
    tree: sled::Tree,
    key: Arc<StorageKey>,
}

impl EncryptedMessageStore {
    fn write(&self, messages: &[Message]) -> Result<(), StorageError> {
        let bytes = Message::list_to_bytes(messages)?;
        let sealed = self.key.seal(&bytes)?;
        self.tree.insert(self.key.blind(MESSAGES_KEY), sealed)?;
        self.tree.flush()?;
        Ok(())
    }
}

impl MessageStore for EncryptedMessageStore {
    fn all(&self) -> Result<Option<Vec<Message>>, StorageError> {
        match self.tree.get(self.key.blind(MESSAGES_KEY))? {
            Some(sealed) => {
                let bytes = self.key.open(&sealed)?;
                Ok(Some(Message::list_from_bytes(&bytes)?))
            }
            None => Ok(None),
        }
    }

    fn save(&self, messages: &[Message]) -> Result<(), StorageError> {
        self.write(messages)
    }

    fn insert(&self, message: &Message, at: usize) -> Result<(), StorageError> {
        let mut list = self.all()?.unwrap_or_default();
        insert_clamped(&mut list, message, at);
        self.write(&list)
    }

    fn update(&self, message: &Message) -> Result<(), StorageError> {
        let Some(mut list) = self.all()? else {
            return Ok(());
        };
        if replace_by_identity(&mut list, message) {
            self.write(&list)?;
        }
        Ok(())
    }

    fn clear(&self) -> Result<(), StorageError> {
        self.tree.clear()?;
        self.tree.flush()?;
        Ok(())
    }
}
