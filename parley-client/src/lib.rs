//! # parley-client
//!
//! Client library for the Parley chat sync core.
//!
//! This is the library host applications embed to keep one conversation in
//! sync with the remote chat service.
//!
//! ## Features
//!
//! - **Offline-First**: Messages are cached and queued while unreachable
//! - **Encrypted Cache**: XChaCha20-Poly1305 at rest with an Argon2id key
//! - **Transport Abstraction**: The HTTP client is supplied by the host
//! - **Pure State Machine**: Uses parley-core for side-effect-free logic
//!
//! ## Example
//!
//! ```ignore
//! use parley_client::{ParleyClient, ParleyConfig};
//!
//! let config = ParleyConfig::from_file(path)?;
//! let client = ParleyClient::builder(config, transport).build();
//!
//! client.configure("account-secret", None).await?;
//! client.send_text("Hello!").await?;
//!
//! let mut events = client.subscribe();
//! while let Ok(event) = events.recv().await {
//!     // redraw
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod actor;
pub mod api;
pub mod client;
pub mod config;
pub mod crypto;
pub mod error;
pub mod events;
pub mod reachability;
pub mod scheduler;
pub mod storage;
pub mod store;
pub mod transport;

pub use api::{DeviceRegistration, ParleyApi, UserEvent, IDENTIFICATION_HEADER, SDK_VERSION};
pub use client::{ParleyClient, ParleyClientBuilder, EVENT_CAPACITY};
pub use config::{ConfigError, NetworkConfig, ParleyConfig, PollingConfig, TypingConfig};
pub use crypto::{Argon2Params, CryptoError, StorageKey, KEY_SIZE, NONCE_SIZE};
pub use error::{ApiError, ParleyError, StorageError};
pub use events::ParleyEvent;
pub use reachability::Reachability;
pub use scheduler::{ManualScheduler, Scheduler, TimerHandle, TokioScheduler};
pub use storage::{
    open_encrypted, open_with_passphrase, EncryptedKeyValueStore, EncryptedMessageStore,
    KeyValueStore, MemoryKeyValueStore, MemoryMessageStore, MessageStore,
};
pub use store::ConversationStore;
pub use transport::{
    Method, MockTransport, Request, Response, Transport, TransportError, Upload,
    OFFLINE_ERROR_CODE,
};

pub use parley_core::{Calendar, Change, ConfigState, Snapshot};
pub use parley_types::{DeviceId, LocalId, Message, MessageKind, RemoteId, SendStatus};
