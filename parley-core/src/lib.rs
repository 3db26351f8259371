//! # parley-core
//!
//! Pure logic for the Parley chat sync core (no I/O, instant tests).
//!
//! This crate implements the merge rules, the display snapshot engine and
//! the state machines of the sync core without any network or disk I/O,
//! enabling fast unit tests.
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure** - they take input and produce output
//! without side effects. This enables:
//! - Instant unit tests (no mocks, no async)
//! - Deterministic behavior (same input → same output)
//! - Easy reasoning about state transitions
//!
//! The actual I/O (network, persistence, timers) is performed by
//! `parley-client`, which interprets the operations and actions produced here.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod conversation;
pub mod polling;
pub mod snapshot;
pub mod state;
pub mod typing;

pub use conversation::{CachedConversation, Conversation, MergeMode, MergeOutcome, StoreOp};
pub use polling::PollingBackoff;
pub use snapshot::{Calendar, Cell, Change, ChangeSet, IndexPath, Section, SectionKind, Snapshot};
pub use state::{Action, ConfigEvent, ConfigMachine, ConfigState};
pub use typing::{AgentTyping, Keystroke, UserTyping};
