//! # parley-types
//!
//! Message model and wire formats for the Parley chat sync core.
//!
//! This crate provides the foundational types used across all Parley crates:
//! - [`LocalId`], [`RemoteId`], [`DeviceId`] - Identity types
//! - [`Message`] - A chat message with its media, buttons and carousel
//! - [`Paging`], [`MessageCollection`], [`ApiResponse`] - Remote API payloads
//! - [`PushEnvelope`] - Push-delivered messages and events
//! - [`TypesError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod collection;
mod envelope;
mod error;
mod ids;
mod message;

pub use collection::{ApiResponse, MessageCollection, Notification, Paging};
pub use envelope::{EventName, PushEnvelope, RemoteEvent, RemotePayload};
pub use error::TypesError;
pub use ids::{DeviceId, LocalId, RemoteId};
pub use message::{
    AgentInfo, Button, ButtonKind, LocalMedia, Media, Message, MessageKind, OutgoingMessage,
    SendStatus,
};
