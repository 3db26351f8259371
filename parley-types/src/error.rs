//! Error types for Parley wire and storage formats.

use thiserror::Error;

/// Errors that can occur while encoding or decoding Parley payloads.
#[derive(Debug, Error)]
pub enum TypesError {
    /// JSON payload from the remote side could not be decoded
    #[error("json decode failed: {0}")]
    JsonDecode(#[source] serde_json::Error),

    /// JSON request body could not be encoded
    #[error("json encode failed: {0}")]
    JsonEncode(#[source] serde_json::Error),

    /// MessagePack serialization failed
    #[error("serialization failed: {0}")]
    Serialization(#[source] rmp_serde::encode::Error),

    /// MessagePack deserialization failed
    #[error("deserialization failed: {0}")]
    Deserialization(#[source] rmp_serde::decode::Error),

    /// Unknown message type discriminator
    #[error("invalid message type: {0}")]
    InvalidMessageKind(u8),

    /// Invalid data format
    #[error("invalid data: {0}")]
    InvalidData(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = TypesError::InvalidMessageKind(99);
        assert_eq!(err.to_string(), "invalid message type: 99");
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<TypesError>();
    }
}
