//! Error types for parley-client.

use std::sync::Arc;

use parley_types::TypesError;
use thiserror::Error;

use crate::crypto::CryptoError;
use crate::transport::{TransportError, OFFLINE_ERROR_CODE};

/// Remote API errors.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// The transport failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The server answered with a non-success status.
    #[error("server returned {code}: {message}")]
    Status {
        /// HTTP status code.
        code: u16,
        /// First notification text from the server, if any.
        message: String,
    },

    /// The response body could not be decoded.
    #[error("invalid response: {0}")]
    Decode(String),
}

impl ApiError {
    /// Whether the failure means the remote side is unreachable.
    pub fn is_offline(&self) -> bool {
        matches!(self, ApiError::Transport(e) if e.is_offline())
    }

    /// Numeric code for observers.
    pub fn code(&self) -> i32 {
        match self {
            ApiError::Transport(e) => e.code,
            ApiError::Status { code, .. } => i32::from(*code),
            ApiError::Decode(_) => 0,
        }
    }

    /// Text the server sent along with the failure.
    pub fn server_message(&self) -> Option<&str> {
        match self {
            ApiError::Status { message, .. } if !message.is_empty() => Some(message),
            _ => None,
        }
    }
}

impl From<TypesError> for ApiError {
    fn from(error: TypesError) -> Self {
        ApiError::Decode(error.to_string())
    }
}

/// Persistence errors.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The storage backend failed.
    #[error("storage backend error: {0}")]
    Backend(String),

    /// Sealing or opening a value failed.
    #[error("storage crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// A stored value could not be encoded or decoded.
    #[error("storage encoding error: {0}")]
    Encoding(#[from] TypesError),
}

impl From<sled::Error> for StorageError {
    fn from(error: sled::Error) -> Self {
        StorageError::Backend(error.to_string())
    }
}

/// Errors surfaced to callers of [`crate::ParleyClient`].
#[derive(Debug, Clone, Error)]
pub enum ParleyError {
    /// The remote side is unreachable.
    #[error("offline")]
    Offline,

    /// A configure call is already in flight.
    #[error("a configuration is already in progress")]
    Busy,

    /// Configuration failed.
    #[error("configuration failed ({code}): {message}")]
    Configuration {
        /// Error code.
        code: i32,
        /// Error text.
        message: String,
    },

    /// Uploading an attachment failed.
    #[error("media upload failed: {0}")]
    MediaUpload(String),

    /// A payload could not be decoded.
    #[error("decode error: {0}")]
    Decode(Arc<TypesError>),

    /// The operation needs a configured session.
    #[error("not configured")]
    NotConfigured,

    /// Persistence failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// The client has shut down.
    #[error("client shut down")]
    Shutdown,
}

impl ParleyError {
    /// Classify an API failure that ended a configure attempt.
    pub fn configuration(error: &ApiError) -> Self {
        ParleyError::Configuration {
            code: error.code(),
            message: error
                .server_message()
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string()),
        }
    }

    /// Whether this is the offline classification.
    pub fn is_offline(&self) -> bool {
        match self {
            ParleyError::Offline => true,
            ParleyError::Configuration { code, .. } => *code == OFFLINE_ERROR_CODE,
            _ => false,
        }
    }
}

impl From<ApiError> for ParleyError {
    fn from(error: ApiError) -> Self {
        if error.is_offline() {
            ParleyError::Offline
        } else {
            ParleyError::configuration(&error)
        }
    }
}

impl From<TypesError> for ParleyError {
    fn from(error: TypesError) -> Self {
        ParleyError::Decode(Arc::new(error))
    }
}

impl From<StorageError> for ParleyError {
    fn from(error: StorageError) -> Self {
        ParleyError::Storage(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offline_api_error_maps_to_offline() {
        let error = ApiError::from(TransportError::offline());
        assert!(error.is_offline());
        assert_eq!(error.code(), OFFLINE_ERROR_CODE);
        assert!(matches!(ParleyError::from(error), ParleyError::Offline));
    }

    #[test]
    fn status_error_keeps_server_text() {
        let error = ApiError::Status {
            code: 401,
            message: "invalid secret".into(),
        };
        match ParleyError::from(error) {
            ParleyError::Configuration { code, message } => {
                assert_eq!(code, 401);
                assert_eq!(message, "invalid secret");
            }
            other => panic!("Expected configuration error, got {:?}", other),
        }
    }

    #[test]
    fn configuration_error_with_offline_code_is_offline() {
        let error = ParleyError::configuration(&ApiError::from(TransportError::offline()));
        assert!(error.is_offline());
        assert!(!ParleyError::Busy.is_offline());
    }

    #[test]
    fn decode_error_is_shared_between_clones() {
        let error = ParleyError::from(TypesError::InvalidData("not an envelope".into()));
        let copy = error.clone();
        match (&error, &copy) {
            (ParleyError::Decode(a), ParleyError::Decode(b)) => assert!(Arc::ptr_eq(a, b)),
            other => panic!("Expected decode errors, got {:?}", other),
        }
        assert!(copy.to_string().contains("not an envelope"));
    }
}
