//! Transport abstraction for Parley.
//!
//! This module provides the port through which every remote call leaves the
//! client. The HTTP implementation lives with the host application; this
//! crate only depends on the contract.
//!
//! # Design
//!
//! The transport trait is async and request-oriented:
//! - `request()` performs one request and returns the raw response
//! - `upload()` sends a file as a multipart upload
//!
//! Connectivity loss is reported as a [`TransportError`] carrying
//! [`OFFLINE_ERROR_CODE`].
//!
//! # Example
//!
//! ```ignore
//! let transport = MockTransport::new();
//! transport.queue_response(Method::Get, "messages", Response::ok(body));
//! let response = transport.request(Request::get(url)).await?;
//! ```

mod mock;

pub use mock::MockTransport;

use async_trait::async_trait;
use std::collections::BTreeMap;
use thiserror::Error;

/// Error code that classifies a failure as "no connectivity".
pub const OFFLINE_ERROR_CODE: i32 = 13;

/// Transport failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("transport error {code}: {message}")]
pub struct TransportError {
    /// Failure code; [`OFFLINE_ERROR_CODE`] for connectivity loss.
    pub code: i32,
    /// Human readable detail.
    pub message: String,
}

impl TransportError {
    /// Create an error with an arbitrary code.
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// The connectivity-loss error.
    pub fn offline() -> Self {
        Self::new(OFFLINE_ERROR_CODE, "the network connection appears to be offline")
    }

    /// Whether this failure means the remote side is unreachable.
    pub fn is_offline(&self) -> bool {
        self.code == OFFLINE_ERROR_CODE
    }
}

/// HTTP method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Method {
    /// GET
    Get,
    /// POST
    Post,
    /// PUT
    Put,
    /// DELETE
    Delete,
}

/// One outgoing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// HTTP method
    pub method: Method,
    /// Absolute URL
    pub url: String,
    /// Request headers
    pub headers: BTreeMap<String, String>,
    /// JSON body, if any
    pub body: Option<Vec<u8>>,
}

impl Request {
    /// A GET request.
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            headers: BTreeMap::new(),
            body: None,
        }
    }

    /// A POST request with a JSON body.
    pub fn post(url: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            method: Method::Post,
            url: url.into(),
            headers: BTreeMap::new(),
            body: Some(body),
        }
    }

    /// Replace the headers.
    pub fn with_headers(mut self, headers: BTreeMap<String, String>) -> Self {
        self.headers = headers;
        self
    }
}

/// A multipart file upload.
#[derive(Clone, PartialEq, Eq)]
pub struct Upload {
    /// HTTP method
    pub method: Method,
    /// Absolute URL
    pub url: String,
    /// Request headers
    pub headers: BTreeMap<String, String>,
    /// File contents
    pub bytes: Vec<u8>,
    /// MIME type of the file
    pub mime_type: String,
    /// File name
    pub file_name: String,
}

// File contents stay out of logs
impl std::fmt::Debug for Upload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Upload")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("bytes", &format!("[{} bytes]", self.bytes.len()))
            .field("mime_type", &self.mime_type)
            .field("file_name", &self.file_name)
            .finish()
    }
}

/// A raw response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// HTTP status code
    pub status: u16,
    /// Response body
    pub body: Vec<u8>,
}

impl Response {
    /// A 200 response.
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            body: body.into(),
        }
    }

    /// A response with an arbitrary status.
    pub fn with_status(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Whether the status is 2xx.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Transport trait for remote API calls.
///
/// Implementations handle the underlying HTTP stack, TLS and proxies.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Perform a request.
    async fn request(&self, request: Request) -> Result<Response, TransportError>;

    /// Upload a file.
    async fn upload(&self, upload: Upload) -> Result<Response, TransportError>;
}
