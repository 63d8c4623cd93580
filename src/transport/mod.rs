//! Transport surface.
//!
//! The engine talks to the remote record store only through [`Transport`]:
//! one method, one endpoint, an optional JSON body, a header list and a
//! deadline. Replayed mutations carry the `X-*` headers defined here so the
//! remote side can apply idempotency and conflict detection.

#[cfg(feature = "http")]
pub mod http;
pub mod scripted;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::resilience::retry::DeadlineError;

#[cfg(feature = "http")]
pub use http::HttpTransport;
pub use scripted::ScriptedTransport;

pub const HEADER_ACTION_ID: &str = "X-Offline-Action-Id";
pub const HEADER_ORIGINAL_TIMESTAMP: &str = "X-Original-Timestamp";
pub const HEADER_SYNC_PRIORITY: &str = "X-Sync-Priority";
pub const HEADER_LAST_SYNC: &str = "X-Last-Sync";
pub const HEADER_FORCE_UPDATE: &str = "X-Force-Update";
pub const HEADER_MERGE_UPDATE: &str = "X-Merge-Update";

/// Status code the remote store uses to report a conflicting write.
pub const CONFLICT_STATUS: u16 = 409;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Get => write!(f, "GET"),
            Self::Post => write!(f, "POST"),
            Self::Put => write!(f, "PUT"),
            Self::Patch => write!(f, "PATCH"),
            Self::Delete => write!(f, "DELETE"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub method: Method,
    pub endpoint: String,
    pub body: Option<Value>,
    pub headers: Vec<(String, String)>,
    /// Deadline for the whole exchange. `None` means the backend default.
    pub timeout: Option<Duration>,
}

impl Request {
    pub fn new(method: Method, endpoint: impl Into<String>) -> Self {
        Self {
            method,
            endpoint: endpoint.into(),
            body: None,
            headers: Vec::new(),
            timeout: None,
        }
    }

    pub fn get(endpoint: impl Into<String>) -> Self {
        Self::new(Method::Get, endpoint)
    }

    #[must_use]
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: u16,
    /// Parsed JSON body, `Value::Null` when empty or not JSON.
    pub body: Value,
}

impl Response {
    pub fn new(status: u16, body: Value) -> Self {
        Self { status, body }
    }

    #[must_use]
    pub fn ok(body: Value) -> Self {
        Self::new(200, body)
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    #[must_use]
    pub fn is_conflict(&self) -> bool {
        self.status == CONFLICT_STATUS
    }

    /// 4xx other than a conflict.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status) && !self.is_conflict()
    }

    #[must_use]
    pub fn is_server_error(&self) -> bool {
        self.status >= 500
    }
}

#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("{operation} timed out after {after:?}")]
    Timeout { operation: String, after: Duration },

    #[error("network error: {0}")]
    Network(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("remote returned status {status}")]
    Status { status: u16 },
}

impl TransportError {
    /// Whether a later attempt could succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::Network(_) => true,
            Self::Status { status } => *status >= 500,
            Self::InvalidRequest(_) => false,
        }
    }
}

impl DeadlineError for TransportError {
    fn deadline_elapsed(operation: &str, after: Duration) -> Self {
        Self::Timeout {
            operation: operation.to_string(),
            after,
        }
    }
}

/// HTTP-style request function.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: Request) -> Result<Response, TransportError>;
}

/// Send `request`, aborting when its deadline elapses.
///
/// Backends may enforce the deadline themselves; this guarantees it for any
/// backend that does not.
pub async fn dispatch(transport: &dyn Transport, request: Request) -> Result<Response, TransportError> {
    match request.timeout {
        Some(after) => {
            let operation = format!("{} {}", request.method, request.endpoint);
            tokio::time::timeout(after, transport.send(request))
                .await
                .unwrap_or_else(|_| Err(TransportError::deadline_elapsed(&operation, after)))
        }
        None => transport.send(request).await,
    }
}
