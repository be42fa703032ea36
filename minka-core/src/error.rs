//! Error types shared between the storage engine and its REST consumers.
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure reasons used in [`ErrorResponse`], mapped to HTTP status codes.
///
/// Multiple reasons may map to the same status code.
pub mod reason {
    /// Requested key absent, or the resource version refers to no object (404)
    pub const NOT_FOUND: &str = "NotFound";
    /// Create collided with a live object (409)
    pub const ALREADY_EXISTS: &str = "AlreadyExists";
    /// Optimistic update or delete lost a race (409)
    pub const CONFLICT: &str = "Conflict";
    /// Validation failure (422)
    pub const INVALID: &str = "Invalid";
    /// The supplied resource version has been compacted away (410)
    pub const EXPIRED: &str = "Expired";
    /// Deadline exceeded while talking to the database (504)
    pub const TIMEOUT: &str = "Timeout";
    /// Uncategorized server-side failure (500)
    pub const INTERNAL: &str = "InternalError";
    /// Database unreachable or pool exhausted (503)
    pub const SERVICE_UNAVAILABLE: &str = "ServiceUnavailable";
}

/// Core-level errors (validation and serialization)
#[derive(Error, Debug)]
pub enum Error {
    /// An option or object failed validation before reaching storage
    #[error("validation failed: {0}")]
    Validation(String),

    /// A payload could not be serialized or deserialized
    #[error("error serializing payload")]
    Serde(#[from] serde_json::Error),
}

/// A status-shaped error returned to REST consumers.
///
/// This is the wire form of the storage error taxonomy; it also appears as
/// the payload of `ERROR` watch events.
#[derive(Error, Deserialize, Serialize, Debug, Clone, Eq, PartialEq)]
#[error("{message}: {reason}")]
pub struct ErrorResponse {
    /// The status, always `Failure`
    pub status: String,
    /// A human readable message about the error
    #[serde(default)]
    pub message: String,
    /// Machine readable reason, one of the [`reason`] constants
    #[serde(default)]
    pub reason: String,
    /// The HTTP status code the REST layer should respond with
    pub code: u16,
}

impl ErrorResponse {
    fn new(code: u16, reason: &str, message: String) -> Self {
        Self {
            status: "Failure".into(),
            message,
            reason: reason.into(),
            code,
        }
    }

    /// Requested object does not exist
    pub fn not_found(kind: &str, name: &str) -> Self {
        Self::new(404, reason::NOT_FOUND, format!("{kind} {name:?} not found"))
    }

    /// Create collided with a live object
    pub fn already_exists(kind: &str, name: &str) -> Self {
        Self::new(
            409,
            reason::ALREADY_EXISTS,
            format!("{kind} {name:?} already exists"),
        )
    }

    /// Optimistic concurrency violation
    pub fn conflict(message: String) -> Self {
        Self::new(409, reason::CONFLICT, message)
    }

    /// Object or options failed validation
    pub fn invalid(message: String) -> Self {
        Self::new(422, reason::INVALID, message)
    }

    /// The supplied resource version predates the compaction watermark
    pub fn expired(resource_version: i64) -> Self {
        Self::new(
            410,
            reason::EXPIRED,
            format!("resource version {resource_version} is too old"),
        )
    }

    /// Deadline exceeded
    pub fn timeout(message: String) -> Self {
        Self::new(504, reason::TIMEOUT, message)
    }

    /// Uncategorized failure; always carries the underlying cause
    pub fn internal(message: String) -> Self {
        Self::new(500, reason::INTERNAL, message)
    }

    /// Database unreachable or connection pool exhausted
    pub fn service_unavailable(message: String) -> Self {
        Self::new(503, reason::SERVICE_UNAVAILABLE, message)
    }

    /// Whether this response signals a compacted resource version
    pub fn is_expired(&self) -> bool {
        self.code == 410
    }
}
