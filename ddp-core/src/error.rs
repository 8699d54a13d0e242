//! Error types for the DDP server.
//!
//! This module defines two things:
//!
//! - **`Error`**: the single application-level error type every core
//!   subsystem (codec, store adapter, registry, connection dispatch)
//!   returns via `?`.
//! - **`WireError`**: the wire-format `{error, reason, details?}` object
//!   actually sent to a client, and the lossless `Error::to_wire` conversion
//!   that produces it.
//!
//! # Error Taxonomy
//!
//! The wire protocol recognizes four error codes:
//! - `400`: malformed frame, unknown field, schema mismatch.
//! - `403`: acting identity not permitted.
//! - `404`: unknown method or publication name.
//! - `500`: uncaught handler exception; `details` is populated only when the
//!   server is running with its debug flag set.
//!
//! # Examples
//!
//! ```rust
//! use ddp_core::{Error, WireError};
//!
//! let error = Error::MethodNotFound("tasks.remove".into());
//! let wire = error.to_wire(false);
//! assert_eq!(wire.error, 404);
//! assert!(wire.details.is_none());
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;

/// Result type for ddp-core and ddp-server operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-level error type for DDP operations.
///
/// Every fallible call in the codec, store adapter, registry, and
/// connection dispatch returns this type. Only the connection dispatch
/// boundary converts it into a `WireError`; nothing panics on it.
#[derive(Debug, Clone, ThisError)]
pub enum Error {
    /// EJSON encode/decode failure.
    #[error("codec error: {0}")]
    Codec(String),

    /// PostgreSQL store adapter failure (connection loss, query error,
    /// constraint violation).
    #[error("store error: {0}")]
    Store(String),

    /// Incoming frame failed schema validation: unknown `msg`, a missing
    /// required field, or an extra field where none is allowed.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Acting identity is not permitted to perform the requested
    /// subscription or method call.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// No method registered under this name.
    #[error("method not found: {0}")]
    MethodNotFound(String),

    /// No publication registered under this name.
    #[error("publication not found: {0}")]
    PublicationNotFound(String),

    /// Uncaught error from a registered method or publication handler.
    #[error("internal error: {0}")]
    Internal(String),

    /// Low-level I/O error (socket, listener).
    #[error("io error: {0}")]
    Io(String),

    /// The connection's socket is no longer writable.
    #[error("connection closed")]
    ConnectionClosed,

    /// A NOTIFY payload could not be reassembled: a chunk was missing or
    /// the header was corrupt. The partial message is dropped silently;
    /// this variant exists for logging, not for propagation to a client.
    #[error("notify reassembly failed: {0}")]
    NotifyReassembly(String),
}

impl Error {
    /// Convert to the wire `{error, reason, details?}` form DDP clients expect.
    /// §7. `debug` gates whether `500`s carry a `details` field with the
    /// formatted error chain.
    pub fn to_wire(&self, debug: bool) -> WireError {
        let (code, reason) = match self {
            Error::Protocol(msg) => (400, msg.clone()),
            Error::Forbidden(msg) => (403, msg.clone()),
            Error::MethodNotFound(name) => (404, format!("Method not found: {name}")),
            Error::PublicationNotFound(name) => (404, format!("Publication not found: {name}")),
            Error::Codec(msg) => (500, msg.clone()),
            Error::Store(msg) => (500, msg.clone()),
            Error::Internal(msg) => (500, msg.clone()),
            Error::Io(msg) => (500, msg.clone()),
            Error::ConnectionClosed => (500, "connection closed".to_string()),
            Error::NotifyReassembly(msg) => (500, msg.clone()),
        };

        let details = if code == 500 && debug {
            Some(self.to_string())
        } else {
            None
        };

        WireError {
            error: code,
            reason,
            details,
        }
    }
}

/// The wire-format error object appearing in DDP `error` and `result{error}`
/// frames: `{error, reason, details?}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireError {
    /// The numeric status: 400, 403, 404, or 500.
    pub error: u16,
    /// Human-readable reason string.
    pub reason: String,
    /// Present only for `500`s, and only when the server's debug flag is set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl WireError {
    /// Construct a `400 Bad Request` wire error.
    pub fn bad_request(reason: impl Into<String>) -> Self {
        Self {
            error: 400,
            reason: reason.into(),
            details: None,
        }
    }

    /// Construct a `403 Forbidden` wire error.
    pub fn forbidden(reason: impl Into<String>) -> Self {
        Self {
            error: 403,
            reason: reason.into(),
            details: None,
        }
    }

    /// Construct a `404 Not Found` wire error.
    pub fn not_found(reason: impl Into<String>) -> Self {
        Self {
            error: 404,
            reason: reason.into(),
            details: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_error_maps_to_400() {
        let wire = Error::Protocol("missing field 'name'".into()).to_wire(false);
        assert_eq!(wire.error, 400);
        assert!(wire.details.is_none());
    }

    #[test]
    fn forbidden_error_maps_to_403() {
        let wire = Error::Forbidden("no acting user".into()).to_wire(false);
        assert_eq!(wire.error, 403);
    }

    #[test]
    fn method_not_found_maps_to_404_with_name() {
        let wire = Error::MethodNotFound("tasks.remove".into()).to_wire(false);
        assert_eq!(wire.error, 404);
        assert!(wire.reason.contains("tasks.remove"));
    }

    #[test]
    fn publication_not_found_maps_to_404() {
        let wire = Error::PublicationNotFound("tasks".into()).to_wire(false);
        assert_eq!(wire.error, 404);
    }

    #[test]
    fn internal_error_without_debug_hides_details() {
        let wire = Error::Internal("division by zero".into()).to_wire(false);
        assert_eq!(wire.error, 500);
        assert!(wire.details.is_none());
    }

    #[test]
    fn internal_error_with_debug_exposes_details() {
        let wire = Error::Internal("division by zero".into()).to_wire(true);
        assert_eq!(wire.error, 500);
        assert!(wire.details.unwrap().contains("division by zero"));
    }

    #[test]
    fn store_error_is_500_even_with_debug_off() {
        let wire = Error::Store("connection reset".into()).to_wire(false);
        assert_eq!(wire.error, 500);
        assert!(wire.details.is_none());
    }

    #[test]
    fn wire_error_serializes_without_details_field_when_absent() {
        let wire = WireError::not_found("unknown method");
        let json = serde_json::to_value(&wire).unwrap();
        assert!(json.get("details").is_none());
    }

    #[test]
    fn wire_error_constructors_use_expected_codes() {
        assert_eq!(WireError::bad_request("x").error, 400);
        assert_eq!(WireError::forbidden("x").error, 403);
        assert_eq!(WireError::not_found("x").error, 404);
    }
}
