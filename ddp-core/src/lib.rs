//! Core DDP wire types, EJSON codec, error handling, id generation, config
//! and observability for the `ddp` server.
//!
//! - **types**: the `ClientFrame`/`ServerFrame` wire message enums.
//! - **codec**: the EJSON codec (`$date`/`$binary`/`$type` tags) and the
//!   SockJS outer frame envelope.
//! - **error**: the application-level `Error` type and its wire
//!   `WireError` conversion.
//! - **id**: the Alea PRNG and the 17-character opaque id generator.
//! - **config**: environment-driven startup configuration.
//! - **observability**: OpenTelemetry integration for traces, metrics, and
//!   logs.
//!
//! # Example
//!
//! ```rust
//! use ddp_core::codec::{self, Ejson};
//!
//! let value = Ejson::String("hello".into());
//! let wire = codec::encode(&value);
//! assert_eq!(codec::decode(&wire).unwrap(), value);
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod id;
pub mod observability;
pub mod types;

pub use config::Config;
pub use error::{Error, Result, WireError};
pub use id::IdGenerator;
pub use observability::{init_observability, shutdown_observability, ObservabilityConfig};
pub use types::{ClientFrame, ServerFrame, PREFERRED_VERSION, SUPPORTED_VERSIONS};
