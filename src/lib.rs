//! DDP - Distributed Data Protocol live-query fan-out server
//!
//! This is the main convenience crate that re-exports the DDP sub-crates.
//!
//! # Architecture
//!
//! The server is organized into modular crates:
//!
//! - **ddp-core**: wire types, EJSON codec, error handling, id/PRNG, config, observability
//! - **ddp-server**: registry, store adapter, mergebox engine, change router, connection
//!   state machine, NOTIFY transport
//! - **ddp-macros**: procedural macros for method/publication registration
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use ddp::server::DdpServer;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = DdpServer::builder().build().await?;
//!
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

// Re-export all public APIs from sub-crates
// This allows users to access everything through `ddp::` prefix
pub use ddp_core as core;
pub use ddp_macros as macros;
pub use ddp_server as server;

// Convenience re-exports of the most commonly used types
pub use ddp_core::{Config, Error, Result};
pub use ddp_server::DdpServer;
