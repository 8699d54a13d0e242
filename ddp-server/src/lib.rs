//! DDP live-query fan-out server over WebSocket.
//!
//! This crate implements a DDP (Distributed Data Protocol) server: clients
//! connect over WebSocket/SockJS, subscribe to publications, and receive a
//! live-synchronized copy of whatever rows their subscriptions expand to,
//! kept current as the underlying PostgreSQL tables change, via `LISTEN`/
//! `NOTIFY`.
//!
//! # Core Features
//!
//! - **WebSocket Transport**: Full-duplex communication using async WebSockets
//! - **Publications**: Register handlers that expand subscription params into
//!   a set of `(collection, query)` pairs
//! - **Methods**: Register RPC methods invoked over the same connection
//! - **Mergebox**: Per-connection `SeenIDs` tracking guarantees each id is
//!   sent `added` exactly once across overlapping subscriptions
//! - **Live updates**: A single process-wide `LISTEN` connection fans
//!   PostgreSQL-side writes out to every affected connection's ordered TX
//!   buffer
//! - **Observability**: OpenTelemetry integration for traces and metrics
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use ddp_server::{DdpServer, CollectionDef, publication_fn};
//! use ddp_server::store::Query;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = DdpServer::builder()
//!         .collection(CollectionDef::new("tasks", "task"))?
//!         .publication(
//!             "tasks",
//!             publication_fn(|_params, _user| async {
//!                 Ok(vec![("tasks".to_string(), Query::all())])
//!             }),
//!         )?
//!         .build()
//!         .await?;
//!
//!     server.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - **Main task**: accepts incoming TCP connections
//! - **Connection tasks**: one per client, own the WebSocket, the DDP state
//!   machine, and an ordered TX buffer
//! - **NOTIFY listener task**: one per process, owns the dedicated `LISTEN`
//!   connection and routes reassembled changes into the TX buffer of every
//!   connection named in a change's `_connection_ids`
//!
//! This design gives connection isolation (one connection's failure doesn't
//! affect another) while still letting a single write fan out to every
//! interested connection without each connection polling the database
//! itself.

pub mod change_router;
pub mod connection;
pub mod mergebox;
pub mod metrics;
pub mod notify;
pub mod notify_loop;
pub mod object_mapping;
pub mod persistence;
pub mod registry;
pub mod schema;
pub mod store;
pub mod subscription;

mod builder;

pub use builder::DdpServerBuilder;
pub use change_router::{Subscriber, SubscriberDirectory};
pub use connection::{ConnectionRegistry, ServerContext};
pub use metrics::ServerMetrics;
pub use registry::{
    method_fn, publication_fn, CollectionDef, MethodHandler, MethodOrigin, PublicationHandler,
    Registry, RegistryBuilder, TxSeqAllocator,
};
pub use store::{Query, SharedStore, StoreAdapter};
pub use subscription::{Subscription, SubscriptionSet};

use ddp_core::Result;
use tokio::net::TcpListener;

/// A running DDP server: an accept loop over a bound TCP listener plus the
/// background NOTIFY listener task that drives live updates.
///
/// # Lifecycle
///
/// 1. **Build**: `DdpServer::builder()`, register collections/publications/
///    methods, `.build().await`
/// 2. **Run**: `server.run().await` to start accepting connections, runs
///    until the listener itself errors
/// 3. **Shutdown**: drop the server; the NOTIFY listener task is aborted
pub struct DdpServer {
    listener: TcpListener,
    ctx: ServerContext,
    notify_task: tokio::task::JoinHandle<()>,
}

impl DdpServer {
    /// Create a new server builder.
    pub fn builder() -> DdpServerBuilder {
        DdpServerBuilder::new()
    }

    /// Run the server and accept connections.
    ///
    /// Runs indefinitely, spawning an independent task per accepted
    /// connection, until the TCP listener itself errors.
    #[tracing::instrument(skip(self), name = "server.run")]
    pub async fn run(&self) -> Result<()> {
        tracing::info!(addr = ?self.listener.local_addr().ok(), "starting ddp server");

        loop {
            let (stream, addr) = self
                .listener
                .accept()
                .await
                .map_err(|e| ddp_core::Error::Io(e.to_string()))?;
            let ctx = self.ctx.clone();

            tracing::info!(remote = %addr, "connection accepted");

            tokio::spawn(async move {
                if let Err(e) = connection::handle_connection(stream, ctx).await {
                    tracing::warn!(remote = %addr, error = %e, "connection ended with error");
                }
            });
        }
    }

    /// The local address the server is listening on. Useful to discover the
    /// bound port when configured with port `0`.
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    /// The server's collection/publication/method registry.
    pub fn registry(&self) -> &Registry {
        &self.ctx.registry
    }

    /// The server's store adapter, for application code that needs to issue
    /// its own tracked writes via [`change_router::write_and_route`].
    pub fn store(&self) -> &SharedStore {
        &self.ctx.store
    }

    /// The server's subscriber directory, the `directory` argument
    /// [`change_router::write_and_route`] needs to determine who must be
    /// told about a write.
    pub fn directory(&self) -> &std::sync::Arc<SubscriberDirectory> {
        &self.ctx.directory
    }

    /// The NOTIFY/LISTEN channel name this server was configured with, the
    /// `notify_channel` argument [`change_router::write_and_route`] needs.
    pub fn notify_channel(&self) -> &str {
        &self.ctx.notify_channel
    }
}

impl Drop for DdpServer {
    fn drop(&mut self) {
        self.notify_task.abort();
    }
}
