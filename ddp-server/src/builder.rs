//! Server builder for constructing a [`DdpServer`].
//!
//! The builder pattern provides a fluent API for registering collections,
//! publications, and methods before the server binds its listener and opens
//! its database connections. It allows you to:
//! - Override bind address / database URL / NOTIFY channel (otherwise read
//!   from the environment via [`ddp_core::Config`])
//! - Register collections, publications, and methods
//! - Enable observability
//!
//! # Examples
//!
//! ```rust,no_run
//! use ddp_server::{DdpServer, CollectionDef, method_fn};
//!
//! # async fn example() -> ddp_core::Result<()> {
//! let server = DdpServer::builder()
//!     .collection(CollectionDef::new("tasks", "task"))?
//!     .method("tasks.ping", method_fn(|_params, _user, _id_gen, _origin| async {
//!         Ok(serde_json::json!({"pong": true}))
//!     }))?
//!     .with_default_observability()
//!     .build()
//!     .await?;
//! # Ok(())
//! # }
//! ```

use crate::connection::{ConnectionRegistry, ServerContext};
use crate::registry::{CollectionDef, MethodHandler, PublicationHandler, RegistryBuilder};
use crate::store::StoreAdapter;
use crate::{change_router::SubscriberDirectory, metrics::ServerMetrics, DdpServer};
use ddp_core::{Error, Result};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;

/// Builder for constructing a [`DdpServer`].
pub struct DdpServerBuilder {
    bind_addr: Option<SocketAddr>,
    database_url: Option<String>,
    notify_channel: Option<String>,
    debug: Option<bool>,
    registry_builder: RegistryBuilder,
    observability_config: Option<ddp_core::ObservabilityConfig>,
    service_name: Option<String>,
}

impl DdpServerBuilder {
    /// Create a new server builder. Every knob left unset here falls back to
    /// [`ddp_core::Config::from_env`] at build time.
    pub fn new() -> Self {
        Self {
            bind_addr: None,
            database_url: None,
            notify_channel: None,
            debug: None,
            registry_builder: RegistryBuilder::default(),
            observability_config: None,
            service_name: None,
        }
    }

    /// Override the bind address (otherwise `DDP_BIND_ADDR`/default).
    pub fn bind(mut self, addr: impl Into<SocketAddr>) -> Self {
        self.bind_addr = Some(addr.into());
        self
    }

    /// Override the PostgreSQL connection string (otherwise `DATABASE_URL`).
    pub fn database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = Some(url.into());
        self
    }

    /// Override the NOTIFY/LISTEN channel name (otherwise `DDP_LISTEN_CHANNEL`/`"ddp"`).
    pub fn notify_channel(mut self, channel: impl Into<String>) -> Self {
        self.notify_channel = Some(channel.into());
        self
    }

    /// Override whether `500` errors carry a `details` field (otherwise `DDP_DEBUG`).
    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = Some(debug);
        self
    }

    /// Register a collection.
    pub fn collection(mut self, def: CollectionDef) -> Result<Self> {
        self.registry_builder = self.registry_builder.collection(def)?;
        Ok(self)
    }

    /// Register a publication.
    pub fn publication(
        mut self,
        name: impl Into<String>,
        handler: Arc<dyn PublicationHandler>,
    ) -> Result<Self> {
        self.registry_builder = self.registry_builder.publication(name, handler)?;
        Ok(self)
    }

    /// Register a method.
    pub fn method(mut self, name: impl Into<String>, handler: Arc<dyn MethodHandler>) -> Result<Self> {
        self.registry_builder = self.registry_builder.method(name, handler)?;
        Ok(self)
    }

    /// Enable OpenTelemetry observability with custom configuration.
    pub fn with_observability(mut self, config: ddp_core::ObservabilityConfig) -> Self {
        self.observability_config = Some(config);
        self
    }

    /// Enable OpenTelemetry observability with default configuration.
    pub fn with_default_observability(mut self) -> Self {
        self.observability_config = Some(ddp_core::ObservabilityConfig::default());
        self
    }

    /// Set the service name used for observability, if enabled.
    pub fn service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = Some(name.into());
        self
    }

    /// Bind the listener, connect to PostgreSQL, and spawn the NOTIFY
    /// listener task.
    ///
    /// Every knob left unset via the builder falls back to the environment
    /// variable [`ddp_core::Config::from_env`] reads for it, but each
    /// field is resolved independently, so a caller who supplies every
    /// value through the builder (as tests do) never needs `DATABASE_URL`
    /// set in the process environment.
    pub async fn build(self) -> Result<DdpServer> {
        let bind_addr = match self.bind_addr {
            Some(a) => a,
            None => match std::env::var("DDP_BIND_ADDR") {
                Ok(raw) => raw
                    .parse()
                    .map_err(|e| Error::Protocol(format!("invalid DDP_BIND_ADDR {raw:?}: {e}")))?,
                Err(_) => "127.0.0.1:3000".parse().expect("valid default bind addr"),
            },
        };
        let database_url = match self.database_url {
            Some(u) => u,
            None => std::env::var("DATABASE_URL")
                .map_err(|_| Error::Protocol("DATABASE_URL is required".into()))?,
        };
        let notify_channel = match self.notify_channel {
            Some(c) => c,
            None => std::env::var("DDP_LISTEN_CHANNEL").unwrap_or_else(|_| "ddp".to_string()),
        };
        let debug = match self.debug {
            Some(d) => d,
            None => std::env::var("DDP_DEBUG")
                .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "yes"))
                .unwrap_or(false),
        };

        let metrics = if let Some(mut config) = self.observability_config {
            if let Some(name) = &self.service_name {
                config.service_name = name.clone();
            }
            ddp_core::init_observability(config.clone())
                .map_err(|e| Error::Internal(format!("failed to initialize observability: {e}")))?;
            Some(Arc::new(ServerMetrics::new(config.service_name)))
        } else {
            None
        };

        let store = Arc::new(StoreAdapter::connect(&database_url).await?);
        crate::schema::ensure_schema(store.pool()).await?;
        let registry = self.registry_builder.build();
        let directory = Arc::new(SubscriberDirectory::new());
        let connections: ConnectionRegistry = Arc::new(Mutex::new(HashMap::new()));

        let listener = TcpListener::bind(bind_addr)
            .await
            .map_err(|e| Error::Io(e.to_string()))?;

        tracing::info!(addr = %bind_addr, channel = %notify_channel, "ddp server listening");

        let notify_task = tokio::spawn({
            let store = Arc::clone(&store);
            let channel = notify_channel.clone();
            let connections = Arc::clone(&connections);
            let metrics = metrics.clone();
            async move {
                if let Err(e) = crate::notify_loop::run(store, channel, connections, metrics).await
                {
                    tracing::error!(error = %e, "NOTIFY listener task exited");
                }
            }
        });

        let ctx = ServerContext {
            registry,
            store,
            directory,
            connections,
            notify_channel,
            bind_addr,
            debug,
            metrics,
        };

        Ok(DdpServer {
            listener,
            ctx,
            notify_task,
        })
    }
}

impl Default for DdpServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::method_fn;

    #[test]
    fn builder_accumulates_registrations_before_build() {
        let builder = DdpServerBuilder::new()
            .collection(CollectionDef::new("tasks", "task"))
            .unwrap()
            .method(
                "tasks.ping",
                method_fn(|_params, _user, _id_gen, _origin| async { Ok(serde_json::json!({"pong": true})) }),
            )
            .unwrap();
        assert!(builder.bind_addr.is_none());
        assert!(builder.database_url.is_none());
    }

    #[test]
    fn duplicate_collection_registration_is_rejected() {
        let result = DdpServerBuilder::new()
            .collection(CollectionDef::new("tasks", "task"))
            .unwrap()
            .collection(CollectionDef::new("tasks", "task"));
        assert!(result.is_err());
    }
}
