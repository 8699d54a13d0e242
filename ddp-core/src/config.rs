//! Startup configuration read from the process environment.
//!
//! `Config::from_env` is the sole bootstrap path: every knob the server
//! needs before it can accept a connection is read once, at startup, and
//! held immutably afterward (mirroring the Registry's own
//! read-only-after-startup contract).

use crate::error::{Error, Result};
use std::net::SocketAddr;

/// Server bootstrap configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the WebSocket listener binds to. `DDP_BIND_ADDR`, default
    /// `127.0.0.1:3000`.
    pub bind_addr: SocketAddr,
    /// PostgreSQL connection string for both the pooled query connection
    /// and the dedicated `LISTEN` connection. `DATABASE_URL`, required.
    pub database_url: String,
    /// NOTIFY/LISTEN channel name. `DDP_LISTEN_CHANNEL`, default `"ddp"`.
    pub listen_channel: String,
    /// When set, `500` errors carry a `details` field with the formatted
    /// error chain. `DDP_DEBUG`, default `false`.
    pub debug: bool,
}

impl Config {
    /// Read configuration from the process environment. Fails closed:
    /// a missing `DATABASE_URL` or a malformed `DDP_BIND_ADDR` is a
    /// startup error, not a silently-applied default.
    pub fn from_env() -> Result<Self> {
        let bind_addr = match std::env::var("DDP_BIND_ADDR") {
            Ok(raw) => raw
                .parse()
                .map_err(|e| Error::Protocol(format!("invalid DDP_BIND_ADDR {raw:?}: {e}")))?,
            Err(_) => "127.0.0.1:3000".parse().expect("valid default bind addr"),
        };

        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| Error::Protocol("DATABASE_URL is required".into()))?;

        let listen_channel =
            std::env::var("DDP_LISTEN_CHANNEL").unwrap_or_else(|_| "ddp".to_string());

        let debug = std::env::var("DDP_DEBUG")
            .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "yes"))
            .unwrap_or(false);

        Ok(Self {
            bind_addr,
            database_url,
            listen_channel,
            debug,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // std::env is process-global; serialize tests that touch it.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear_env() {
        for key in ["DDP_BIND_ADDR", "DATABASE_URL", "DDP_LISTEN_CHANNEL", "DDP_DEBUG"] {
            std::env::remove_var(key);
        }
    }

    #[test]
    fn missing_database_url_is_an_error() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        assert!(Config::from_env().is_err());
    }

    #[test]
    fn applies_defaults_when_optional_vars_absent() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        std::env::set_var("DATABASE_URL", "postgres://localhost/ddp");
        let config = Config::from_env().unwrap();
        assert_eq!(config.bind_addr.to_string(), "127.0.0.1:3000");
        assert_eq!(config.listen_channel, "ddp");
        assert!(!config.debug);
        clear_env();
    }

    #[test]
    fn reads_all_vars_when_present() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        std::env::set_var("DATABASE_URL", "postgres://localhost/ddp");
        std::env::set_var("DDP_BIND_ADDR", "0.0.0.0:4000");
        std::env::set_var("DDP_LISTEN_CHANNEL", "ddp_custom");
        std::env::set_var("DDP_DEBUG", "true");
        let config = Config::from_env().unwrap();
        assert_eq!(config.bind_addr.to_string(), "0.0.0.0:4000");
        assert_eq!(config.listen_channel, "ddp_custom");
        assert!(config.debug);
        clear_env();
    }

    #[test]
    fn rejects_malformed_bind_addr() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        std::env::set_var("DATABASE_URL", "postgres://localhost/ddp");
        std::env::set_var("DDP_BIND_ADDR", "not-an-address");
        assert!(Config::from_env().is_err());
        clear_env();
    }
}
