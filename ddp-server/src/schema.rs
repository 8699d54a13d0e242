//! Bootstraps the tables the store adapter and the connection/subscription
//! persistence layer expect. Called once from [`crate::DdpServerBuilder::build`]
//! after the pool connects, so a fresh database is ready without a separate
//! migration step.
//!
//! `ddp_object_mapping` backs [`crate::object_mapping::ObjectMapping`].
//! `ddp_connection`, `ddp_subscription`, and `ddp_subscription_collection`
//! record the routing state a second process needs to resume delivery to a
//! connection it didn't accept: which server address owns it, which
//! publications it subscribed to and under which acting user, and which
//! collections each subscription expands to.

use ddp_core::{Error, Result};
use sqlx::PgPool;

pub async fn ensure_schema(pool: &PgPool) -> Result<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS ddp_object_mapping (
            collection TEXT NOT NULL,
            pk TEXT NOT NULL,
            opaque_id TEXT NOT NULL,
            PRIMARY KEY (collection, pk)
        )",
    )
    .execute(pool)
    .await
    .map_err(|e| Error::Store(format!("failed to create ddp_object_mapping: {e}")))?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS ddp_connection (
            id TEXT PRIMARY KEY,
            server_addr TEXT NOT NULL,
            remote_addr TEXT NOT NULL,
            version TEXT NOT NULL,
            connected_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )",
    )
    .execute(pool)
    .await
    .map_err(|e| Error::Store(format!("failed to create ddp_connection: {e}")))?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS ddp_subscription (
            connection_id TEXT NOT NULL REFERENCES ddp_connection (id) ON DELETE CASCADE,
            sub_id TEXT NOT NULL,
            user_id TEXT,
            publication TEXT NOT NULL,
            params_ejson TEXT,
            PRIMARY KEY (connection_id, sub_id)
        )",
    )
    .execute(pool)
    .await
    .map_err(|e| Error::Store(format!("failed to create ddp_subscription: {e}")))?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS ddp_subscription_collection (
            connection_id TEXT NOT NULL,
            sub_id TEXT NOT NULL,
            collection_name TEXT NOT NULL,
            FOREIGN KEY (connection_id, sub_id) REFERENCES ddp_subscription (connection_id, sub_id) ON DELETE CASCADE
        )",
    )
    .execute(pool)
    .await
    .map_err(|e| Error::Store(format!("failed to create ddp_subscription_collection: {e}")))?;

    Ok(())
}
