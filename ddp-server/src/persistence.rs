//! Persisted connection/subscription routing state.
//!
//! A DDP deployment can run more than one process behind a load balancer;
//! a write accepted by process A may need to reach a connection process B
//! owns. `ddp_connection` records which server address owns a live
//! connection, and `ddp_subscription`/`ddp_subscription_collection` record
//! what it subscribed to and under which acting user, so a cross-process
//! router can resolve "who needs to hear about a change to this collection"
//! without depending on any one process's in-memory `SubscriberDirectory`.
//!
//! This process still drives delivery through the in-memory directory (see
//! `change_router`); these tables are the durable record a router spanning
//! multiple processes would consult, mirrored here the same way
//! `object_mapping` mirrors the opaque id table.

use ddp_core::{Error, Result};
use serde_json::Value;
use sqlx::PgPool;

pub async fn record_connection(
    pool: &PgPool,
    id: &str,
    server_addr: &str,
    remote_addr: &str,
    version: &str,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO ddp_connection (id, server_addr, remote_addr, version) VALUES ($1, $2, $3, $4)
         ON CONFLICT (id) DO UPDATE SET server_addr = EXCLUDED.server_addr, remote_addr = EXCLUDED.remote_addr, version = EXCLUDED.version",
    )
    .bind(id)
    .bind(server_addr)
    .bind(remote_addr)
    .bind(version)
    .execute(pool)
    .await
    .map_err(|e| Error::Store(format!("failed to record connection: {e}")))?;
    Ok(())
}

/// Removes the connection row; `ON DELETE CASCADE` takes its subscriptions
/// and their collection rows with it.
pub async fn remove_connection(pool: &PgPool, id: &str) -> Result<()> {
    sqlx::query("DELETE FROM ddp_connection WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await
        .map_err(|e| Error::Store(format!("failed to remove connection: {e}")))?;
    Ok(())
}

pub async fn record_subscription(
    pool: &PgPool,
    connection_id: &str,
    sub_id: &str,
    user_id: Option<&str>,
    publication: &str,
    params: Option<&Value>,
    collections: &[&str],
) -> Result<()> {
    let params_ejson = params.map(|p| p.to_string());
    sqlx::query(
        "INSERT INTO ddp_subscription (connection_id, sub_id, user_id, publication, params_ejson)
         VALUES ($1, $2, $3, $4, $5)
         ON CONFLICT (connection_id, sub_id) DO UPDATE SET user_id = EXCLUDED.user_id",
    )
    .bind(connection_id)
    .bind(sub_id)
    .bind(user_id)
    .bind(publication)
    .bind(params_ejson)
    .execute(pool)
    .await
    .map_err(|e| Error::Store(format!("failed to record subscription: {e}")))?;

    for collection in collections {
        sqlx::query(
            "INSERT INTO ddp_subscription_collection (connection_id, sub_id, collection_name) VALUES ($1, $2, $3)",
        )
        .bind(connection_id)
        .bind(sub_id)
        .bind(collection)
        .execute(pool)
        .await
        .map_err(|e| Error::Store(format!("failed to record subscription collection: {e}")))?;
    }
    Ok(())
}

/// Updates the `user_id` recorded for every one of a connection's live
/// subscriptions, mirroring `dddp/accounts/ddp.py`'s `sub.user_id = ...;
/// sub.save()` inside `Auth.update_subs`.
pub async fn update_subscriptions_user(pool: &PgPool, connection_id: &str, user_id: Option<&str>) -> Result<()> {
    sqlx::query("UPDATE ddp_subscription SET user_id = $1 WHERE connection_id = $2")
        .bind(user_id)
        .bind(connection_id)
        .execute(pool)
        .await
        .map_err(|e| Error::Store(format!("failed to update subscription user: {e}")))?;
    Ok(())
}

/// Removes a subscription row; `ON DELETE CASCADE` takes its collection
/// rows with it.
pub async fn remove_subscription(pool: &PgPool, connection_id: &str, sub_id: &str) -> Result<()> {
    sqlx::query("DELETE FROM ddp_subscription WHERE connection_id = $1 AND sub_id = $2")
        .bind(connection_id)
        .bind(sub_id)
        .execute(pool)
        .await
        .map_err(|e| Error::Store(format!("failed to remove subscription: {e}")))?;
    Ok(())
}
