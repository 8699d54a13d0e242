//! The process's single NOTIFY consumer: holds the dedicated `LISTEN`
//! connection open for the process's lifetime, reassembles chunked
//! payloads via [`crate::notify::Reassembler`], and delivers each
//! routed change to whichever live connections it names.
//!
//! Delivery goes through the same [`crate::connection::TxBuffer`] a
//! connection's own method handlers write through, via the shared
//! [`crate::connection::ConnectionRegistry`], so a change frame and a
//! locally-originated result for the same connection are ordered
//! correctly relative to each other without any extra coordination here.
//! Before a frame reaches the buffer it is passed through the target
//! connection's `SubscriptionSet::rewrite_for_delivery`, so a connection
//! that raced the write (e.g. it already holds the row from another
//! subscription's `added`) sees a `changed` instead of a duplicate
//! `added`, and a `removed` it was never told about is dropped.

use crate::connection::ConnectionRegistry;
use crate::metrics::ServerMetrics;
use crate::store::{ChangeKind, SharedStore};
use ddp_core::Result;
use std::sync::Arc;

/// Routing metadata keys present on a reassembled change payload that are
/// not part of the wire frame a DDP client expects; stripped before
/// delivery.
const ROUTING_KEYS: &[&str] = &["_connection_ids", "_sender", "_tx_seq"];

/// Run the NOTIFY listen loop until the LISTEN connection itself fails.
/// The caller is expected to treat an `Err` return as fatal: the
/// connection has its own lifecycle independent of any one client
/// connection, and its death means the process can no longer learn about
/// writes from other processes.
pub async fn run(
    store: SharedStore,
    channel: String,
    connections: ConnectionRegistry,
    metrics: Option<Arc<ServerMetrics>>,
) -> Result<()> {
    let mut listener = store.listen(&channel).await?;
    let mut reassembler = crate::notify::Reassembler::new();

    loop {
        let notification = listener
            .recv()
            .await
            .map_err(|e| ddp_core::Error::Store(format!("NOTIFY listen connection lost: {e}")))?;

        let payload = match reassembler.feed(notification.payload()) {
            Ok(Some(value)) => value,
            Ok(None) => {
                if let Some(metrics) = &metrics {
                    metrics.record_notify_chunk_reassembled();
                }
                continue;
            }
            Err(e) => {
                tracing::warn!(error = %e, "dropping unreassemblable NOTIFY payload");
                continue;
            }
        };
        if let Some(metrics) = &metrics {
            metrics.record_notify_chunk_reassembled();
        }

        deliver(&connections, payload);
    }
}

/// Map a frame's `msg` discriminator to the [`ChangeKind`] the rewrite
/// rules operate on. `None` for anything that isn't a data-change frame
/// (shouldn't occur on this path, since only `write_and_route` publishes
/// to the NOTIFY channel, but the chunked payload is still just JSON).
fn change_kind(msg: &str) -> Option<ChangeKind> {
    match msg {
        "added" => Some(ChangeKind::Added),
        "changed" => Some(ChangeKind::Changed),
        "removed" => Some(ChangeKind::Removed),
        _ => None,
    }
}

fn kind_msg(kind: ChangeKind) -> &'static str {
    match kind {
        ChangeKind::Added => "added",
        ChangeKind::Changed => "changed",
        ChangeKind::Removed => "removed",
    }
}

fn deliver(connections: &ConnectionRegistry, mut payload: serde_json::Value) {
    let Some(obj) = payload.as_object_mut() else {
        return;
    };
    let connection_ids: Vec<String> = obj
        .remove("_connection_ids")
        .and_then(|v| v.as_array().cloned())
        .unwrap_or_default()
        .into_iter()
        .filter_map(|v| v.as_str().map(str::to_string))
        .collect();
    let sender = obj.remove("_sender").and_then(|v| v.as_str().map(str::to_string));
    let tx_seq = obj.remove("_tx_seq").and_then(|v| v.as_u64());
    for key in ROUTING_KEYS {
        obj.remove(*key);
    }
    let frame = payload;

    let collection = frame["collection"].as_str().map(str::to_string);
    let id = frame["id"].as_str().map(str::to_string);
    let kind = frame["msg"].as_str().and_then(change_kind);

    let registry = connections.lock().unwrap();
    for conn_id in &connection_ids {
        let Some(handle) = registry.get(conn_id) else {
            continue;
        };

        let mut frame = frame.clone();
        if let (Some(collection), Some(id), Some(kind)) = (&collection, &id, kind) {
            let rewritten = handle.subs.lock().unwrap().rewrite_for_delivery(collection, id, kind);
            let Some(rewritten) = rewritten else {
                continue;
            };
            if let Some(obj) = frame.as_object_mut() {
                obj.insert(
                    "msg".to_string(),
                    serde_json::Value::String(kind_msg(rewritten).to_string()),
                );
                if matches!(rewritten, ChangeKind::Removed) {
                    obj.remove("fields");
                }
            }
        }

        // The originator's own copy of its write was reserved a `tx_seq`
        // before the write committed (§4.7/§5), so it must go through
        // `deliver` at that exact seq to stay behind the call's
        // `result`/`updated` frames; every other connection has no such
        // ordering dependency and goes through the immediate path.
        let delivered = match (&sender, tx_seq) {
            (Some(s), Some(seq)) if s == conn_id => handle.tx.deliver(seq, frame),
            _ => handle.tx.send_now(frame),
        };
        if let Err(e) = delivered {
            tracing::warn!(session = %conn_id, error = %e, "failed to deliver routed change");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deliver_strips_routing_keys_before_sending() {
        let payload = json!({
            "msg": "added",
            "collection": "tasks",
            "id": "r1",
            "_connection_ids": ["c1"],
            "_sender": "origin",
        });
        let connections: ConnectionRegistry = Default::default();
        // No registered connection: exercises the strip-and-lookup path
        // without needing a real TxBuffer/socket.
        deliver(&connections, payload);
        assert!(connections.lock().unwrap().is_empty());
    }
}
