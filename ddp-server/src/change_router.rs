//! Change router: consumes a store write, decides which (collection,
//! connection) pairs must be told about it, and emits the envelope the
//! NOTIFY transport will chunk and publish.
//!
//! Grounded on `dddp/api.py`'s `DDP.valid_subscribers`/`DDP.send_notify`:
//! for a changed row, the router snapshots pre-change and post-change
//! subscriber sets and classifies each connection into the transition
//! table below:
//!
//! | pre P | post Q | emitted |
//! |---|---|---|
//! | in P∩Q | in P∩Q | `changed` |
//! | in P\Q |  | `removed` |
//! |  | in Q\P | `added` |

use crate::object_mapping::ObjectMapping;
use crate::registry::Registry;
use crate::store::{ChangeKind, Query, SharedStore};
use ddp_core::Result;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

/// Process-wide directory of which connections subscribe to which
/// collection, maintained by `sub`/`unsub` and consulted by the
/// pre-/post-change hooks a write path invokes before and after the SQL
/// that performs the write.
///
/// This is the "candidate subscriber" list the transition table's P and Q
/// sets are drawn from: membership here doesn't itself change across a
/// single write, but a subscriber's *visibility* of the touched row can
/// (its query clause may no longer, or newly, match), which is exactly
/// what `write_and_route` below re-evaluates by querying the store before
/// and after.
#[derive(Default)]
pub struct SubscriberDirectory {
    by_collection: RwLock<HashMap<String, Vec<Subscriber>>>,
}

impl SubscriberDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, collection: &str, subscriber: Subscriber) {
        self.by_collection
            .write()
            .unwrap()
            .entry(collection.to_string())
            .or_default()
            .push(subscriber);
    }

    pub fn unregister(&self, collection: &str, connection_id: &str) {
        if let Some(subs) = self.by_collection.write().unwrap().get_mut(collection) {
            subs.retain(|s| s.connection_id != connection_id);
        }
    }

    /// Updates the acting user recorded for every one of a connection's
    /// registered subscribers on `collection`, so a write landing after an
    /// auth change evaluates visibility under the new user rather than the
    /// one the subscription was created under.
    pub fn reauth(&self, collection: &str, connection_id: &str, new_acting_user: Option<String>) {
        if let Some(subs) = self.by_collection.write().unwrap().get_mut(collection) {
            for sub in subs.iter_mut().filter(|s| s.connection_id == connection_id) {
                sub.acting_user = new_acting_user.clone();
            }
        }
    }

    pub fn candidates(&self, collection: &str) -> Vec<Subscriber> {
        self.by_collection
            .read()
            .unwrap()
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }
}

/// Run a tracked write: snapshot subscriber visibility before `write`
/// executes, run `write`, snapshot again, route the resulting change, and
/// publish it (chunked) over NOTIFY. Call this instead of writing to a
/// tracked collection's table directly: it is the only path that keeps
/// `SeenIDs` on every connection consistent with what was actually sent.
#[allow(clippy::too_many_arguments)]
pub async fn write_and_route<W, Fut>(
    store: &SharedStore,
    registry: &Registry,
    object_mapping: &ObjectMapping<'_>,
    directory: &SubscriberDirectory,
    metrics: Option<&crate::metrics::ServerMetrics>,
    notify_channel: &str,
    collection: &str,
    pk: &str,
    fields: Option<Value>,
    origin_connection_id: Option<&str>,
    tx_seq: Option<u64>,
    write: W,
) -> Result<()>
where
    W: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<()>>,
{
    let candidates = directory.candidates(collection);
    let pre = visible_connection_ids(store, registry, collection, pk, &candidates).await?;

    write().await?;

    let post = visible_connection_ids(store, registry, collection, pk, &candidates).await?;
    let removed: Vec<String> = pre.difference(&post).cloned().collect();
    let changed: Vec<String> = pre.intersection(&post).cloned().collect();
    let added: Vec<String> = post.difference(&pre).cloned().collect();

    let id = object_mapping.meteor_id(collection, pk).await?;
    let mut frames = Vec::new();
    if !removed.is_empty() {
        frames.push(RoutedChange {
            collection: collection.to_string(),
            id: id.clone(),
            kind: ChangeKind::Removed,
            fields: None,
            connection_ids: removed,
            sender: origin_connection_id.map(str::to_string),
            tx_seq,
        });
    }
    if !changed.is_empty() {
        frames.push(RoutedChange {
            collection: collection.to_string(),
            id: id.clone(),
            kind: ChangeKind::Changed,
            fields: fields.clone(),
            connection_ids: changed,
            sender: origin_connection_id.map(str::to_string),
            tx_seq,
        });
    }
    if !added.is_empty() {
        frames.push(RoutedChange {
            collection: collection.to_string(),
            id,
            kind: ChangeKind::Added,
            fields,
            connection_ids: added,
            sender: origin_connection_id.map(str::to_string),
            tx_seq,
        });
    }

    for frame in frames {
        let payload = serialize(&frame).to_string();
        let chunks = crate::notify::chunk(&payload);
        if let Some(metrics) = metrics {
            metrics.record_notify_chunks_sent(chunks.len() as u64);
        }
        for chunk in chunks {
            store.notify(notify_channel, &chunk).await?;
        }
    }

    Ok(())
}

/// A candidate subscriber: the owning connection id and the acting user
/// under which its subscription reads the collection.
#[derive(Debug, Clone)]
pub struct Subscriber {
    pub connection_id: String,
    pub acting_user: Option<String>,
    pub query: Query,
}

/// A change-routed frame ready for serialization and NOTIFY chunking.
#[derive(Debug, Clone)]
pub struct RoutedChange {
    pub collection: String,
    pub id: String,
    pub kind: ChangeKind,
    pub fields: Option<Value>,
    pub connection_ids: Vec<String>,
    pub sender: Option<String>,
    /// The deliver sequence reserved on `sender`'s own `TxBuffer` before
    /// this write committed. Carried so the NOTIFY listener can hand the
    /// frame to `TxBuffer::deliver` instead of `send_now` for the
    /// originating connection, keeping it behind that connection's own
    /// `result`/`updated` frames for the same call (§4.7/§5).
    pub tx_seq: Option<u64>,
}

/// Determine which connections among `subscribers` currently see `pk` in
/// `collection`, given their (query, acting_user) pairs.
async fn visible_connection_ids(
    store: &SharedStore,
    registry: &Registry,
    collection: &str,
    pk: &str,
    subscribers: &[Subscriber],
) -> Result<HashSet<String>> {
    let Some(def) = registry.collection(collection) else {
        return Ok(HashSet::new());
    };
    let mut visible = HashSet::new();
    for sub in subscribers {
        let rows = store
            .filter_visible(
                def,
                &crate::mergebox::pk_query(pk),
                sub.acting_user.as_deref(),
                None,
            )
            .await?;
        if rows.iter().any(|r| r.pk == pk) {
            visible.insert(sub.connection_id.clone());
        }
    }
    Ok(visible)
}

/// Serialize a routed change into the EJSON payload `dddp/api.py` calls
/// `obj_change_as_msg`: `{msg, collection, id, fields?}`, with `fields`
/// omitted on `removed`.
pub fn serialize(change: &RoutedChange) -> Value {
    let msg = match change.kind {
        ChangeKind::Added => "added",
        ChangeKind::Changed => "changed",
        ChangeKind::Removed => "removed",
    };
    let mut obj = serde_json::Map::new();
    obj.insert("msg".to_string(), Value::String(msg.to_string()));
    obj.insert("collection".to_string(), Value::String(change.collection.clone()));
    obj.insert("id".to_string(), Value::String(change.id.clone()));
    if let Some(fields) = &change.fields {
        obj.insert("fields".to_string(), fields.clone());
    }
    obj.insert(
        "_connection_ids".to_string(),
        Value::Array(change.connection_ids.iter().cloned().map(Value::String).collect()),
    );
    if let Some(sender) = &change.sender {
        obj.insert("_sender".to_string(), Value::String(sender.clone()));
    }
    if let Some(tx_seq) = change.tx_seq {
        obj.insert("_tx_seq".to_string(), Value::Number(tx_seq.into()));
    }
    Value::Object(obj)
}
