//! Mergebox engine: computes, for one subscription, the set of records
//! that are *unique to it* relative to a connection's other subscriptions.
//! This is the bookkeeping that keeps a record with two overlapping
//! subscriptions from producing two `added` frames.
//!
//! Grounded on `dddp/api.py`'s `DDP.sub_unique_objects`: for a target
//! subscription `S`, visible rows of `S` minus the union of visible rows
//! of every other subscription `S'` on the same connection, expressed as
//! `NOT IN (SELECT pk …)` anti-joins rather than in-memory set
//! subtraction, since the "other subscriptions" side can be arbitrarily
//! large.

use crate::registry::Registry;
use crate::store::{Query, SharedStore, StoreRow};
use crate::subscription::Subscription;
use ddp_core::Result;

/// Rows visible to `target` but not to any of `others` sharing its
/// connection and collection.
pub async fn unique(
    store: &SharedStore,
    registry: &Registry,
    target: &Subscription,
    others: &[Subscription],
) -> Result<Vec<(String, StoreRow)>> {
    let mut by_collection: Vec<(String, StoreRow)> = Vec::new();

    for (collection_name, query) in &target.expansion {
        let Some(def) = registry.collection(collection_name) else {
            continue;
        };

        let shadows: Vec<(Query, Option<String>, i64)> = others
            .iter()
            .filter(|other| other.id != target.id)
            .flat_map(|other| {
                other.expansion.iter().filter_map(move |(other_collection, other_query)| {
                    (other_collection == collection_name)
                        .then(|| (other_query.clone(), other.acting_user.clone(), other.snapshot_upper))
                })
            })
            .collect();

        let rows = store
            .unique_visible(def, query, target.acting_user.as_deref(), Some(target.snapshot_upper), &shadows)
            .await?;

        for row in rows {
            by_collection.push((collection_name.clone(), row));
        }
    }

    Ok(by_collection)
}

/// `Query::all()` restricted to a single primary key, used when checking
/// membership of one specific row rather than re-running a full scan.
pub fn pk_query(pk: &str) -> Query {
    Query::with_clause("pk = $1", vec![serde_json::Value::String(pk.to_string())])
}

/// The `added`/`removed` a connection must be sent when a subscription's
/// acting user changes, keyed by `(collection, pk)` so a row present on
/// both sides of the switch is counted once.
pub struct AuthDelta {
    pub added: Vec<(String, StoreRow)>,
    pub removed: Vec<(String, String)>,
}

/// Grounded on `dddp/accounts/ddp.py`'s `Auth.update_subs`: re-derive one
/// subscription's `unique()` result under its old acting user and under
/// `post`'s (already switched) acting user, and return the symmetric
/// difference by primary key. `others` is the connection's remaining
/// subscriptions, used unchanged on both sides of the diff. Shadowing
/// from a sibling subscription that is itself mid-auth-change is resolved
/// by the caller processing subscriptions one at a time and folding each
/// one's new acting user back into `others` before diffing the next.
pub async fn auth_change(
    store: &SharedStore,
    registry: &Registry,
    pre: &Subscription,
    post: &Subscription,
    others: &[Subscription],
) -> Result<AuthDelta> {
    let pre_rows = unique(store, registry, pre, others).await?;
    let post_rows = unique(store, registry, post, others).await?;

    let pre_map: std::collections::HashMap<(String, String), StoreRow> =
        pre_rows.into_iter().map(|(c, r)| ((c, r.pk.clone()), r)).collect();
    let post_map: std::collections::HashMap<(String, String), StoreRow> =
        post_rows.into_iter().map(|(c, r)| ((c, r.pk.clone()), r)).collect();

    let added = post_map
        .iter()
        .filter(|(key, _)| !pre_map.contains_key(*key))
        .map(|((collection, _), row)| (collection.clone(), row.clone()))
        .collect();
    let removed = pre_map
        .keys()
        .filter(|key| !post_map.contains_key(*key))
        .map(|(collection, pk)| (collection.clone(), pk.clone()))
        .collect();

    Ok(AuthDelta { added, removed })
}
