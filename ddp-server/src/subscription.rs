//! Per-connection subscription bookkeeping.
//!
//! A `Subscription` is a live instance of a publication attached to one
//! connection: a client-chosen sub id, the expanded `(collection, query)`
//! pairs materialized at sub time, the acting user at sub time, and the
//! snapshot upper bound separating initial sync from live updates.
//!
//! `SubscriptionSet` is the connection-owned collection of a connection's
//! subscriptions, keyed by sub id, plus the per-collection `SeenIDs` sets
//! the mergebox/change-router pair consult when deciding whether a frame
//! is an `added`, a `changed`, or should be dropped.

use crate::store::{ChangeKind, Query};
use std::collections::{HashMap, HashSet};

/// A live subscription: one publication instance attached to one
/// connection.
#[derive(Debug, Clone)]
pub struct Subscription {
    pub id: String,
    pub publication: String,
    pub acting_user: Option<String>,
    /// Transaction id visible when this subscription was created; rows
    /// created by a later transaction are delivered only as live updates.
    pub snapshot_upper: i64,
    /// `(collection name, filtered query)` pairs, materialized once at sub
    /// time so NOTIFY handlers can cheaply match a record's collection to
    /// interested subscriptions without re-invoking the publication.
    pub expansion: Vec<(String, Query)>,
}

impl Subscription {
    pub fn new(
        id: impl Into<String>,
        publication: impl Into<String>,
        acting_user: Option<String>,
        snapshot_upper: i64,
        expansion: Vec<(String, Query)>,
    ) -> Self {
        Self {
            id: id.into(),
            publication: publication.into(),
            acting_user,
            snapshot_upper,
            expansion,
        }
    }

    pub fn collections(&self) -> impl Iterator<Item = &str> {
        self.expansion.iter().map(|(c, _)| c.as_str())
    }
}

/// A connection's subscriptions plus its per-collection `SeenIDs` sets.
///
/// Owned exclusively by the connection task; never shared across tasks.
/// Invariant: an id is in `SeenIDs(collection)` iff the
/// remote has been told (via `added`) that it exists and has not since
/// been told otherwise (via `removed`).
#[derive(Default)]
pub struct SubscriptionSet {
    subs: HashMap<String, Subscription>,
    seen_ids: HashMap<String, HashSet<String>>,
}

impl SubscriptionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, sub: Subscription) {
        self.subs.insert(sub.id.clone(), sub);
    }

    pub fn remove(&mut self, sub_id: &str) -> Option<Subscription> {
        self.subs.remove(sub_id)
    }

    pub fn get(&self, sub_id: &str) -> Option<&Subscription> {
        self.subs.get(sub_id)
    }

    pub fn contains(&self, sub_id: &str) -> bool {
        self.subs.contains_key(sub_id)
    }

    /// All subscriptions other than `sub_id`, for mergebox's `unique()`.
    pub fn others(&self, sub_id: &str) -> Vec<Subscription> {
        self.subs
            .values()
            .filter(|s| s.id != sub_id)
            .cloned()
            .collect()
    }

    pub fn all(&self) -> impl Iterator<Item = &Subscription> {
        self.subs.values()
    }

    pub fn len(&self) -> usize {
        self.subs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subs.is_empty()
    }

    /// `true` if `id` is currently believed present on the remote for
    /// `collection`.
    pub fn has_seen(&self, collection: &str, id: &str) -> bool {
        self.seen_ids
            .get(collection)
            .map(|ids| ids.contains(id))
            .unwrap_or(false)
    }

    pub fn mark_seen(&mut self, collection: &str, id: impl Into<String>) {
        self.seen_ids
            .entry(collection.to_string())
            .or_default()
            .insert(id.into());
    }

    pub fn mark_unseen(&mut self, collection: &str, id: &str) {
        if let Some(ids) = self.seen_ids.get_mut(collection) {
            ids.remove(id);
        }
    }

    /// Updates a stored subscription's acting user in place, once an
    /// `auth_change` diff against it has been sent. A no-op if `sub_id`
    /// isn't held (it may have been unsubbed mid-change).
    pub fn set_acting_user(&mut self, sub_id: &str, user: Option<String>) {
        if let Some(sub) = self.subs.get_mut(sub_id) {
            sub.acting_user = user;
        }
    }

    /// Apply the rewrite rules a routed NOTIFY frame must pass through
    /// before it reaches this connection's socket: `added`/`changed`
    /// collapse to whichever the remote hasn't already been told:
    /// `changed` if the id is in `SeenIDs`, `added` (marking it seen)
    /// otherwise. `removed` is dropped entirely if the remote was
    /// never told the id exists. Returns the kind to actually send, or
    /// `None` to drop the frame.
    pub fn rewrite_for_delivery(&mut self, collection: &str, id: &str, kind: ChangeKind) -> Option<ChangeKind> {
        match kind {
            ChangeKind::Added | ChangeKind::Changed => {
                if self.has_seen(collection, id) {
                    Some(ChangeKind::Changed)
                } else {
                    self.mark_seen(collection, id.to_string());
                    Some(ChangeKind::Added)
                }
            }
            ChangeKind::Removed => {
                if self.has_seen(collection, id) {
                    self.mark_unseen(collection, id);
                    Some(ChangeKind::Removed)
                } else {
                    None
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sub(id: &str) -> Subscription {
        Subscription::new(id, "tasks", None, 0, vec![("tasks".into(), Query::all())])
    }

    #[test]
    fn seen_ids_round_trip() {
        let mut set = SubscriptionSet::new();
        assert!(!set.has_seen("tasks", "r1"));
        set.mark_seen("tasks", "r1");
        assert!(set.has_seen("tasks", "r1"));
        set.mark_unseen("tasks", "r1");
        assert!(!set.has_seen("tasks", "r1"));
    }

    #[test]
    fn others_excludes_the_named_subscription() {
        let mut set = SubscriptionSet::new();
        set.insert(sub("s1"));
        set.insert(sub("s2"));
        let others = set.others("s1");
        assert_eq!(others.len(), 1);
        assert_eq!(others[0].id, "s2");
    }

    #[test]
    fn remove_returns_the_removed_subscription() {
        let mut set = SubscriptionSet::new();
        set.insert(sub("s1"));
        assert!(set.remove("s1").is_some());
        assert!(!set.contains("s1"));
    }

    #[test]
    fn unseen_added_is_sent_as_added_and_marks_seen() {
        let mut set = SubscriptionSet::new();
        let kind = set.rewrite_for_delivery("tasks", "r1", ChangeKind::Added);
        assert_eq!(kind, Some(ChangeKind::Added));
        assert!(set.has_seen("tasks", "r1"));
    }

    #[test]
    fn already_seen_added_degrades_to_changed() {
        let mut set = SubscriptionSet::new();
        set.mark_seen("tasks", "r1");
        let kind = set.rewrite_for_delivery("tasks", "r1", ChangeKind::Added);
        assert_eq!(kind, Some(ChangeKind::Changed));
    }

    #[test]
    fn unseen_changed_is_promoted_to_added() {
        let mut set = SubscriptionSet::new();
        let kind = set.rewrite_for_delivery("tasks", "r1", ChangeKind::Changed);
        assert_eq!(kind, Some(ChangeKind::Added));
        assert!(set.has_seen("tasks", "r1"));
    }

    #[test]
    fn unseen_removed_is_dropped() {
        let mut set = SubscriptionSet::new();
        assert_eq!(set.rewrite_for_delivery("tasks", "r1", ChangeKind::Removed), None);
    }

    #[test]
    fn seen_removed_is_sent_and_marks_unseen() {
        let mut set = SubscriptionSet::new();
        set.mark_seen("tasks", "r1");
        let kind = set.rewrite_for_delivery("tasks", "r1", ChangeKind::Removed);
        assert_eq!(kind, Some(ChangeKind::Removed));
        assert!(!set.has_seen("tasks", "r1"));
    }
}
