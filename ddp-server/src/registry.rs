//! Registry of collections, publications, and methods.
//!
//! Populated once at startup by [`Registry::builder`], then frozen: after
//! [`RegistryBuilder::build`] returns, every lookup is a lock-free `HashMap`
//! read against an `Arc`-shared, immutable table. Registering the same
//! collection, publication, or method name twice is a startup error, never a
//! silent overwrite.

use crate::store::Query;
use ddp_core::id::IdGenerator;
use ddp_core::{Error, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

/// A future-returning method result, boxed so methods of different
/// concrete future types can share one `HashMap` value type.
pub type MethodResult = Pin<Box<dyn Future<Output = Result<Value>> + Send>>;

/// Reserves delivery sequence numbers on a connection's TX buffer.
/// Implemented by `crate::connection::TxBuffer`; kept as a trait here so
/// this module doesn't need to name that type directly.
pub trait TxSeqAllocator: Send + Sync {
    fn allocate(&self) -> u64;
}

/// Identifies the connection a method call originated from, passed to every
/// [`MethodHandler::call`]. A handler that writes through
/// `crate::change_router::write_and_route` reserves a `tx_seq` via `tx`
/// before the write commits, so the write's own broadcast copy is ordered
/// after the call's `result`/`updated` frames (§4.7/§5's originator
/// ordering). A `login`/`logout` style handler calls
/// [`MethodOrigin::set_acting_user`] to request the connection's acting user
/// change, grounded on `dddp/accounts/ddp.py`'s `this.user_id = user.pk`.
#[derive(Clone)]
pub struct MethodOrigin {
    pub connection_id: String,
    pub tx: Arc<dyn TxSeqAllocator>,
    acting_user_change: Arc<Mutex<Option<Option<String>>>>,
}

impl MethodOrigin {
    pub fn new(connection_id: impl Into<String>, tx: Arc<dyn TxSeqAllocator>) -> Self {
        Self {
            connection_id: connection_id.into(),
            tx,
            acting_user_change: Arc::new(Mutex::new(None)),
        }
    }

    /// Request that the connection's acting user become `user_id` once this
    /// call returns. The connection state machine re-diffs every live
    /// subscription's `mergebox::unique()` under the old and new user via
    /// `mergebox::auth_change` and sends the symmetric difference as
    /// `added`/`removed`.
    pub fn set_acting_user(&self, user_id: Option<String>) {
        *self.acting_user_change.lock().unwrap() = Some(user_id);
    }

    pub(crate) fn take_acting_user_change(&self) -> Option<Option<String>> {
        self.acting_user_change.lock().unwrap().take()
    }
}

/// A registered RPC method: takes the already-EJSON-decoded params, the
/// acting user id (if any), an id generator seeded from the call's
/// `randomSeed` (or process entropy if the client sent none), and the
/// origin of the call, returns an EJSON-encodable value. A handler that
/// inserts a new record and wants the client's optimistic stub to resolve
/// to the same id draws it from `id_gen` rather than minting its own.
pub trait MethodHandler: Send + Sync {
    fn call(
        &self,
        params: Option<Value>,
        acting_user: Option<&str>,
        id_gen: IdGenerator,
        origin: Option<MethodOrigin>,
    ) -> MethodResult;
}

pub struct AsyncMethodHandler<F, Fut>
where
    F: Fn(Option<Value>, Option<String>, IdGenerator, Option<MethodOrigin>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    func: F,
}

impl<F, Fut> MethodHandler for AsyncMethodHandler<F, Fut>
where
    F: Fn(Option<Value>, Option<String>, IdGenerator, Option<MethodOrigin>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    fn call(
        &self,
        params: Option<Value>,
        acting_user: Option<&str>,
        id_gen: IdGenerator,
        origin: Option<MethodOrigin>,
    ) -> MethodResult {
        Box::pin((self.func)(params, acting_user.map(str::to_string), id_gen, origin))
    }
}

/// Wrap an async closure as a [`MethodHandler`].
pub fn method_fn<F, Fut>(func: F) -> Arc<dyn MethodHandler>
where
    F: Fn(Option<Value>, Option<String>, IdGenerator, Option<MethodOrigin>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    Arc::new(AsyncMethodHandler { func })
}

/// A future-returning publication result.
pub type PublicationResult = Pin<Box<dyn Future<Output = Result<Vec<(String, Query)>>> + Send>>;

/// A registered publication: expands subscription params and the acting
/// user into a list of `(collection name, query)` pairs.
pub trait PublicationHandler: Send + Sync {
    fn expand(&self, params: Option<Value>, acting_user: Option<&str>) -> PublicationResult;
}

pub struct AsyncPublicationHandler<F, Fut>
where
    F: Fn(Option<Value>, Option<String>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Vec<(String, Query)>>> + Send + 'static,
{
    func: F,
}

impl<F, Fut> PublicationHandler for AsyncPublicationHandler<F, Fut>
where
    F: Fn(Option<Value>, Option<String>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Vec<(String, Query)>>> + Send + 'static,
{
    fn expand(&self, params: Option<Value>, acting_user: Option<&str>) -> PublicationResult {
        Box::pin((self.func)(params, acting_user.map(str::to_string)))
    }
}

/// Wrap an async closure as a [`PublicationHandler`].
pub fn publication_fn<F, Fut>(func: F) -> Arc<dyn PublicationHandler>
where
    F: Fn(Option<Value>, Option<String>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<(String, Query)>>> + Send + 'static,
{
    Arc::new(AsyncPublicationHandler { func })
}

/// Declares how a collection maps onto the store.
#[derive(Debug, Clone)]
pub struct CollectionDef {
    /// Stable public name used in `added`/`changed`/`removed` frames.
    pub name: String,
    /// The backing table.
    pub table: String,
    /// Relation paths from a row back to an owning user, for visibility
    /// filtering. Empty means the collection is unrestricted.
    pub user_rel: Vec<String>,
    /// Optional `ORDER BY` clause (column list), applied to initial sync.
    pub order_by: Option<String>,
}

impl CollectionDef {
    pub fn new(name: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            user_rel: Vec::new(),
            order_by: None,
        }
    }

    pub fn with_user_rel(mut self, rel: impl Into<String>) -> Self {
        self.user_rel.push(rel.into());
        self
    }

    pub fn with_order_by(mut self, order_by: impl Into<String>) -> Self {
        self.order_by = Some(order_by.into());
        self
    }

    pub fn is_restricted(&self) -> bool {
        !self.user_rel.is_empty()
    }
}

/// Immutable, lock-free-after-build registry of collections, publications,
/// and methods.
#[derive(Clone)]
pub struct Registry {
    collections: Arc<HashMap<String, CollectionDef>>,
    publications: Arc<HashMap<String, Arc<dyn PublicationHandler>>>,
    methods: Arc<HashMap<String, Arc<dyn MethodHandler>>>,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    pub fn collection(&self, name: &str) -> Option<&CollectionDef> {
        self.collections.get(name)
    }

    pub fn publication(&self, name: &str) -> Result<Arc<dyn PublicationHandler>> {
        self.publications
            .get(name)
            .cloned()
            .ok_or_else(|| Error::PublicationNotFound(name.to_string()))
    }

    pub fn method(&self, name: &str) -> Result<Arc<dyn MethodHandler>> {
        self.methods
            .get(name)
            .cloned()
            .ok_or_else(|| Error::MethodNotFound(name.to_string()))
    }

    pub fn collection_names(&self) -> Vec<String> {
        self.collections.keys().cloned().collect()
    }
}

/// Accumulates registrations, then freezes them into a [`Registry`].
#[derive(Default)]
pub struct RegistryBuilder {
    collections: HashMap<String, CollectionDef>,
    publications: HashMap<String, Arc<dyn PublicationHandler>>,
    methods: HashMap<String, Arc<dyn MethodHandler>>,
}

impl RegistryBuilder {
    pub fn collection(mut self, def: CollectionDef) -> Result<Self> {
        if self.collections.contains_key(&def.name) {
            return Err(Error::Internal(format!(
                "duplicate collection registration: {}",
                def.name
            )));
        }
        self.collections.insert(def.name.clone(), def);
        Ok(self)
    }

    pub fn publication(
        mut self,
        name: impl Into<String>,
        handler: Arc<dyn PublicationHandler>,
    ) -> Result<Self> {
        let name = name.into();
        if self.publications.contains_key(&name) {
            return Err(Error::Internal(format!(
                "duplicate publication registration: {name}"
            )));
        }
        self.publications.insert(name, handler);
        Ok(self)
    }

    pub fn method(mut self, name: impl Into<String>, handler: Arc<dyn MethodHandler>) -> Result<Self> {
        let name = name.into();
        if self.methods.contains_key(&name) {
            return Err(Error::Internal(format!(
                "duplicate method registration: {name}"
            )));
        }
        self.methods.insert(name, handler);
        Ok(self)
    }

    pub fn build(self) -> Registry {
        Registry {
            collections: Arc::new(self.collections),
            publications: Arc::new(self.publications),
            methods: Arc::new(self.methods),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn registered_method_is_invoked() {
        let registry = Registry::builder()
            .method(
                "ping",
                method_fn(|_params, _user, _id_gen, _origin| async { Ok(json!({"pong": true})) }),
            )
            .unwrap()
            .build();

        let handler = registry.method("ping").unwrap();
        let result = handler.call(None, None, IdGenerator::new(), None).await.unwrap();
        assert_eq!(result, json!({"pong": true}));
    }

    #[tokio::test]
    async fn method_handler_draws_ids_from_the_passed_generator() {
        let registry = Registry::builder()
            .method(
                "tasks.add",
                method_fn(|_params, _user, mut id_gen, _origin| async move {
                    Ok(json!({"id": id_gen.next_id()}))
                }),
            )
            .unwrap()
            .build();

        let handler = registry.method("tasks.add").unwrap();
        let a = handler
            .call(None, None, IdGenerator::from_random_seed("tasks.add", "seed"), None)
            .await
            .unwrap();
        let b = handler
            .call(None, None, IdGenerator::from_random_seed("tasks.add", "seed"), None)
            .await
            .unwrap();
        assert_eq!(a, b, "same randomSeed must draw the same id");
    }

    #[test]
    fn unknown_method_is_not_found() {
        let registry = Registry::builder().build();
        assert!(matches!(
            registry.method("bogus"),
            Err(Error::MethodNotFound(name)) if name == "bogus"
        ));
    }

    #[test]
    fn duplicate_method_registration_is_rejected() {
        let result = Registry::builder()
            .method("ping", method_fn(|_, _, _, _| async { Ok(json!(null)) }))
            .unwrap()
            .method("ping", method_fn(|_, _, _, _| async { Ok(json!(null)) }));
        assert!(result.is_err());
    }

    #[test]
    fn collection_lookup_reports_restriction() {
        let registry = Registry::builder()
            .collection(CollectionDef::new("tasks", "task").with_user_rel("owner"))
            .unwrap()
            .build();
        let def = registry.collection("tasks").unwrap();
        assert!(def.is_restricted());
        assert!(registry.collection("missing").is_none());
    }

    #[tokio::test]
    async fn registered_publication_expands() {
        let registry = Registry::builder()
            .publication(
                "tasks",
                publication_fn(|_params, _user| async {
                    Ok(vec![("tasks".to_string(), Query::all())])
                }),
            )
            .unwrap()
            .build();
        let handler = registry.publication("tasks").unwrap();
        let expanded = handler.expand(None, None).await.unwrap();
        assert_eq!(expanded.len(), 1);
        assert_eq!(expanded[0].0, "tasks");
    }
}
