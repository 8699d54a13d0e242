//! Per-connection DDP state machine: WebSocket upgrade, handshake,
//! `sub`/`unsub`/`method` dispatch, the ordered TX buffer, and the
//! per-collection `SeenIDs` filter.
//!
//! Follows the same task/channel shape as other connection handlers in
//! this stack (`accept_async`, a split send/receive pair joined by an
//! `mpsc::UnboundedSender<Message>` outbound channel), with the protocol
//! state machine itself grounded on `dddp/websocket.py`'s
//! `DDPWebSocketApplication` (`recv_connect`, `recv_ping`, `recv_sub`,
//! `recv_unsub`, `recv_method`, the literal `'o'` SockJS opening byte).

use crate::change_router::{Subscriber, SubscriberDirectory};
use crate::mergebox;
use crate::metrics::ServerMetrics;
use crate::object_mapping::ObjectMapping;
use crate::persistence;
use crate::registry::{MethodOrigin, Registry, TxSeqAllocator};
use crate::store::SharedStore;
use crate::subscription::{Subscription, SubscriptionSet};
use ddp_core::codec;
use ddp_core::id::IdGenerator;
use ddp_core::types::{ClientFrame, ServerFrame, PREFERRED_VERSION, SUPPORTED_VERSIONS};
use ddp_core::{Error, Result};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

/// Shared, immutable server-wide dependencies every connection task needs.
#[derive(Clone)]
pub struct ServerContext {
    pub registry: Registry,
    pub store: SharedStore,
    pub directory: Arc<SubscriberDirectory>,
    pub connections: ConnectionRegistry,
    pub notify_channel: String,
    pub bind_addr: SocketAddr,
    pub debug: bool,
    pub metrics: Option<Arc<ServerMetrics>>,
}

/// Serialize a server frame, mapping the (practically unreachable) failure
/// case the same way the codec module does for outbound EJSON.
fn frame_value(frame: impl Serialize) -> Result<Value> {
    serde_json::to_value(frame).map_err(|e| Error::Codec(e.to_string()))
}

/// The monotone reorder buffer guaranteeing frames reach the socket in
/// allocation order, even though they may be produced out of order by
/// concurrent RPC handlers and NOTIFY delivery.
///
/// Shared (via [`ConnectionRegistry`]) with the process's NOTIFY listener
/// task, which looks a session's buffer up to deliver a routed change
/// frame without disturbing this connection's own ordering.
pub(crate) struct TxBuffer {
    next_seq: AtomicU64,
    state: Mutex<TxBufferState>,
    out: mpsc::UnboundedSender<Message>,
}

struct TxBufferState {
    next_to_flush: u64,
    pending: BTreeMap<u64, Value>,
}

impl TxBuffer {
    fn new(out: mpsc::UnboundedSender<Message>) -> Self {
        Self {
            next_seq: AtomicU64::new(0),
            state: Mutex::new(TxBufferState {
                next_to_flush: 0,
                pending: BTreeMap::new(),
            }),
            out,
        }
    }

    /// Reserve the next sequence number. Call before starting work whose
    /// result must be ordered relative to other allocations (e.g. before
    /// committing a method's store transaction, so the method's own
    /// broadcast copy of its write sorts after the method's `result`).
    fn allocate(&self) -> u64 {
        self.next_seq.fetch_add(1, Ordering::SeqCst)
    }

    /// Queue `frame` for delivery at `seq`, flushing every contiguously
    /// ready frame starting from the buffer's current low-water mark.
    pub(crate) fn deliver(&self, seq: u64, frame: Value) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.pending.insert(seq, frame);
        while let Some(next) = state.pending.remove(&state.next_to_flush) {
            let envelope = codec::encode_frames(&[next]);
            self.out
                .send(Message::Text(envelope))
                .map_err(|_| Error::ConnectionClosed)?;
            state.next_to_flush += 1;
        }
        Ok(())
    }

    /// Allocate and immediately deliver: the common case for frames with
    /// no ordering dependency on other in-flight work.
    pub(crate) fn send_now(&self, frame: Value) -> Result<()> {
        let seq = self.allocate();
        self.deliver(seq, frame)
    }

    fn send_frame(&self, frame: impl Serialize) -> Result<()> {
        self.send_now(frame_value(frame)?)
    }
}

impl TxSeqAllocator for TxBuffer {
    fn allocate(&self) -> u64 {
        self.allocate()
    }
}

/// A live connection's outbound buffer plus its subscription/`SeenIDs`
/// state, as the NOTIFY listener task needs both: the buffer to write a
/// routed change to, and the subscription set to rewrite it through first
/// (§4.7's added/changed/removed rewrite rules).
pub(crate) struct ConnectionHandle {
    pub(crate) tx: Arc<TxBuffer>,
    pub(crate) subs: Arc<Mutex<SubscriptionSet>>,
}

/// Process-wide directory of live connections, keyed by DDP session id.
/// The NOTIFY listener task consults this to deliver a routed change to
/// whichever connections named it in `_connection_ids`.
pub type ConnectionRegistry = Arc<Mutex<std::collections::HashMap<String, Arc<ConnectionHandle>>>>;

enum ConnState {
    Connecting,
    Active {
        session: String,
        acting_user: Option<String>,
    },
    Closed,
}

/// Drive one accepted TCP connection through its full DDP lifecycle.
#[tracing::instrument(skip(stream, ctx), fields(remote = %peer_addr(&stream)))]
pub async fn handle_connection(stream: TcpStream, ctx: ServerContext) -> Result<()> {
    let remote_addr = peer_addr(&stream);
    let ws_stream = accept_async(stream)
        .await
        .map_err(|e| Error::Io(format!("websocket upgrade failed: {e}")))?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
    let tx_buffer = Arc::new(TxBuffer::new(out_tx.clone()));

    // SockJS session-opening frame precedes anything else, followed by the
    // server id frame every DDP transport sends before `connected`.
    out_tx
        .send(Message::Text("o".to_string()))
        .map_err(|_| Error::ConnectionClosed)?;
    out_tx
        .send(Message::Text(codec::encode_frames(&[
            serde_json::json!({"server_id": "0"})
        ])))
        .map_err(|_| Error::ConnectionClosed)?;

    let send_task = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            if ws_sender.send(msg).await.is_err() {
                break;
            }
        }
    });

    if let Some(metrics) = &ctx.metrics {
        metrics.record_connection(1);
    }

    let mut state = ConnState::Connecting;
    let subs: Arc<Mutex<SubscriptionSet>> = Arc::new(Mutex::new(SubscriptionSet::new()));

    while let Some(msg) = ws_receiver.next().await {
        let msg = match msg {
            Ok(m) => m,
            Err(_) => break,
        };
        let text = match msg {
            Message::Text(t) => t,
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) | Message::Binary(_) | Message::Frame(_) => {
                continue
            }
        };

        let frames = match codec::decode_frames(&text) {
            Ok(f) => f,
            Err(_) => {
                if tx_buffer
                    .send_frame(ServerFrame::protocol_error("malformed SockJS envelope", None))
                    .is_err()
                {
                    break;
                }
                continue;
            }
        };

        let mut closed = false;
        for raw in frames {
            match handle_frame(&ctx, &tx_buffer, &mut state, &subs, &remote_addr, raw).await {
                Ok(()) => {}
                Err(Error::ConnectionClosed) => {
                    closed = true;
                    break;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "error handling client frame");
                }
            }
        }

        if closed || matches!(state, ConnState::Closed) {
            break;
        }
    }

    teardown(&ctx, &state, &subs).await;
    if let Some(metrics) = &ctx.metrics {
        metrics.record_disconnection(0);
    }
    send_task.abort();
    Ok(())
}

async fn handle_frame(
    ctx: &ServerContext,
    tx: &Arc<TxBuffer>,
    state: &mut ConnState,
    subs: &Arc<Mutex<SubscriptionSet>>,
    remote_addr: &str,
    raw: Value,
) -> Result<()> {
    let frame: ClientFrame = match serde_json::from_value(raw.clone()) {
        Ok(f) => f,
        Err(e) => {
            tx.send_frame(ServerFrame::protocol_error(
                format!("unrecognized message: {e}"),
                Some(raw),
            ))?;
            return Ok(());
        }
    };

    match state {
        ConnState::Connecting => match frame {
            ClientFrame::Connect { version, support } => {
                if !support.iter().any(|v| SUPPORTED_VERSIONS.contains(&v.as_str()))
                    && !SUPPORTED_VERSIONS.contains(&version.as_str())
                {
                    tx.send_frame(ServerFrame::Failed {
                        version: PREFERRED_VERSION.to_string(),
                    })?;
                    return Ok(());
                }
                let mut gen = IdGenerator::new();
                let session = gen.next_id();
                ctx.connections.lock().unwrap().insert(
                    session.clone(),
                    Arc::new(ConnectionHandle {
                        tx: Arc::clone(tx),
                        subs: Arc::clone(subs),
                    }),
                );
                persistence::record_connection(
                    ctx.store.pool(),
                    &session,
                    &ctx.bind_addr.to_string(),
                    remote_addr,
                    &version,
                )
                .await?;
                *state = ConnState::Active {
                    session: session.clone(),
                    acting_user: None,
                };
                tx.send_frame(ServerFrame::Connected { session })?;
                Ok(())
            }
            _ => {
                tx.send_frame(ServerFrame::protocol_error("expected connect", None))?;
                Ok(())
            }
        },
        ConnState::Active { .. } => handle_active_frame(ctx, tx, subs, state, frame).await,
        ConnState::Closed => Err(Error::ConnectionClosed),
    }
}

async fn handle_active_frame(
    ctx: &ServerContext,
    tx: &Arc<TxBuffer>,
    subs: &Arc<Mutex<SubscriptionSet>>,
    state: &mut ConnState,
    frame: ClientFrame,
) -> Result<()> {
    let ConnState::Active { session, acting_user } = state else {
        unreachable!("handle_active_frame called outside ConnState::Active");
    };
    let session = session.clone();

    match frame {
        ClientFrame::Connect { .. } => {
            tx.send_frame(ServerFrame::protocol_error("already connected", None))?;
        }
        ClientFrame::Ping { id } => {
            tx.send_frame(ServerFrame::Pong { id })?;
        }
        ClientFrame::Pong { .. } => {}
        ClientFrame::Sub { id, name, params } => {
            handle_sub(ctx, tx, subs, &session, acting_user.as_deref(), id, name, params).await?;
        }
        ClientFrame::Unsub { id } => {
            handle_unsub(ctx, tx, subs, &session, id).await?;
        }
        ClientFrame::Method { id, method, params, random_seed } => {
            let auth_change = handle_method(
                ctx,
                tx,
                &session,
                acting_user.as_deref(),
                id,
                method,
                params,
                random_seed,
            )
            .await?;
            if let Some(new_user) = auth_change {
                apply_auth_change(ctx, tx, subs, &session, new_user.as_deref()).await?;
                *acting_user = new_user;
            }
        }
    }
    Ok(())
}

async fn handle_sub(
    ctx: &ServerContext,
    tx: &Arc<TxBuffer>,
    subs: &Arc<Mutex<SubscriptionSet>>,
    session: &str,
    acting_user: Option<&str>,
    sub_id: String,
    publication_name: String,
    params: Option<Value>,
) -> Result<()> {
    let publication = match ctx.registry.publication(&publication_name) {
        Ok(p) => p,
        Err(e) => {
            tx.send_frame(ServerFrame::Nosub {
                id: sub_id,
                error: Some(e.to_wire(ctx.debug)),
            })?;
            return Ok(());
        }
    };

    let params_for_persistence = params.clone();
    let expansion = publication.expand(params, acting_user).await?;
    let snapshot_upper = ctx.store.snapshot_id().await?;
    let subscription = Subscription::new(
        sub_id.clone(),
        publication_name.clone(),
        acting_user.map(str::to_string),
        snapshot_upper,
        expansion.clone(),
    );

    for (collection, query) in &expansion {
        ctx.directory.register(
            collection,
            Subscriber {
                connection_id: session.to_string(),
                acting_user: acting_user.map(str::to_string),
                query: query.clone(),
            },
        );
    }

    let collection_names: Vec<&str> = expansion.iter().map(|(c, _)| c.as_str()).collect();
    persistence::record_subscription(
        ctx.store.pool(),
        session,
        &sub_id,
        acting_user,
        &publication_name,
        params_for_persistence.as_ref(),
        &collection_names,
    )
    .await?;

    let others = subs.lock().unwrap().others(&sub_id);
    subs.lock().unwrap().insert(subscription.clone());
    let unique_rows = mergebox::unique(&ctx.store, &ctx.registry, &subscription, &others).await?;

    let object_mapping = ObjectMapping::new(ctx.store.pool());
    for (collection, row) in unique_rows {
        let id = object_mapping.meteor_id(&collection, &row.pk).await?;
        let already_seen = subs.lock().unwrap().has_seen(&collection, &id);
        if already_seen {
            continue;
        }
        subs.lock().unwrap().mark_seen(&collection, id.clone());
        tx.send_frame(ServerFrame::Added {
            collection,
            id,
            fields: Some(row.fields),
        })?;
    }

    tx.send_frame(ServerFrame::Ready { subs: vec![sub_id] })?;
    Ok(())
}

async fn handle_unsub(
    ctx: &ServerContext,
    tx: &Arc<TxBuffer>,
    subs: &Arc<Mutex<SubscriptionSet>>,
    session: &str,
    sub_id: String,
) -> Result<()> {
    let Some(subscription) = subs.lock().unwrap().remove(&sub_id) else {
        tx.send_frame(ServerFrame::Nosub {
            id: sub_id,
            error: None,
        })?;
        return Ok(());
    };

    let remaining = subs.lock().unwrap().others(&sub_id);
    let unique_rows = mergebox::unique(&ctx.store, &ctx.registry, &subscription, &remaining).await?;

    let object_mapping = ObjectMapping::new(ctx.store.pool());
    for (collection, row) in unique_rows {
        let id = object_mapping.meteor_id(&collection, &row.pk).await?;
        let seen = subs.lock().unwrap().has_seen(&collection, &id);
        if !seen {
            continue;
        }
        subs.lock().unwrap().mark_unseen(&collection, &id);
        tx.send_frame(ServerFrame::Removed { collection, id })?;
    }

    for collection in subscription.collections() {
        ctx.directory.unregister(collection, session);
    }
    persistence::remove_subscription(ctx.store.pool(), session, &sub_id).await?;

    tx.send_frame(ServerFrame::Nosub {
        id: sub_id,
        error: None,
    })?;
    Ok(())
}

/// Runs a method call and returns whether it requested an acting-user
/// change: `None` means no change, `Some(user)` means the connection's
/// acting user must become `user` (itself possibly `None`, a logout).
///
/// `result`/`updated` reserve their sequence numbers on `tx` before the
/// handler runs, so a write the handler makes through `origin.tx` (which
/// reserves its own broadcast `tx_seq` no earlier than this point) can
/// never flush ahead of this call's own response frames, regardless of
/// which task, this one or the NOTIFY listener, delivers it first.
#[allow(clippy::too_many_arguments)]
async fn handle_method(
    ctx: &ServerContext,
    tx: &Arc<TxBuffer>,
    session: &str,
    acting_user: Option<&str>,
    id: String,
    method_name: String,
    params: Option<Value>,
    random_seed: Option<String>,
) -> Result<Option<Option<String>>> {
    let started = Instant::now();
    // A client-supplied randomSeed lets a method handler draw the same id
    // sequence the client's optimistic UI stub already drew for the same
    // call, so the real record settles onto the id the UI is showing.
    // Without one, fall back to process entropy.
    let id_gen = match &random_seed {
        Some(seed) => IdGenerator::from_random_seed(&method_name, seed),
        None => IdGenerator::new(),
    };

    let result_seq = tx.allocate();
    let updated_seq = tx.allocate();

    let origin = MethodOrigin::new(session, Arc::clone(tx) as Arc<dyn TxSeqAllocator>);
    let outcome = match ctx.registry.method(&method_name) {
        Ok(handler) => handler.call(params, acting_user, id_gen, Some(origin.clone())).await,
        Err(e) => Err(e),
    };

    if let Some(metrics) = &ctx.metrics {
        let status = if outcome.is_ok() { "success" } else { "error" };
        metrics.record_method(&method_name, status, started.elapsed().as_secs_f64());
        if let Err(e) = &outcome {
            metrics.record_error(e.to_wire(ctx.debug).error);
        }
    }

    let result_frame = match outcome {
        Ok(value) => ServerFrame::Result {
            id: id.clone(),
            result: Some(value),
            error: None,
        },
        Err(e) => ServerFrame::Result {
            id: id.clone(),
            result: None,
            error: Some(e.to_wire(ctx.debug)),
        },
    };
    tx.deliver(result_seq, frame_value(result_frame)?)?;
    tx.deliver(updated_seq, frame_value(ServerFrame::Updated { methods: vec![id] })?)?;

    Ok(origin.take_acting_user_change())
}

/// Applies an acting-user change across every one of a connection's live
/// subscriptions, grounded on `dddp/accounts/ddp.py`'s `Auth.update_subs`:
/// subscriptions are processed one at a time, each diffed against the
/// others' *current* acting user (already-switched subs reflect the new
/// user, not-yet-switched ones the old), with `added`/`removed` sent for
/// the symmetric difference before moving to the next.
async fn apply_auth_change(
    ctx: &ServerContext,
    tx: &Arc<TxBuffer>,
    subs: &Arc<Mutex<SubscriptionSet>>,
    session: &str,
    new_user: Option<&str>,
) -> Result<()> {
    let sub_ids: Vec<String> = subs.lock().unwrap().all().map(|s| s.id.clone()).collect();
    let object_mapping = ObjectMapping::new(ctx.store.pool());

    for sub_id in sub_ids {
        let Some((pre, others)) = ({
            let set = subs.lock().unwrap();
            set.get(&sub_id).cloned().map(|pre| (pre, set.others(&sub_id)))
        }) else {
            continue;
        };
        let mut post = pre.clone();
        post.acting_user = new_user.map(str::to_string);

        let delta = mergebox::auth_change(&ctx.store, &ctx.registry, &pre, &post, &others).await?;

        for (collection, pk) in delta.removed {
            let id = object_mapping.meteor_id(&collection, &pk).await?;
            let seen = subs.lock().unwrap().has_seen(&collection, &id);
            if !seen {
                continue;
            }
            subs.lock().unwrap().mark_unseen(&collection, &id);
            tx.send_frame(ServerFrame::Removed { collection, id })?;
        }
        for (collection, row) in delta.added {
            let id = object_mapping.meteor_id(&collection, &row.pk).await?;
            let already_seen = subs.lock().unwrap().has_seen(&collection, &id);
            if already_seen {
                continue;
            }
            subs.lock().unwrap().mark_seen(&collection, id.clone());
            tx.send_frame(ServerFrame::Added {
                collection,
                id,
                fields: Some(row.fields),
            })?;
        }

        subs.lock().unwrap().set_acting_user(&sub_id, new_user.map(str::to_string));
        for collection in post.collections() {
            ctx.directory.reauth(collection, session, new_user.map(str::to_string));
        }
    }

    persistence::update_subscriptions_user(ctx.store.pool(), session, new_user).await?;
    Ok(())
}

async fn teardown(ctx: &ServerContext, state: &ConnState, subs: &Arc<Mutex<SubscriptionSet>>) {
    if let ConnState::Active { session, .. } = state {
        for subscription in subs.lock().unwrap().all() {
            for collection in subscription.collections() {
                ctx.directory.unregister(collection, session);
            }
        }
        ctx.connections.lock().unwrap().remove(session);
        if let Err(e) = persistence::remove_connection(ctx.store.pool(), session).await {
            tracing::warn!(session = %session, error = %e, "failed to remove persisted connection");
        }
    }
}

fn peer_addr(stream: &TcpStream) -> String {
    stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tx_buffer_flushes_in_allocation_order_despite_out_of_order_delivery() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let buffer = TxBuffer::new(tx);
        let a = buffer.allocate();
        let b = buffer.allocate();
        let c = buffer.allocate();

        // deliver out of order: c, then a, then b
        buffer.deliver(c, serde_json::json!({"n": "c"})).unwrap();
        assert!(rx.try_recv().is_err(), "c must wait for a and b");

        buffer.deliver(a, serde_json::json!({"n": "a"})).unwrap();
        let first = rx.try_recv().unwrap();
        assert!(matches!(first, Message::Text(ref s) if s.contains("\"n\":\"a\"")));

        buffer.deliver(b, serde_json::json!({"n": "b"})).unwrap();
        let second = rx.try_recv().unwrap();
        assert!(matches!(second, Message::Text(ref s) if s.contains("\"n\":\"b\"")));
        let third = rx.try_recv().unwrap();
        assert!(matches!(third, Message::Text(ref s) if s.contains("\"n\":\"c\"")));
    }

    #[test]
    fn send_now_allocates_and_delivers_immediately() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let buffer = TxBuffer::new(tx);
        buffer.send_now(serde_json::json!({"msg": "pong"})).unwrap();
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn result_and_updated_seqs_precede_a_tx_seq_allocated_during_the_call() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let buffer = Arc::new(TxBuffer::new(tx));
        let result_seq = buffer.allocate();
        let updated_seq = buffer.allocate();
        // Simulate a write_and_route call reserving its broadcast seq mid-handler.
        let tx_seq = TxSeqAllocator::allocate(&*buffer);
        assert!(tx_seq > result_seq && tx_seq > updated_seq);

        // Broadcast delivered first (e.g. by the NOTIFY listener task) must
        // still wait behind result/updated.
        buffer.deliver(tx_seq, serde_json::json!({"n": "broadcast"})).unwrap();
        assert!(rx.try_recv().is_err());
        buffer.deliver(result_seq, serde_json::json!({"n": "result"})).unwrap();
        buffer.deliver(updated_seq, serde_json::json!({"n": "updated"})).unwrap();

        let first = rx.try_recv().unwrap();
        assert!(matches!(first, Message::Text(ref s) if s.contains("\"n\":\"result\"")));
        let second = rx.try_recv().unwrap();
        assert!(matches!(second, Message::Text(ref s) if s.contains("\"n\":\"updated\"")));
        let third = rx.try_recv().unwrap();
        assert!(matches!(third, Message::Text(ref s) if s.contains("\"n\":\"broadcast\"")));
    }
}
