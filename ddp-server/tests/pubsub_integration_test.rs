//! End-to-end live-query integration tests: initial sync on subscribe, and
//! a write on the underlying table fanned out live via NOTIFY/LISTEN to an
//! already-subscribed connection.

mod common;

use common::DdpTestClient;
use ddp_server::object_mapping::ObjectMapping;
use ddp_server::store::Query;
use ddp_server::{change_router, publication_fn, CollectionDef, DdpServer};
use std::time::Duration;

#[tokio::test]
async fn test_subscribe_receives_initial_sync_then_ready() {
    let db = common::start_db().await;
    common::create_tasks_table(&db.pool).await;
    common::insert_task(&db.pool, "a", "first", false).await;
    common::insert_task(&db.pool, "b", "second", false).await;

    let addr: std::net::SocketAddr = "127.0.0.1:0".parse().unwrap();
    let server = DdpServer::builder()
        .bind(addr)
        .database_url(db.url.clone())
        .collection(CollectionDef::new("tasks", "task"))
        .unwrap()
        .publication(
            "tasks",
            publication_fn(|_params, _user| async { Ok(vec![("tasks".to_string(), Query::all())]) }),
        )
        .unwrap()
        .build()
        .await
        .unwrap();

    let server_addr = server.local_addr().unwrap();
    let server_handle = tokio::spawn(async move {
        let _ = server.run().await;
    });

    tokio::time::sleep(Duration::from_millis(100)).await;

    let url = format!("ws://{server_addr}");
    let mut client = DdpTestClient::connect(&url).await;
    client.handshake().await;

    client.sub("s1", "tasks", None).await;
    let mut all = Vec::new();
    for _ in 0..3 {
        all.extend(client.recv_frames().await);
    }

    let added: Vec<_> = all.iter().filter(|f| f["msg"] == "added").collect();
    assert_eq!(added.len(), 2);
    let ready: Vec<_> = all.iter().filter(|f| f["msg"] == "ready").collect();
    assert_eq!(ready.len(), 1);
    assert_eq!(ready[0]["subs"], serde_json::json!(["s1"]));

    client.close().await;
    server_handle.abort();
}

#[tokio::test]
async fn test_unsubscribe_emits_removed_then_nosub() {
    let db = common::start_db().await;
    common::create_tasks_table(&db.pool).await;
    common::insert_task(&db.pool, "a", "first", false).await;

    let addr: std::net::SocketAddr = "127.0.0.1:0".parse().unwrap();
    let server = DdpServer::builder()
        .bind(addr)
        .database_url(db.url.clone())
        .collection(CollectionDef::new("tasks", "task"))
        .unwrap()
        .publication(
            "tasks",
            publication_fn(|_params, _user| async { Ok(vec![("tasks".to_string(), Query::all())]) }),
        )
        .unwrap()
        .build()
        .await
        .unwrap();

    let server_addr = server.local_addr().unwrap();
    let server_handle = tokio::spawn(async move {
        let _ = server.run().await;
    });

    tokio::time::sleep(Duration::from_millis(100)).await;

    let url = format!("ws://{server_addr}");
    let mut client = DdpTestClient::connect(&url).await;
    client.handshake().await;

    client.sub("s1", "tasks", None).await;
    client.recv_frames().await; // added
    client.recv_frames().await; // ready

    client.unsub("s1").await;
    let frames = client.recv_frames().await;
    assert_eq!(frames[0]["msg"], "removed");
    let frames2 = client.recv_frames().await;
    assert_eq!(frames2[0]["msg"], "nosub");

    client.close().await;
    server_handle.abort();
}

#[tokio::test]
async fn test_live_insert_is_routed_to_subscribed_connection() {
    let db = common::start_db().await;
    common::create_tasks_table(&db.pool).await;
    common::insert_task(&db.pool, "a", "first", false).await;

    let addr: std::net::SocketAddr = "127.0.0.1:0".parse().unwrap();
    let server = DdpServer::builder()
        .bind(addr)
        .database_url(db.url.clone())
        .notify_channel("ddp_test_live_insert")
        .collection(CollectionDef::new("tasks", "task"))
        .unwrap()
        .publication(
            "tasks",
            publication_fn(|_params, _user| async { Ok(vec![("tasks".to_string(), Query::all())]) }),
        )
        .unwrap()
        .build()
        .await
        .unwrap();

    let server_addr = server.local_addr().unwrap();
    let store = server.store().clone();
    let registry = server.registry().clone();
    let directory = server.directory().clone();
    let notify_channel = server.notify_channel().to_string();

    let server_handle = tokio::spawn(async move {
        let _ = server.run().await;
    });

    tokio::time::sleep(Duration::from_millis(100)).await;

    let url = format!("ws://{server_addr}");
    let mut client = DdpTestClient::connect(&url).await;
    client.handshake().await;

    client.sub("s1", "tasks", None).await;
    client.recv_frames().await; // added for "a"
    client.recv_frames().await; // ready

    // Simulate an application write path: insert a new row, then route the
    // change the same way a registered method handler would.
    let object_mapping = ObjectMapping::new(store.pool());
    change_router::write_and_route(
        &store,
        &registry,
        &object_mapping,
        &directory,
        None,
        &notify_channel,
        "tasks",
        "b",
        Some(serde_json::json!({"title": "second", "done": false})),
        None,
        None,
        || {
            let pool = store.pool().clone();
            async move {
                sqlx::query("INSERT INTO task (pk, title, done) VALUES ($1, $2, $3)")
                    .bind("b")
                    .bind("second")
                    .bind(false)
                    .execute(&pool)
                    .await
                    .map_err(|e| ddp_core::Error::Store(e.to_string()))?;
                Ok(())
            }
        },
    )
    .await
    .unwrap();

    let frames = tokio::time::timeout(Duration::from_secs(5), client.recv_frames())
        .await
        .expect("timed out waiting for live update");
    assert_eq!(frames[0]["msg"], "added");
    assert_eq!(frames[0]["collection"], "tasks");
    assert_eq!(frames[0]["fields"]["title"], "second");

    client.close().await;
    server_handle.abort();
}
