//! Server public API integration tests

mod common;

use ddp_core::id::IdGenerator;
use ddp_server::{method_fn, CollectionDef, DdpServer};
use std::time::Duration;

#[tokio::test]
async fn test_server_local_addr() {
    let db = common::start_db().await;
    let addr: std::net::SocketAddr = "127.0.0.1:0".parse().unwrap();
    let server = DdpServer::builder()
        .bind(addr)
        .database_url(db.url.clone())
        .build()
        .await
        .unwrap();

    let local_addr = server.local_addr();
    assert!(local_addr.is_ok());
    assert_ne!(local_addr.unwrap().port(), 0);
}

#[tokio::test]
async fn test_server_exposes_registry() {
    let db = common::start_db().await;
    let addr: std::net::SocketAddr = "127.0.0.1:0".parse().unwrap();
    let server = DdpServer::builder()
        .bind(addr)
        .database_url(db.url.clone())
        .collection(CollectionDef::new("tasks", "task"))
        .unwrap()
        .method(
            "tasks.ping",
            method_fn(|_params, _user, _id_gen, _origin| async { Ok(serde_json::json!({"pong": true})) }),
        )
        .unwrap()
        .build()
        .await
        .unwrap();

    assert_eq!(server.registry().collection_names(), vec!["tasks".to_string()]);
    let handler = server.registry().method("tasks.ping").unwrap();
    let result = handler.call(None, None, IdGenerator::new(), None).await.unwrap();
    assert_eq!(result, serde_json::json!({"pong": true}));
}

#[tokio::test]
async fn test_server_exposes_store() {
    let db = common::start_db().await;
    let addr: std::net::SocketAddr = "127.0.0.1:0".parse().unwrap();
    let server = DdpServer::builder()
        .bind(addr)
        .database_url(db.url.clone())
        .build()
        .await
        .unwrap();

    // the store handle is live: a snapshot id can be read through it.
    assert!(server.store().snapshot_id().await.is_ok());
}

#[tokio::test]
async fn test_server_drop_cleanup() {
    let db = common::start_db().await;
    let addr: std::net::SocketAddr = "127.0.0.1:0".parse().unwrap();
    let server = DdpServer::builder()
        .bind(addr)
        .database_url(db.url.clone())
        .build()
        .await
        .unwrap();

    // Drop the server; its NOTIFY listener task must be aborted, not leaked.
    drop(server);

    tokio::time::sleep(Duration::from_millis(100)).await;
}
