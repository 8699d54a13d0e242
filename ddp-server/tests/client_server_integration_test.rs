//! Full client-server integration tests: connect, call a method, and tear
//! down, driving the server over a real WebSocket the same way a browser
//! client would.

mod common;

use common::DdpTestClient;
use ddp_server::{method_fn, DdpServer};
use serde::Deserialize;
use std::time::Duration;

#[derive(Deserialize)]
struct AddParams {
    a: i32,
    b: i32,
}

#[tokio::test]
async fn test_full_rpc_roundtrip() {
    let db = common::start_db().await;
    let addr: std::net::SocketAddr = "127.0.0.1:0".parse().unwrap();
    let server = DdpServer::builder()
        .bind(addr)
        .database_url(db.url.clone())
        .method(
            "add",
            method_fn(|params, _user, _id_gen, _origin| async move {
                let p: AddParams = serde_json::from_value(params.unwrap()).unwrap();
                Ok(serde_json::json!(p.a + p.b))
            }),
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

    let frames = client
        .method("m1", "add", Some(serde_json::json!({"a": 5, "b": 3})))
        .await;
    assert_eq!(frames[0]["msg"], "result");
    assert_eq!(frames[0]["result"], 8);
    assert_eq!(frames[1]["msg"], "updated");

    client.close().await;
    server_handle.abort();
}

#[tokio::test]
async fn test_error_propagation() {
    let db = common::start_db().await;
    let addr: std::net::SocketAddr = "127.0.0.1:0".parse().unwrap();
    let server = DdpServer::builder()
        .bind(addr)
        .database_url(db.url.clone())
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

    let frames = client.method("m1", "nonexistent", None).await;
    assert_eq!(frames[0]["msg"], "result");
    assert!(frames[0]["error"].is_object());
    assert!(frames[0]["result"].is_null());

    client.close().await;
    server_handle.abort();
}

#[tokio::test]
async fn test_multiple_clients_same_server() {
    let db = common::start_db().await;
    let addr: std::net::SocketAddr = "127.0.0.1:0".parse().unwrap();
    let server = DdpServer::builder()
        .bind(addr)
        .database_url(db.url.clone())
        .method(
            "ping",
            method_fn(|_params, _user, _id_gen, _origin| async { Ok(serde_json::json!({"pong": true})) }),
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

    let mut client1 = DdpTestClient::connect(&url).await;
    client1.handshake().await;
    let mut client2 = DdpTestClient::connect(&url).await;
    client2.handshake().await;

    let frames1 = client1.method("m1", "ping", None).await;
    let frames2 = client2.method("m1", "ping", None).await;

    assert_eq!(frames1[0]["result"]["pong"], true);
    assert_eq!(frames2[0]["result"]["pong"], true);

    client1.close().await;
    client2.close().await;
    server_handle.abort();
}
