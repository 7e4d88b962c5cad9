//! Integration tests for the local sharing server.
//!
//! Each test binds an ephemeral loopback port and talks to the server over
//! real TCP.

#![cfg(feature = "web")]

mod common;

use std::net::Ipv4Addr;
use std::sync::Arc;

use netshare_core::clock::ManualClock;
use netshare_core::config::{ServerConfig, TransferConfig};
use netshare_core::connection::{ConnectionProfile, Protocol};
use netshare_core::events::EventBus;
use netshare_core::net::FixedResolver;
use netshare_core::server::{LocalSharingServer, ServerStatus, UploadResponse};
use netshare_core::transfer::{ExecutorSet, TransferManager, TransferStatus, TransferTarget};
use netshare_core::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

fn loopback_server() -> LocalSharingServer {
    let config = ServerConfig {
        localhost_only: true,
        ..ServerConfig::default()
    };
    LocalSharingServer::new(
        config,
        Arc::new(FixedResolver(Some(Ipv4Addr::LOCALHOST))),
        EventBus::default(),
    )
}

#[tokio::test]
async fn test_serves_text_file() {
    let root = common::create_temp_dir();
    common::create_test_file(root.path(), "a.txt", &[b'x'; 100]);

    let server = loopback_server();
    let state = server.start(root.path(), 0).await.unwrap();
    let url = state.server_url.unwrap();

    let response = reqwest::get(format!("{url}/a.txt")).await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["content-type"], "text/plain");
    assert_eq!(response.headers()["access-control-allow-origin"], "*");
    assert_eq!(response.bytes().await.unwrap().len(), 100);

    let response = reqwest::get(format!("{url}/missing.txt")).await.unwrap();
    assert_eq!(response.status(), 404);

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_raw_traversal_request_rejected() {
    let outer = common::create_temp_dir();
    common::create_test_file(outer.path(), "secret.txt", b"top secret");
    let root = outer.path().join("public");
    std::fs::create_dir(&root).unwrap();

    let server = loopback_server();
    let addr = server.start(&root, 0).await.unwrap().bind_address.unwrap();

    let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"GET /../secret.txt HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let mut reply = String::new();
    stream.read_to_string(&mut reply).await.unwrap();

    assert!(!reply.starts_with("HTTP/1.1 200"), "traversal served: {reply}");
    assert!(!reply.contains("top secret"));

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_listing_and_upload_over_http() {
    let root = common::create_temp_dir();
    common::create_test_file(root.path(), "existing.txt", b"hi");

    let server = loopback_server();
    let url = server.start(root.path(), 0).await.unwrap().server_url.unwrap();
    let client = reqwest::Client::new();

    let listing: serde_json::Value = client
        .get(format!("{url}/"))
        .header("accept", "application/json")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listing["entries"][0]["name"], "existing.txt");
    assert_eq!(listing["entries"][0]["isDir"], false);

    let part = reqwest::multipart::Part::bytes(b"fresh content".to_vec()).file_name("new.txt");
    let form = reqwest::multipart::Form::new().part("file", part);
    let response = client
        .post(format!("{url}/upload"))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let reply: UploadResponse = response.json().await.unwrap();
    assert_eq!(reply.status, "success");
    assert_eq!(
        std::fs::read_to_string(root.path().join("new.txt")).unwrap(),
        "fresh content"
    );

    let response = client
        .post(format!("{url}/upload"))
        .header("content-type", "application/json")
        .body("{}")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_second_start_keeps_running_state() {
    let root = common::create_temp_dir();
    let server = loopback_server();
    let first = server.start(root.path(), 0).await.unwrap();

    let err = server.start(root.path(), 0).await.unwrap_err();
    assert!(matches!(err, Error::AlreadyRunning(_)));
    assert_eq!(server.state().server_url, first.server_url);
    assert_eq!(server.state().status, ServerStatus::Running);

    server.stop().await.unwrap();
    server.stop().await.unwrap();
    assert_eq!(server.state().status, ServerStatus::Stopped);
}

#[tokio::test]
async fn test_port_in_use() {
    let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = occupied.local_addr().unwrap().port();
    let root = common::create_temp_dir();

    let err = loopback_server().start(root.path(), port).await.unwrap_err();
    assert!(matches!(err, Error::Bind { .. }));
}

#[tokio::test]
async fn test_peer_round_trip_through_transfer_manager() {
    let served = common::create_temp_dir();
    let server = loopback_server();
    let addr = server.start(served.path(), 0).await.unwrap().bind_address.unwrap();

    let config = TransferConfig::default();
    let manager = TransferManager::new(
        config.clone(),
        ExecutorSet::standard(&config),
        Arc::new(ManualClock::starting_now()),
        EventBus::default(),
    );

    let local = common::create_temp_dir();
    let content = common::random_bytes(300 * 1024);
    let source = common::create_test_file(local.path(), "payload.bin", &content);

    let upload = manager
        .enqueue_upload(TransferTarget::Peer(addr), &source, "payload.bin")
        .await
        .unwrap();
    common::wait_until("upload", || {
        manager.get(&upload.id).is_some_and(|t| t.status.is_terminal())
    })
    .await;
    let upload = manager.get(&upload.id).unwrap();
    assert_eq!(upload.status, TransferStatus::Completed, "{:?}", upload.error_message);
    assert_eq!(upload.transferred_bytes, content.len() as u64);
    common::assert_files_equal(&source, &served.path().join("payload.bin"));

    let fetched = local.path().join("fetched.bin");
    let download = manager
        .enqueue_download(TransferTarget::Peer(addr), "payload.bin", &fetched)
        .await
        .unwrap();
    common::wait_until("download", || {
        manager.get(&download.id).is_some_and(|t| t.status.is_terminal())
    })
    .await;
    let download = manager.get(&download.id).unwrap();
    assert_eq!(download.status, TransferStatus::Completed, "{:?}", download.error_message);
    assert_eq!(download.transferred_bytes, download.total_bytes);
    common::assert_files_equal(&source, &fetched);

    let missing = manager
        .enqueue_download(TransferTarget::Peer(addr), "nope.bin", local.path().join("nope.bin"))
        .await
        .unwrap();
    common::wait_until("failed download", || {
        manager.get(&missing.id).is_some_and(|t| t.status.is_terminal())
    })
    .await;
    assert_eq!(manager.get(&missing.id).unwrap().status, TransferStatus::Failed);

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_http_profile_remote_path_selects_upload_dir() {
    let served = common::create_temp_dir();
    let server = loopback_server();
    let addr = server.start(served.path(), 0).await.unwrap().bind_address.unwrap();

    let config = TransferConfig::default();
    let manager = TransferManager::new(
        config.clone(),
        ExecutorSet::standard(&config),
        Arc::new(ManualClock::starting_now()),
        EventBus::default(),
    );
    let profile =
        ConnectionProfile::new("peer", "127.0.0.1", addr.port(), Protocol::Http).with_remote_path("/pub");

    let local = common::create_temp_dir();
    let source = common::create_test_file(local.path(), "a.txt", b"into the profile dir");

    let mut ids = Vec::new();
    for remote in ["a.txt", "inbox/b.txt"] {
        let task = manager
            .enqueue_upload(profile.clone(), &source, remote)
            .await
            .unwrap();
        ids.push(task.id);
    }
    for id in &ids {
        common::wait_until("upload", || {
            manager.get(id).is_some_and(|t| t.status.is_terminal())
        })
        .await;
        let task = manager.get(id).unwrap();
        assert_eq!(task.status, TransferStatus::Completed, "{:?}", task.error_message);
    }
    common::assert_files_equal(&source, &served.path().join("pub/a.txt"));
    common::assert_files_equal(&source, &served.path().join("inbox/b.txt"));
    assert!(!served.path().join("a.txt").exists());

    let fetched = local.path().join("fetched.txt");
    let download = manager
        .enqueue_download(profile, "a.txt", &fetched)
        .await
        .unwrap();
    common::wait_until("download", || {
        manager.get(&download.id).is_some_and(|t| t.status.is_terminal())
    })
    .await;
    let download = manager.get(&download.id).unwrap();
    assert_eq!(download.status, TransferStatus::Completed, "{:?}", download.error_message);
    common::assert_files_equal(&source, &fetched);

    server.stop().await.unwrap();
}
