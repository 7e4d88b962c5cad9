//! Integration tests for the connection registry with real probes.

mod common;

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use netshare_core::clock::ManualClock;
use netshare_core::config::{ConnectionConfig, TransferConfig};
use netshare_core::connection::{ConnectionProfile, ConnectionRegistry, NetworkProbe, Protocol};
use netshare_core::error::ErrorKind;
use netshare_core::events::EventBus;
use netshare_core::storage::{KeyValueStore, MemorySecretStore, MemoryStore, SecretStore};
use netshare_core::transfer::{ExecutorSet, TransferManager};

use common::GateExecutor;

struct Harness {
    registry: ConnectionRegistry,
    store: Arc<MemoryStore>,
    secrets: Arc<MemorySecretStore>,
}

fn harness(transfers: Option<TransferManager>) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let secrets = Arc::new(MemorySecretStore::new());
    let config = ConnectionConfig {
        probe_timeout: Duration::from_secs(2),
    };
    let mut registry = ConnectionRegistry::new(
        config,
        store.clone(),
        secrets.clone(),
        Arc::new(NetworkProbe::new(Duration::from_secs(1))),
        Arc::new(ManualClock::new(7_000)),
    );
    if let Some(transfers) = transfers {
        registry = registry.with_transfers(transfers);
    }
    Harness {
        registry,
        store,
        secrets,
    }
}

#[tokio::test]
async fn test_refused_ftp_leaves_registry_unchanged() {
    let h = harness(None);
    let profile = ConnectionProfile::new("NAS", "127.0.0.1", common::closed_port(), Protocol::Ftp)
        .with_credentials("alice", "pw");
    let id = profile.id.clone();

    let err = h.registry.add(profile).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Connectivity);
    assert_eq!(h.registry.len().await, 0);
    assert!(h.store.list_keys("").unwrap().is_empty());
    assert!(h.secrets.secret(&format!("connection/{id}")).unwrap().is_none());
}

#[cfg(feature = "web")]
#[tokio::test]
async fn test_http_probe_against_sharing_server() {
    use netshare_core::config::ServerConfig;
    use netshare_core::net::FixedResolver;
    use netshare_core::server::LocalSharingServer;

    let root = common::create_temp_dir();
    let server = LocalSharingServer::new(
        ServerConfig {
            localhost_only: true,
            ..ServerConfig::default()
        },
        Arc::new(FixedResolver(Some(Ipv4Addr::LOCALHOST))),
        EventBus::default(),
    );
    let port = server.start(root.path(), 0).await.unwrap().port.unwrap();

    let h = harness(None);
    let added = h
        .registry
        .add(ConnectionProfile::new("Laptop", "127.0.0.1", port, Protocol::Http))
        .await
        .unwrap();
    assert!(added.is_active);
    assert_eq!(added.last_connected, Some(7_000));
    assert_eq!(h.registry.list().await.len(), 1);

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_sftp_is_assumed_reachable() {
    let h = harness(None);
    let added = h
        .registry
        .add(ConnectionProfile::new("Box", "192.0.2.10", 22, Protocol::Sftp))
        .await
        .unwrap();
    assert!(added.is_active);
}

#[tokio::test]
async fn test_remove_cancels_transfers_of_connection() {
    let gate = Arc::new(GateExecutor::new());
    let transfers = TransferManager::new(
        TransferConfig {
            concurrent_transfers: 1,
            ..TransferConfig::default()
        },
        ExecutorSet::empty().with(Protocol::Sftp, gate.clone()),
        Arc::new(ManualClock::new(0)),
        EventBus::default(),
    );
    let h = harness(Some(transfers.clone()));

    let profile = h
        .registry
        .add(ConnectionProfile::new("Box", "192.0.2.10", 22, Protocol::Sftp))
        .await
        .unwrap();

    let dir = common::create_temp_dir();
    for name in ["a.bin", "b.bin"] {
        let path = common::create_test_file(dir.path(), name, b"data");
        transfers
            .enqueue_upload(profile.clone(), &path, name)
            .await
            .unwrap();
    }
    assert_eq!(transfers.tasks().len(), 2);

    let cancelled = h.registry.remove(&profile.id).await.unwrap();

    assert_eq!(cancelled, 2);
    assert!(transfers.tasks().is_empty());
    assert!(h.registry.get(&profile.id).await.is_none());
    gate.release(2);
}
