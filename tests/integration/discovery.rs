use crate::*;

use std::time::Duration;

use mesh_core::presence::presence_key;
use mesh_services::connection::Direction;
use mesh_services::transport::memory::MemoryNetwork;
use mesh_services::{MemoryRegistry, NodeEvent, PresenceRegistry};

/// Two nodes advertising in one namespace find each other, and only the
/// smaller identifier dials.
#[tokio::test]
async fn test_discovery_connects_peers() {
    let net = MemoryNetwork::new();
    let registry = MemoryRegistry::new();
    let alpha = spawn_discovering_node(&net, "alpha", &registry).await;
    let mut bravo = spawn_discovering_node(&net, "bravo", &registry).await;

    wait_open(&alpha.handle, &bravo.id).await;
    wait_open(&bravo.handle, &alpha.id).await;
    wait_for(&mut bravo.events, |e| {
        matches!(e, NodeEvent::PeerDiscovered { peer_id } if peer_id == &alpha.id)
    })
    .await;

    let at_bravo = bravo.handle.status().await.unwrap();
    assert_eq!(at_bravo.connections.len(), 1);
    assert_eq!(at_bravo.connections[0].direction, Direction::Inbound);
    assert_eq!(net.connect_attempts(&alpha.id), 0, "bravo should never dial");
    assert_eq!(registry.len(), 2);
}

/// Shutting down withdraws the presence record before the node stops.
#[tokio::test]
async fn test_graceful_leave_withdraws_presence() {
    let net = MemoryNetwork::new();
    let registry = MemoryRegistry::new();
    let mut alpha = spawn_discovering_node(&net, "alpha", &registry).await;
    let bravo = spawn_discovering_node(&net, "bravo", &registry).await;
    wait_open(&alpha.handle, &bravo.id).await;

    let key = presence_key(NS, &bravo.id);
    assert!(registry.get(&key).unwrap().is_some());

    bravo.handle.shutdown().await.unwrap();
    assert_eq!(registry.get(&key).unwrap(), None);
    assert!(registry.get(&presence_key(NS, &alpha.id)).unwrap().is_some());

    wait_for(&mut alpha.events, |e| {
        matches!(e, NodeEvent::ConnectionStateChanged { connected: false })
    })
    .await;
    settle().await;
    assert!(bravo.handle.is_stopped());
}

/// A registry outage only pauses discovery.
#[tokio::test]
async fn test_registry_outage_is_survivable() {
    let net = MemoryNetwork::new();
    let registry = MemoryRegistry::new();
    registry.set_failing(true);
    let alpha = spawn_discovering_node(&net, "alpha", &registry).await;
    let bravo = spawn_discovering_node(&net, "bravo", &registry).await;

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(alpha.handle.status().await.unwrap().open_peers.is_empty());

    registry.set_failing(false);
    wait_open(&alpha.handle, &bravo.id).await;
}

/// Nodes in different namespaces never see each other.
#[tokio::test]
async fn test_foreign_namespace_is_ignored() {
    let net = MemoryNetwork::new();
    let registry = MemoryRegistry::new();
    let alpha = spawn_discovering_node(&net, "alpha", &registry).await;

    let mut other = fast_settings();
    other.discovery.namespace = "other-mesh".to_string();
    let (node, bravo) = build_node(&net, "bravo", other, Some(&registry));
    start(node, &bravo).await;

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(alpha.handle.status().await.unwrap().open_peers.is_empty());
    assert!(bravo.handle.status().await.unwrap().open_peers.is_empty());
    assert_eq!(net.link_count(), 0);
}
