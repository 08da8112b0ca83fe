use crate::*;

use mesh_core::{PeerId, Urgency};
use mesh_services::transport::memory::MemoryNetwork;
use mesh_services::{DiscoveryState, NodeError, NodeEvent};

#[tokio::test]
async fn test_registration_retry_succeeds() {
    let net = MemoryNetwork::new();
    let (node, mut a) = build_node(&net, "a", fast_settings(), None);
    a.transport.fail_registrations(1);
    tokio::spawn(node.run());

    match wait_for(&mut a.events, |e| matches!(e, NodeEvent::IdentifierAssigned { .. })).await {
        NodeEvent::IdentifierAssigned { peer_id } => assert_eq!(peer_id, PeerId::from("a")),
        other => panic!("unexpected event {other:?}"),
    }
    wait_for(&mut a.events, |e| {
        matches!(e, NodeEvent::DiscoveryStateChanged { state: DiscoveryState::Discovering })
    })
    .await;
}

#[tokio::test]
async fn test_initialization_failure_is_terminal() {
    let net = MemoryNetwork::new();
    let (node, mut a) = build_node(&net, "a", fast_settings(), None);
    a.transport.fail_registrations(5);
    tokio::spawn(node.run());

    match wait_for(&mut a.events, |e| matches!(e, NodeEvent::Failed { .. })).await {
        NodeEvent::Failed { reason } => assert!(reason.contains("2 attempts"), "{reason}"),
        other => panic!("unexpected event {other:?}"),
    }

    let status = a.handle.status().await.unwrap();
    assert!(status.failed);
    assert_eq!(status.local_id, None);

    assert_eq!(
        a.handle.connect_to(PeerId::from("b")).await,
        Err(NodeError::Failed)
    );
    assert_eq!(
        a.handle.originate("help", Urgency::High, None).await.err(),
        Some(NodeError::Failed)
    );
    a.handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_closes_links() {
    let net = MemoryNetwork::new();
    let a = spawn_node(&net, "a").await;
    let mut b = spawn_node(&net, "b").await;
    link(&a, &b).await;

    a.handle.shutdown().await.unwrap();
    wait_for(&mut b.events, |e| {
        matches!(e, NodeEvent::ConnectionStateChanged { connected: false })
    })
    .await;

    assert_eq!(net.link_count(), 0);
    assert_eq!(a.handle.status().await.err(), Some(NodeError::Stopped));
    assert_eq!(
        b.handle.status().await.unwrap().state,
        DiscoveryState::Disconnected
    );
}
