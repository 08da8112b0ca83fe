use crate::*;

use std::time::Duration;

use mesh_core::PeerId;
use mesh_services::transport::memory::MemoryNetwork;
use mesh_services::{DiscoveryState, NodeError, NodeEvent};

fn unreachable(peer: &PeerId) -> impl FnMut(&NodeEvent) -> bool + '_ {
    move |event| matches!(event, NodeEvent::PeerUnreachable { peer_id } if peer_id == peer)
}

/// Wait until exactly one link pair remains and both ends report it open.
async fn wait_single_link(net: &MemoryNetwork, a: &TestNode, b: &TestNode) {
    let converged = tokio::time::timeout(WAIT, async {
        loop {
            let a_open = a.handle.status().await.expect("a stopped").open_peers;
            let b_open = b.handle.status().await.expect("b stopped").open_peers;
            if net.link_count() == 1 && a_open.contains(&b.id) && b_open.contains(&a.id) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    converged.expect("pair never settled on a single link");
}

#[tokio::test]
async fn test_connect_and_state_events() {
    let net = MemoryNetwork::new();
    let mut a = spawn_node(&net, "a").await;
    let b = spawn_node(&net, "b").await;

    a.handle.connect_to(b.id.clone()).await.unwrap();
    wait_for(&mut a.events, |e| {
        matches!(e, NodeEvent::ConnectionStateChanged { connected: true })
    })
    .await;
    wait_open(&b.handle, &a.id).await;

    let status = a.handle.status().await.unwrap();
    assert_eq!(status.state, DiscoveryState::Connected);
    assert_eq!(status.open_peers, vec![b.id.clone()]);
    assert_eq!(status.topology.neighbor_count(), 1);
    assert_eq!(net.link_count(), 1);

    // connecting again is a no-op
    a.handle.connect_to(b.id.clone()).await.unwrap();
    assert_eq!(net.connect_attempts(&b.id), 1);
}

#[tokio::test]
async fn test_simultaneous_connect_settles_on_one_link() {
    let net = MemoryNetwork::new();
    let a = spawn_node(&net, "a").await;
    let b = spawn_node(&net, "b").await;

    let (ra, rb) = tokio::join!(
        a.handle.connect_to(b.id.clone()),
        b.handle.connect_to(a.id.clone())
    );
    ra.unwrap();
    rb.unwrap();

    wait_single_link(&net, &a, &b).await;
    settle().await;
    assert_eq!(net.link_count(), 1);
}

#[tokio::test]
async fn test_severed_link_reconnects() {
    let net = MemoryNetwork::new();
    let mut a = spawn_node(&net, "a").await;
    let b = spawn_node(&net, "b").await;
    link(&a, &b).await;

    assert_eq!(net.sever(&a.id, &b.id), 1);
    wait_for(&mut a.events, |e| {
        matches!(e, NodeEvent::ConnectionStateChanged { connected: false })
    })
    .await;

    wait_single_link(&net, &a, &b).await;
    let status = a.handle.status().await.unwrap();
    assert!(status.pending_reconnects.is_empty());
    assert!(status.unreachable.is_empty());
}

#[tokio::test]
async fn test_remove_peer_does_not_reconnect() {
    let net = MemoryNetwork::new();
    let a = spawn_node(&net, "a").await;
    let b = spawn_node(&net, "b").await;
    link(&a, &b).await;

    assert!(a.handle.remove_peer(b.id.clone()).await.unwrap());
    let status = a.handle.status().await.unwrap();
    assert!(status.open_peers.is_empty());
    assert!(!status.pending_reconnects.contains(&b.id));

    // b redials on its own schedule; a keeps refusing it
    tokio::time::sleep(Duration::from_millis(500)).await;
    let status = a.handle.status().await.unwrap();
    assert!(status.open_peers.is_empty());
    assert!(status.connections.is_empty());
    assert!(net.connect_attempts(&a.id) > 0, "b never redialled");

    assert!(!a.handle.remove_peer(b.id.clone()).await.unwrap());

    // an explicit connect lifts the refusal
    a.handle.connect_to(b.id.clone()).await.unwrap();
    wait_open(&a.handle, &b.id).await;
}

#[tokio::test]
async fn test_table_changes_publish_peers_and_topology() {
    let net = MemoryNetwork::new();
    let mut a = spawn_node(&net, "a").await;
    let b = spawn_node(&net, "b").await;
    link(&a, &b).await;

    let NodeEvent::TopologyChanged { topology } = wait_for(&mut a.events, |e| {
        matches!(e, NodeEvent::TopologyChanged { topology } if topology.neighbor_count() == 1)
    })
    .await
    else {
        unreachable!()
    };
    assert_eq!(topology.edges[0].from, a.id);
    assert_eq!(topology.edges[0].to, b.id);
    assert_eq!(topology.local().unwrap().neighbors, vec![b.id.clone()]);
    let peers = wait_for(&mut a.events, |e| matches!(e, NodeEvent::PeersChanged { .. })).await;
    assert!(matches!(peers, NodeEvent::PeersChanged { peers } if peers == vec![b.id.clone()]));

    a.handle.remove_peer(b.id.clone()).await.unwrap();
    let NodeEvent::TopologyChanged { topology } = wait_for(&mut a.events, |e| {
        matches!(e, NodeEvent::TopologyChanged { topology } if topology.edges.is_empty())
    })
    .await
    else {
        unreachable!()
    };
    assert_eq!(topology.nodes.len(), 1);
    assert!(topology.local().unwrap().neighbors.is_empty());
    let peers = wait_for(&mut a.events, |e| matches!(e, NodeEvent::PeersChanged { .. })).await;
    assert!(matches!(peers, NodeEvent::PeersChanged { peers } if peers.is_empty()));
}

/// Peer vanishes for good: three timed retries, then one unreachable
/// report and silence.
#[tokio::test(start_paused = true)]
async fn test_reconnect_gives_up_after_cap() {
    let net = MemoryNetwork::new();
    let mut a = spawn_node(&net, "a").await;
    let b = spawn_node(&net, "b").await;
    link(&a, &b).await;
    let before = net.connect_attempts(&b.id);

    net.take_offline(&b.id);
    wait_for(&mut a.events, unreachable(&b.id)).await;
    assert_eq!(net.connect_attempts(&b.id) - before, 3);

    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(net.connect_attempts(&b.id) - before, 3, "retried past the cap");

    let status = a.handle.status().await.unwrap();
    assert_eq!(status.unreachable, vec![b.id.clone()]);
    assert!(status.pending_reconnects.is_empty());
    assert_eq!(status.state, DiscoveryState::Disconnected);
}

#[tokio::test]
async fn test_terminal_failure_skips_retries_until_manual_connect() {
    let net = MemoryNetwork::new();
    let mut a = spawn_node(&net, "a").await;
    let c = spawn_node(&net, "c").await;
    net.set_unreachable(&c.id, true);

    a.handle.connect_to(c.id.clone()).await.unwrap();
    wait_for(&mut a.events, unreachable(&c.id)).await;
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(net.connect_attempts(&c.id), 1);

    net.set_unreachable(&c.id, false);
    a.handle.connect_to(c.id.clone()).await.unwrap();
    wait_open(&a.handle, &c.id).await;
    assert!(a.handle.status().await.unwrap().unreachable.is_empty());
}

#[tokio::test]
async fn test_self_connect_rejected() {
    let net = MemoryNetwork::new();
    let a = spawn_node(&net, "a").await;
    assert_eq!(
        a.handle.connect_to(a.id.clone()).await,
        Err(NodeError::SelfConnect)
    );
    assert_eq!(net.connect_attempts(&a.id), 0);
}
