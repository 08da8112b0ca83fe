use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::{self, error::RecvError};

use mesh_core::PeerId;
use mesh_services::discovery::DiscoverySettings;
use mesh_services::reconnect::ReconnectPolicy;
use mesh_services::transport::memory::{MemoryNetwork, MemoryTransport};
use mesh_services::{MemoryRegistry, MeshNode, NodeEvent, NodeHandle, NodeSettings};

// ── Harness ───────────────────────────────────────────────────────────────────

pub const NS: &str = "it-mesh";

/// Upper bound for anything a test waits on.
pub const WAIT: Duration = Duration::from_secs(5);

pub struct TestNode {
    pub id: PeerId,
    pub handle: NodeHandle,
    pub events: broadcast::Receiver<NodeEvent>,
    pub transport: Arc<MemoryTransport>,
}

/// Settings scaled down so reconnects and discovery happen within a test.
pub fn fast_settings() -> NodeSettings {
    NodeSettings {
        register_attempts: 2,
        register_retry: Duration::from_millis(10),
        reconnect: ReconnectPolicy {
            base: Duration::from_millis(100),
            growth: 2.0,
            max_attempts: 3,
        },
        seen_capacity: 1_000,
        seen_max_age: None,
        discovery: DiscoverySettings {
            namespace: NS.to_string(),
            ttl: Duration::from_secs(5),
            advertise_interval: Duration::from_millis(100),
            scan_interval: Duration::from_millis(50),
            sweep_interval: Duration::from_millis(200),
            capabilities: vec!["messaging".to_string()],
            addr: None,
        },
    }
}

/// Build a node without starting it, so the caller can tweak the transport.
pub fn build_node(
    net: &MemoryNetwork,
    id: &str,
    settings: NodeSettings,
    registry: Option<&MemoryRegistry>,
) -> (MeshNode, TestNode) {
    let (transport, rx) = net.transport(id);
    let transport = Arc::new(transport);
    let (node, handle) = MeshNode::new(settings, transport.clone(), rx);
    let node = match registry {
        Some(registry) => node.with_registry(Arc::new(registry.clone())),
        None => node,
    };
    let events = handle.subscribe();
    let test_node = TestNode {
        id: PeerId::from(id),
        handle,
        events,
        transport,
    };
    (node, test_node)
}

/// Run `node` and return once it has registered on the network, so peers
/// can reach it straight away.
pub async fn start(node: MeshNode, test_node: &TestNode) {
    let mut events = test_node.handle.subscribe();
    tokio::spawn(node.run());
    wait_for(&mut events, |e| {
        matches!(e, NodeEvent::IdentifierAssigned { .. })
    })
    .await;
}

pub async fn spawn_node(net: &MemoryNetwork, id: &str) -> TestNode {
    let (node, test_node) = build_node(net, id, fast_settings(), None);
    start(node, &test_node).await;
    test_node
}

pub async fn spawn_discovering_node(
    net: &MemoryNetwork,
    id: &str,
    registry: &MemoryRegistry,
) -> TestNode {
    let (node, test_node) = build_node(net, id, fast_settings(), Some(registry));
    start(node, &test_node).await;
    test_node
}

/// Next event matching `pred`, skipping everything else.
pub async fn wait_for<F>(events: &mut broadcast::Receiver<NodeEvent>, mut pred: F) -> NodeEvent
where
    F: FnMut(&NodeEvent) -> bool,
{
    let found = tokio::time::timeout(WAIT, async {
        loop {
            match events.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => panic!("event stream closed"),
            }
        }
    })
    .await;
    found.expect("timed out waiting for event")
}

/// Poll until `node` reports an open connection to `peer`.
pub async fn wait_open(node: &NodeHandle, peer: &PeerId) {
    let opened = tokio::time::timeout(WAIT, async {
        loop {
            let status = node.status().await.expect("node stopped");
            if status.open_peers.contains(peer) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    opened.unwrap_or_else(|_| panic!("no open connection to {peer}"));
}

/// Connect `a` to `b` and wait until both sides see it open.
pub async fn link(a: &TestNode, b: &TestNode) {
    a.handle
        .connect_to(b.id.clone())
        .await
        .expect("connect accepted");
    wait_open(&a.handle, &b.id).await;
    wait_open(&b.handle, &a.id).await;
}

/// Let queued events drain through every node.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

/// Every `MessageReceived` still queued on `events`.
pub fn drain_messages(events: &mut broadcast::Receiver<NodeEvent>) -> Vec<mesh_core::MessageEnvelope> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let NodeEvent::MessageReceived { envelope } = event {
            out.push(envelope);
        }
    }
    out
}
