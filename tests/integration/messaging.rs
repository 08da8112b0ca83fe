use crate::*;

use anyhow::Result;
use mesh_core::{MessageEnvelope, PeerId, Urgency};
use mesh_services::NodeEvent;
use mesh_services::transport::memory::MemoryNetwork;

fn is_message(text: &'static str) -> impl FnMut(&NodeEvent) -> bool {
    move |event| matches!(event, NodeEvent::MessageReceived { envelope } if envelope.message == text)
}

/// A lone node still delivers its own message locally.
#[tokio::test]
async fn test_originate_without_peers() -> Result<()> {
    let net = MemoryNetwork::new();
    let mut a = spawn_node(&net, "a").await;

    let env = a.handle.originate("anyone there?", Urgency::High, None).await?;
    assert_eq!(env.route, vec![PeerId::from("a")]);
    assert_eq!(env.sender_id, PeerId::from("a"));

    wait_for(&mut a.events, is_message("anyone there?")).await;
    let status = a.handle.status().await?;
    assert_eq!(status.router.originated, 1);
    assert_eq!(status.seen_messages, 1);
    assert_eq!(net.link_count(), 0);
    Ok(())
}

/// A - B - C: C hears A through B, and B never echoes back to A.
#[tokio::test]
async fn test_chain_relay_without_echo() -> Result<()> {
    let net = MemoryNetwork::new();
    let a = spawn_node(&net, "a").await;
    let b = spawn_node(&net, "b").await;
    let mut c = spawn_node(&net, "c").await;
    link(&a, &b).await;
    link(&b, &c).await;

    a.handle.originate("bridge out", Urgency::High, None).await?;

    match wait_for(&mut c.events, is_message("bridge out")).await {
        NodeEvent::MessageReceived { envelope } => {
            assert_eq!(envelope.sender_id, a.id);
            assert_eq!(envelope.route, vec![a.id.clone(), b.id.clone()]);
            assert_eq!(envelope.urgency, Urgency::High);
        }
        other => panic!("unexpected event {other:?}"),
    }
    settle().await;

    assert_eq!(net.frames(&a.id, &b.id), 1);
    assert_eq!(net.frames(&b.id, &c.id), 1);
    assert_eq!(net.frames(&b.id, &a.id), 0, "relay echoed to its source");
    assert_eq!(net.frames(&c.id, &b.id), 0);

    let relay = b.handle.status().await?;
    assert_eq!(relay.router.delivered, 1);
    assert_eq!(relay.router.forwarded, 1);
    Ok(())
}

/// Fully connected triangle: every node delivers the message exactly once.
#[tokio::test]
async fn test_triangle_delivers_once() -> Result<()> {
    let net = MemoryNetwork::new();
    let mut a = spawn_node(&net, "a").await;
    let mut b = spawn_node(&net, "b").await;
    let mut c = spawn_node(&net, "c").await;
    link(&a, &b).await;
    link(&a, &c).await;
    link(&b, &c).await;

    let sent = a.handle.originate("triangle", Urgency::Medium, None).await?;
    wait_for(&mut b.events, is_message("triangle")).await;
    wait_for(&mut c.events, is_message("triangle")).await;
    settle().await;

    assert!(drain_messages(&mut b.events).is_empty(), "b delivered twice");
    assert!(drain_messages(&mut c.events).is_empty(), "c delivered twice");
    let at_a = drain_messages(&mut a.events);
    assert_eq!(at_a.len(), 1, "origin delivers its own message once");
    assert_eq!(at_a[0].id, sent.id);

    for node in [&b, &c] {
        let stats = node.handle.status().await?.router;
        assert_eq!(stats.delivered, 1);
        assert_eq!(stats.duplicates, 1);
    }
    Ok(())
}

/// Point-to-point send reaches only the chosen neighbour.
#[tokio::test]
async fn test_send_to_single_peer() -> Result<()> {
    let net = MemoryNetwork::new();
    let a = spawn_node(&net, "a").await;
    let mut b = spawn_node(&net, "b").await;
    let c = spawn_node(&net, "c").await;
    link(&a, &b).await;
    link(&a, &c).await;

    let env = MessageEnvelope::new(a.id.clone(), "just you", Urgency::Low, None);
    a.handle.send(b.id.clone(), env.clone()).await?;

    match wait_for(&mut b.events, is_message("just you")).await {
        NodeEvent::MessageReceived { envelope } => assert_eq!(envelope.id, env.id),
        other => panic!("unexpected event {other:?}"),
    }
    assert_eq!(net.frames(&a.id, &c.id), 0);
    Ok(())
}

/// Broadcast of a foreign envelope reaches every open neighbour.
#[tokio::test]
async fn test_broadcast_counts_open_links() -> Result<()> {
    let net = MemoryNetwork::new();
    let a = spawn_node(&net, "a").await;
    let b = spawn_node(&net, "b").await;
    let c = spawn_node(&net, "c").await;
    link(&a, &b).await;
    link(&a, &c).await;

    let env = MessageEnvelope::new(PeerId::from("far-away"), "relay me", Urgency::High, None);
    assert_eq!(a.handle.broadcast(env).await?, 2);
    Ok(())
}

/// Events cross the API boundary as tagged camelCase JSON.
#[tokio::test]
async fn test_message_event_json_shape() -> Result<()> {
    let net = MemoryNetwork::new();
    let mut a = spawn_node(&net, "a").await;
    a.handle.originate("json please", Urgency::Low, None).await?;

    let event = wait_for(&mut a.events, is_message("json please")).await;
    let json = serde_json::to_value(&event)?;
    assert_eq!(json["type"], "messageReceived");
    assert_eq!(json["envelope"]["senderId"], "a");
    assert_eq!(json["envelope"]["urgency"], "LOW");
    assert_eq!(json["envelope"]["route"], serde_json::json!(["a"]));
    Ok(())
}
