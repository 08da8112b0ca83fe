//! meshd: emergency mesh messaging daemon.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::broadcast;

use mesh_core::config::MeshConfig;
use mesh_core::PeerId;
use mesh_services::{
    MeshNode, MessageStore, NodeEvent, NodeHandle, NodeSettings, SharedRegistry,
};

mod registry;
mod transport;

use registry::FsRegistry;
use transport::TcpTransport;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = MeshConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = MeshConfig::load()
        .and_then(|c| c.validate().map(|()| c))
        .unwrap_or_else(|e| {
            tracing::warn!(error = %e, "failed to load config, using defaults");
            MeshConfig::default()
        });

    let local = if config.identity.peer_id.is_empty() {
        PeerId::new(hex::encode(rand::random::<[u8; 16]>()))
    } else {
        PeerId::new(config.identity.peer_id.clone())
    };
    tracing::info!(peer_id = %local, "meshd starting");

    // Shared presence registry
    let registry = FsRegistry::new(&config.discovery.registry_path)
        .context("failed to open presence registry")?;
    tracing::info!(path = %registry.root().display(), "presence registry ready");
    let registry: SharedRegistry = Arc::new(registry);

    // Peer transport
    let (transport_tx, transport_rx) = tokio::sync::mpsc::unbounded_channel();
    let transport = TcpTransport::bind(
        local,
        &config.network.listen_addr,
        &config.network.advertise_host,
        registry.clone(),
        &config.discovery.namespace,
        transport_tx,
    )
    .await
    .with_context(|| format!("failed to bind {}", config.network.listen_addr))?;
    tracing::info!(addr = %transport.local_addr(), "transport ready");

    // Node
    let (node, handle) = MeshNode::new(
        NodeSettings::from_config(&config),
        Arc::new(transport),
        transport_rx,
    );
    let node = if config.discovery.enabled {
        node.with_registry(registry.clone())
    } else {
        tracing::warn!("discovery disabled, peers must be connected manually");
        node
    };

    let messages = MessageStore::new(config.routing.store_capacity);
    let events = handle.subscribe();
    let mut node_task = tokio::spawn(node.run());
    let event_task = tokio::spawn(event_loop(events, messages.clone()));

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    // ── Spawn tasks ──────────────────────────────────────────────────────────

    let api_port = config.network.api_port;
    let api_task = {
        let state = mesh_api::ApiState {
            node: handle.clone(),
            messages: messages.clone(),
            shutdown_tx: shutdown_tx.clone(),
        };
        tokio::spawn(async move {
            if let Err(e) = mesh_api::serve(state, api_port).await {
                tracing::error!(error = %e, "API server failed");
            }
        })
    };

    let status_printer = tokio::spawn(status_loop(handle.clone()));

    // ── Wait for exit ────────────────────────────────────────────────────────

    let mut shutdown_rx = shutdown_tx.subscribe();

    let node_exited = tokio::select! {
        _ = shutdown_rx.recv()   => { tracing::info!("shutting down"); false }
        r = &mut node_task       => { tracing::error!("node exited: {:?}", r); true }
        r = api_task             => { tracing::error!("API server exited: {:?}", r); false }
    };

    status_printer.abort();
    if !node_exited {
        if let Err(e) = handle.shutdown().await {
            tracing::debug!(error = %e, "node already stopped");
        }
        if tokio::time::timeout(Duration::from_secs(5), node_task).await.is_err() {
            tracing::warn!("node did not stop within 5s");
        }
    }
    event_task.abort();

    Ok(())
}

/// Log node events and keep delivered messages for the API.
async fn event_loop(mut events: broadcast::Receiver<NodeEvent>, messages: MessageStore) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!(skipped = n, "event consumer lagged");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        match event {
            NodeEvent::IdentifierAssigned { peer_id } => {
                tracing::info!(peer_id = %peer_id, "identifier assigned");
            }
            NodeEvent::MessageReceived { envelope } => {
                tracing::info!(
                    id = %envelope.id,
                    sender = %envelope.sender_id.short(),
                    urgency = %envelope.urgency,
                    hops = envelope.route.len(),
                    "{}",
                    envelope.message
                );
                messages.add(envelope);
            }
            NodeEvent::PeersChanged { peers } => {
                tracing::debug!(count = peers.len(), "peers changed");
            }
            NodeEvent::ConnectionStateChanged { connected } => {
                tracing::info!(connected, "connection state changed");
            }
            NodeEvent::DiscoveryStateChanged { state } => {
                tracing::info!(state = state.as_str(), "discovery state changed");
            }
            NodeEvent::PeerDiscovered { peer_id } => {
                tracing::debug!(peer = %peer_id.short(), "peer discovered");
            }
            NodeEvent::PeerUnreachable { peer_id } => {
                tracing::warn!(peer = %peer_id.short(), "peer unreachable");
            }
            NodeEvent::Failed { reason } => {
                tracing::error!(reason = %reason, "node failed, restart required");
            }
            NodeEvent::TopologyChanged { .. } => {}
        }
    }
}

async fn status_loop(node: NodeHandle) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    loop {
        interval.tick().await;
        match node.status().await {
            Ok(status) => tracing::info!(
                state = status.state.as_str(),
                open = status.open_peers.len(),
                connections = status.connections.len(),
                pending_reconnects = status.pending_reconnects.len(),
                unreachable = status.unreachable.len(),
                seen = status.seen_messages,
                "node status"
            ),
            Err(_) => break,
        }
    }
}
