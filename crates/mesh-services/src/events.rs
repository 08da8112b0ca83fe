//! Events published to consumers of a running node.

use serde::Serialize;

use mesh_core::{MessageEnvelope, PeerId};

use crate::topology::TopologySnapshot;

/// Coarse discovery phase, derived from the connection table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscoveryState {
    /// No connections and none in progress.
    Discovering,
    /// At least one connection pending, none open.
    Connecting,
    Connected,
    /// Had open connections, lost them all.
    Disconnected,
}

impl DiscoveryState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscoveryState::Discovering => "discovering",
            DiscoveryState::Connecting => "connecting",
            DiscoveryState::Connected => "connected",
            DiscoveryState::Disconnected => "disconnected",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum NodeEvent {
    IdentifierAssigned { peer_id: PeerId },
    /// True while at least one connection is open.
    ConnectionStateChanged { connected: bool },
    PeersChanged { peers: Vec<PeerId> },
    MessageReceived { envelope: MessageEnvelope },
    TopologyChanged { topology: TopologySnapshot },
    DiscoveryStateChanged { state: DiscoveryState },
    PeerDiscovered { peer_id: PeerId },
    /// Retries exhausted or a terminal transport error.
    PeerUnreachable { peer_id: PeerId },
    /// Initialization failed; the node needs a restart.
    Failed { reason: String },
}
