//! Local topology view: a star of this node and its open neighbours.
//!
//! No neighbour-of-neighbour information is exchanged, so this is never a
//! multi-hop graph. Link quality is not measured.

use serde::Serialize;

use mesh_core::PeerId;

pub const DEFAULT_LINK_QUALITY: f32 = 1.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopologyNode {
    pub id: PeerId,
    pub is_self: bool,
    pub neighbors: Vec<PeerId>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopologyEdge {
    pub from: PeerId,
    pub to: PeerId,
    pub quality: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TopologySnapshot {
    pub nodes: Vec<TopologyNode>,
    pub edges: Vec<TopologyEdge>,
}

impl TopologySnapshot {
    /// Star centred on `local` with one edge per open peer.
    pub fn star(local: &PeerId, open_peers: &[PeerId]) -> Self {
        let mut peers: Vec<PeerId> = open_peers.iter().filter(|p| *p != local).cloned().collect();
        peers.sort();
        peers.dedup();

        let mut nodes = Vec::with_capacity(peers.len() + 1);
        nodes.push(TopologyNode {
            id: local.clone(),
            is_self: true,
            neighbors: peers.clone(),
        });
        nodes.extend(peers.iter().map(|p| TopologyNode {
            id: p.clone(),
            is_self: false,
            neighbors: vec![local.clone()],
        }));

        let edges = peers
            .iter()
            .map(|p| TopologyEdge {
                from: local.clone(),
                to: p.clone(),
                quality: DEFAULT_LINK_QUALITY,
            })
            .collect();

        Self { nodes, edges }
    }

    pub fn local(&self) -> Option<&TopologyNode> {
        self.nodes.iter().find(|n| n.is_self)
    }

    pub fn neighbor_count(&self) -> usize {
        self.edges.len()
    }
}
