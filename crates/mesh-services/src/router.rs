//! Flood routing.
//!
//! Every message goes to every open neighbour; each receiver delivers it
//! locally once and relays it onward. The seen-set is what terminates the
//! flood. The route list only keeps a relay from echoing straight back.
//!
//! The router decides, the node acts: [`FloodRouter::on_receive`] returns a
//! [`RouteDecision`] and never touches a connection itself.

use serde::Serialize;
use tracing::trace;

use mesh_core::{Location, MessageEnvelope, PeerId, Urgency};

use crate::seen::SeenSet;

#[derive(Debug, Clone, PartialEq)]
pub enum RouteDecision {
    /// Already processed. Drop silently.
    Duplicate,
    /// Hand `envelope` to local consumers, then relay if `forward` is set.
    Deliver {
        envelope: MessageEnvelope,
        forward: Option<Forward>,
    },
}

/// A relay instruction: send `envelope` to every open neighbour but `exclude`.
#[derive(Debug, Clone, PartialEq)]
pub struct Forward {
    pub envelope: MessageEnvelope,
    pub exclude: PeerId,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RouterStats {
    pub originated: u64,
    pub delivered: u64,
    pub duplicates: u64,
    pub forwarded: u64,
}

pub struct FloodRouter {
    local: PeerId,
    seen: SeenSet,
    stats: RouterStats,
}

impl FloodRouter {
    pub fn new(local: PeerId, seen: SeenSet) -> Self {
        Self {
            local,
            seen,
            stats: RouterStats::default(),
        }
    }

    /// Build a new envelope from this node. Its id is marked seen so copies
    /// relayed back are dropped.
    pub fn originate(
        &mut self,
        message: impl Into<String>,
        urgency: Urgency,
        location: Option<Location>,
    ) -> MessageEnvelope {
        let envelope = MessageEnvelope::new(self.local.clone(), message, urgency, location);
        self.seen.insert(&envelope.id);
        self.stats.originated += 1;
        envelope
    }

    pub fn on_receive(&mut self, from: &PeerId, envelope: MessageEnvelope) -> RouteDecision {
        if !self.seen.insert(&envelope.id) {
            self.stats.duplicates += 1;
            trace!(id = %envelope.id, from = %from.short(), "duplicate dropped");
            return RouteDecision::Duplicate;
        }
        self.stats.delivered += 1;

        let forward = if envelope.has_traversed(&self.local) {
            None
        } else {
            let mut relayed = envelope.clone();
            relayed.route.push(self.local.clone());
            self.stats.forwarded += 1;
            Some(Forward {
                envelope: relayed,
                exclude: from.clone(),
            })
        };

        RouteDecision::Deliver { envelope, forward }
    }

    pub fn stats(&self) -> RouterStats {
        self.stats
    }

    pub fn seen_count(&self) -> usize {
        self.seen.len()
    }
}
