//! Presence records: the ephemeral advertisement a node writes into the
//! shared discovery registry.
//!
//! Records are JSON values stored under `"{namespace}:{peerId}"`. Anyone may
//! read or delete them; only the owner rewrites its own. A record whose age
//! exceeds the TTL no longer counts as proof that the peer is reachable.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::wire::PeerId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    /// Written by nodes that advertise a status this build does not know.
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceRecord {
    pub peer_id: PeerId,
    /// Creation instant, unix milliseconds.
    pub timestamp: u64,
    pub status: PresenceStatus,
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Where the peer's transport accepts connections, if it needs one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub addr: Option<String>,
}

impl PresenceRecord {
    pub fn new(
        peer_id: PeerId,
        now_ms: u64,
        capabilities: Vec<String>,
        addr: Option<String>,
    ) -> Self {
        Self {
            peer_id,
            timestamp: now_ms,
            status: PresenceStatus::Online,
            capabilities,
            addr,
        }
    }

    /// Age at `now_ms`. Records from a clock running ahead count as fresh.
    pub fn age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.timestamp)
    }

    pub fn is_stale(&self, now_ms: u64, ttl: Duration) -> bool {
        u128::from(self.age_ms(now_ms)) > ttl.as_millis()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse a registry value. Malformed or half-written values are `None`.
    pub fn parse(text: &str) -> Option<Self> {
        serde_json::from_str(text).ok()
    }
}

/// Registry key for `peer` under `namespace`.
pub fn presence_key(namespace: &str, peer: &PeerId) -> String {
    format!("{namespace}:{peer}")
}

/// Prefix shared by every key in `namespace`.
pub fn key_prefix(namespace: &str) -> String {
    format!("{namespace}:")
}

/// Wall-clock unix milliseconds. Presence ages are compared across processes,
/// so a monotonic clock will not do.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
