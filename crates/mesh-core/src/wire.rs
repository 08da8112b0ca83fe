//! Mesh wire format: the JSON record flooded between neighbours.
//!
//! Field names are camelCase on the wire. `timestamp` travels as an RFC 3339
//! string and is rebuilt into a `DateTime<Utc>` by the receiver. `route` may
//! be missing or null in a payload; either decodes as an empty list.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Deserializer, Serialize};

// ── Peer identifiers ──────────────────────────────────────────────────────────

/// Opaque node identifier, assigned once per process lifetime by the transport.
///
/// Ordered so both ends of a pair agree on which of them initiates.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First eight characters, for log fields.
    pub fn short(&self) -> &str {
        match self.0.char_indices().nth(8) {
            Some((end, _)) => &self.0[..end],
            None => &self.0,
        }
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for PeerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// ── Urgency ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Urgency {
    High,
    Medium,
    Low,
}

impl Urgency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Urgency::High => "HIGH",
            Urgency::Medium => "MEDIUM",
            Urgency::Low => "LOW",
        }
    }
}

impl fmt::Display for Urgency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown urgency '{0}' (expected HIGH, MEDIUM or LOW)")]
pub struct UnknownUrgency(pub String);

impl FromStr for Urgency {
    type Err = UnknownUrgency;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "HIGH" => Ok(Urgency::High),
            "MEDIUM" => Ok(Urgency::Medium),
            "LOW" => Ok(Urgency::Low),
            _ => Err(UnknownUrgency(s.to_string())),
        }
    }
}

// ── Envelope ──────────────────────────────────────────────────────────────────

/// Geographic position attached by the sender. Acquisition is external.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lng: f64,
}

/// One emergency message as it travels across the mesh.
///
/// Everything except `route` is fixed at creation. Each relaying node appends
/// itself to `route` before forwarding; a correctly forwarded envelope never
/// lists the same node twice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEnvelope {
    /// `hex(blake3(sender || timestamp_ms_le || message || nonce))`.
    pub id: String,
    pub message: String,
    pub urgency: Urgency,
    pub timestamp: DateTime<Utc>,
    pub sender_id: PeerId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub route: Vec<PeerId>,
}

impl MessageEnvelope {
    /// Build a fresh envelope originated by `sender`, with `route = [sender]`.
    pub fn new(
        sender: PeerId,
        message: impl Into<String>,
        urgency: Urgency,
        location: Option<Location>,
    ) -> Self {
        let message = message.into();
        let timestamp = Utc::now();
        let id = message_id(&sender, &timestamp, &message);

        Self {
            id,
            message,
            urgency,
            timestamp,
            route: vec![sender.clone()],
            sender_id: sender,
            location,
        }
    }

    /// Has this envelope already passed through `peer`?
    pub fn has_traversed(&self, peer: &PeerId) -> bool {
        self.route.contains(peer)
    }

    /// Serialize to bytes for transmission.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize from bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(data)
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<PeerId>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<PeerId>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Generate a collision-resistant message id.
///
/// The random nonce keeps ids distinct even when the same sender emits the
/// same text twice within one millisecond.
pub fn message_id(sender: &PeerId, timestamp: &DateTime<Utc>, message: &str) -> String {
    let mut nonce = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut nonce);

    let mut hasher = blake3::Hasher::new();
    hasher.update(sender.as_str().as_bytes());
    hasher.update(&timestamp.timestamp_millis().to_le_bytes());
    hasher.update(message.as_bytes());
    hasher.update(&nonce);

    hex::encode(hasher.finalize().as_bytes())
}
