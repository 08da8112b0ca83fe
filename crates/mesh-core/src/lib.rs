//! mesh-core: shared wire types, presence records and configuration.
//! All other mesh crates depend on this one.

pub mod config;
pub mod presence;
pub mod wire;

pub use presence::{PresenceRecord, PresenceStatus};
pub use wire::{Location, MessageEnvelope, PeerId, Urgency};
