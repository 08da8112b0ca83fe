//! mesh-services: the connection lifecycle, discovery and flood-routing
//! engine behind a mesh node.
//!
//! [`MeshNode`] is the single actor that owns all mutable mesh state. It is
//! driven by a [`Transport`](transport::Transport) and, optionally, a
//! [`PresenceRegistry`](presence::PresenceRegistry) for discovery.

pub mod connection;
pub mod discovery;
pub mod error;
pub mod events;
pub mod message_store;
pub mod node;
pub mod presence;
pub mod reconnect;
pub mod router;
pub mod seen;
pub mod topology;
pub mod transport;

pub use error::{NodeError, RegistryError, TransportError};
pub use events::{DiscoveryState, NodeEvent};
pub use message_store::MessageStore;
pub use node::{MeshNode, NodeHandle, NodeSettings, NodeStatus};
pub use presence::{MemoryRegistry, PresenceRegistry, SharedRegistry};
pub use topology::TopologySnapshot;
