//! Error types shared by the mesh services.

use mesh_core::PeerId;

/// Failure reported by a transport, either synchronously from `connect` or
/// later as a link event.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("network error: {0}")]
    Network(String),
    /// The peer can never be reached through this transport.
    #[error("peer is permanently unreachable")]
    Unreachable,
    /// The peer is not answering right now.
    #[error("peer unavailable")]
    PeerUnavailable,
    #[error("invalid peer: {0}")]
    InvalidPeer(String),
    #[error("connection is not open")]
    NotOpen,
    #[error("connection closed")]
    Closed,
}

impl TransportError {
    /// Terminal errors stop all further retries for the peer.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransportError::Unreachable | TransportError::InvalidPeer(_))
    }
}

/// Failure accessing the shared presence registry.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("registry I/O error on '{key}': {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },
    #[error("registry unavailable: {0}")]
    Unavailable(String),
}

/// Error returned by node operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NodeError {
    #[error("refusing to connect to self")]
    SelfConnect,
    #[error("no open connection to {0}")]
    NotOpen(PeerId),
    #[error("node failed to initialize; restart required")]
    Failed,
    #[error("no peer identifier after {attempts} attempts: {last}")]
    Initialization { attempts: u32, last: TransportError },
    #[error("node has stopped")]
    Stopped,
    #[error(transparent)]
    Transport(#[from] TransportError),
}
