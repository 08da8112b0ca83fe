//! Transport capability consumed by the node.
//!
//! A transport hands out peer identifiers and point-to-point links. It never
//! calls back into the node: everything it observes (inbound links, open,
//! data, close, error) is pushed as a [`TransportEvent`] onto the channel it
//! was built with, and the node actor drains that channel in order.

pub mod memory;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;

use mesh_core::PeerId;

use crate::error::TransportError;

/// Process-unique identifier of one link. Events name the link, not the peer,
/// so that events from a superseded link can be told apart.
pub type LinkId = u64;

static NEXT_LINK_ID: AtomicU64 = AtomicU64::new(1);

/// Allocate a fresh link id.
pub fn next_link_id() -> LinkId {
    NEXT_LINK_ID.fetch_add(1, Ordering::Relaxed)
}

/// One direct channel to a remote peer.
pub trait Link: Send + Sync {
    fn id(&self) -> LinkId;

    fn remote(&self) -> &PeerId;

    /// Queue a payload. Only meaningful once the link reported open.
    fn send(&self, payload: Bytes) -> Result<(), TransportError>;

    /// Tear the link down. Closing twice is a no-op.
    fn close(&self);
}

pub enum TransportEvent {
    /// A remote peer opened a link to us.
    Inbound(Arc<dyn Link>),
    Opened(LinkId),
    Data(LinkId, Bytes),
    Closed(LinkId),
    Error(LinkId, TransportError),
}

impl std::fmt::Debug for TransportEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportEvent::Inbound(link) => f
                .debug_struct("Inbound")
                .field("link", &link.id())
                .field("remote", link.remote())
                .finish(),
            TransportEvent::Opened(id) => f.debug_tuple("Opened").field(id).finish(),
            TransportEvent::Data(id, bytes) => {
                f.debug_tuple("Data").field(id).field(&bytes.len()).finish()
            }
            TransportEvent::Closed(id) => f.debug_tuple("Closed").field(id).finish(),
            TransportEvent::Error(id, e) => f.debug_tuple("Error").field(id).field(e).finish(),
        }
    }
}

/// Sending half of the event channel a transport reports on.
pub type TransportEvents = mpsc::UnboundedSender<TransportEvent>;

pub trait Transport: Send + Sync {
    /// Obtain this process's peer identifier. Called once at node start-up,
    /// retried by the node on failure.
    fn register(&self) -> Result<PeerId, TransportError>;

    /// Begin an outbound connection. The returned link starts pending; the
    /// outcome arrives later as `Opened` or `Error`/`Closed` for its id.
    fn connect(&self, peer: &PeerId) -> Result<Arc<dyn Link>, TransportError>;

    /// Address other peers should use to reach us, if the transport needs one
    /// published in the presence record.
    fn advertised_addr(&self) -> Option<String> {
        None
    }

    /// Stop accepting inbound links.
    fn shutdown(&self) {}
}
