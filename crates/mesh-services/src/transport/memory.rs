//! In-process transport.
//!
//! Every node registered on one [`MemoryNetwork`] can reach every other.
//! Tests drive the connection lifecycle by severing links, taking nodes
//! offline, or marking peers permanently unreachable. The hub also counts
//! connect attempts and frames per direction so tests can assert on traffic.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use tokio::sync::mpsc;

use mesh_core::PeerId;

use super::{next_link_id, Link, LinkId, Transport, TransportEvent, TransportEvents};
use crate::error::TransportError;

/// Shared in-memory network. Cheap to clone.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    hub: Arc<Mutex<Hub>>,
}

#[derive(Default)]
struct Hub {
    endpoints: HashMap<PeerId, TransportEvents>,
    links: HashMap<LinkId, LinkEnd>,
    unreachable: HashSet<PeerId>,
    connect_attempts: HashMap<PeerId, usize>,
    frames: HashMap<(PeerId, PeerId), usize>,
}

/// One side of a link pair.
struct LinkEnd {
    owner: PeerId,
    remote: PeerId,
    peer_link: LinkId,
}

impl Hub {
    /// Remove both ends of the pair containing `link` and report `Closed` to
    /// each owner. Returns false if the link was already gone.
    fn close_pair(&mut self, link: LinkId) -> bool {
        let Some(end) = self.links.remove(&link) else {
            return false;
        };
        self.links.remove(&end.peer_link);

        if let Some(events) = self.endpoints.get(&end.owner) {
            let _ = events.send(TransportEvent::Closed(link));
        }
        if let Some(events) = self.endpoints.get(&end.remote) {
            let _ = events.send(TransportEvent::Closed(end.peer_link));
        }
        true
    }

    fn links_where(&self, pred: impl Fn(&LinkEnd) -> bool) -> Vec<LinkId> {
        self.links
            .iter()
            .filter(|(_, end)| pred(end))
            .map(|(id, _)| *id)
            .collect()
    }
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    fn hub(&self) -> MutexGuard<'_, Hub> {
        self.hub.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Create a transport for `id` plus the receiver its events arrive on.
    pub fn transport(
        &self,
        id: impl Into<PeerId>,
    ) -> (MemoryTransport, mpsc::UnboundedReceiver<TransportEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let transport = MemoryTransport {
            network: self.clone(),
            id: id.into(),
            events,
            failing_registrations: AtomicU32::new(0),
        };
        (transport, rx)
    }

    /// Drop every link between `a` and `b`, as if the radio path vanished.
    /// Both ends see an unexpected close. Returns the number of pairs cut.
    pub fn sever(&self, a: &PeerId, b: &PeerId) -> usize {
        let mut hub = self.hub();
        let ids = hub.links_where(|end| &end.owner == a && &end.remote == b);
        ids.into_iter().filter(|id| hub.close_pair(*id)).count()
    }

    /// Cut all of `peer`'s links and unregister it. Later connects to it fail
    /// with `PeerUnavailable`.
    pub fn take_offline(&self, peer: &PeerId) {
        let mut hub = self.hub();
        let ids = hub.links_where(|end| &end.owner == peer);
        for id in ids {
            hub.close_pair(id);
        }
        hub.endpoints.remove(peer);
    }

    /// Make connects to `peer` fail with the terminal `Unreachable` error.
    pub fn set_unreachable(&self, peer: &PeerId, unreachable: bool) {
        let mut hub = self.hub();
        if unreachable {
            hub.unreachable.insert(peer.clone());
        } else {
            hub.unreachable.remove(peer);
        }
    }

    /// Outbound connect attempts made towards `peer` by anyone.
    pub fn connect_attempts(&self, peer: &PeerId) -> usize {
        self.hub().connect_attempts.get(peer).copied().unwrap_or(0)
    }

    /// Frames sent from `from` to `to`.
    pub fn frames(&self, from: &PeerId, to: &PeerId) -> usize {
        self.hub()
            .frames
            .get(&(from.clone(), to.clone()))
            .copied()
            .unwrap_or(0)
    }

    /// Number of live link pairs.
    pub fn link_count(&self) -> usize {
        self.hub().links.len() / 2
    }
}

// ── Transport ─────────────────────────────────────────────────────────────────

pub struct MemoryTransport {
    network: MemoryNetwork,
    id: PeerId,
    events: TransportEvents,
    failing_registrations: AtomicU32,
}

impl MemoryTransport {
    /// Make the next `n` calls to `register` fail.
    pub fn fail_registrations(&self, n: u32) {
        self.failing_registrations.store(n, Ordering::Relaxed);
    }
}

impl Transport for MemoryTransport {
    fn register(&self) -> Result<PeerId, TransportError> {
        let failing = self.failing_registrations.load(Ordering::Relaxed);
        if failing > 0 {
            self.failing_registrations.store(failing - 1, Ordering::Relaxed);
            return Err(TransportError::Network("signalling unavailable".to_string()));
        }

        self.network
            .hub()
            .endpoints
            .insert(self.id.clone(), self.events.clone());
        Ok(self.id.clone())
    }

    fn connect(&self, peer: &PeerId) -> Result<Arc<dyn Link>, TransportError> {
        let mut hub = self.network.hub();
        if !hub.endpoints.contains_key(&self.id) {
            return Err(TransportError::Network("not registered".to_string()));
        }
        *hub.connect_attempts.entry(peer.clone()).or_default() += 1;

        let local_id = next_link_id();
        let link = Arc::new(MemoryLink {
            id: local_id,
            local: self.id.clone(),
            remote: peer.clone(),
            network: self.network.clone(),
        });

        if hub.unreachable.contains(peer) {
            let _ = self
                .events
                .send(TransportEvent::Error(local_id, TransportError::Unreachable));
            return Ok(link);
        }
        let Some(remote_events) = hub.endpoints.get(peer).cloned() else {
            let _ = self
                .events
                .send(TransportEvent::Error(local_id, TransportError::PeerUnavailable));
            return Ok(link);
        };

        let remote_id = next_link_id();
        hub.links.insert(
            local_id,
            LinkEnd {
                owner: self.id.clone(),
                remote: peer.clone(),
                peer_link: remote_id,
            },
        );
        hub.links.insert(
            remote_id,
            LinkEnd {
                owner: peer.clone(),
                remote: self.id.clone(),
                peer_link: local_id,
            },
        );

        let remote_link = Arc::new(MemoryLink {
            id: remote_id,
            local: peer.clone(),
            remote: self.id.clone(),
            network: self.network.clone(),
        });
        let _ = remote_events.send(TransportEvent::Inbound(remote_link));
        let _ = remote_events.send(TransportEvent::Opened(remote_id));
        let _ = self.events.send(TransportEvent::Opened(local_id));

        Ok(link)
    }

    fn shutdown(&self) {
        self.network.take_offline(&self.id);
    }
}

// ── Link ──────────────────────────────────────────────────────────────────────

struct MemoryLink {
    id: LinkId,
    local: PeerId,
    remote: PeerId,
    network: MemoryNetwork,
}

impl Link for MemoryLink {
    fn id(&self) -> LinkId {
        self.id
    }

    fn remote(&self) -> &PeerId {
        &self.remote
    }

    fn send(&self, payload: Bytes) -> Result<(), TransportError> {
        let mut hub = self.network.hub();
        let peer_link = hub
            .links
            .get(&self.id)
            .map(|end| end.peer_link)
            .ok_or(TransportError::Closed)?;
        let events = hub
            .endpoints
            .get(&self.remote)
            .ok_or(TransportError::Closed)?;
        events
            .send(TransportEvent::Data(peer_link, payload))
            .map_err(|_| TransportError::Closed)?;

        *hub.frames
            .entry((self.local.clone(), self.remote.clone()))
            .or_default() += 1;
        Ok(())
    }

    fn close(&self) {
        self.network.hub().close_pair(self.id);
    }
}
