//! Connection table: the authoritative record of this node's direct links.
//!
//! Owned by the node actor. Everyone else sees snapshots.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

use mesh_core::PeerId;

use crate::transport::{Link, LinkId};

/// Lifecycle of one connection.
///
/// `Pending → Open` on transport open; `Pending | Open → Closed` on close or
/// error. Closed connections leave the table immediately and are never
/// reopened; a fresh connect creates a new pending entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Pending,
    Open,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Outbound,
    Inbound,
}

pub struct Connection {
    pub peer: PeerId,
    pub link: Arc<dyn Link>,
    pub state: ConnectionState,
    pub direction: Direction,
    pub created_at: Instant,
    pub opened_at: Option<Instant>,
}

impl Connection {
    pub fn pending(link: Arc<dyn Link>, direction: Direction) -> Self {
        Self {
            peer: link.remote().clone(),
            link,
            state: ConnectionState::Pending,
            direction,
            created_at: Instant::now(),
            opened_at: None,
        }
    }

    pub fn link_id(&self) -> LinkId {
        self.link.id()
    }

    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }

    /// Which side started this connection.
    pub fn initiator<'a>(&'a self, local: &'a PeerId) -> &'a PeerId {
        match self.direction {
            Direction::Outbound => local,
            Direction::Inbound => &self.peer,
        }
    }

    pub fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            peer: self.peer.clone(),
            link_id: self.link_id(),
            state: self.state,
            direction: self.direction,
            open_secs: self.opened_at.map(|t| t.elapsed().as_secs()),
        }
    }
}

/// Read-only view of one connection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionInfo {
    pub peer: PeerId,
    pub link_id: LinkId,
    pub state: ConnectionState,
    pub direction: Direction,
    pub open_secs: Option<u64>,
}

/// Peer → connection. One entry per peer.
#[derive(Default)]
pub struct ConnectionTable {
    entries: HashMap<PeerId, Connection>,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, peer: &PeerId) -> Option<&Connection> {
        self.entries.get(peer)
    }

    pub fn contains(&self, peer: &PeerId) -> bool {
        self.entries.contains_key(peer)
    }

    /// Insert a connection, returning the one it replaced.
    pub fn insert(&mut self, conn: Connection) -> Option<Connection> {
        self.entries.insert(conn.peer.clone(), conn)
    }

    pub fn remove(&mut self, peer: &PeerId) -> Option<Connection> {
        self.entries.remove(peer)
    }

    /// Remove the connection that owns `link`. Links no longer in the table
    /// (replaced or already removed) leave it untouched.
    pub fn remove_link(&mut self, link: LinkId) -> Option<Connection> {
        let peer = self.peer_for_link(link)?.clone();
        self.entries.remove(&peer)
    }

    /// Move a pending connection to open. Returns the peer on a real
    /// transition, `None` for unknown links or repeated opens.
    pub fn mark_open(&mut self, link: LinkId) -> Option<PeerId> {
        let conn = self
            .entries
            .values_mut()
            .find(|c| c.link_id() == link && c.state == ConnectionState::Pending)?;
        conn.state = ConnectionState::Open;
        conn.opened_at = Some(Instant::now());
        Some(conn.peer.clone())
    }

    pub fn peer_for_link(&self, link: LinkId) -> Option<&PeerId> {
        self.entries
            .values()
            .find(|c| c.link_id() == link)
            .map(|c| &c.peer)
    }

    /// Peer behind `link`, only if that connection is open.
    pub fn open_peer_for_link(&self, link: LinkId) -> Option<&PeerId> {
        self.entries
            .values()
            .find(|c| c.link_id() == link && c.is_open())
            .map(|c| &c.peer)
    }

    /// Open peers, sorted.
    pub fn open_peers(&self) -> Vec<PeerId> {
        let mut peers: Vec<PeerId> = self
            .entries
            .values()
            .filter(|c| c.is_open())
            .map(|c| c.peer.clone())
            .collect();
        peers.sort();
        peers
    }

    pub fn open_connections(&self) -> impl Iterator<Item = &Connection> {
        self.entries.values().filter(|c| c.is_open())
    }

    pub fn pending_count(&self) -> usize {
        self.entries
            .values()
            .filter(|c| c.state == ConnectionState::Pending)
            .count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot for status reporting, sorted by peer.
    pub fn snapshot(&self) -> Vec<ConnectionInfo> {
        let mut infos: Vec<ConnectionInfo> = self.entries.values().map(|c| c.info()).collect();
        infos.sort_by(|a, b| a.peer.cmp(&b.peer));
        infos
    }

    /// Empty the table, handing back every connection.
    pub fn drain(&mut self) -> Vec<Connection> {
        self.entries.drain().map(|(_, c)| c).collect()
    }
}
