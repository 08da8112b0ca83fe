//! The mesh node actor.
//!
//! One task owns the connection table, the seen-set and the reconnect
//! timers. It waits on three queues: commands from [`NodeHandle`]s, events
//! from the transport, and reconnect timers coming due. Each item is handled
//! to completion before the next, so handlers never see partial state.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use mesh_core::config::MeshConfig;
use mesh_core::{Location, MessageEnvelope, PeerId, Urgency};

use crate::connection::{Connection, ConnectionInfo, ConnectionTable, Direction};
use crate::discovery::{Discovery, DiscoverySettings};
use crate::error::{NodeError, TransportError};
use crate::events::{DiscoveryState, NodeEvent};
use crate::presence::SharedRegistry;
use crate::reconnect::{ReconnectPolicy, ReconnectScheduler, Schedule};
use crate::router::{FloodRouter, RouteDecision, RouterStats};
use crate::seen::SeenSet;
use crate::topology::TopologySnapshot;
use crate::transport::{Link, LinkId, Transport, TransportEvent};

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct NodeSettings {
    pub register_attempts: u32,
    pub register_retry: Duration,
    pub reconnect: ReconnectPolicy,
    pub seen_capacity: usize,
    pub seen_max_age: Option<Duration>,
    pub discovery: DiscoverySettings,
}

impl NodeSettings {
    pub fn from_config(config: &MeshConfig) -> Self {
        Self {
            register_attempts: config.identity.register_attempts,
            register_retry: config.identity.register_retry(),
            reconnect: ReconnectPolicy::from_config(&config.reconnect),
            seen_capacity: config.routing.seen_capacity,
            seen_max_age: config.routing.seen_max_age(),
            discovery: DiscoverySettings::from_config(&config.discovery),
        }
    }
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self::from_config(&MeshConfig::default())
    }
}

/// Why a connect was requested. Only discovery applies the initiator rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectOrigin {
    Manual,
    Discovery,
    Reconnect,
}

enum Command {
    ConnectTo {
        peer: PeerId,
        reply: oneshot::Sender<Result<(), NodeError>>,
    },
    Discovered(PeerId),
    RemovePeer {
        peer: PeerId,
        reply: oneshot::Sender<Result<bool, NodeError>>,
    },
    Send {
        peer: PeerId,
        envelope: MessageEnvelope,
        reply: oneshot::Sender<Result<(), NodeError>>,
    },
    Broadcast {
        envelope: MessageEnvelope,
        reply: oneshot::Sender<Result<usize, NodeError>>,
    },
    Originate {
        message: String,
        urgency: Urgency,
        location: Option<Location>,
        reply: oneshot::Sender<Result<MessageEnvelope, NodeError>>,
    },
    Status {
        reply: oneshot::Sender<NodeStatus>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

impl Command {
    /// Answer with `err` without doing anything.
    fn reject(self, err: NodeError) {
        match self {
            Command::ConnectTo { reply, .. } | Command::Send { reply, .. } => {
                let _ = reply.send(Err(err));
            }
            Command::RemovePeer { reply, .. } => {
                let _ = reply.send(Err(err));
            }
            Command::Broadcast { reply, .. } => {
                let _ = reply.send(Err(err));
            }
            Command::Originate { reply, .. } => {
                let _ = reply.send(Err(err));
            }
            Command::Discovered(_) | Command::Status { .. } | Command::Shutdown { .. } => {}
        }
    }
}

/// Point-in-time view of a node, for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct NodeStatus {
    pub local_id: Option<PeerId>,
    pub failed: bool,
    pub state: DiscoveryState,
    pub connections: Vec<ConnectionInfo>,
    pub open_peers: Vec<PeerId>,
    pub topology: TopologySnapshot,
    pub pending_reconnects: Vec<PeerId>,
    pub unreachable: Vec<PeerId>,
    pub seen_messages: usize,
    pub router: RouterStats,
}

impl NodeStatus {
    fn failed() -> Self {
        Self {
            local_id: None,
            failed: true,
            state: DiscoveryState::Disconnected,
            connections: Vec::new(),
            open_peers: Vec::new(),
            topology: TopologySnapshot::default(),
            pending_reconnects: Vec::new(),
            unreachable: Vec::new(),
            seen_messages: 0,
            router: RouterStats::default(),
        }
    }
}

/// Cloneable front door to a running node.
#[derive(Clone)]
pub struct NodeHandle {
    commands: mpsc::UnboundedSender<Command>,
    events: broadcast::Sender<NodeEvent>,
}

impl NodeHandle {
    /// Receive node events from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.events.subscribe()
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, NodeError> {
        let (tx, rx) = oneshot::channel();
        self.commands.send(make(tx)).map_err(|_| NodeError::Stopped)?;
        rx.await.map_err(|_| NodeError::Stopped)
    }

    /// Open an outbound connection unless one exists. Clears any earlier
    /// unreachable verdict for the peer.
    pub async fn connect_to(&self, peer: PeerId) -> Result<(), NodeError> {
        self.request(|reply| Command::ConnectTo { peer, reply }).await?
    }

    /// Report a peer found by discovery. Fire and forget.
    pub fn peer_discovered(&self, peer: PeerId) {
        let _ = self.commands.send(Command::Discovered(peer));
    }

    /// Drop the connection to `peer` and cancel its reconnect timer.
    /// Returns whether a connection existed.
    pub async fn remove_peer(&self, peer: PeerId) -> Result<bool, NodeError> {
        self.request(|reply| Command::RemovePeer { peer, reply }).await?
    }

    /// Send `envelope` over the open connection to `peer`.
    pub async fn send(&self, peer: PeerId, envelope: MessageEnvelope) -> Result<(), NodeError> {
        self.request(|reply| Command::Send {
            peer,
            envelope,
            reply,
        })
        .await?
    }

    /// Send `envelope` on every open connection. Returns how many took it.
    pub async fn broadcast(&self, envelope: MessageEnvelope) -> Result<usize, NodeError> {
        self.request(|reply| Command::Broadcast { envelope, reply })
            .await?
    }

    /// Create a message here, deliver it locally, and flood it.
    pub async fn originate(
        &self,
        message: impl Into<String>,
        urgency: Urgency,
        location: Option<Location>,
    ) -> Result<MessageEnvelope, NodeError> {
        let message = message.into();
        self.request(|reply| Command::Originate {
            message,
            urgency,
            location,
            reply,
        })
        .await?
    }

    pub async fn status(&self) -> Result<NodeStatus, NodeError> {
        self.request(|reply| Command::Status { reply }).await
    }

    /// Withdraw presence, close every link, and stop the actor.
    pub async fn shutdown(&self) -> Result<(), NodeError> {
        self.request(|reply| Command::Shutdown { reply }).await
    }

    pub fn is_stopped(&self) -> bool {
        self.commands.is_closed()
    }
}

/// A node that has not started yet. Call [`MeshNode::run`] on a task.
pub struct MeshNode {
    settings: NodeSettings,
    transport: Arc<dyn Transport>,
    transport_rx: mpsc::UnboundedReceiver<TransportEvent>,
    commands: mpsc::UnboundedReceiver<Command>,
    handle: NodeHandle,
    registry: Option<SharedRegistry>,
}

impl MeshNode {
    pub fn new(
        settings: NodeSettings,
        transport: Arc<dyn Transport>,
        transport_rx: mpsc::UnboundedReceiver<TransportEvent>,
    ) -> (Self, NodeHandle) {
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let handle = NodeHandle {
            commands: commands_tx,
            events,
        };
        let node = Self {
            settings,
            transport,
            transport_rx,
            commands,
            handle: handle.clone(),
            registry: None,
        };
        (node, handle)
    }

    /// Enable presence discovery through `registry`.
    pub fn with_registry(mut self, registry: SharedRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Obtain an identifier, then serve until shut down.
    pub async fn run(self) {
        let MeshNode {
            settings,
            transport,
            mut transport_rx,
            mut commands,
            handle,
            registry,
        } = self;
        let events = handle.events.clone();

        let local = match register(transport.as_ref(), &settings).await {
            Ok(id) => id,
            Err(e) => {
                error!(error = %e, "node failed to initialize, discovery and reconnection disabled");
                let _ = events.send(NodeEvent::Failed {
                    reason: e.to_string(),
                });
                drop(handle);
                serve_failed(commands).await;
                return;
            }
        };

        info!(peer_id = %local, "node registered");
        let _ = events.send(NodeEvent::IdentifierAssigned {
            peer_id: local.clone(),
        });

        let (due_tx, mut due_rx) = mpsc::unbounded_channel();
        let mut node = Node {
            scheduler: ReconnectScheduler::new(settings.reconnect, due_tx),
            router: FloodRouter::new(
                local.clone(),
                SeenSet::new(settings.seen_capacity, settings.seen_max_age),
            ),
            table: ConnectionTable::new(),
            removed: HashSet::new(),
            local,
            transport,
            events,
            state: DiscoveryState::Discovering,
            connected: false,
            had_open: false,
            discovery_stop: None,
            discovery_task: None,
        };
        node.emit(NodeEvent::DiscoveryStateChanged {
            state: DiscoveryState::Discovering,
        });

        if let Some(registry) = registry {
            node.start_discovery(registry, settings.discovery, handle);
        } else {
            drop(handle);
        }

        loop {
            tokio::select! {
                Some(cmd) = commands.recv() => {
                    if !node.handle_command(cmd).await {
                        break;
                    }
                }
                Some(event) = transport_rx.recv() => node.on_transport_event(event),
                Some(peer) = due_rx.recv() => node.on_reconnect_due(peer),
                else => break,
            }
        }
    }
}

async fn register(transport: &dyn Transport, settings: &NodeSettings) -> Result<PeerId, NodeError> {
    let attempts = settings.register_attempts.max(1);
    let mut last = TransportError::PeerUnavailable;
    for attempt in 1..=attempts {
        match transport.register() {
            Ok(id) => return Ok(id),
            Err(e) => {
                warn!(attempt, attempts, error = %e, "registration failed");
                last = e;
                if attempt < attempts {
                    tokio::time::sleep(settings.register_retry).await;
                }
            }
        }
    }
    Err(NodeError::Initialization { attempts, last })
}

/// Terminal state after a failed start: answer status, refuse the rest.
async fn serve_failed(mut commands: mpsc::UnboundedReceiver<Command>) {
    while let Some(cmd) = commands.recv().await {
        match cmd {
            Command::Status { reply } => {
                let _ = reply.send(NodeStatus::failed());
            }
            Command::Shutdown { reply } => {
                let _ = reply.send(());
                break;
            }
            other => other.reject(NodeError::Failed),
        }
    }
}

struct Node {
    local: PeerId,
    transport: Arc<dyn Transport>,
    table: ConnectionTable,
    /// Peers dropped with `remove_peer`. Only a manual connect lets them back.
    removed: HashSet<PeerId>,
    scheduler: ReconnectScheduler,
    router: FloodRouter,
    events: broadcast::Sender<NodeEvent>,
    state: DiscoveryState,
    connected: bool,
    had_open: bool,
    discovery_stop: Option<broadcast::Sender<()>>,
    discovery_task: Option<JoinHandle<()>>,
}

impl Node {
    fn emit(&self, event: NodeEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    fn start_discovery(
        &mut self,
        registry: SharedRegistry,
        mut settings: DiscoverySettings,
        handle: NodeHandle,
    ) {
        settings.addr = self.transport.advertised_addr();
        let discovery = Discovery::new(registry, settings, self.local.clone());
        let (stop_tx, stop_rx) = broadcast::channel(1);
        self.discovery_stop = Some(stop_tx);
        self.discovery_task = Some(tokio::spawn(discovery.run(handle, stop_rx)));
    }

    /// Returns false once the node has shut down.
    async fn handle_command(&mut self, cmd: Command) -> bool {
        match cmd {
            Command::ConnectTo { peer, reply } => {
                let _ = reply.send(self.connect_to(peer, ConnectOrigin::Manual));
            }
            Command::Discovered(peer) => {
                if peer == self.local {
                    return true;
                }
                self.emit(NodeEvent::PeerDiscovered {
                    peer_id: peer.clone(),
                });
                if let Err(e) = self.connect_to(peer, ConnectOrigin::Discovery) {
                    debug!(error = %e, "connect after discovery failed");
                }
            }
            Command::RemovePeer { peer, reply } => {
                let _ = reply.send(Ok(self.remove_peer(&peer)));
            }
            Command::Send {
                peer,
                envelope,
                reply,
            } => {
                let _ = reply.send(self.send_to(&peer, &envelope));
            }
            Command::Broadcast { envelope, reply } => {
                let _ = reply.send(self.broadcast(&envelope, None));
            }
            Command::Originate {
                message,
                urgency,
                location,
                reply,
            } => {
                let envelope = self.router.originate(message, urgency, location);
                info!(id = %envelope.id, urgency = %envelope.urgency, "message originated");
                self.emit(NodeEvent::MessageReceived {
                    envelope: envelope.clone(),
                });
                let result = self.broadcast(&envelope, None).map(|sent| {
                    debug!(id = %envelope.id, sent, "message flooded");
                    envelope
                });
                let _ = reply.send(result);
            }
            Command::Status { reply } => {
                let _ = reply.send(self.status());
            }
            Command::Shutdown { reply } => {
                self.shutdown().await;
                let _ = reply.send(());
                return false;
            }
        }
        true
    }

    // ── Connections ───────────────────────────────────────────────────────────

    fn connect_to(&mut self, peer: PeerId, origin: ConnectOrigin) -> Result<(), NodeError> {
        if peer == self.local {
            return Err(NodeError::SelfConnect);
        }
        if self.table.contains(&peer) {
            debug!(peer = %peer.short(), "already connected or connecting");
            return Ok(());
        }

        match origin {
            ConnectOrigin::Manual => {
                self.removed.remove(&peer);
                self.scheduler.forget(&peer);
            }
            ConnectOrigin::Discovery => {
                if self.removed.contains(&peer) {
                    return Ok(());
                }
                if self.local > peer {
                    debug!(peer = %peer.short(), "waiting for peer to initiate");
                    return Ok(());
                }
                if self.scheduler.is_unreachable(&peer) || self.scheduler.is_pending(&peer) {
                    return Ok(());
                }
            }
            ConnectOrigin::Reconnect => {}
        }

        match self.transport.connect(&peer) {
            Ok(link) => {
                debug!(peer = %peer.short(), link = link.id(), ?origin, "connecting");
                self.table.insert(Connection::pending(link, Direction::Outbound));
                self.table_changed();
                Ok(())
            }
            Err(e) => {
                warn!(peer = %peer.short(), error = %e, "connect failed");
                self.connection_failed(&peer, e.clone());
                Err(e.into())
            }
        }
    }

    /// Register an inbound link. If we already hold a connection to the
    /// same peer, keep the one initiated by the smaller identifier.
    fn accept_inbound(&mut self, link: Arc<dyn Link>) {
        let peer = link.remote().clone();
        if peer == self.local {
            link.close();
            return;
        }
        if self.removed.contains(&peer) {
            debug!(peer = %peer.short(), "inbound link from removed peer refused");
            link.close();
            return;
        }

        if let Some(existing) = self.table.get(&peer) {
            let keep_existing = existing.direction == Direction::Outbound && self.local < peer;
            if keep_existing {
                debug!(peer = %peer.short(), "duplicate inbound link closed");
                link.close();
                return;
            }
            debug!(peer = %peer.short(), "inbound link replaces existing connection");
            if let Some(old) = self.table.remove(&peer) {
                old.link.close();
            }
        }

        info!(peer = %peer.short(), link = link.id(), "inbound connection");
        self.table.insert(Connection::pending(link, Direction::Inbound));
        self.table_changed();
    }

    fn remove_peer(&mut self, peer: &PeerId) -> bool {
        self.scheduler.cancel(peer);
        self.removed.insert(peer.clone());
        match self.table.remove(peer) {
            Some(conn) => {
                info!(peer = %peer.short(), "connection removed");
                conn.link.close();
                self.table_changed();
                true
            }
            None => false,
        }
    }

    fn connection_failed(&mut self, peer: &PeerId, err: TransportError) {
        if err.is_terminal() {
            warn!(peer = %peer.short(), error = %err, "peer unreachable");
            self.scheduler.mark_unreachable(peer);
            self.emit(NodeEvent::PeerUnreachable {
                peer_id: peer.clone(),
            });
        } else {
            self.schedule_reconnect(peer);
        }
    }

    fn schedule_reconnect(&mut self, peer: &PeerId) {
        match self.scheduler.schedule(peer) {
            Schedule::Scheduled { attempt, delay } => {
                info!(
                    peer = %peer.short(),
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "reconnect scheduled"
                );
            }
            Schedule::Exhausted => {
                warn!(peer = %peer.short(), "reconnect attempts exhausted");
                self.emit(NodeEvent::PeerUnreachable {
                    peer_id: peer.clone(),
                });
            }
            Schedule::AlreadyPending | Schedule::Unreachable | Schedule::Disabled => {}
        }
    }

    fn on_reconnect_due(&mut self, peer: PeerId) {
        if !self.scheduler.fired(&peer) {
            return;
        }
        if self.table.contains(&peer) {
            return;
        }
        info!(
            peer = %peer.short(),
            attempt = self.scheduler.attempts(&peer),
            "reconnecting"
        );
        if let Err(e) = self.connect_to(peer, ConnectOrigin::Reconnect) {
            debug!(error = %e, "reconnect attempt failed");
        }
    }

    // ── Transport events ──────────────────────────────────────────────────────

    fn on_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Inbound(link) => self.accept_inbound(link),
            TransportEvent::Opened(link) => self.on_opened(link),
            TransportEvent::Data(link, payload) => self.on_data(link, payload),
            TransportEvent::Closed(link) => {
                if let Some(conn) = self.table.remove_link(link) {
                    info!(peer = %conn.peer.short(), "connection lost");
                    self.table_changed();
                    self.schedule_reconnect(&conn.peer);
                }
            }
            TransportEvent::Error(link, err) => {
                if let Some(conn) = self.table.remove_link(link) {
                    warn!(peer = %conn.peer.short(), error = %err, "connection error");
                    conn.link.close();
                    self.table_changed();
                    self.connection_failed(&conn.peer, err);
                }
            }
        }
    }

    fn on_opened(&mut self, link: LinkId) {
        let Some(peer) = self.table.mark_open(link) else {
            return;
        };
        info!(peer = %peer.short(), "connection open");
        self.scheduler.succeeded(&peer);
        self.table_changed();
    }

    fn on_data(&mut self, link: LinkId, payload: Bytes) {
        let Some(from) = self.table.open_peer_for_link(link).cloned() else {
            debug!(link, "data on unknown link dropped");
            return;
        };
        let envelope = match MessageEnvelope::from_bytes(&payload) {
            Ok(env) => env,
            Err(e) => {
                warn!(peer = %from.short(), error = %e, "undecodable message dropped");
                return;
            }
        };

        match self.router.on_receive(&from, envelope) {
            RouteDecision::Duplicate => {}
            RouteDecision::Deliver { envelope, forward } => {
                info!(
                    id = %envelope.id,
                    from = %from.short(),
                    sender = %envelope.sender_id.short(),
                    urgency = %envelope.urgency,
                    "message received"
                );
                self.emit(NodeEvent::MessageReceived { envelope });
                if let Some(fwd) = forward {
                    if let Err(e) = self.broadcast(&fwd.envelope, Some(&fwd.exclude)) {
                        warn!(error = %e, "relay failed");
                    }
                }
            }
        }
    }

    // ── Sending ───────────────────────────────────────────────────────────────

    fn send_to(&self, peer: &PeerId, envelope: &MessageEnvelope) -> Result<(), NodeError> {
        let conn = self
            .table
            .get(peer)
            .filter(|c| c.is_open())
            .ok_or_else(|| NodeError::NotOpen(peer.clone()))?;
        let bytes = encode(envelope)?;
        conn.link.send(bytes)?;
        Ok(())
    }

    /// Send to every open connection except `exclude`. Returns the number
    /// of links that accepted the frame.
    fn broadcast(
        &self,
        envelope: &MessageEnvelope,
        exclude: Option<&PeerId>,
    ) -> Result<usize, NodeError> {
        let bytes = encode(envelope)?;
        let mut sent = 0;
        for conn in self.table.open_connections() {
            if exclude == Some(&conn.peer) {
                continue;
            }
            match conn.link.send(bytes.clone()) {
                Ok(()) => sent += 1,
                Err(e) => warn!(peer = %conn.peer.short(), error = %e, "send failed"),
            }
        }
        Ok(sent)
    }

    // ── Bookkeeping ───────────────────────────────────────────────────────────

    /// Publish the consequences of a connection table mutation.
    fn table_changed(&mut self) {
        let peers = self.table.open_peers();
        let connected = !peers.is_empty();

        self.emit(NodeEvent::TopologyChanged {
            topology: TopologySnapshot::star(&self.local, &peers),
        });
        self.emit(NodeEvent::PeersChanged { peers });
        if connected != self.connected {
            self.connected = connected;
            self.emit(NodeEvent::ConnectionStateChanged { connected });
        }

        self.had_open |= connected;
        let state = if connected {
            DiscoveryState::Connected
        } else if self.table.pending_count() > 0 {
            DiscoveryState::Connecting
        } else if self.had_open {
            DiscoveryState::Disconnected
        } else {
            DiscoveryState::Discovering
        };
        if state != self.state {
            debug!(from = self.state.as_str(), to = state.as_str(), "discovery state");
            self.state = state;
            self.emit(NodeEvent::DiscoveryStateChanged { state });
        }
    }

    fn status(&self) -> NodeStatus {
        let open_peers = self.table.open_peers();
        NodeStatus {
            local_id: Some(self.local.clone()),
            failed: false,
            state: self.state,
            connections: self.table.snapshot(),
            topology: TopologySnapshot::star(&self.local, &open_peers),
            open_peers,
            pending_reconnects: self.scheduler.pending_peers(),
            unreachable: self.scheduler.unreachable_peers(),
            seen_messages: self.router.seen_count(),
            router: self.router.stats(),
        }
    }

    async fn shutdown(&mut self) {
        info!("node shutting down");
        if let Some(stop) = self.discovery_stop.take() {
            let _ = stop.send(());
        }
        if let Some(task) = self.discovery_task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "discovery task ended abnormally");
            }
        }

        self.scheduler.disable();
        let drained = self.table.drain();
        let had_connections = !drained.is_empty();
        for conn in drained {
            conn.link.close();
        }
        self.transport.shutdown();
        if had_connections {
            self.table_changed();
        }
        info!("node stopped");
    }
}

fn encode(envelope: &MessageEnvelope) -> Result<Bytes, NodeError> {
    envelope
        .to_bytes()
        .map(Bytes::from)
        .map_err(|e| NodeError::Transport(TransportError::Network(format!("encode: {e}"))))
}
