//! TCP transport: newline-delimited JSON between local mesh daemons.
//!
//! The dialer writes one `Hello` line naming itself, then both sides
//! exchange raw envelope JSON, one per line. Peers are found through their
//! presence record's `addr` field, so this transport only reaches peers
//! that advertise in the shared registry.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use mesh_core::presence::presence_key;
use mesh_core::{PeerId, PresenceRecord};
use mesh_services::transport::{next_link_id, Link, LinkId, Transport, TransportEvent, TransportEvents};
use mesh_services::{SharedRegistry, TransportError};

const HELLO_TIMEOUT: Duration = Duration::from_secs(5);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Longest line accepted from a peer, newline excluded.
const MAX_LINE: usize = 64 * 1024;

/// First line on every connection, sent by the dialer.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Hello {
    peer_id: PeerId,
}

enum LinkCommand {
    Frame(Bytes),
    Close,
}

pub struct TcpLink {
    id: LinkId,
    remote: PeerId,
    tx: mpsc::UnboundedSender<LinkCommand>,
}

impl Link for TcpLink {
    fn id(&self) -> LinkId {
        self.id
    }

    fn remote(&self) -> &PeerId {
        &self.remote
    }

    fn send(&self, payload: Bytes) -> Result<(), TransportError> {
        self.tx
            .send(LinkCommand::Frame(payload))
            .map_err(|_| TransportError::Closed)
    }

    fn close(&self) {
        let _ = self.tx.send(LinkCommand::Close);
    }
}

pub struct TcpTransport {
    local: PeerId,
    listen: SocketAddr,
    advertise_host: String,
    registry: SharedRegistry,
    namespace: String,
    events: TransportEvents,
    acceptor: Mutex<Option<AbortHandle>>,
}

impl TcpTransport {
    /// Bind the listener and start accepting. Inbound links are reported on
    /// `events` once the dialer's hello arrives.
    pub async fn bind(
        local: PeerId,
        listen_addr: &str,
        advertise_host: &str,
        registry: SharedRegistry,
        namespace: &str,
        events: TransportEvents,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind(listen_addr).await?;
        let listen = listener.local_addr()?;
        info!(addr = %listen, "peer transport listening");

        let acceptor = tokio::spawn(accept_loop(listener, events.clone()));

        Ok(Self {
            local,
            listen,
            advertise_host: advertise_host.to_string(),
            registry,
            namespace: namespace.to_string(),
            events,
            acceptor: Mutex::new(Some(acceptor.abort_handle())),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.listen
    }

    /// Look up where `peer` listens from its presence record.
    fn resolve(&self, peer: &PeerId) -> Result<SocketAddr, TransportError> {
        let key = presence_key(&self.namespace, peer);
        let text = self
            .registry
            .get(&key)
            .map_err(|e| TransportError::Network(e.to_string()))?
            .ok_or(TransportError::PeerUnavailable)?;
        let record = PresenceRecord::parse(&text).ok_or(TransportError::PeerUnavailable)?;
        let addr = record.addr.ok_or_else(|| {
            TransportError::InvalidPeer(format!("{} advertises no address", peer.short()))
        })?;
        addr.parse()
            .map_err(|_| TransportError::InvalidPeer(format!("bad address '{addr}'")))
    }
}

impl Transport for TcpTransport {
    fn register(&self) -> Result<PeerId, TransportError> {
        Ok(self.local.clone())
    }

    fn connect(&self, peer: &PeerId) -> Result<Arc<dyn Link>, TransportError> {
        let addr = self.resolve(peer)?;
        let (tx, rx) = mpsc::unbounded_channel();
        let link = Arc::new(TcpLink {
            id: next_link_id(),
            remote: peer.clone(),
            tx,
        });

        let id = link.id;
        let hello = Hello {
            peer_id: self.local.clone(),
        };
        let events = self.events.clone();
        tokio::spawn(async move {
            match dial(addr, &hello).await {
                Ok(stream) => {
                    let _ = events.send(TransportEvent::Opened(id));
                    let (reader, writer) = stream.into_split();
                    pump(id, BufReader::new(reader), writer, rx, events).await;
                }
                Err(e) => {
                    debug!(%addr, error = %e, "dial failed");
                    let _ = events.send(TransportEvent::Error(id, e));
                }
            }
        });

        Ok(link)
    }

    fn advertised_addr(&self) -> Option<String> {
        let host = if self.advertise_host.is_empty() {
            self.listen.ip().to_string()
        } else {
            self.advertise_host.clone()
        };
        Some(SocketAddr::new(host.parse().ok()?, self.listen.port()).to_string())
    }

    fn shutdown(&self) {
        let mut acceptor = self.acceptor.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(handle) = acceptor.take() {
            handle.abort();
            info!("peer transport stopped");
        }
    }
}

async fn dial(addr: SocketAddr, hello: &Hello) -> Result<TcpStream, TransportError> {
    let mut stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(addr))
        .await
        .map_err(|_| TransportError::Network("connect timed out".to_string()))?
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::ConnectionRefused => TransportError::PeerUnavailable,
            _ => TransportError::Network(e.to_string()),
        })?;

    let mut line = serde_json::to_vec(hello).map_err(|e| TransportError::Network(e.to_string()))?;
    line.push(b'\n');
    stream
        .write_all(&line)
        .await
        .map_err(|e| TransportError::Network(e.to_string()))?;
    Ok(stream)
}

/// Read one line into `buf` and return it without its terminator. `None`
/// means the peer closed. A line longer than [`MAX_LINE`] is an error.
///
/// Cancel safe: a partial line stays in `buf` and the next call resumes it.
async fn read_line_bounded<R>(reader: &mut R, buf: &mut Vec<u8>) -> std::io::Result<Option<Vec<u8>>>
where
    R: AsyncBufRead + Unpin,
{
    let budget = (MAX_LINE + 1).saturating_sub(buf.len()) as u64;
    (&mut *reader).take(budget).read_until(b'\n', buf).await?;

    if buf.last() == Some(&b'\n') {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
        return Ok(Some(std::mem::take(buf)));
    }
    if buf.len() > MAX_LINE {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("line exceeds {MAX_LINE} bytes"),
        ));
    }
    // eof, possibly after an unterminated last line
    if buf.is_empty() {
        Ok(None)
    } else {
        Ok(Some(std::mem::take(buf)))
    }
}

async fn accept_loop(listener: TcpListener, events: TransportEvents) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let events = events.clone();
                tokio::spawn(async move {
                    if let Err(e) = accept(stream, events).await {
                        warn!(%addr, error = %e, "inbound connection rejected");
                    }
                });
            }
            Err(e) => warn!(error = %e, "accept failed"),
        }
    }
}

async fn accept(stream: TcpStream, events: TransportEvents) -> Result<(), TransportError> {
    let (reader, writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    let first = tokio::time::timeout(HELLO_TIMEOUT, read_line_bounded(&mut reader, &mut buf))
        .await
        .map_err(|_| TransportError::Network("no hello".to_string()))?
        .map_err(|e| TransportError::Network(e.to_string()))?
        .ok_or_else(|| TransportError::Network("closed before hello".to_string()))?;
    let hello: Hello = serde_json::from_slice(&first)
        .map_err(|e| TransportError::InvalidPeer(format!("bad hello: {e}")))?;

    let (tx, rx) = mpsc::unbounded_channel();
    let link = Arc::new(TcpLink {
        id: next_link_id(),
        remote: hello.peer_id,
        tx,
    });
    let id = link.id;
    debug!(peer = %link.remote.short(), link = id, "hello received");

    let _ = events.send(TransportEvent::Inbound(link));
    let _ = events.send(TransportEvent::Opened(id));
    pump(id, reader, writer, rx, events).await;
    Ok(())
}

/// Move frames between the socket and the node until either side closes.
async fn pump(
    id: LinkId,
    mut reader: BufReader<OwnedReadHalf>,
    mut writer: OwnedWriteHalf,
    mut commands: mpsc::UnboundedReceiver<LinkCommand>,
    events: TransportEvents,
) {
    let mut buf = Vec::new();

    loop {
        tokio::select! {
            cmd = commands.recv() => match cmd {
                Some(LinkCommand::Frame(payload)) => {
                    let written = async {
                        writer.write_all(&payload).await?;
                        writer.write_all(b"\n").await
                    }
                    .await;
                    if let Err(e) = written {
                        let _ = events.send(TransportEvent::Error(id, TransportError::Network(e.to_string())));
                        return;
                    }
                }
                Some(LinkCommand::Close) | None => {
                    let _ = writer.shutdown().await;
                    let _ = events.send(TransportEvent::Closed(id));
                    return;
                }
            },

            line = read_line_bounded(&mut reader, &mut buf) => match line {
                Ok(Some(line)) if line.iter().all(u8::is_ascii_whitespace) => {}
                Ok(Some(line)) => {
                    let _ = events.send(TransportEvent::Data(id, Bytes::from(line)));
                }
                Ok(None) => {
                    let _ = events.send(TransportEvent::Closed(id));
                    return;
                }
                Err(e) => {
                    let _ = events.send(TransportEvent::Error(id, TransportError::Network(e.to_string())));
                    return;
                }
            },
        }
    }
}
