//! Peer listing and connection management commands.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::http::{base_url, delete_json, get_json, post_json_body};
use super::short;

#[derive(Deserialize)]
struct PeersResponse {
    open: Vec<String>,
    connections: Vec<ConnectionInfo>,
    pending_reconnects: Vec<String>,
    unreachable: Vec<String>,
}

#[derive(Deserialize)]
struct ConnectionInfo {
    peer: String,
    state: String,
}

#[derive(Serialize)]
struct ConnectRequest<'a> {
    peer_id: &'a str,
}

#[derive(Deserialize)]
struct ConnectResponse {
    peer_id: String,
}

#[derive(Deserialize)]
struct DropResponse {
    peer_id: String,
    dropped: bool,
}

pub async fn cmd_peers(port: u16) -> Result<()> {
    let resp: PeersResponse = get_json(&format!("{}/peers", base_url(port))).await?;

    if resp.connections.is_empty() && resp.pending_reconnects.is_empty() && resp.unreachable.is_empty() {
        println!("No peers yet.");
        return Ok(());
    }

    println!("═══════════════════════════════════════");
    println!("  Peers ({} open)", resp.open.len());
    println!("═══════════════════════════════════════");
    for c in &resp.connections {
        println!("  {:<18} {}", short(&c.peer, 16), c.state);
    }
    for p in &resp.pending_reconnects {
        println!("  {:<18} reconnecting", short(p, 16));
    }
    for p in &resp.unreachable {
        println!("  {:<18} unreachable", short(p, 16));
    }
    Ok(())
}

pub async fn cmd_connect(port: u16, peer_id: &str) -> Result<()> {
    let resp: ConnectResponse = post_json_body(
        &format!("{}/peers/connect", base_url(port)),
        &ConnectRequest { peer_id },
    )
    .await?;
    println!("Connecting to {}", resp.peer_id);
    Ok(())
}

pub async fn cmd_drop(port: u16, peer_id: &str) -> Result<()> {
    let resp: DropResponse = delete_json(&format!("{}/peers/{}", base_url(port), peer_id)).await?;
    if resp.dropped {
        println!("Dropped {}", resp.peer_id);
    } else {
        println!("No connection to {}", resp.peer_id);
    }
    Ok(())
}
