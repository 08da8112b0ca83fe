//! Daemon status, topology and shutdown commands.

use anyhow::Result;
use serde::Deserialize;

use super::http::{base_url, get_json, post_json};
use super::short;

// ── Response types ────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct StatusResponse {
    local_id: Option<String>,
    failed: bool,
    state: String,
    open_peers: Vec<String>,
    connections: Vec<ConnectionInfo>,
    pending_reconnects: Vec<String>,
    unreachable: Vec<String>,
    seen_messages: usize,
    router: RouterStats,
    messages_stored: usize,
}

#[derive(Deserialize)]
struct ConnectionInfo {
    peer: String,
    state: String,
    direction: String,
    open_secs: Option<u64>,
}

#[derive(Deserialize)]
struct RouterStats {
    originated: u64,
    delivered: u64,
    duplicates: u64,
    forwarded: u64,
}

#[derive(Deserialize)]
struct TopologyResponse {
    nodes: Vec<TopologyNode>,
    edges: Vec<TopologyEdge>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TopologyNode {
    id: String,
    is_self: bool,
}

#[derive(Deserialize)]
struct TopologyEdge {
    to: String,
    quality: f32,
}

// ── Commands ──────────────────────────────────────────────────────────────────

pub async fn cmd_status(port: u16) -> Result<()> {
    let resp: StatusResponse = get_json(&format!("{}/status", base_url(port))).await?;

    println!("═══════════════════════════════════════");
    println!("  Mesh Daemon Status");
    println!("═══════════════════════════════════════");
    if resp.failed {
        println!("  FAILED: node could not obtain an identifier; restart meshd.");
        return Ok(());
    }
    println!("  Peer id          : {}", resp.local_id.as_deref().unwrap_or("-"));
    println!("  State            : {}", resp.state);
    println!("  Open peers       : {}", resp.open_peers.len());
    println!("  Reconnecting     : {}", resp.pending_reconnects.len());
    println!("  Unreachable      : {}", resp.unreachable.len());
    println!("  Seen message ids : {}", resp.seen_messages);
    println!("  Stored messages  : {}", resp.messages_stored);
    println!(
        "  Routed           : {} originated, {} delivered, {} forwarded, {} duplicates",
        resp.router.originated, resp.router.delivered, resp.router.forwarded, resp.router.duplicates
    );

    if resp.connections.is_empty() {
        println!("\n  No connections.");
    } else {
        println!("\n  Connections:");
        for c in &resp.connections {
            println!("  ┌─ {}", short(&c.peer, 16));
            println!("  │  state     : {}", c.state);
            println!("  │  direction : {}", c.direction);
            match c.open_secs {
                Some(secs) => println!("  └─ uptime    : {}s", secs),
                None => println!("  └─ uptime    : -"),
            }
        }
    }

    Ok(())
}

pub async fn cmd_topology(port: u16) -> Result<()> {
    let resp: TopologyResponse = get_json(&format!("{}/topology", base_url(port))).await?;

    let center = resp
        .nodes
        .iter()
        .find(|n| n.is_self)
        .map(|n| n.id.as_str())
        .unwrap_or("?");
    println!("  {} (self)", short(center, 16));
    if resp.edges.is_empty() {
        println!("  └─ no neighbours");
        return Ok(());
    }
    for (i, e) in resp.edges.iter().enumerate() {
        let branch = if i + 1 == resp.edges.len() { "└─" } else { "├─" };
        println!("  {} {} (quality {:.2})", branch, short(&e.to, 16), e.quality);
    }
    Ok(())
}

pub async fn cmd_shutdown(port: u16) -> Result<()> {
    #[derive(Deserialize)]
    struct ShutdownResponse {
        message: String,
    }

    let resp: ShutdownResponse = post_json(&format!("{}/daemon/shutdown", base_url(port))).await?;
    println!("{}", resp.message);
    Ok(())
}
