//! /peers handlers: connection inspection and management.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use mesh_core::PeerId;
use mesh_services::connection::ConnectionInfo;

use super::{node_error, parse_peer_id, ApiState};

// ── /peers (GET) ─────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct PeersResponse {
    pub open: Vec<PeerId>,
    pub connections: Vec<ConnectionInfo>,
    pub pending_reconnects: Vec<PeerId>,
    pub unreachable: Vec<PeerId>,
}

pub async fn handle_peers(
    State(state): State<ApiState>,
) -> Result<Json<PeersResponse>, (StatusCode, String)> {
    let status = state.node.status().await.map_err(node_error)?;
    Ok(Json(PeersResponse {
        open: status.open_peers,
        connections: status.connections,
        pending_reconnects: status.pending_reconnects,
        unreachable: status.unreachable,
    }))
}

// ── /peers/connect (POST) ────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct ConnectRequest {
    pub peer_id: String,
}

#[derive(Serialize)]
pub struct ConnectResponse {
    pub peer_id: PeerId,
    pub requested: bool,
}

pub async fn handle_peer_connect(
    State(state): State<ApiState>,
    Json(req): Json<ConnectRequest>,
) -> Result<Json<ConnectResponse>, (StatusCode, String)> {
    let peer = parse_peer_id(&req.peer_id)?;
    state
        .node
        .connect_to(peer.clone())
        .await
        .map_err(node_error)?;

    tracing::info!(peer = %peer.short(), "connect requested via API");
    Ok(Json(ConnectResponse {
        peer_id: peer,
        requested: true,
    }))
}

// ── /peers/{id} (DELETE) ─────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct PeerDropResponse {
    pub peer_id: PeerId,
    pub dropped: bool,
}

pub async fn handle_peer_drop(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<PeerDropResponse>, (StatusCode, String)> {
    let peer = parse_peer_id(&id)?;
    let dropped = state
        .node
        .remove_peer(peer.clone())
        .await
        .map_err(node_error)?;

    if dropped {
        tracing::info!(peer = %peer.short(), "peer dropped via API");
    }

    Ok(Json(PeerDropResponse {
        peer_id: peer,
        dropped,
    }))
}
