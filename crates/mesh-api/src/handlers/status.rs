//! /status, /topology, /daemon/shutdown handlers.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use mesh_services::{NodeStatus, TopologySnapshot};

use super::{node_error, ApiState};

// ── /status ──────────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct StatusResponse {
    #[serde(flatten)]
    pub node: NodeStatus,
    pub messages_stored: usize,
}

pub async fn handle_status(
    State(state): State<ApiState>,
) -> Result<Json<StatusResponse>, (StatusCode, String)> {
    let node = state.node.status().await.map_err(node_error)?;
    Ok(Json(StatusResponse {
        node,
        messages_stored: state.messages.len(),
    }))
}

// ── /topology ────────────────────────────────────────────────────────────────

pub async fn handle_topology(
    State(state): State<ApiState>,
) -> Result<Json<TopologySnapshot>, (StatusCode, String)> {
    let status = state.node.status().await.map_err(node_error)?;
    Ok(Json(status.topology))
}

// ── /daemon/shutdown ─────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct ShutdownResponse {
    pub message: String,
}

pub async fn handle_shutdown(State(state): State<ApiState>) -> Json<ShutdownResponse> {
    tracing::info!("shutdown requested via API");
    let _ = state.shutdown_tx.send(());

    Json(ShutdownResponse {
        message: "Shutdown initiated".to_string(),
    })
}
