//! HTTP API handlers: exposes the mesh node as JSON.

pub mod messages;
pub mod peers;
pub mod status;

use axum::http::StatusCode;

use mesh_core::PeerId;
use mesh_services::{MessageStore, NodeError, NodeHandle};

#[derive(Clone)]
pub struct ApiState {
    pub node: NodeHandle,
    /// Messages delivered to this node, newest last.
    pub messages: MessageStore,
    /// Shutdown broadcast sender; signals graceful daemon shutdown.
    pub shutdown_tx: tokio::sync::broadcast::Sender<()>,
}

// ── Shared helpers ────────────────────────────────────────────────────────────

/// Map a node error to an HTTP status and message.
fn node_error(e: NodeError) -> (StatusCode, String) {
    let status = match &e {
        NodeError::SelfConnect => StatusCode::BAD_REQUEST,
        NodeError::NotOpen(_) => StatusCode::NOT_FOUND,
        NodeError::Transport(_) => StatusCode::BAD_GATEWAY,
        NodeError::Failed | NodeError::Initialization { .. } | NodeError::Stopped => {
            StatusCode::SERVICE_UNAVAILABLE
        }
    };
    (status, e.to_string())
}

fn parse_peer_id(raw: &str) -> Result<PeerId, (StatusCode, String)> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "peer id must not be empty".to_string()));
    }
    Ok(PeerId::from(trimmed))
}

// Re-export handler functions for use in router setup.
pub use messages::{handle_get_messages, handle_send_message};
pub use peers::{handle_peer_connect, handle_peer_drop, handle_peers};
pub use status::{handle_shutdown, handle_status, handle_topology};
