//! /messages handlers: delivered messages and originating new ones.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use mesh_core::{Location, MessageEnvelope, Urgency};

use super::{node_error, ApiState};

// ── /messages (GET) ──────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct MessagesQuery {
    /// Only messages created after this instant, unix millis.
    pub since: Option<i64>,
}

#[derive(Serialize)]
pub struct MessagesResponse {
    pub messages: Vec<MessageEnvelope>,
}

pub async fn handle_get_messages(
    State(state): State<ApiState>,
    Query(query): Query<MessagesQuery>,
) -> Json<MessagesResponse> {
    let messages = match query.since {
        Some(since) => state.messages.since(since),
        None => state.messages.all(),
    };
    Json(MessagesResponse { messages })
}

// ── /messages/send (POST) ────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct SendMessageRequest {
    pub message: String,
    pub urgency: Option<String>,
    pub location: Option<Location>,
}

#[derive(Serialize)]
pub struct SendMessageResponse {
    pub id: String,
    pub timestamp: i64,
    pub urgency: Urgency,
}

pub async fn handle_send_message(
    State(state): State<ApiState>,
    Json(req): Json<SendMessageRequest>,
) -> Result<Json<SendMessageResponse>, (StatusCode, String)> {
    if req.message.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "message must not be empty".to_string()));
    }
    let urgency = match req.urgency.as_deref() {
        Some(raw) => raw
            .parse::<Urgency>()
            .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?,
        None => Urgency::Medium,
    };

    let envelope = state
        .node
        .originate(req.message, urgency, req.location)
        .await
        .map_err(node_error)?;

    Ok(Json(SendMessageResponse {
        id: envelope.id,
        timestamp: envelope.timestamp.timestamp_millis(),
        urgency: envelope.urgency,
    }))
}
