//! Route handler functions for the visitor conversation API.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use vocaria_core::contract::{
    AddMessageRequest, AddMessageResponse, EndConversationRequest, EndConversationResponse,
    StartConversationRequest, StartConversationResponse,
};
use vocaria_core::ConversationId;

use crate::error::ApiError;
use crate::state::AppState;
use crate::store::StoredConversation;

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub conversations: u64,
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        conversations: state.store.len() as u64,
    })
}

/// POST /api/public/conversations
pub async fn start_conversation(
    State(state): State<AppState>,
    Json(request): Json<StartConversationRequest>,
) -> Result<(StatusCode, Json<StartConversationResponse>), ApiError> {
    let response = state.store.start(request)?;
    info!(conversation_id = %response.conversation_id, "Conversation started");
    Ok((StatusCode::CREATED, Json(response)))
}

/// POST /api/public/conversations/{conversation_id}/messages
pub async fn add_message(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
    Json(request): Json<AddMessageRequest>,
) -> Result<(StatusCode, Json<AddMessageResponse>), ApiError> {
    let id = ConversationId(conversation_id);
    let sender = request.sender;
    let response = state.store.add_message(&id, request)?;
    debug!(conversation_id = %id, message_id = %response.message_id, ?sender, "Message stored");
    Ok((StatusCode::CREATED, Json(response)))
}

/// POST /api/public/conversations/{conversation_id}/end
pub async fn end_conversation(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
    Json(request): Json<EndConversationRequest>,
) -> Result<Json<EndConversationResponse>, ApiError> {
    let id = ConversationId(conversation_id);
    let lead_captured = request.lead_captured;
    let response = state.store.end(&id, request)?;
    if response.already_ended {
        debug!(conversation_id = %id, "Conversation already ended");
    } else {
        info!(conversation_id = %id, lead_captured, "Conversation ended");
    }
    Ok(Json(response))
}

/// GET /api/public/conversations/{conversation_id}
pub async fn get_conversation(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
) -> Result<Json<StoredConversation>, ApiError> {
    let id = ConversationId(conversation_id);
    state
        .store
        .get(&id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("conversation not found: {id}")))
}
