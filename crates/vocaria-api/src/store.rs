//! In-memory conversation store behind the reference API.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;
use vocaria_core::contract::{
    AddMessageRequest, AddMessageResponse, EndConversationRequest, EndConversationResponse,
    StartConversationRequest, StartConversationResponse,
};
use vocaria_core::{Channel, ConversationId, RoomContext, Sender, VisitorId};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("conversation not found: {0}")]
    NotFound(ConversationId),

    #[error("conversation {0} has already ended")]
    Ended(ConversationId),

    #[error("{0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub message_id: String,
    pub content: String,
    pub sender: Sender,
    pub channel: Channel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_context: Option<RoomContext>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_score: Option<f32>,
    pub timestamp: DateTime<Utc>,
}

/// A conversation as held by the server, returned by the read-back endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredConversation {
    pub conversation_id: ConversationId,
    pub tour_id: String,
    pub visitor_id: VisitorId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_context: Option<RoomContext>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub lead_captured: bool,
    pub contact_email: Option<String>,
    pub contact_phone: Option<String>,
    pub messages: Vec<StoredMessage>,
}

#[derive(Debug, Default)]
pub struct ConversationStore {
    conversations: Mutex<HashMap<ConversationId, StoredConversation>>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ConversationId, StoredConversation>> {
        self.conversations
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn start(
        &self,
        request: StartConversationRequest,
    ) -> Result<StartConversationResponse, StoreError> {
        let tour_id = request.tour_id.trim();
        if tour_id.is_empty() {
            return Err(StoreError::Invalid("tour_id must not be empty".to_string()));
        }

        let conversation = StoredConversation {
            conversation_id: ConversationId(Uuid::new_v4().to_string()),
            tour_id: tour_id.to_string(),
            visitor_id: request.visitor_id,
            room_context: request.room_context,
            started_at: Utc::now(),
            ended_at: None,
            lead_captured: false,
            contact_email: None,
            contact_phone: None,
            messages: Vec::new(),
        };
        let response = StartConversationResponse {
            conversation_id: conversation.conversation_id.clone(),
            visitor_id: conversation.visitor_id,
            started_at: conversation.started_at,
        };
        self.lock()
            .insert(conversation.conversation_id.clone(), conversation);
        Ok(response)
    }

    pub fn add_message(
        &self,
        id: &ConversationId,
        request: AddMessageRequest,
    ) -> Result<AddMessageResponse, StoreError> {
        if request.content.trim().is_empty() {
            return Err(StoreError::Invalid("content must not be empty".to_string()));
        }
        if let Some(score) = request.confidence_score {
            if !(0.0..=1.0).contains(&score) {
                return Err(StoreError::Invalid(format!(
                    "confidence_score out of range: {score}"
                )));
            }
        }

        let mut conversations = self.lock();
        let conversation = conversations
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        if conversation.ended_at.is_some() {
            return Err(StoreError::Ended(id.clone()));
        }

        let message = StoredMessage {
            message_id: Uuid::new_v4().to_string(),
            content: request.content,
            sender: request.sender,
            channel: request.channel,
            room_context: request.room_context,
            audio_duration_ms: request.audio_duration_ms,
            confidence_score: request.confidence_score,
            timestamp: Utc::now(),
        };
        let response = AddMessageResponse {
            message_id: message.message_id.clone(),
            timestamp: message.timestamp,
        };
        conversation.messages.push(message);
        Ok(response)
    }

    /// Ends a conversation. A repeated call leaves the first outcome in place
    /// and reports `already_ended`.
    pub fn end(
        &self,
        id: &ConversationId,
        request: EndConversationRequest,
    ) -> Result<EndConversationResponse, StoreError> {
        let mut conversations = self.lock();
        let conversation = conversations
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;

        if let Some(ended_at) = conversation.ended_at {
            return Ok(EndConversationResponse {
                conversation_id: id.clone(),
                ended_at,
                already_ended: true,
            });
        }

        let ended_at = Utc::now();
        conversation.ended_at = Some(ended_at);
        conversation.lead_captured = request.lead_captured;
        conversation.contact_email = request.contact_email;
        conversation.contact_phone = request.contact_phone;
        Ok(EndConversationResponse {
            conversation_id: id.clone(),
            ended_at,
            already_ended: false,
        })
    }

    pub fn get(&self, id: &ConversationId) -> Option<StoredConversation> {
        self.lock().get(id).cloned()
    }
}
