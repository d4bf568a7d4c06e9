//! Request and response bodies of the visitor conversation API.
//!
//! Shared by the HTTP transcript sink (client side) and the reference
//! server in `vocaria-api`. All fields are snake_case JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Channel, ConversationId, Message, RoomContext, Sender, VisitorId};

/// Path prefix of the visitor-anonymous conversation API.
pub const CONVERSATIONS_PATH: &str = "/api/public/conversations";

/// `POST /api/public/conversations`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StartConversationRequest {
    pub tour_id: String,
    pub visitor_id: VisitorId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_context: Option<RoomContext>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StartConversationResponse {
    pub conversation_id: ConversationId,
    pub visitor_id: VisitorId,
    pub started_at: DateTime<Utc>,
}

/// `POST /api/public/conversations/{conversation_id}/messages`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AddMessageRequest {
    pub content: String,
    pub sender: Sender,
    pub channel: Channel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_context: Option<RoomContext>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_score: Option<f32>,
}

impl From<&Message> for AddMessageRequest {
    fn from(message: &Message) -> Self {
        Self {
            content: message.content.clone(),
            sender: message.sender,
            channel: message.channel,
            room_context: message.room_context.clone(),
            audio_duration_ms: message.audio_duration_ms,
            confidence_score: message.confidence_score,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AddMessageResponse {
    pub message_id: String,
    pub timestamp: DateTime<Utc>,
}

/// `POST /api/public/conversations/{conversation_id}/end`
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EndConversationRequest {
    pub lead_captured: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_phone: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EndConversationResponse {
    pub conversation_id: ConversationId,
    pub ended_at: DateTime<Utc>,
    /// `true` when the conversation had been ended by an earlier call.
    pub already_ended: bool,
}

/// Error body returned by the API for any non-2xx status.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

pub fn messages_path(conversation_id: &ConversationId) -> String {
    format!("{CONVERSATIONS_PATH}/{}/messages", conversation_id.0)
}

pub fn end_path(conversation_id: &ConversationId) -> String {
    format!("{CONVERSATIONS_PATH}/{}/end", conversation_id.0)
}
