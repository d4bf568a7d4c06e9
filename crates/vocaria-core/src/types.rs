use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, VocariaError};

// =============================================================================
// Enums
// =============================================================================

/// Who produced a transcript message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sender {
    /// The tour visitor.
    Visitor,
    /// The assistant, live voice agent or simulated reply.
    Agent,
    /// Informational notice. Never originates a lead-capture trigger.
    System,
}

/// Input channel a message arrived on.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    #[default]
    Text,
    Voice,
}

/// Lifecycle of a conversation session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    NotStarted,
    Active,
    Ended,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::NotStarted => "not_started",
            SessionState::Active => "active",
            SessionState::Ended => "ended",
        };
        f.write_str(s)
    }
}

/// State of the realtime voice channel.
///
/// Only voice provider events and explicit stop requests move this state.
/// Text activity never does.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoiceSessionState {
    #[default]
    Idle,
    Connecting,
    Connected,
    Listening,
    Speaking,
    Error,
    Disconnected,
}

impl VoiceSessionState {
    /// Whether the provider link is up (connected, listening or speaking).
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            VoiceSessionState::Connected
                | VoiceSessionState::Listening
                | VoiceSessionState::Speaking
        )
    }

    /// Whether a transition to `to` is allowed.
    pub fn can_transition_to(&self, to: VoiceSessionState) -> bool {
        use VoiceSessionState::*;
        match (self, to) {
            (Idle, Connecting) => true,
            (Connecting, Connected | Error | Disconnected | Idle) => true,
            (Connected | Listening | Speaking, Connected | Listening | Speaking) => {
                *self != to
            }
            (Connected | Listening | Speaking, Error | Disconnected | Idle) => true,
            (Error, Idle) => true,
            (Disconnected, Idle | Connecting) => true,
            _ => false,
        }
    }
}

impl fmt::Display for VoiceSessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VoiceSessionState::Idle => "idle",
            VoiceSessionState::Connecting => "connecting",
            VoiceSessionState::Connected => "connected",
            VoiceSessionState::Listening => "listening",
            VoiceSessionState::Speaking => "speaking",
            VoiceSessionState::Error => "error",
            VoiceSessionState::Disconnected => "disconnected",
        };
        f.write_str(s)
    }
}

/// Whether a locally accepted message reached the backend.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum SyncState {
    /// Queued for the persistence worker.
    Pending,
    /// Stored remotely under `remote_id`.
    Persisted { remote_id: String },
    /// No remote conversation exists; the message lives only in the local transcript.
    LocalOnly,
    /// The backend call failed. Not retried.
    Failed { error: String },
}

impl SyncState {
    pub fn is_settled(&self) -> bool {
        !matches!(self, SyncState::Pending)
    }
}

// =============================================================================
// Newtype Wrappers - Identity
// =============================================================================

/// Client-generated identifier of one conversation session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Client-generated visitor identifier, stable for the embedding lifetime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VisitorId(pub Uuid);

impl VisitorId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for VisitorId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for VisitorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Server-issued identifier of a persisted conversation.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub String);

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Position of a message within its transcript. Monotonic, starting at 1.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MessageId(pub u64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// =============================================================================
// Newtype Wrappers - Temporal
// =============================================================================

/// Unix timestamp in seconds since epoch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub fn now() -> Self {
        Self(Utc::now().timestamp())
    }

    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt.timestamp())
    }

    pub fn to_datetime(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.0, 0).unwrap_or_default()
    }
}

// =============================================================================
// Room Context
// =============================================================================

/// The visitor's location inside the 3D tour.
///
/// Attached as a snapshot to each message at acceptance time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoomContext {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub area: Option<f64>,
}

impl RoomContext {
    /// Builds a room context, rejecting blank names.
    pub fn new(name: impl Into<String>, area: Option<f64>) -> Result<Self> {
        let name = name.into().trim().to_string();
        if name.is_empty() {
            return Err(VocariaError::Session(
                "room name must not be empty".to_string(),
            ));
        }
        Ok(Self { name, area })
    }

    /// Human-readable label, e.g. `Cocina (12 m²)`.
    pub fn label(&self) -> String {
        match self.area {
            Some(area) => format!("{} ({} m²)", self.name, area),
            None => self.name.clone(),
        }
    }
}

// =============================================================================
// Messages
// =============================================================================

/// An accepted transcript entry. Immutable once appended.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub content: String,
    pub sender: Sender,
    pub channel: Channel,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_context: Option<RoomContext>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_score: Option<f32>,
}

impl Message {
    pub fn is_system(&self) -> bool {
        self.sender == Sender::System
    }

    pub fn is_voice(&self) -> bool {
        self.channel == Channel::Voice
    }
}

/// A message waiting to be accepted into a transcript.
///
/// Id, creation time and room context are assigned at acceptance.
#[derive(Clone, Debug, PartialEq)]
pub struct MessageDraft {
    pub content: String,
    pub sender: Sender,
    pub channel: Channel,
    pub audio_duration_ms: Option<u64>,
    pub confidence_score: Option<f32>,
}

impl MessageDraft {
    pub fn new(sender: Sender, channel: Channel, content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            sender,
            channel,
            audio_duration_ms: None,
            confidence_score: None,
        }
    }

    pub fn visitor_text(content: impl Into<String>) -> Self {
        Self::new(Sender::Visitor, Channel::Text, content)
    }

    pub fn agent_text(content: impl Into<String>) -> Self {
        Self::new(Sender::Agent, Channel::Text, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Sender::System, Channel::Text, content)
    }

    pub fn visitor_voice(
        content: impl Into<String>,
        audio_duration_ms: Option<u64>,
        confidence_score: Option<f32>,
    ) -> Self {
        Self {
            audio_duration_ms,
            confidence_score,
            ..Self::new(Sender::Visitor, Channel::Voice, content)
        }
    }

    pub fn agent_voice(content: impl Into<String>, response_duration_ms: Option<u64>) -> Self {
        Self {
            audio_duration_ms: response_duration_ms,
            ..Self::new(Sender::Agent, Channel::Voice, content)
        }
    }

    /// Finalizes the draft into an immutable message.
    pub fn accept(
        self,
        id: MessageId,
        room_context: Option<RoomContext>,
        created_at: DateTime<Utc>,
    ) -> Message {
        // Voice metrics only make sense on the voice channel.
        let (audio_duration_ms, confidence_score) = match self.channel {
            Channel::Voice => (self.audio_duration_ms, self.confidence_score),
            Channel::Text => (None, None),
        };
        Message {
            id,
            content: self.content,
            sender: self.sender,
            channel: self.channel,
            created_at,
            room_context,
            audio_duration_ms,
            confidence_score,
        }
    }
}

// =============================================================================
// Lead Capture
// =============================================================================

/// One-shot lead capture gate state. `submitted` implies `offered`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeadCaptureState {
    offered: bool,
    submitted: bool,
}

impl LeadCaptureState {
    pub fn offered(&self) -> bool {
        self.offered
    }

    pub fn submitted(&self) -> bool {
        self.submitted
    }

    /// Marks the prompt as offered. Returns `false` if it already was.
    pub fn mark_offered(&mut self) -> bool {
        if self.offered {
            return false;
        }
        self.offered = true;
        true
    }

    /// Marks the lead as submitted. Returns `false` unless the prompt was
    /// offered and not yet submitted.
    pub fn mark_submitted(&mut self) -> bool {
        if !self.offered || self.submitted {
            return false;
        }
        self.submitted = true;
        true
    }
}

/// Why the lead capture prompt was surfaced.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadOfferReason {
    /// The latest agent reply asked for it.
    AgentSignal,
    /// The latest visitor message matched a trigger keyword.
    KeywordMatch,
    /// Capped random fallback.
    RandomFallback,
}

/// Contact details captured from the visitor.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

impl ContactInfo {
    pub fn with_email(email: impl Into<String>) -> Self {
        Self {
            email: Some(email.into()),
            ..Self::default()
        }
    }

    pub fn with_phone(phone: impl Into<String>) -> Self {
        Self {
            phone: Some(phone.into()),
            ..Self::default()
        }
    }
}

// =============================================================================
// Session
// =============================================================================

/// One visitor's conversation within a single tour embedding.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: SessionId,
    pub visitor_id: VisitorId,
    pub tour_id: String,
    /// Remote id. `None` until the backend accepted the start call, or
    /// forever when the session runs degraded.
    pub conversation_id: Option<ConversationId>,
    pub state: SessionState,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub lead: LeadCaptureState,
    pub contact_info: Option<ContactInfo>,
}

impl Session {
    pub fn new(tour_id: impl Into<String>) -> Self {
        Self {
            session_id: SessionId::new(),
            visitor_id: VisitorId::new(),
            tour_id: tour_id.into(),
            conversation_id: None,
            state: SessionState::NotStarted,
            started_at: None,
            ended_at: None,
            lead: LeadCaptureState::default(),
            contact_info: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }

    pub fn lead_captured(&self) -> bool {
        self.lead.submitted()
    }

    /// `not_started -> active`. Returns `false` for any other state.
    pub fn activate(&mut self, now: DateTime<Utc>) -> bool {
        if self.state != SessionState::NotStarted {
            return false;
        }
        self.state = SessionState::Active;
        self.started_at = Some(now);
        true
    }

    /// `active -> ended`. Returns `false` for any other state.
    pub fn end(&mut self, now: DateTime<Utc>) -> bool {
        if self.state != SessionState::Active {
            return false;
        }
        self.state = SessionState::Ended;
        self.ended_at = Some(now);
        true
    }
}

// =============================================================================
// Tests
// =============================================================================
