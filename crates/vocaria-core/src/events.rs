use serde::{Deserialize, Serialize};

use crate::types::{
    ContactInfo, ConversationId, LeadOfferReason, Message, MessageId, RoomContext, SessionId,
    Timestamp, VoiceSessionState,
};

/// All domain events published by a conversation session.
///
/// Consumed by:
/// - The rendering layer (transcript, typing indicator, voice badge)
/// - The widget host bridge (inter-frame messages to the embedding page)
/// - Logging in the terminal client
#[derive(Clone, Debug, Serialize, Deserialize)]
#[non_exhaustive]
pub enum DomainEvent {
    // =========================================================================
    // Session Lifecycle Events
    // =========================================================================
    /// The backend accepted the conversation start.
    SessionStarted {
        session_id: SessionId,
        conversation_id: ConversationId,
        timestamp: Timestamp,
    },

    /// The conversation start failed; the session keeps a local-only transcript.
    SessionDegraded {
        session_id: SessionId,
        reason: String,
        timestamp: Timestamp,
    },

    /// The session ended, by teardown or completed lead capture.
    SessionEnded {
        session_id: SessionId,
        lead_captured: bool,
        timestamp: Timestamp,
    },

    // =========================================================================
    // Transcript Events
    // =========================================================================
    /// A message was appended to the local transcript.
    MessageAccepted {
        session_id: SessionId,
        message: Message,
        timestamp: Timestamp,
    },

    /// A message was stored by the backend.
    MessagePersisted {
        session_id: SessionId,
        message_id: MessageId,
        remote_id: String,
        timestamp: Timestamp,
    },

    /// The backend rejected or never received a message.
    MessagePersistFailed {
        session_id: SessionId,
        message_id: MessageId,
        error: String,
        timestamp: Timestamp,
    },

    /// The agent reply indicator toggled.
    AgentTyping {
        session_id: SessionId,
        typing: bool,
        timestamp: Timestamp,
    },

    // =========================================================================
    // Voice Events
    // =========================================================================
    /// The voice channel moved between states.
    VoiceStateChanged {
        session_id: SessionId,
        from: VoiceSessionState,
        to: VoiceSessionState,
        timestamp: Timestamp,
    },

    /// Voice mode was switched off after a channel failure.
    VoiceFallback {
        session_id: SessionId,
        reason: String,
        timestamp: Timestamp,
    },

    // =========================================================================
    // Tour Events
    // =========================================================================
    /// The visitor moved to another room.
    RoomChanged {
        session_id: SessionId,
        room: RoomContext,
        timestamp: Timestamp,
    },

    // =========================================================================
    // Lead Capture Events
    // =========================================================================
    /// The contact prompt was surfaced. Happens at most once per session.
    LeadOffered {
        session_id: SessionId,
        reason: LeadOfferReason,
        timestamp: Timestamp,
    },

    /// The visitor dismissed the contact prompt.
    LeadDeclined {
        session_id: SessionId,
        timestamp: Timestamp,
    },

    /// The visitor left contact details.
    LeadSubmitted {
        session_id: SessionId,
        tour_id: String,
        conversation_id: Option<ConversationId>,
        contact: ContactInfo,
        timestamp: Timestamp,
    },
}

impl DomainEvent {
    /// Returns the timestamp of the event.
    pub fn timestamp(&self) -> Timestamp {
        match self {
            DomainEvent::SessionStarted { timestamp, .. }
            | DomainEvent::SessionDegraded { timestamp, .. }
            | DomainEvent::SessionEnded { timestamp, .. }
            | DomainEvent::MessageAccepted { timestamp, .. }
            | DomainEvent::MessagePersisted { timestamp, .. }
            | DomainEvent::MessagePersistFailed { timestamp, .. }
            | DomainEvent::AgentTyping { timestamp, .. }
            | DomainEvent::VoiceStateChanged { timestamp, .. }
            | DomainEvent::VoiceFallback { timestamp, .. }
            | DomainEvent::RoomChanged { timestamp, .. }
            | DomainEvent::LeadOffered { timestamp, .. }
            | DomainEvent::LeadDeclined { timestamp, .. }
            | DomainEvent::LeadSubmitted { timestamp, .. } => *timestamp,
        }
    }

    /// Returns the session the event belongs to.
    pub fn session_id(&self) -> SessionId {
        match self {
            DomainEvent::SessionStarted { session_id, .. }
            | DomainEvent::SessionDegraded { session_id, .. }
            | DomainEvent::SessionEnded { session_id, .. }
            | DomainEvent::MessageAccepted { session_id, .. }
            | DomainEvent::MessagePersisted { session_id, .. }
            | DomainEvent::MessagePersistFailed { session_id, .. }
            | DomainEvent::AgentTyping { session_id, .. }
            | DomainEvent::VoiceStateChanged { session_id, .. }
            | DomainEvent::VoiceFallback { session_id, .. }
            | DomainEvent::RoomChanged { session_id, .. }
            | DomainEvent::LeadOffered { session_id, .. }
            | DomainEvent::LeadDeclined { session_id, .. }
            | DomainEvent::LeadSubmitted { session_id, .. } => *session_id,
        }
    }

    /// Returns a snake_case event name for logging.
    pub fn event_name(&self) -> &'static str {
        match self {
            DomainEvent::SessionStarted { .. } => "session_started",
            DomainEvent::SessionDegraded { .. } => "session_degraded",
            DomainEvent::SessionEnded { .. } => "session_ended",
            DomainEvent::MessageAccepted { .. } => "message_accepted",
            DomainEvent::MessagePersisted { .. } => "message_persisted",
            DomainEvent::MessagePersistFailed { .. } => "message_persist_failed",
            DomainEvent::AgentTyping { .. } => "agent_typing",
            DomainEvent::VoiceStateChanged { .. } => "voice_state_changed",
            DomainEvent::VoiceFallback { .. } => "voice_fallback",
            DomainEvent::RoomChanged { .. } => "room_changed",
            DomainEvent::LeadOffered { .. } => "lead_offered",
            DomainEvent::LeadDeclined { .. } => "lead_declined",
            DomainEvent::LeadSubmitted { .. } => "lead_submitted",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MessageDraft;
    use chrono::Utc;

    fn sid() -> SessionId {
        SessionId::new()
    }

    #[test]
    fn test_event_timestamp() {
        let ts = Timestamp::now();
        let event = DomainEvent::LeadDeclined {
            session_id: sid(),
            timestamp: ts,
        };
        assert_eq!(event.timestamp(), ts);
    }

    #[test]
    fn test_event_session_id() {
        let id = sid();
        let event = DomainEvent::AgentTyping {
            session_id: id,
            typing: true,
            timestamp: Timestamp::now(),
        };
        assert_eq!(event.session_id(), id);
    }

    #[test]
    fn test_event_name() {
        let event = DomainEvent::VoiceStateChanged {
            session_id: sid(),
            from: VoiceSessionState::Idle,
            to: VoiceSessionState::Connecting,
            timestamp: Timestamp::now(),
        };
        assert_eq!(event.event_name(), "voice_state_changed");
    }

    #[test]
    fn test_message_accepted_serialization() {
        let message = MessageDraft::visitor_text("Hola").accept(MessageId(1), None, Utc::now());
        let event = DomainEvent::MessageAccepted {
            session_id: sid(),
            message,
            timestamp: Timestamp::now(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("MessageAccepted"));
        assert!(json.contains("Hola"));
    }

    #[test]
    fn test_event_deserialization_round_trip() {
        let event = DomainEvent::LeadOffered {
            session_id: sid(),
            reason: LeadOfferReason::KeywordMatch,
            timestamp: Timestamp(1_700_000_000),
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: DomainEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.event_name(), "lead_offered");
        assert_eq!(back.timestamp(), Timestamp(1_700_000_000));
    }

    #[test]
    fn test_event_names_are_unique() {
        let id = sid();
        let ts = Timestamp::now();
        let msg = MessageDraft::system("x").accept(MessageId(1), None, Utc::now());
        let events = vec![
            DomainEvent::SessionStarted {
                session_id: id,
                conversation_id: ConversationId("c".into()),
                timestamp: ts,
            },
            DomainEvent::SessionDegraded {
                session_id: id,
                reason: "down".into(),
                timestamp: ts,
            },
            DomainEvent::SessionEnded {
                session_id: id,
                lead_captured: false,
                timestamp: ts,
            },
            DomainEvent::MessageAccepted {
                session_id: id,
                message: msg,
                timestamp: ts,
            },
            DomainEvent::MessagePersisted {
                session_id: id,
                message_id: MessageId(1),
                remote_id: "r".into(),
                timestamp: ts,
            },
            DomainEvent::MessagePersistFailed {
                session_id: id,
                message_id: MessageId(1),
                error: "500".into(),
                timestamp: ts,
            },
            DomainEvent::AgentTyping {
                session_id: id,
                typing: false,
                timestamp: ts,
            },
            DomainEvent::VoiceStateChanged {
                session_id: id,
                from: VoiceSessionState::Connected,
                to: VoiceSessionState::Error,
                timestamp: ts,
            },
            DomainEvent::VoiceFallback {
                session_id: id,
                reason: "error".into(),
                timestamp: ts,
            },
            DomainEvent::RoomChanged {
                session_id: id,
                room: RoomContext::new("Cocina", None).unwrap(),
                timestamp: ts,
            },
            DomainEvent::LeadOffered {
                session_id: id,
                reason: LeadOfferReason::AgentSignal,
                timestamp: ts,
            },
            DomainEvent::LeadDeclined {
                session_id: id,
                timestamp: ts,
            },
            DomainEvent::LeadSubmitted {
                session_id: id,
                tour_id: "t".into(),
                conversation_id: None,
                contact: ContactInfo::with_email("a@b.com"),
                timestamp: ts,
            },
        ];

        let mut names: Vec<&str> = events.iter().map(|e| e.event_name()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), events.len());
        assert!(events.iter().all(|e| e.session_id() == id));
    }
}
