//! Conversation session orchestration for the tour assistant widget.
//!
//! One [`SessionOrchestrator`] per visitor conversation. It owns the
//! transcript and coordinates the text channel, the realtime voice channel,
//! transcript persistence and the lead-capture prompt.

pub mod error;
pub mod lead;
pub mod orchestrator;
pub mod persistence;
pub mod response;
pub mod room;
pub mod text;
pub mod transcript;
pub mod voice;
pub mod widget;

pub use error::SessionError;
pub use lead::{validate_contact, KeywordLeadTrigger, LeadCaptureGate, LeadTriggerPolicy};
pub use orchestrator::{
    Accepted, OrchestratorSettings, SessionDeps, SessionHandle, SessionOrchestrator,
    SessionSnapshot,
};
pub use persistence::{HttpTranscriptSink, MemoryTranscriptSink, RecordedConversation, TranscriptSink};
pub use response::{CannedResponsePolicy, PolicyReply, ResponsePolicy};
pub use room::{RoomTracker, RoomUpdate};
pub use transcript::{Transcript, TranscriptEntry};
pub use voice::{
    LoopbackInjector, LoopbackVoiceProvider, VoiceChannelAdapter, VoiceEvent, VoiceEventSink,
    VoiceProvider, VoiceStateMachine,
};
pub use widget::{host_message_for, settings_from_url, HostMessage};
