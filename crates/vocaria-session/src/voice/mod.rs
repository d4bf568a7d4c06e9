//! Realtime voice channel: provider seam, adapter and state machine.

pub mod adapter;
pub mod provider;
pub mod state;

pub use adapter::VoiceChannelAdapter;
pub use provider::{
    LoopbackInjector, LoopbackVoiceProvider, VoiceEvent, VoiceEventSink, VoiceProvider,
    VoiceSignal, VoiceSignalKind,
};
pub use state::VoiceStateMachine;
