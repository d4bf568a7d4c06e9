//! Voice Channel Adapter.
//!
//! Owns the provider connection lifecycle. `connect` validates the agent
//! identifier synchronously and then dials in a background task; the result
//! comes back through the signal channel tagged with the connection
//! generation. `disconnect` bumps the generation so everything the old
//! connection still emits is recognisably stale.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use vocaria_core::{MessageDraft, VoiceSessionState};

use super::provider::{VoiceEvent, VoiceEventSink, VoiceProvider, VoiceSignal};
use crate::error::SessionError;

pub struct VoiceChannelAdapter {
    provider: Arc<dyn VoiceProvider>,
    agent_id: String,
    signals: mpsc::UnboundedSender<VoiceSignal>,
    generation: u64,
    connected: bool,
    connecting: bool,
}

impl VoiceChannelAdapter {
    pub fn new(
        provider: Arc<dyn VoiceProvider>,
        agent_id: impl Into<String>,
        signals: mpsc::UnboundedSender<VoiceSignal>,
    ) -> Self {
        Self {
            provider,
            agent_id: agent_id.into(),
            signals,
            generation: 0,
            connected: false,
            connecting: false,
        }
    }

    /// Generation of the most recent connection attempt.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_current(&self, generation: u64) -> bool {
        generation == self.generation
    }

    /// Starts connecting. Fails fast, before any state change, when no agent
    /// identifier is configured.
    ///
    /// Returns the generation the eventual `ConnectFinished` signal will carry.
    pub fn connect(&mut self) -> Result<u64, SessionError> {
        let agent_id = self.agent_id.trim().to_string();
        if agent_id.is_empty() {
            return Err(SessionError::MissingAgentId);
        }

        self.generation += 1;
        self.connecting = true;
        let generation = self.generation;
        let sink = VoiceEventSink::new(self.signals.clone(), generation);
        let provider = Arc::clone(&self.provider);
        info!(provider = provider.name(), generation, "Connecting voice channel");

        tokio::spawn(async move {
            let result = provider
                .connect(&agent_id, sink.clone())
                .await
                .map_err(|e| e.to_string());
            if let Err(error) = &result {
                warn!(generation, %error, "Voice connect failed");
            }
            sink.finish_connect(result);
        });
        Ok(generation)
    }

    /// Records a finished connect. Returns `false` for a stale generation.
    pub fn on_connect_finished(&mut self, generation: u64, ok: bool) -> bool {
        if !self.is_current(generation) {
            debug!(generation, current = self.generation, "Ignoring stale connect result");
            return false;
        }
        self.connecting = false;
        self.connected = ok;
        true
    }

    /// Tears the connection down, including one still being dialled.
    /// A no-op when there is nothing to tear down.
    pub fn disconnect(&mut self) {
        if !self.connected && !self.connecting {
            debug!("Voice channel already disconnected");
            return;
        }
        self.generation += 1;
        self.connected = false;
        self.connecting = false;
        self.provider.disconnect();
    }

    /// Offers typed visitor text to the live agent.
    pub fn send_user_text(&self, text: &str) -> bool {
        self.connected && self.provider.send_user_text(text)
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }
}

/// State a provider event drives the voice channel towards, if any.
///
/// `Error` and `Disconnected` are handled by the orchestrator's fallback
/// logic and map to `None` here.
pub fn target_state(event: &VoiceEvent) -> Option<VoiceSessionState> {
    match event {
        VoiceEvent::Connected => Some(VoiceSessionState::Connected),
        VoiceEvent::AgentSpeakingStarted => Some(VoiceSessionState::Speaking),
        VoiceEvent::AgentSpeakingStopped | VoiceEvent::UserTranscript { .. } => {
            Some(VoiceSessionState::Listening)
        }
        VoiceEvent::AgentTranscript { .. }
        | VoiceEvent::AgentThinking
        | VoiceEvent::Disconnected
        | VoiceEvent::Error { .. } => None,
    }
}

/// Transcript entry carried by a provider event, if any. Blank transcripts
/// are dropped.
pub fn transcript_draft(event: &VoiceEvent) -> Option<MessageDraft> {
    match event {
        VoiceEvent::UserTranscript {
            text,
            audio_duration_ms,
            confidence_score,
        } if !text.trim().is_empty() => Some(MessageDraft::visitor_voice(
            text.trim(),
            *audio_duration_ms,
            *confidence_score,
        )),
        VoiceEvent::AgentTranscript {
            text,
            response_duration_ms,
        } if !text.trim().is_empty() => {
            Some(MessageDraft::agent_voice(text.trim(), *response_duration_ms))
        }
        _ => None,
    }
}
