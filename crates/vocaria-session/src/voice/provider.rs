//! Realtime voice provider seam.
//!
//! A provider connects to an external speech agent and pushes normalized
//! [`VoiceEvent`]s into a [`VoiceEventSink`]. Every sink is stamped with the
//! connection generation it belongs to so that late events from a torn-down
//! connection can be told apart from live ones.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::SessionError;

/// Normalized provider event.
#[derive(Debug, Clone, PartialEq)]
pub enum VoiceEvent {
    Connected,
    Disconnected,
    UserTranscript {
        text: String,
        audio_duration_ms: Option<u64>,
        confidence_score: Option<f32>,
    },
    AgentTranscript {
        text: String,
        response_duration_ms: Option<u64>,
    },
    AgentThinking,
    AgentSpeakingStarted,
    AgentSpeakingStopped,
    Error {
        detail: String,
    },
}

impl VoiceEvent {
    pub fn name(&self) -> &'static str {
        match self {
            VoiceEvent::Connected => "connected",
            VoiceEvent::Disconnected => "disconnected",
            VoiceEvent::UserTranscript { .. } => "user_transcript",
            VoiceEvent::AgentTranscript { .. } => "agent_transcript",
            VoiceEvent::AgentThinking => "agent_thinking",
            VoiceEvent::AgentSpeakingStarted => "agent_speaking_started",
            VoiceEvent::AgentSpeakingStopped => "agent_speaking_stopped",
            VoiceEvent::Error { .. } => "error",
        }
    }
}

/// What travels from the voice side to the orchestrator loop.
#[derive(Debug)]
pub struct VoiceSignal {
    pub generation: u64,
    pub kind: VoiceSignalKind,
}

#[derive(Debug)]
pub enum VoiceSignalKind {
    Event(VoiceEvent),
    ConnectFinished(Result<(), String>),
}

/// Generation-stamped handle a provider uses to publish events.
#[derive(Debug, Clone)]
pub struct VoiceEventSink {
    tx: mpsc::UnboundedSender<VoiceSignal>,
    generation: u64,
}

impl VoiceEventSink {
    pub(crate) fn new(tx: mpsc::UnboundedSender<VoiceSignal>, generation: u64) -> Self {
        Self { tx, generation }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Publishes an event. Returns `false` once the session is gone.
    pub fn emit(&self, event: VoiceEvent) -> bool {
        self.tx
            .send(VoiceSignal {
                generation: self.generation,
                kind: VoiceSignalKind::Event(event),
            })
            .is_ok()
    }

    pub(crate) fn finish_connect(&self, result: Result<(), String>) {
        let _ = self.tx.send(VoiceSignal {
            generation: self.generation,
            kind: VoiceSignalKind::ConnectFinished(result),
        });
    }
}

/// A realtime speech agent.
#[async_trait]
pub trait VoiceProvider: Send + Sync {
    /// Opens a connection for `agent_id`. Events flow into `sink` until
    /// [`disconnect`](Self::disconnect) is called.
    async fn connect(&self, agent_id: &str, sink: VoiceEventSink) -> Result<(), SessionError>;

    /// Closes the connection. Must be safe to call in any state, including
    /// while a connect is still in flight.
    fn disconnect(&self);

    /// Forwards typed visitor text to the live agent. Returns `false` when
    /// the provider cannot take text, in which case the caller answers itself.
    fn send_user_text(&self, _text: &str) -> bool {
        false
    }

    fn name(&self) -> &str;
}

// =============================================================================
// Loopback provider
// =============================================================================

#[derive(Debug, Default)]
struct LoopbackInner {
    sink: Mutex<Option<VoiceEventSink>>,
    connect_error: Mutex<Option<String>>,
    connect_calls: AtomicUsize,
    disconnect_calls: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// In-process provider for the terminal client and tests.
///
/// Events are pushed by hand through a [`LoopbackInjector`], standing in for
/// the remote agent.
#[derive(Debug, Clone, Default)]
pub struct LoopbackVoiceProvider {
    inner: Arc<LoopbackInner>,
    connect_delay: Duration,
    echo_text: bool,
}

impl LoopbackVoiceProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulated handshake latency.
    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }

    /// Answer typed text with an agent transcript while connected.
    pub fn with_text_echo(mut self) -> Self {
        self.echo_text = true;
        self
    }

    /// Makes the next connect attempt fail with `detail`.
    pub fn fail_next_connect(&self, detail: impl Into<String>) {
        *lock(&self.inner.connect_error) = Some(detail.into());
    }

    pub fn injector(&self) -> LoopbackInjector {
        LoopbackInjector {
            inner: Arc::clone(&self.inner),
        }
    }

    pub fn connect_calls(&self) -> usize {
        self.inner.connect_calls.load(Ordering::SeqCst)
    }

    pub fn disconnect_calls(&self) -> usize {
        self.inner.disconnect_calls.load(Ordering::SeqCst)
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.inner.sink).is_some()
    }
}

#[async_trait]
impl VoiceProvider for LoopbackVoiceProvider {
    async fn connect(&self, agent_id: &str, sink: VoiceEventSink) -> Result<(), SessionError> {
        self.inner.connect_calls.fetch_add(1, Ordering::SeqCst);
        if !self.connect_delay.is_zero() {
            tokio::time::sleep(self.connect_delay).await;
        }
        if let Some(detail) = lock(&self.inner.connect_error).take() {
            return Err(SessionError::Voice(detail));
        }
        tracing::debug!(agent_id, generation = sink.generation(), "Loopback voice connected");
        sink.emit(VoiceEvent::Connected);
        *lock(&self.inner.sink) = Some(sink);
        Ok(())
    }

    fn disconnect(&self) {
        self.inner.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(sink) = lock(&self.inner.sink).take() {
            sink.emit(VoiceEvent::Disconnected);
        }
    }

    fn send_user_text(&self, text: &str) -> bool {
        if !self.echo_text {
            return false;
        }
        let guard = lock(&self.inner.sink);
        let Some(sink) = guard.as_ref() else {
            return false;
        };
        sink.emit(VoiceEvent::AgentThinking);
        sink.emit(VoiceEvent::AgentSpeakingStarted);
        sink.emit(VoiceEvent::AgentTranscript {
            text: format!("Entendido: {text}"),
            response_duration_ms: None,
        });
        sink.emit(VoiceEvent::AgentSpeakingStopped);
        true
    }

    fn name(&self) -> &str {
        "loopback"
    }
}

/// Pushes events into the loopback provider's current connection.
#[derive(Debug, Clone)]
pub struct LoopbackInjector {
    inner: Arc<LoopbackInner>,
}

impl LoopbackInjector {
    /// Returns `false` when no connection is open.
    pub fn emit(&self, event: VoiceEvent) -> bool {
        match lock(&self.inner.sink).as_ref() {
            Some(sink) => sink.emit(event),
            None => false,
        }
    }

    /// Simulates the remote side dropping: emits `event` and forgets the sink.
    pub fn drop_connection(&self, event: VoiceEvent) -> bool {
        match lock(&self.inner.sink).take() {
            Some(sink) => sink.emit(event),
            None => false,
        }
    }
}
