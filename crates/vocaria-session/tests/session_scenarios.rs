//! End-to-end behaviour of a conversation session, driven through its handle.
//!
//! Runs on a paused clock: reply delays and the voice fallback timer elapse
//! as soon as every task is idle.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use vocaria_core::contract::{
    AddMessageRequest, AddMessageResponse, EndConversationRequest, EndConversationResponse,
    StartConversationRequest, StartConversationResponse,
};
use vocaria_core::{
    Channel, ContactInfo, ConversationId, DomainEvent, RoomContext, Sender, SessionState,
    SyncState, VoiceSessionState,
};
use vocaria_session::{
    LoopbackVoiceProvider, MemoryTranscriptSink, OrchestratorSettings, SessionDeps, SessionError,
    SessionHandle, SessionOrchestrator, TranscriptSink, VoiceEvent,
};

// =============================================================================
// Helpers
// =============================================================================

fn settings(agent_id: &str) -> OrchestratorSettings {
    let mut settings = OrchestratorSettings::default();
    settings.widget.agent_id = agent_id.to_string();
    settings.lead.random_offer_probability = 0.0;
    settings.rng_seed = Some(42);
    settings
}

fn spawn_with(settings: OrchestratorSettings, deps: SessionDeps) -> SessionHandle {
    SessionOrchestrator::spawn(settings, deps)
}

/// Lets every pending reply and fallback timer fire.
async fn settle() {
    tokio::time::sleep(Duration::from_secs(10)).await;
}

async fn wait_for<F>(rx: &mut broadcast::Receiver<DomainEvent>, matches: F) -> DomainEvent
where
    F: Fn(&DomainEvent) -> bool,
{
    loop {
        let event = rx.recv().await.expect("event stream closed");
        if matches(&event) {
            return event;
        }
    }
}

fn drain(rx: &mut broadcast::Receiver<DomainEvent>) -> Vec<DomainEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Delegates to a memory sink, failing the first `failing_starts` starts.
struct FlakySink {
    inner: MemoryTranscriptSink,
    failing_starts: AtomicUsize,
    start_calls: AtomicUsize,
}

impl FlakySink {
    fn new(failing_starts: usize) -> Self {
        Self {
            inner: MemoryTranscriptSink::new(),
            failing_starts: AtomicUsize::new(failing_starts),
            start_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl TranscriptSink for FlakySink {
    async fn start_conversation(
        &self,
        request: &StartConversationRequest,
    ) -> Result<StartConversationResponse, SessionError> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failing_starts.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_starts.store(remaining - 1, Ordering::SeqCst);
            return Err(SessionError::Persistence("backend unavailable".to_string()));
        }
        self.inner.start_conversation(request).await
    }

    async fn add_message(
        &self,
        conversation_id: &ConversationId,
        request: &AddMessageRequest,
    ) -> Result<AddMessageResponse, SessionError> {
        self.inner.add_message(conversation_id, request).await
    }

    async fn end_conversation(
        &self,
        conversation_id: &ConversationId,
        request: &EndConversationRequest,
    ) -> Result<EndConversationResponse, SessionError> {
        self.inner.end_conversation(conversation_id, request).await
    }
}

// =============================================================================
// Text conversation and lead capture
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_lead_capture_ends_session_once() {
    let sink = MemoryTranscriptSink::new();
    let deps = SessionDeps::new(Arc::new(LoopbackVoiceProvider::new()))
        .with_sink(Arc::new(sink.clone()));
    let handle = spawn_with(settings("agent-1"), deps);
    let mut events = handle.subscribe();

    handle.open().await.unwrap();
    handle.send_text("Hola").await.unwrap();
    let snapshot = handle.snapshot().await.unwrap();
    assert_eq!(snapshot.entries.len(), 2);
    assert_eq!(snapshot.entries[0].message.sender, Sender::Agent);
    assert_eq!(snapshot.entries[1].message.content, "Hola");
    assert!(snapshot.agent_typing);

    handle.send_text("¿Cuánto cuesta?").await.unwrap();
    wait_for(&mut events, |e| matches!(e, DomainEvent::LeadOffered { .. })).await;
    assert!(handle.snapshot().await.unwrap().session.lead.offered());

    handle
        .submit_lead(ContactInfo::with_email("a@b.com"))
        .await
        .unwrap();
    let snapshot = handle.snapshot().await.unwrap();
    assert_eq!(snapshot.session.state, SessionState::Ended);
    assert!(snapshot.session.lead_captured());

    handle.teardown().await.unwrap();
    settle().await;

    let ids = sink.conversation_ids();
    assert_eq!(ids.len(), 1);
    let recorded = sink.conversation(&ids[0]).unwrap();
    assert_eq!(recorded.end_calls, 1);
    let end = recorded.end.unwrap();
    assert!(end.lead_captured);
    assert_eq!(end.contact_email.as_deref(), Some("a@b.com"));
    assert_eq!(recorded.messages[1].content, "Hola");
}

#[tokio::test(start_paused = true)]
async fn test_replies_arrive_in_question_order() {
    let handle = spawn_with(
        settings("agent-1"),
        SessionDeps::new(Arc::new(LoopbackVoiceProvider::new())),
    );
    handle.send_text("¿Qué precio tiene?").await.unwrap();
    handle.send_text("¿Dónde está?").await.unwrap();
    handle.send_text("¿Cuántos metros?").await.unwrap();
    settle().await;

    let snapshot = handle.snapshot().await.unwrap();
    let agents: Vec<_> = snapshot
        .entries
        .iter()
        .skip(1)
        .filter(|e| e.message.sender == Sender::Agent)
        .map(|e| e.message.content.clone())
        .collect();
    assert_eq!(agents.len(), 3);
    assert!(agents[0].contains("precio"));
    assert!(agents[1].contains("zona"));
    assert!(agents[2].contains("amplia"));
    assert!(!snapshot.agent_typing);
}

#[tokio::test(start_paused = true)]
async fn test_first_message_activates_with_greeting() {
    let handle = spawn_with(
        settings("agent-1"),
        SessionDeps::new(Arc::new(LoopbackVoiceProvider::new())),
    );
    assert_eq!(
        handle.snapshot().await.unwrap().session.state,
        SessionState::NotStarted
    );

    let accepted = handle.send_text("  hola  ").await.unwrap();
    assert_eq!(accepted.sync, SyncState::LocalOnly);
    let snapshot = handle.snapshot().await.unwrap();
    assert_eq!(snapshot.session.state, SessionState::Active);
    assert_eq!(snapshot.entries[1].message.content, "hola");
    assert_eq!(accepted.message_id, snapshot.entries[1].message.id);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_text_is_rejected() {
    let mut config = settings("agent-1");
    config.session.max_message_length = 10;
    let handle = spawn_with(
        config,
        SessionDeps::new(Arc::new(LoopbackVoiceProvider::new())),
    );

    assert!(matches!(
        handle.send_text("   ").await,
        Err(SessionError::EmptyMessage)
    ));
    assert!(matches!(
        handle.send_text("demasiado largo para caber").await,
        Err(SessionError::MessageTooLong(10))
    ));
    let snapshot = handle.snapshot().await.unwrap();
    assert!(snapshot.entries.is_empty());
    assert_eq!(snapshot.session.state, SessionState::NotStarted);
}

#[tokio::test(start_paused = true)]
async fn test_lead_offered_at_most_once() {
    let mut config = settings("agent-1");
    config.lead.random_offer_probability = 0.2;
    config.lead.min_visitor_messages_for_random = 1;
    let handle = spawn_with(
        config,
        SessionDeps::new(Arc::new(LoopbackVoiceProvider::new())),
    );
    let mut events = handle.subscribe();

    for text in ["precio", "quiero una visita", "me interesa", "email", "precio"] {
        handle.send_text(text).await.unwrap();
        settle().await;
    }

    let offers = drain(&mut events)
        .into_iter()
        .filter(|e| matches!(e, DomainEvent::LeadOffered { .. }))
        .count();
    assert_eq!(offers, 1);
}

#[tokio::test(start_paused = true)]
async fn test_lead_actions_require_offer() {
    let handle = spawn_with(
        settings("agent-1"),
        SessionDeps::new(Arc::new(LoopbackVoiceProvider::new())),
    );
    handle.open().await.unwrap();
    assert!(matches!(
        handle.decline_lead().await,
        Err(SessionError::LeadNotOffered)
    ));
    assert!(matches!(
        handle.submit_lead(ContactInfo::with_email("a@b.com")).await,
        Err(SessionError::LeadNotOffered)
    ));

    handle.send_text("me interesa comprar").await.unwrap();
    settle().await;
    assert!(matches!(
        handle.submit_lead(ContactInfo::with_email("no-es-email")).await,
        Err(SessionError::InvalidContact(_))
    ));
    handle.decline_lead().await.unwrap();

    // Declining keeps the offer; details can still be sent afterwards.
    handle
        .submit_lead(ContactInfo::with_phone("600 123 456"))
        .await
        .unwrap();
    assert!(matches!(
        handle.submit_lead(ContactInfo::with_phone("600 123 456")).await,
        Err(SessionError::LeadAlreadySubmitted)
    ));
}

// =============================================================================
// Persistence
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_conversation_started_once() {
    let sink = Arc::new(FlakySink::new(0));
    let deps = SessionDeps::new(Arc::new(LoopbackVoiceProvider::new())).with_sink(sink.clone());
    let handle = spawn_with(settings("agent-1"), deps);

    handle.open().await.unwrap();
    handle.open().await.unwrap();
    handle.send_text("Hola").await.unwrap();
    handle.hide().unwrap();
    handle.open().await.unwrap();
    handle.send_text("¿Tiene terraza?").await.unwrap();
    settle().await;

    assert_eq!(sink.start_calls.load(Ordering::SeqCst), 1);
    let ids = sink.inner.conversation_ids();
    assert_eq!(ids.len(), 1);
    let snapshot = handle.snapshot().await.unwrap();
    assert_eq!(snapshot.session.conversation_id.as_ref(), Some(&ids[0]));
    assert!(snapshot
        .entries
        .iter()
        .all(|e| matches!(e.sync, SyncState::Persisted { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_degraded_session_retries_on_next_message() {
    let sink = Arc::new(FlakySink::new(1));
    let deps = SessionDeps::new(Arc::new(LoopbackVoiceProvider::new())).with_sink(sink.clone());
    let handle = spawn_with(settings("agent-1"), deps);
    let mut events = handle.subscribe();

    handle.open().await.unwrap();
    wait_for(&mut events, |e| matches!(e, DomainEvent::SessionDegraded { .. })).await;
    settle().await;
    let greeting = handle.snapshot().await.unwrap().entries[0].clone();
    assert_eq!(greeting.sync, SyncState::LocalOnly);

    let accepted = handle.send_text("Hola").await.unwrap();
    assert_eq!(accepted.sync, SyncState::Pending);
    wait_for(&mut events, |e| matches!(e, DomainEvent::SessionStarted { .. })).await;
    settle().await;

    assert_eq!(sink.start_calls.load(Ordering::SeqCst), 2);
    let ids = sink.inner.conversation_ids();
    let recorded = sink.inner.conversation(&ids[0]).unwrap();
    assert_eq!(recorded.messages[0].content, "Hola");
    let snapshot = handle.snapshot().await.unwrap();
    assert!(snapshot.session.conversation_id.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_teardown_ends_conversation_and_closes_handle() {
    let sink = MemoryTranscriptSink::new();
    let deps = SessionDeps::new(Arc::new(LoopbackVoiceProvider::new()))
        .with_sink(Arc::new(sink.clone()));
    let handle = spawn_with(settings("agent-1"), deps);

    handle.open().await.unwrap();
    settle().await;
    handle.teardown().await.unwrap();
    settle().await;

    let ids = sink.conversation_ids();
    let end = sink.conversation(&ids[0]).unwrap().end.unwrap();
    assert!(!end.lead_captured);
    assert!(matches!(
        handle.send_text("hola").await,
        Err(SessionError::OrchestratorClosed)
    ));
    assert!(handle.is_closed());
}

// =============================================================================
// Voice channel
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_voice_without_agent_reports_inline() {
    let provider = LoopbackVoiceProvider::new();
    let handle = spawn_with(settings("  "), SessionDeps::new(Arc::new(provider.clone())));
    handle.open().await.unwrap();

    let result = handle.start_voice().await;
    assert!(matches!(result, Err(SessionError::MissingAgentId)));
    assert_eq!(provider.connect_calls(), 0);

    let snapshot = handle.snapshot().await.unwrap();
    assert_eq!(snapshot.voice_state, VoiceSessionState::Idle);
    assert!(!snapshot.voice_mode);
    let last = &snapshot.entries.last().unwrap().message;
    assert_eq!(last.sender, Sender::System);

    handle.send_text("Hola").await.unwrap();
    settle().await;
    let snapshot = handle.snapshot().await.unwrap();
    assert_eq!(snapshot.entries.last().unwrap().message.sender, Sender::Agent);
}

#[tokio::test(start_paused = true)]
async fn test_voice_error_falls_back_to_text_once() {
    let provider = LoopbackVoiceProvider::new();
    let injector = provider.injector();
    let handle = spawn_with(settings("agent-1"), SessionDeps::new(Arc::new(provider.clone())));
    let mut events = handle.subscribe();
    handle.open().await.unwrap();

    handle.start_voice().await.unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(handle.snapshot().await.unwrap().voice_state.is_live());

    assert!(injector.emit(VoiceEvent::Error {
        detail: "socket closed".to_string(),
    }));
    injector.drop_connection(VoiceEvent::Disconnected);
    wait_for(&mut events, |e| {
        matches!(
            e,
            DomainEvent::VoiceStateChanged {
                to: VoiceSessionState::Error,
                ..
            }
        )
    })
    .await;
    assert!(handle.snapshot().await.unwrap().voice_mode);

    settle().await;
    let snapshot = handle.snapshot().await.unwrap();
    assert!(!snapshot.voice_mode);
    assert_eq!(snapshot.voice_state, VoiceSessionState::Idle);
    let notices = snapshot
        .entries
        .iter()
        .filter(|e| e.message.sender == Sender::System)
        .count();
    assert_eq!(notices, 1);
    let fallbacks = drain(&mut events)
        .into_iter()
        .filter(|e| matches!(e, DomainEvent::VoiceFallback { .. }))
        .count();
    assert_eq!(fallbacks, 1);

    handle.send_text("¿Sigues ahí?").await.unwrap();
    settle().await;
    let snapshot = handle.snapshot().await.unwrap();
    assert_eq!(snapshot.entries.last().unwrap().message.sender, Sender::Agent);
}

#[tokio::test(start_paused = true)]
async fn test_failed_connect_rejects_and_falls_back() {
    let provider = LoopbackVoiceProvider::new();
    provider.fail_next_connect("agent offline");
    let handle = spawn_with(settings("agent-1"), SessionDeps::new(Arc::new(provider.clone())));
    handle.open().await.unwrap();

    assert!(matches!(
        handle.start_voice().await,
        Err(SessionError::Voice(_))
    ));
    assert_eq!(
        handle.snapshot().await.unwrap().voice_state,
        VoiceSessionState::Error
    );

    settle().await;
    let snapshot = handle.snapshot().await.unwrap();
    assert_eq!(snapshot.voice_state, VoiceSessionState::Idle);
    assert!(!snapshot.voice_mode);

    // An explicit retry from idle connects normally.
    handle.start_voice().await.unwrap();
    assert_eq!(provider.connect_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_explicit_stop_goes_idle_quietly() {
    let provider = LoopbackVoiceProvider::new();
    let handle = spawn_with(settings("agent-1"), SessionDeps::new(Arc::new(provider.clone())));
    handle.open().await.unwrap();

    handle.start_voice().await.unwrap();
    assert!(matches!(
        handle.start_voice().await,
        Err(SessionError::VoiceAlreadyActive)
    ));
    handle.stop_voice().await.unwrap();
    settle().await;

    let snapshot = handle.snapshot().await.unwrap();
    assert_eq!(snapshot.voice_state, VoiceSessionState::Idle);
    assert!(!snapshot.voice_mode);
    assert!(snapshot
        .entries
        .iter()
        .all(|e| e.message.sender != Sender::System));
    assert_eq!(provider.disconnect_calls(), 1);
    assert!(!provider.is_connected());

    handle.stop_voice().await.unwrap();
    assert_eq!(provider.disconnect_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_voice_transcripts_join_the_transcript() {
    let provider = LoopbackVoiceProvider::new();
    let injector = provider.injector();
    let handle = spawn_with(settings("agent-1"), SessionDeps::new(Arc::new(provider)));
    let mut events = handle.subscribe();
    handle.open().await.unwrap();
    handle.start_voice().await.unwrap();

    handle.send_text("texto uno").await.unwrap();
    injector.emit(VoiceEvent::UserTranscript {
        text: "quiero agendar una visita".to_string(),
        audio_duration_ms: Some(1800),
        confidence_score: Some(0.93),
    });
    injector.emit(VoiceEvent::AgentTranscript {
        text: "Claro, te ayudo".to_string(),
        response_duration_ms: Some(900),
    });
    wait_for(&mut events, |e| matches!(e, DomainEvent::LeadOffered { .. })).await;
    handle.send_text("texto dos").await.unwrap();
    settle().await;

    let accepted: Vec<_> = drain(&mut events)
        .into_iter()
        .filter_map(|e| match e {
            DomainEvent::MessageAccepted { message, .. } => Some(message.id),
            _ => None,
        })
        .collect();
    let snapshot = handle.snapshot().await.unwrap();
    let ids: Vec<_> = snapshot.entries.iter().map(|e| e.message.id).collect();
    assert!(ids.windows(2).all(|w| w[0] < w[1]));
    assert!(ids.ends_with(&accepted));

    let voice = snapshot
        .entries
        .iter()
        .find(|e| e.message.content == "quiero agendar una visita")
        .unwrap();
    assert_eq!(voice.message.channel, Channel::Voice);
    assert_eq!(voice.message.audio_duration_ms, Some(1800));
}

#[tokio::test(start_paused = true)]
async fn test_typed_and_spoken_turns_keep_call_order() {
    let provider = LoopbackVoiceProvider::new();
    let injector = provider.injector();
    let handle = spawn_with(settings("agent-1"), SessionDeps::new(Arc::new(provider)));
    let mut events = handle.subscribe();
    handle.open().await.unwrap();
    handle.start_voice().await.unwrap();

    let mut expected = Vec::new();
    for i in 0..5 {
        let typed = format!("t{i}");
        handle.send_text(typed.clone()).await.unwrap();
        expected.push(typed);

        let spoken = format!("v{i}");
        assert!(injector.emit(VoiceEvent::UserTranscript {
            text: spoken.clone(),
            audio_duration_ms: Some(500),
            confidence_score: Some(0.9),
        }));
        wait_for(&mut events, |e| {
            matches!(e, DomainEvent::MessageAccepted { message, .. } if message.content == spoken)
        })
        .await;
        expected.push(spoken);
    }
    settle().await;

    let snapshot = handle.snapshot().await.unwrap();
    let visitor: Vec<_> = snapshot
        .entries
        .iter()
        .filter(|e| e.message.sender == Sender::Visitor)
        .map(|e| e.message.content.clone())
        .collect();
    assert_eq!(visitor, expected);

    let channels: Vec<_> = snapshot
        .entries
        .iter()
        .filter(|e| e.message.sender == Sender::Visitor)
        .map(|e| e.message.channel)
        .collect();
    assert!(channels
        .chunks(2)
        .all(|pair| pair == [Channel::Text, Channel::Voice]));
}

#[tokio::test(start_paused = true)]
async fn test_live_agent_answers_typed_text() {
    let provider = LoopbackVoiceProvider::new().with_text_echo();
    let handle = spawn_with(settings("agent-1"), SessionDeps::new(Arc::new(provider)));
    handle.open().await.unwrap();
    handle.start_voice().await.unwrap();

    handle.send_text("hola").await.unwrap();
    settle().await;

    let snapshot = handle.snapshot().await.unwrap();
    let contents: Vec<_> = snapshot
        .entries
        .iter()
        .map(|e| e.message.content.as_str())
        .collect();
    assert_eq!(contents.len(), 3);
    assert_eq!(contents[1], "hola");
    assert_eq!(contents[2], "Entendido: hola");
    assert_eq!(snapshot.entries[2].message.channel, Channel::Voice);
    assert_eq!(snapshot.voice_state, VoiceSessionState::Listening);
}

// =============================================================================
// Room context
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_room_announcements_are_throttled() {
    let handle = spawn_with(
        settings("agent-1"),
        SessionDeps::new(Arc::new(LoopbackVoiceProvider::new())),
    );
    handle.open().await.unwrap();

    let salon = RoomContext::new("Salón", Some(30.0)).unwrap();
    handle.room_changed(salon.clone()).unwrap();
    handle.room_changed(salon).unwrap();
    handle
        .room_changed(RoomContext::new("Cocina", None).unwrap())
        .unwrap();
    let snapshot = handle.snapshot().await.unwrap();
    let notices: Vec<_> = snapshot
        .entries
        .iter()
        .filter(|e| e.message.sender == Sender::System)
        .map(|e| e.message.content.clone())
        .collect();
    assert_eq!(notices, vec!["Ahora estás en: Salón (30 m²)".to_string()]);
    assert_eq!(snapshot.room.as_ref().map(|r| r.name.as_str()), Some("Cocina"));

    tokio::time::sleep(Duration::from_secs(13)).await;
    handle
        .room_changed(RoomContext::new("Terraza", None).unwrap())
        .unwrap();
    handle.send_text("¿Qué tal?").await.unwrap();
    let snapshot = handle.snapshot().await.unwrap();
    let n = snapshot.entries.len();
    assert_eq!(snapshot.entries[n - 2].message.sender, Sender::System);
    assert_eq!(
        snapshot.entries[n - 1].message.room_context.as_ref().map(|r| r.name.as_str()),
        Some("Terraza")
    );
}

#[tokio::test(start_paused = true)]
async fn test_hidden_panel_tracks_room_silently() {
    let handle = spawn_with(
        settings("agent-1"),
        SessionDeps::new(Arc::new(LoopbackVoiceProvider::new())),
    );
    handle.open().await.unwrap();
    handle.hide().unwrap();
    handle
        .room_changed(RoomContext::new("Baño", Some(6.5)).unwrap())
        .unwrap();

    let snapshot = handle.snapshot().await.unwrap();
    assert!(!snapshot.panel_open);
    assert_eq!(snapshot.entries.len(), 1);
    assert_eq!(snapshot.room.unwrap().name, "Baño");
}

#[tokio::test(start_paused = true)]
async fn test_blank_room_keeps_previous_room() {
    let handle = spawn_with(
        settings("agent-1"),
        SessionDeps::new(Arc::new(LoopbackVoiceProvider::new())),
    );
    handle.open().await.unwrap();
    handle
        .room_changed(RoomContext::new("Cocina", None).unwrap())
        .unwrap();
    handle
        .room_changed(RoomContext {
            name: "   ".to_string(),
            area: None,
        })
        .unwrap();
    handle.send_text("hola").await.unwrap();

    let snapshot = handle.snapshot().await.unwrap();
    assert_eq!(snapshot.room.as_ref().map(|r| r.name.as_str()), Some("Cocina"));
    let visitor = snapshot
        .entries
        .iter()
        .find(|e| e.message.sender == Sender::Visitor)
        .unwrap();
    assert_eq!(
        visitor.message.room_context.as_ref().map(|r| r.name.as_str()),
        Some("Cocina")
    );
}
