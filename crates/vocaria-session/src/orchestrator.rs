//! Conversation Session Orchestrator.
//!
//! A single-writer actor owning the session, the transcript, the voice state
//! and the lead gate. Every input (handle commands, voice provider signals,
//! persistence outcomes, timers) is funnelled into one task and handled
//! synchronously, so messages are appended strictly one after another in
//! the order the actor sees them. The only suspension points live outside
//! the actor: provider connects and backend calls.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use vocaria_core::config::{LeadConfig, SessionConfig, VoiceConfig, WidgetSettings};
use vocaria_core::contract::{EndConversationRequest, StartConversationRequest};
use vocaria_core::{
    ContactInfo, DomainEvent, MessageDraft, MessageId, RoomContext, Sender, Session,
    SessionId, SessionState, SyncState, Timestamp, VocariaConfig, VoiceSessionState,
};

use crate::error::SessionError;
use crate::lead::{validate_contact, LeadCaptureGate, LeadTriggerPolicy};
use crate::persistence::{
    PersistJob, PersistOutcome, PersistenceQueue, PersistenceWorker, TranscriptSink,
};
use crate::response::{CannedResponsePolicy, PolicyReply, ResponsePolicy};
use crate::room::{self, RoomTracker};
use crate::transcript::{Transcript, TranscriptEntry};
use crate::voice::adapter::{self, VoiceChannelAdapter};
use crate::voice::{VoiceEvent, VoiceProvider, VoiceSignal, VoiceSignalKind, VoiceStateMachine};

/// Capacity of the domain event broadcast.
const EVENT_CAPACITY: usize = 256;

const MISSING_AGENT_NOTICE: &str =
    "El modo voz no está disponible porque no hay un agente configurado. Puedes seguir escribiendo.";
const VOICE_FALLBACK_NOTICE: &str =
    "Se perdió la conexión de voz. Seguimos por texto: escribe tu mensaje cuando quieras.";

// =============================================================================
// Settings and dependencies
// =============================================================================

/// Configuration slice the orchestrator needs.
#[derive(Debug, Clone, Default)]
pub struct OrchestratorSettings {
    pub widget: WidgetSettings,
    pub voice: VoiceConfig,
    pub session: SessionConfig,
    pub lead: LeadConfig,
    /// Fixed RNG seed for reply delays and the random lead fallback.
    pub rng_seed: Option<u64>,
}

impl OrchestratorSettings {
    pub fn from_config(config: &VocariaConfig) -> Self {
        Self {
            widget: config.widget.clone(),
            voice: config.voice.clone(),
            session: config.session.clone(),
            lead: config.lead.clone(),
            rng_seed: None,
        }
    }
}

/// Collaborators plugged into a session.
pub struct SessionDeps {
    pub voice: Arc<dyn VoiceProvider>,
    /// `None` keeps the transcript local-only.
    pub sink: Option<Arc<dyn TranscriptSink>>,
    pub response: Arc<dyn ResponsePolicy>,
    /// Overrides the keyword trigger built from [`LeadConfig`].
    pub lead_trigger: Option<Box<dyn LeadTriggerPolicy>>,
}

impl SessionDeps {
    pub fn new(voice: Arc<dyn VoiceProvider>) -> Self {
        Self {
            voice,
            sink: None,
            response: Arc::new(CannedResponsePolicy::new()),
            lead_trigger: None,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn TranscriptSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_response_policy(mut self, response: Arc<dyn ResponsePolicy>) -> Self {
        self.response = response;
        self
    }

    pub fn with_lead_trigger(mut self, trigger: Box<dyn LeadTriggerPolicy>) -> Self {
        self.lead_trigger = Some(trigger);
        self
    }
}

// =============================================================================
// Public values
// =============================================================================

/// A message accepted into the local transcript.
///
/// `sync` is `Pending` when a backend write was queued and `LocalOnly` when
/// the message will never leave this session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accepted {
    pub message_id: MessageId,
    pub sync: SyncState,
}

/// Read-only view of a session for rendering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session: Session,
    pub entries: Vec<TranscriptEntry>,
    pub voice_state: VoiceSessionState,
    pub voice_mode: bool,
    pub room: Option<RoomContext>,
    pub panel_open: bool,
    pub agent_typing: bool,
}

// =============================================================================
// Messages into the actor
// =============================================================================

type Reply<T> = oneshot::Sender<T>;

enum Command {
    Open(Reply<()>),
    Hide,
    SendText(String, Reply<Result<Accepted, SessionError>>),
    RoomChanged(RoomContext),
    StartVoice(Reply<Result<(), SessionError>>),
    StopVoice(Reply<()>),
    SubmitLead(ContactInfo, Reply<Result<(), SessionError>>),
    DeclineLead(Reply<Result<(), SessionError>>),
    Snapshot(Reply<SessionSnapshot>),
    Teardown(Reply<()>),
}

enum Timer {
    ReplyDue(PolicyReply),
    FallbackDue(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

// =============================================================================
// SessionHandle
// =============================================================================

/// Cloneable front door to a running session.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<Command>,
    events: broadcast::Sender<DomainEvent>,
    session_id: SessionId,
}

impl SessionHandle {
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Receives every domain event published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.events.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    /// The visitor opened the conversation panel.
    pub async fn open(&self) -> Result<(), SessionError> {
        self.request(Command::Open).await
    }

    /// The visitor collapsed the panel. The session stays alive.
    pub fn hide(&self) -> Result<(), SessionError> {
        self.send(Command::Hide)
    }

    pub async fn send_text(&self, content: impl Into<String>) -> Result<Accepted, SessionError> {
        let content = content.into();
        self.request(|reply| Command::SendText(content, reply))
            .await?
    }

    /// Tour-viewer callback. Best-effort, no reply.
    pub fn room_changed(&self, room: RoomContext) -> Result<(), SessionError> {
        self.send(Command::RoomChanged(room))
    }

    /// Switches voice mode on. Resolves once the provider connected or failed;
    /// rejects immediately when no agent is configured.
    pub async fn start_voice(&self) -> Result<(), SessionError> {
        self.request(Command::StartVoice).await?
    }

    pub async fn stop_voice(&self) -> Result<(), SessionError> {
        self.request(Command::StopVoice).await
    }

    pub async fn submit_lead(&self, contact: ContactInfo) -> Result<(), SessionError> {
        self.request(|reply| Command::SubmitLead(contact, reply))
            .await?
    }

    pub async fn decline_lead(&self) -> Result<(), SessionError> {
        self.request(Command::DeclineLead).await?
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot, SessionError> {
        self.request(Command::Snapshot).await
    }

    /// Ends the session and stops the actor. Backend cleanup continues in the
    /// background; this does not wait for it.
    pub async fn teardown(&self) -> Result<(), SessionError> {
        self.request(Command::Teardown).await
    }

    fn send(&self, command: Command) -> Result<(), SessionError> {
        self.commands
            .send(command)
            .map_err(|_| SessionError::OrchestratorClosed)
    }

    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> Result<T, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.send(make(tx))?;
        rx.await.map_err(|_| SessionError::OrchestratorClosed)
    }
}

// =============================================================================
// SessionOrchestrator
// =============================================================================

pub struct SessionOrchestrator {
    settings: OrchestratorSettings,
    session: Session,
    transcript: Transcript,
    room: RoomTracker,
    voice_state: VoiceStateMachine,
    voice: VoiceChannelAdapter,
    pending_voice_reply: Option<(u64, Reply<Result<(), SessionError>>)>,
    fallback_token: u64,
    fallback_pending: Option<String>,
    voice_thinking: bool,
    lead_gate: LeadCaptureGate,
    response: Arc<dyn ResponsePolicy>,
    persistence: Option<PersistenceQueue>,
    start_in_flight: bool,
    greeted: bool,
    panel_open: bool,
    pending_replies: usize,
    last_reply_due: Option<Instant>,
    rng: StdRng,
    events: broadcast::Sender<DomainEvent>,
    timers: mpsc::UnboundedSender<Timer>,
}

struct Inboxes {
    commands: mpsc::UnboundedReceiver<Command>,
    voice: mpsc::UnboundedReceiver<VoiceSignal>,
    persistence: mpsc::UnboundedReceiver<PersistOutcome>,
    timers: mpsc::UnboundedReceiver<Timer>,
}

impl SessionOrchestrator {
    /// Spawns the session actor and returns its handle. Must be called
    /// inside a Tokio runtime.
    pub fn spawn(settings: OrchestratorSettings, deps: SessionDeps) -> SessionHandle {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (voice_tx, voice_rx) = mpsc::unbounded_channel();
        let (persist_tx, persist_rx) = mpsc::unbounded_channel();
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let persistence = deps
            .sink
            .map(|sink| PersistenceWorker::spawn(sink, persist_tx).0);

        let lead_gate = match deps.lead_trigger {
            Some(trigger) => LeadCaptureGate::new(
                trigger,
                settings.lead.offer_probability(),
                settings.lead.min_visitor_messages_for_random,
            ),
            None => LeadCaptureGate::from_config(&settings.lead),
        };
        let rng = match settings.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        let session = Session::new(settings.widget.tour_id.clone());
        let session_id = session.session_id;
        let orchestrator = Self {
            room: RoomTracker::new(
                settings.session.room_announcements,
                settings.session.room_announcement_interval(),
            ),
            voice: VoiceChannelAdapter::new(deps.voice, settings.widget.agent_id.clone(), voice_tx),
            settings,
            session,
            transcript: Transcript::new(),
            voice_state: VoiceStateMachine::new(),
            pending_voice_reply: None,
            fallback_token: 0,
            fallback_pending: None,
            voice_thinking: false,
            lead_gate,
            response: deps.response,
            persistence,
            start_in_flight: false,
            greeted: false,
            panel_open: false,
            pending_replies: 0,
            last_reply_due: None,
            rng,
            events: events.clone(),
            timers: timer_tx,
        };
        info!(%session_id, "Conversation session created");

        let inboxes = Inboxes {
            commands: command_rx,
            voice: voice_rx,
            persistence: persist_rx,
            timers: timer_rx,
        };
        tokio::spawn(orchestrator.run(inboxes));

        SessionHandle {
            commands: command_tx,
            events,
            session_id,
        }
    }

    async fn run(mut self, mut inboxes: Inboxes) {
        loop {
            tokio::select! {
                command = inboxes.commands.recv() => {
                    let flow = match command {
                        Some(command) => self.handle_command(command),
                        None => {
                            self.teardown();
                            Flow::Stop
                        }
                    };
                    if flow == Flow::Stop {
                        break;
                    }
                }
                Some(signal) = inboxes.voice.recv() => self.handle_voice_signal(signal),
                Some(outcome) = inboxes.persistence.recv() => self.handle_persist_outcome(outcome),
                Some(timer) = inboxes.timers.recv() => self.handle_timer(timer),
            }
        }
        debug!(session_id = %self.session.session_id, "Session actor stopped");
    }

    fn handle_command(&mut self, command: Command) -> Flow {
        match command {
            Command::Open(reply) => {
                self.panel_open = true;
                self.ensure_started();
                let _ = reply.send(());
            }
            Command::Hide => self.panel_open = false,
            Command::SendText(content, reply) => {
                let _ = reply.send(self.send_text(content));
            }
            Command::RoomChanged(room) => self.room_changed(room),
            Command::StartVoice(reply) => self.start_voice(reply),
            Command::StopVoice(reply) => {
                self.stop_voice();
                let _ = reply.send(());
            }
            Command::SubmitLead(contact, reply) => {
                let _ = reply.send(self.submit_lead(contact));
            }
            Command::DeclineLead(reply) => {
                let _ = reply.send(self.decline_lead());
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
            Command::Teardown(reply) => {
                self.teardown();
                let _ = reply.send(());
                return Flow::Stop;
            }
        }
        Flow::Continue
    }

    // =========================================================================
    // Session lifecycle
    // =========================================================================

    /// `not_started -> active` on the first qualifying event; afterwards
    /// retries a failed start, once per qualifying event.
    fn ensure_started(&mut self) {
        match self.session.state {
            SessionState::NotStarted => {
                self.session.activate(Utc::now());
                info!(
                    session_id = %self.session.session_id,
                    tour_id = %self.session.tour_id,
                    "Session active"
                );
                self.request_start();
                if !self.greeted {
                    self.greeted = true;
                    let greeting = self.settings.widget.greeting.trim().to_string();
                    if !greeting.is_empty() {
                        self.accept(MessageDraft::agent_text(greeting));
                    }
                }
            }
            SessionState::Active => {
                if self.session.conversation_id.is_none() && !self.start_in_flight {
                    debug!(session_id = %self.session.session_id, "Retrying conversation start");
                    self.request_start();
                }
            }
            SessionState::Ended => {}
        }
    }

    fn request_start(&mut self) {
        let Some(queue) = &self.persistence else {
            return;
        };
        let request = StartConversationRequest {
            tour_id: self.session.tour_id.clone(),
            visitor_id: self.session.visitor_id,
            room_context: self.room.current().cloned(),
        };
        self.start_in_flight = queue.push(PersistJob::Start(request));
    }

    fn end_session(&mut self) {
        if !self.session.end(Utc::now()) {
            return;
        }
        let lead_captured = self.session.lead_captured();
        if let Some(queue) = &self.persistence {
            let contact = self.session.contact_info.clone().unwrap_or_default();
            queue.push(PersistJob::End(EndConversationRequest {
                lead_captured,
                contact_email: contact.email,
                contact_phone: contact.phone,
            }));
        }
        info!(session_id = %self.session.session_id, lead_captured, "Session ended");
        self.emit(DomainEvent::SessionEnded {
            session_id: self.session.session_id,
            lead_captured,
            timestamp: Timestamp::now(),
        });
    }

    fn teardown(&mut self) {
        if self.voice_state.voice_mode() || self.voice_state.current() != VoiceSessionState::Idle {
            self.stop_voice();
        }
        self.end_session();
        // Dropping the queue lets the worker drain and exit on its own.
        self.persistence = None;
    }

    // =========================================================================
    // Transcript acceptance
    // =========================================================================

    /// The single acceptance routine. Appends, queues the backend write and
    /// publishes the message.
    fn accept(&mut self, draft: MessageDraft) -> Accepted {
        let remote_possible = self.session.is_active()
            && (self.session.conversation_id.is_some() || self.start_in_flight);
        let queue = self.persistence.as_ref().filter(|_| remote_possible);
        let initial = if queue.is_some() {
            SyncState::Pending
        } else {
            SyncState::LocalOnly
        };

        let room = self.room.current().cloned();
        let message = self
            .transcript
            .append(draft, room, Utc::now(), initial.clone())
            .clone();

        let mut sync = initial;
        if let Some(queue) = queue {
            let queued = queue.push(PersistJob::Add {
                message_id: message.id,
                request: (&message).into(),
            });
            if !queued {
                sync = SyncState::LocalOnly;
                self.transcript.mark_sync(message.id, sync.clone());
            }
        }

        debug!(
            session_id = %self.session.session_id,
            message_id = %message.id,
            sender = ?message.sender,
            channel = ?message.channel,
            "Message accepted"
        );
        let message_id = message.id;
        self.emit(DomainEvent::MessageAccepted {
            session_id: self.session.session_id,
            message,
            timestamp: Timestamp::now(),
        });
        Accepted { message_id, sync }
    }

    fn send_text(&mut self, content: String) -> Result<Accepted, SessionError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(SessionError::EmptyMessage);
        }
        let max = self.settings.session.max_message_length;
        if content.chars().count() > max {
            return Err(SessionError::MessageTooLong(max));
        }

        self.ensure_started();
        let accepted = self.accept(MessageDraft::visitor_text(content));

        if self.voice_state.current().is_live() && self.voice.send_user_text(content) {
            debug!(provider = self.voice.provider_name(), "Text forwarded to live agent");
            self.evaluate_lead(false);
        } else {
            self.schedule_reply();
        }
        Ok(accepted)
    }

    fn schedule_reply(&mut self) {
        let reply = self
            .response
            .respond(self.transcript.messages(), self.room.current());

        let (lo, hi) = self.settings.session.reply_delay_bounds();
        let delay = if hi > lo {
            self.rng.random_range(lo..=hi)
        } else {
            lo
        };
        // Replies are delivered in the order their questions were accepted.
        let mut due = Instant::now() + delay;
        if let Some(last) = self.last_reply_due {
            if due <= last {
                due = last + Duration::from_millis(1);
            }
        }
        self.last_reply_due = Some(due);

        self.pending_replies += 1;
        if self.pending_replies == 1 {
            self.emit_typing(true);
        }

        let timers = self.timers.clone();
        tokio::spawn(async move {
            tokio::time::sleep_until(due).await;
            let _ = timers.send(Timer::ReplyDue(reply));
        });
    }

    fn deliver_reply(&mut self, reply: PolicyReply) {
        self.pending_replies = self.pending_replies.saturating_sub(1);
        self.accept(MessageDraft::agent_text(reply.text));
        if self.pending_replies == 0 {
            self.emit_typing(false);
        }
        self.evaluate_lead(reply.should_offer_lead);
    }

    fn room_changed(&mut self, room: RoomContext) {
        let update = self
            .room
            .on_room_changed(room.clone(), self.panel_open, Instant::now());
        if !update.changed {
            return;
        }
        self.emit(DomainEvent::RoomChanged {
            session_id: self.session.session_id,
            room: room.clone(),
            timestamp: Timestamp::now(),
        });
        if update.announce && self.session.is_active() {
            self.accept(MessageDraft::system(room::announcement(&room)));
        }
    }

    // =========================================================================
    // Lead capture
    // =========================================================================

    fn evaluate_lead(&mut self, agent_signal: bool) {
        let reason = self.lead_gate.should_offer(
            &self.transcript,
            &self.session.lead,
            agent_signal,
            &mut self.rng,
        );
        let Some(reason) = reason else {
            return;
        };
        if self.session.lead.mark_offered() {
            info!(session_id = %self.session.session_id, ?reason, "Lead capture offered");
            self.emit(DomainEvent::LeadOffered {
                session_id: self.session.session_id,
                reason,
                timestamp: Timestamp::now(),
            });
        }
    }

    fn submit_lead(&mut self, contact: ContactInfo) -> Result<(), SessionError> {
        if !self.session.lead.offered() {
            return Err(SessionError::LeadNotOffered);
        }
        if self.session.lead.submitted() {
            return Err(SessionError::LeadAlreadySubmitted);
        }
        let contact = validate_contact(contact)?;

        self.session.lead.mark_submitted();
        self.session.contact_info = Some(contact.clone());
        info!(session_id = %self.session.session_id, "Lead submitted");
        self.emit(DomainEvent::LeadSubmitted {
            session_id: self.session.session_id,
            tour_id: self.session.tour_id.clone(),
            conversation_id: self.session.conversation_id.clone(),
            contact,
            timestamp: Timestamp::now(),
        });
        self.end_session();
        Ok(())
    }

    fn decline_lead(&mut self) -> Result<(), SessionError> {
        if !self.session.lead.offered() {
            return Err(SessionError::LeadNotOffered);
        }
        if self.session.lead.submitted() {
            return Err(SessionError::LeadAlreadySubmitted);
        }
        debug!(session_id = %self.session.session_id, "Lead capture declined");
        self.emit(DomainEvent::LeadDeclined {
            session_id: self.session.session_id,
            timestamp: Timestamp::now(),
        });
        Ok(())
    }

    // =========================================================================
    // Voice channel
    // =========================================================================

    fn start_voice(&mut self, reply: Reply<Result<(), SessionError>>) {
        let state = self.voice_state.current();
        if state.is_live() || state == VoiceSessionState::Connecting {
            let _ = reply.send(Err(SessionError::VoiceAlreadyActive));
            return;
        }

        let generation = match self.voice.connect() {
            Ok(generation) => generation,
            Err(error) => {
                warn!(session_id = %self.session.session_id, %error, "Voice mode unavailable");
                self.accept(MessageDraft::system(MISSING_AGENT_NOTICE));
                let _ = reply.send(Err(error));
                return;
            }
        };

        self.cancel_fallback();
        if state == VoiceSessionState::Error {
            self.transition_voice(VoiceSessionState::Idle);
        }
        self.voice_state.set_voice_mode(true);
        self.transition_voice(VoiceSessionState::Connecting);
        self.pending_voice_reply = Some((generation, reply));
    }

    /// Explicit stop: straight to Idle, no fallback notice.
    fn stop_voice(&mut self) {
        self.cancel_fallback();
        let active =
            self.voice_state.voice_mode() || self.voice_state.current() != VoiceSessionState::Idle;
        if active {
            self.voice.disconnect();
        }
        if let Some((from, to)) = self.voice_state.reset() {
            self.emit_voice_change(from, to);
        }
        self.set_voice_thinking(false);
        if let Some((_, reply)) = self.pending_voice_reply.take() {
            let _ = reply.send(Err(SessionError::Voice(
                "voice connection cancelled".to_string(),
            )));
        }
    }

    fn handle_voice_signal(&mut self, signal: VoiceSignal) {
        if !self.voice.is_current(signal.generation) {
            debug!(
                generation = signal.generation,
                current = self.voice.generation(),
                "Ignoring stale voice signal"
            );
            return;
        }
        match signal.kind {
            VoiceSignalKind::ConnectFinished(result) => {
                self.voice
                    .on_connect_finished(signal.generation, result.is_ok());
                let pending = self
                    .pending_voice_reply
                    .take()
                    .filter(|(generation, _)| *generation == signal.generation);
                match result {
                    Ok(()) => {
                        if self.voice_state.current() == VoiceSessionState::Connecting {
                            self.transition_voice(VoiceSessionState::Connected);
                        }
                        if let Some((_, reply)) = pending {
                            let _ = reply.send(Ok(()));
                        }
                    }
                    Err(detail) => {
                        self.voice_failed(detail.clone());
                        if let Some((_, reply)) = pending {
                            let _ = reply.send(Err(SessionError::Voice(detail)));
                        }
                    }
                }
            }
            VoiceSignalKind::Event(event) => self.handle_voice_event(event),
        }
    }

    fn handle_voice_event(&mut self, event: VoiceEvent) {
        if !self.voice_state.voice_mode() {
            debug!(event = event.name(), "Voice mode off, ignoring provider event");
            return;
        }
        let in_error = self.voice_state.current() == VoiceSessionState::Error;
        match event {
            VoiceEvent::Error { detail } => self.voice_failed(detail),
            VoiceEvent::Disconnected if !in_error => {
                self.voice_failed("voice provider disconnected".to_string())
            }
            _ if in_error => {
                debug!(event = event.name(), "Voice channel in error, ignoring event");
            }
            VoiceEvent::AgentThinking => self.set_voice_thinking(true),
            event => {
                if let Some(target) = adapter::target_state(&event) {
                    self.transition_voice(target);
                }
                if matches!(
                    event,
                    VoiceEvent::AgentTranscript { .. } | VoiceEvent::AgentSpeakingStarted
                ) {
                    self.set_voice_thinking(false);
                }
                if let Some(draft) = adapter::transcript_draft(&event) {
                    let from_visitor = draft.sender == Sender::Visitor;
                    self.ensure_started();
                    self.accept(draft);
                    if from_visitor {
                        self.evaluate_lead(false);
                    }
                }
            }
        }
    }

    /// Error path shared by provider errors, unexpected disconnects and
    /// failed connects: enter Error and schedule one fallback to text.
    fn voice_failed(&mut self, reason: String) {
        warn!(session_id = %self.session.session_id, %reason, "Voice channel failed");
        self.transition_voice(VoiceSessionState::Error);
        self.set_voice_thinking(false);
        if self.fallback_pending.is_some() {
            return;
        }
        self.fallback_token += 1;
        self.fallback_pending = Some(reason);

        let token = self.fallback_token;
        let delay = self.settings.voice.fallback_delay();
        let timers = self.timers.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = timers.send(Timer::FallbackDue(token));
        });
    }

    fn fall_back_to_text(&mut self, token: u64) {
        if token != self.fallback_token {
            return;
        }
        let Some(reason) = self.fallback_pending.take() else {
            return;
        };
        info!(session_id = %self.session.session_id, %reason, "Falling back to text mode");
        self.voice.disconnect();
        if let Some((from, to)) = self.voice_state.reset() {
            self.emit_voice_change(from, to);
        }
        self.accept(MessageDraft::system(VOICE_FALLBACK_NOTICE));
        self.emit(DomainEvent::VoiceFallback {
            session_id: self.session.session_id,
            reason,
            timestamp: Timestamp::now(),
        });
    }

    fn cancel_fallback(&mut self) {
        self.fallback_token += 1;
        self.fallback_pending = None;
    }

    fn transition_voice(&mut self, target: VoiceSessionState) {
        if let Some((from, to)) = self.voice_state.transition(target) {
            self.emit_voice_change(from, to);
        }
    }

    fn set_voice_thinking(&mut self, thinking: bool) {
        if self.voice_thinking != thinking {
            self.voice_thinking = thinking;
            if self.pending_replies == 0 {
                self.emit_typing(thinking);
            }
        }
    }

    // =========================================================================
    // Async completions
    // =========================================================================

    fn handle_persist_outcome(&mut self, outcome: PersistOutcome) {
        let session_id = self.session.session_id;
        match outcome {
            PersistOutcome::Started(Ok(response)) => {
                self.start_in_flight = false;
                self.session.conversation_id = Some(response.conversation_id.clone());
                self.emit(DomainEvent::SessionStarted {
                    session_id,
                    conversation_id: response.conversation_id,
                    timestamp: Timestamp::now(),
                });
            }
            PersistOutcome::Started(Err(reason)) => {
                self.start_in_flight = false;
                warn!(%session_id, %reason, "Session running without a remote conversation");
                self.emit(DomainEvent::SessionDegraded {
                    session_id,
                    reason,
                    timestamp: Timestamp::now(),
                });
            }
            PersistOutcome::Synced { message_id, state } => {
                self.transcript.mark_sync(message_id, state.clone());
                match state {
                    SyncState::Persisted { remote_id } => self.emit(DomainEvent::MessagePersisted {
                        session_id,
                        message_id,
                        remote_id,
                        timestamp: Timestamp::now(),
                    }),
                    SyncState::Failed { error } => self.emit(DomainEvent::MessagePersistFailed {
                        session_id,
                        message_id,
                        error,
                        timestamp: Timestamp::now(),
                    }),
                    SyncState::Pending | SyncState::LocalOnly => {}
                }
            }
            PersistOutcome::Ended(result) => {
                if let Err(error) = result {
                    debug!(%session_id, %error, "Conversation end not confirmed");
                }
            }
        }
    }

    fn handle_timer(&mut self, timer: Timer) {
        match timer {
            Timer::ReplyDue(reply) => self.deliver_reply(reply),
            Timer::FallbackDue(token) => self.fall_back_to_text(token),
        }
    }

    // =========================================================================
    // Output
    // =========================================================================

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session: self.session.clone(),
            entries: self.transcript.entries(),
            voice_state: self.voice_state.current(),
            voice_mode: self.voice_state.voice_mode(),
            room: self.room.current().cloned(),
            panel_open: self.panel_open,
            agent_typing: self.pending_replies > 0 || self.voice_thinking,
        }
    }

    fn emit_voice_change(&self, from: VoiceSessionState, to: VoiceSessionState) {
        self.emit(DomainEvent::VoiceStateChanged {
            session_id: self.session.session_id,
            from,
            to,
            timestamp: Timestamp::now(),
        });
    }

    fn emit_typing(&self, typing: bool) {
        self.emit(DomainEvent::AgentTyping {
            session_id: self.session.session_id,
            typing,
            timestamp: Timestamp::now(),
        });
    }

    fn emit(&self, event: DomainEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}
