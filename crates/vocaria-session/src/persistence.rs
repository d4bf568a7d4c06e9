//! Persistence Client toward the backend transcript sink.
//!
//! All backend calls go through one [`PersistenceWorker`] task fed by a
//! queue, so the backend sees messages in acceptance order as far as the
//! network allows. Nothing here ever blocks the orchestrator: jobs are
//! enqueued without waiting and outcomes are reported back asynchronously.
//! Failures are logged and never retried.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;
use vocaria_core::config::PersistenceConfig;
use vocaria_core::contract::{
    self, AddMessageRequest, AddMessageResponse, EndConversationRequest, EndConversationResponse,
    ErrorBody, StartConversationRequest, StartConversationResponse,
};
use vocaria_core::{ConversationId, MessageId, SyncState};

use crate::error::SessionError;

/// The backend conversation API.
#[async_trait]
pub trait TranscriptSink: Send + Sync {
    async fn start_conversation(
        &self,
        request: &StartConversationRequest,
    ) -> Result<StartConversationResponse, SessionError>;

    async fn add_message(
        &self,
        conversation_id: &ConversationId,
        request: &AddMessageRequest,
    ) -> Result<AddMessageResponse, SessionError>;

    /// Must tolerate repeated calls for the same conversation.
    async fn end_conversation(
        &self,
        conversation_id: &ConversationId,
        request: &EndConversationRequest,
    ) -> Result<EndConversationResponse, SessionError>;
}

// =============================================================================
// HttpTranscriptSink
// =============================================================================

/// JSON-over-HTTP client for the visitor conversation API. No credentials:
/// the public conversation endpoints are visitor-anonymous.
#[derive(Debug, Clone)]
pub struct HttpTranscriptSink {
    http: reqwest::Client,
    api_base: String,
}

impl HttpTranscriptSink {
    pub fn new(api_base: &str, request_timeout: Duration) -> Result<Self, SessionError> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::USER_AGENT,
            reqwest::header::HeaderValue::from_static("vocaria-widget"),
        );
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static("application/json"),
        );
        let timeout = request_timeout.max(Duration::from_millis(1));
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|e| SessionError::Config(format!("failed to build http client: {e}")))?;

        Ok(Self {
            http,
            api_base: api_base.trim().trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &PersistenceConfig) -> Result<Self, SessionError> {
        Self::new(&config.api_base_url, config.request_timeout())
    }

    async fn post_json<B, R>(&self, path: &str, body: &B) -> Result<R, SessionError>
    where
        B: Serialize + Sync,
        R: DeserializeOwned,
    {
        let url = format!("{}{}", self.api_base, path);
        let response = self.http.post(&url).json(body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let raw = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<ErrorBody>(&raw)
                .map(|body| body.message)
                .unwrap_or(raw);
            return Err(SessionError::Persistence(format!(
                "POST {path} returned {status}: {detail}"
            )));
        }
        Ok(response.json::<R>().await?)
    }
}

#[async_trait]
impl TranscriptSink for HttpTranscriptSink {
    async fn start_conversation(
        &self,
        request: &StartConversationRequest,
    ) -> Result<StartConversationResponse, SessionError> {
        self.post_json(contract::CONVERSATIONS_PATH, request).await
    }

    async fn add_message(
        &self,
        conversation_id: &ConversationId,
        request: &AddMessageRequest,
    ) -> Result<AddMessageResponse, SessionError> {
        self.post_json(&contract::messages_path(conversation_id), request)
            .await
    }

    async fn end_conversation(
        &self,
        conversation_id: &ConversationId,
        request: &EndConversationRequest,
    ) -> Result<EndConversationResponse, SessionError> {
        self.post_json(&contract::end_path(conversation_id), request)
            .await
    }
}

// =============================================================================
// MemoryTranscriptSink
// =============================================================================

/// A conversation as recorded by [`MemoryTranscriptSink`].
#[derive(Debug, Clone)]
pub struct RecordedConversation {
    pub start: StartConversationRequest,
    pub messages: Vec<AddMessageRequest>,
    pub end: Option<EndConversationRequest>,
    pub end_calls: usize,
}

#[derive(Debug, Default)]
struct MemoryState {
    conversations: HashMap<ConversationId, RecordedConversation>,
    order: Vec<ConversationId>,
}

/// In-process sink for offline sessions and tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryTranscriptSink {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryTranscriptSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Conversation ids in start order.
    pub fn conversation_ids(&self) -> Vec<ConversationId> {
        self.lock().order.clone()
    }

    pub fn conversation(&self, id: &ConversationId) -> Option<RecordedConversation> {
        self.lock().conversations.get(id).cloned()
    }
}

#[async_trait]
impl TranscriptSink for MemoryTranscriptSink {
    async fn start_conversation(
        &self,
        request: &StartConversationRequest,
    ) -> Result<StartConversationResponse, SessionError> {
        let id = ConversationId(Uuid::new_v4().to_string());
        let mut state = self.lock();
        state.order.push(id.clone());
        state.conversations.insert(
            id.clone(),
            RecordedConversation {
                start: request.clone(),
                messages: Vec::new(),
                end: None,
                end_calls: 0,
            },
        );
        Ok(StartConversationResponse {
            conversation_id: id,
            visitor_id: request.visitor_id,
            started_at: Utc::now(),
        })
    }

    async fn add_message(
        &self,
        conversation_id: &ConversationId,
        request: &AddMessageRequest,
    ) -> Result<AddMessageResponse, SessionError> {
        let mut state = self.lock();
        let conversation = state
            .conversations
            .get_mut(conversation_id)
            .ok_or_else(|| SessionError::Persistence(format!("unknown conversation {conversation_id}")))?;
        if conversation.end.is_some() {
            return Err(SessionError::Persistence(format!(
                "conversation {conversation_id} has ended"
            )));
        }
        conversation.messages.push(request.clone());
        Ok(AddMessageResponse {
            message_id: format!("{}-{}", conversation_id, conversation.messages.len()),
            timestamp: Utc::now(),
        })
    }

    async fn end_conversation(
        &self,
        conversation_id: &ConversationId,
        request: &EndConversationRequest,
    ) -> Result<EndConversationResponse, SessionError> {
        let mut state = self.lock();
        let conversation = state
            .conversations
            .get_mut(conversation_id)
            .ok_or_else(|| SessionError::Persistence(format!("unknown conversation {conversation_id}")))?;
        conversation.end_calls += 1;
        let already_ended = conversation.end.is_some();
        if !already_ended {
            conversation.end = Some(request.clone());
        }
        Ok(EndConversationResponse {
            conversation_id: conversation_id.clone(),
            ended_at: Utc::now(),
            already_ended,
        })
    }
}

// =============================================================================
// PersistenceWorker
// =============================================================================

#[derive(Debug)]
pub(crate) enum PersistJob {
    Start(StartConversationRequest),
    Add {
        message_id: MessageId,
        request: AddMessageRequest,
    },
    End(EndConversationRequest),
}

/// Result of a backend call, reported back to the orchestrator.
#[derive(Debug)]
pub(crate) enum PersistOutcome {
    Started(Result<StartConversationResponse, String>),
    Synced {
        message_id: MessageId,
        state: SyncState,
    },
    Ended(Result<EndConversationResponse, String>),
}

/// Sending half of the persistence queue.
#[derive(Debug, Clone)]
pub(crate) struct PersistenceQueue {
    jobs: mpsc::UnboundedSender<PersistJob>,
}

impl PersistenceQueue {
    /// Enqueues a job. Returns `false` if the worker has exited.
    pub(crate) fn push(&self, job: PersistJob) -> bool {
        self.jobs.send(job).is_ok()
    }
}

/// Sequential executor of backend calls for one session.
///
/// Tracks the remote conversation id itself so messages enqueued while the
/// start call is still in flight are sent once it resolves.
pub(crate) struct PersistenceWorker {
    sink: Arc<dyn TranscriptSink>,
    jobs: mpsc::UnboundedReceiver<PersistJob>,
    outcomes: mpsc::UnboundedSender<PersistOutcome>,
    conversation_id: Option<ConversationId>,
    ended: bool,
}

impl PersistenceWorker {
    pub(crate) fn spawn(
        sink: Arc<dyn TranscriptSink>,
        outcomes: mpsc::UnboundedSender<PersistOutcome>,
    ) -> (PersistenceQueue, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = Self {
            sink,
            jobs: rx,
            outcomes,
            conversation_id: None,
            ended: false,
        };
        let handle = tokio::spawn(worker.run());
        (PersistenceQueue { jobs: tx }, handle)
    }

    async fn run(mut self) {
        while let Some(job) = self.jobs.recv().await {
            self.handle(job).await;
        }
        debug!("Persistence worker drained");
    }

    async fn handle(&mut self, job: PersistJob) {
        match job {
            PersistJob::Start(request) => self.start(request).await,
            PersistJob::Add {
                message_id,
                request,
            } => self.add(message_id, request).await,
            PersistJob::End(request) => self.end(request).await,
        }
    }

    async fn start(&mut self, request: StartConversationRequest) {
        if let Some(id) = &self.conversation_id {
            warn!(conversation_id = %id, "Ignoring duplicate conversation start");
            return;
        }
        let result = match self.sink.start_conversation(&request).await {
            Ok(response) => {
                info!(conversation_id = %response.conversation_id, "Conversation started");
                self.conversation_id = Some(response.conversation_id.clone());
                Ok(response)
            }
            Err(error) => {
                warn!(tour_id = %request.tour_id, %error, "Conversation start failed");
                Err(error.to_string())
            }
        };
        self.report(PersistOutcome::Started(result));
    }

    async fn add(&mut self, message_id: MessageId, request: AddMessageRequest) {
        let state = match (&self.conversation_id, self.ended) {
            (Some(id), false) => match self.sink.add_message(id, &request).await {
                Ok(response) => {
                    debug!(conversation_id = %id, %message_id, "Message persisted");
                    SyncState::Persisted {
                        remote_id: response.message_id,
                    }
                }
                Err(error) => {
                    warn!(conversation_id = %id, %message_id, %error, "Message persist failed");
                    SyncState::Failed {
                        error: error.to_string(),
                    }
                }
            },
            _ => SyncState::LocalOnly,
        };
        self.report(PersistOutcome::Synced { message_id, state });
    }

    async fn end(&mut self, request: EndConversationRequest) {
        if self.ended {
            debug!("Conversation already ended, skipping");
            return;
        }
        let Some(id) = self.conversation_id.clone() else {
            debug!("No remote conversation to end");
            return;
        };
        self.ended = true;
        let result = self
            .sink
            .end_conversation(&id, &request)
            .await
            .map_err(|error| {
                warn!(conversation_id = %id, %error, "Conversation end failed");
                error.to_string()
            });
        if result.is_ok() {
            info!(conversation_id = %id, lead_captured = request.lead_captured, "Conversation ended");
        }
        self.report(PersistOutcome::Ended(result));
    }

    fn report(&self, outcome: PersistOutcome) {
        // The orchestrator may already be gone after teardown.
        let _ = self.outcomes.send(outcome);
    }
}
