//! Error types for the conversation session.

use vocaria_core::error::VocariaError;

/// Errors surfaced by the session orchestrator and its components.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("message cannot be empty")]
    EmptyMessage,
    #[error("message exceeds maximum length of {0} characters")]
    MessageTooLong(usize),
    #[error("no voice agent configured")]
    MissingAgentId,
    #[error("voice mode is already active")]
    VoiceAlreadyActive,
    #[error("voice error: {0}")]
    Voice(String),
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("lead capture has not been offered")]
    LeadNotOffered,
    #[error("lead already submitted")]
    LeadAlreadySubmitted,
    #[error("invalid contact: {0}")]
    InvalidContact(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("session orchestrator is closed")]
    OrchestratorClosed,
}

impl From<VocariaError> for SessionError {
    fn from(err: VocariaError) -> Self {
        match err {
            VocariaError::Config(msg) => SessionError::Config(msg),
            VocariaError::Voice(msg) => SessionError::Voice(msg),
            VocariaError::ShuttingDown => SessionError::OrchestratorClosed,
            other => SessionError::Persistence(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for SessionError {
    fn from(err: reqwest::Error) -> Self {
        SessionError::Persistence(err.to_string())
    }
}
