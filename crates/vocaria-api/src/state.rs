//! Application state shared across all route handlers.

use std::sync::Arc;
use std::time::Instant;

use vocaria_core::VocariaConfig;

use crate::store::ConversationStore;

/// Shared application state. Cheap to clone; passed to handlers via axum's
/// `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<VocariaConfig>,
    pub store: Arc<ConversationStore>,
    /// Server start time for uptime calculation.
    pub start_time: Instant,
}

impl AppState {
    pub fn new(config: VocariaConfig) -> Self {
        Self {
            config: Arc::new(config),
            store: Arc::new(ConversationStore::new()),
            start_time: Instant::now(),
        }
    }
}
