//! Reference transcript sink: the visitor conversation API over axum.
//!
//! Serves the three visitor-anonymous conversation operations against an
//! in-memory store, plus a read-back endpoint and a health check.

pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;
pub mod store;

pub use error::ApiError;
pub use routes::{create_router, start_server};
pub use state::AppState;
pub use store::{ConversationStore, StoreError};
