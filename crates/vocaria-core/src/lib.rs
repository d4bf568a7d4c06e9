//! Shared domain model for the Vocaria conversation core.
//!
//! Holds the session/transcript types, the wire contract of the visitor
//! conversation API, domain events, configuration and the top-level error.

pub mod config;
pub mod contract;
pub mod error;
pub mod events;
pub mod types;

pub use config::VocariaConfig;
pub use error::{Result, VocariaError};
pub use events::DomainEvent;
pub use types::*;
