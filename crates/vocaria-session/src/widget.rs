//! Widget boundary toward the embedding page.
//!
//! Inbound: configuration from the embedding URL's query string.
//! Outbound: inter-frame messages, currently only `lead_capture`.

use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::json;
use vocaria_core::config::WidgetSettings;
use vocaria_core::DomainEvent;

use crate::error::SessionError;

/// Overrides `base` with the widget parameters found in `url`.
///
/// Recognised parameters: `tourId`, `agentId`, `primaryColor`, `greeting`,
/// `language`, `autoOpen`. Unknown parameters are ignored.
pub fn settings_from_url(url: &str, base: WidgetSettings) -> Result<WidgetSettings, SessionError> {
    let parsed = Url::parse(url).map_err(|e| SessionError::Config(format!("invalid widget url: {e}")))?;
    let mut settings = base;
    for (key, value) in parsed.query_pairs() {
        let value = value.trim().to_string();
        match key.as_ref() {
            "tourId" => settings.tour_id = value,
            "agentId" => settings.agent_id = value,
            "primaryColor" => settings.primary_color = value,
            "greeting" => settings.greeting = value,
            "language" => settings.language = value,
            "autoOpen" => {
                settings.auto_open = matches!(value.to_ascii_lowercase().as_str(), "true" | "1" | "yes")
            }
            _ => {}
        }
    }
    if settings.tour_id.is_empty() {
        return Err(SessionError::Config("widget url has an empty tourId".to_string()));
    }
    Ok(settings)
}

/// Message posted to the hosting page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostMessage {
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: serde_json::Value,
}

impl HostMessage {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Maps a domain event to the host message it produces, if any.
pub fn host_message_for(event: &DomainEvent) -> Option<HostMessage> {
    match event {
        DomainEvent::LeadSubmitted {
            session_id,
            tour_id,
            conversation_id,
            contact,
            timestamp,
        } => Some(HostMessage {
            kind: "lead_capture".to_string(),
            payload: json!({
                "session_id": session_id,
                "tour_id": tour_id,
                "conversation_id": conversation_id,
                "name": contact.name,
                "email": contact.email,
                "phone": contact.phone,
                "captured_at": timestamp.to_datetime(),
            }),
        }),
        _ => None,
    }
}
