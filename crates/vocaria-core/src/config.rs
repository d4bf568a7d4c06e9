use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::Result;

/// Lower bound of the voice fallback delay.
pub const MIN_FALLBACK_DELAY_MS: u64 = 2_000;
/// Upper bound of the voice fallback delay.
pub const MAX_FALLBACK_DELAY_MS: u64 = 4_000;
/// Hard cap on the per-turn random lead offer probability.
pub const MAX_RANDOM_OFFER_PROBABILITY: f64 = 0.2;

/// Top-level configuration for Vocaria.
///
/// Loaded from `~/.vocaria/config.toml` by default. Each section corresponds
/// to one component of the conversation core or to the reference server.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VocariaConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub widget: WidgetSettings,
    #[serde(default)]
    pub voice: VoiceConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub lead: LeadConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

impl VocariaConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: VocariaConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// `~/.vocaria/config.toml`, or `./.vocaria/config.toml` without a home directory.
    pub fn default_path() -> PathBuf {
        let home = std::env::var_os("HOME")
            .or_else(|| std::env::var_os("USERPROFILE"))
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        home.join(".vocaria").join("config.toml")
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// Widget configuration surface exposed to the embedding page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WidgetSettings {
    pub tour_id: String,
    /// Voice agent identifier. Empty disables voice mode.
    pub agent_id: String,
    pub primary_color: String,
    /// First agent message of every session.
    pub greeting: String,
    pub language: String,
    /// Open the conversation panel as soon as the widget loads.
    pub auto_open: bool,
}

impl Default for WidgetSettings {
    fn default() -> Self {
        Self {
            tour_id: "demo-tour".to_string(),
            agent_id: String::new(),
            primary_color: "#2563eb".to_string(),
            greeting: "¡Hola! Soy tu asistente virtual. ¿En qué puedo ayudarte con esta propiedad?"
                .to_string(),
            language: "es".to_string(),
            auto_open: false,
        }
    }
}

/// Realtime voice channel settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    /// Delay before falling back to text after a voice failure.
    pub fallback_delay_ms: u64,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            fallback_delay_ms: 3_000,
        }
    }
}

impl VoiceConfig {
    /// Fallback delay clamped to 2–4 s.
    pub fn fallback_delay(&self) -> Duration {
        Duration::from_millis(
            self.fallback_delay_ms
                .clamp(MIN_FALLBACK_DELAY_MS, MAX_FALLBACK_DELAY_MS),
        )
    }
}

/// Orchestrator behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Lower bound of the simulated reply delay.
    pub reply_delay_min_ms: u64,
    /// Upper bound of the simulated reply delay.
    pub reply_delay_max_ms: u64,
    /// Announce room changes in the transcript while the panel is open.
    pub room_announcements: bool,
    /// Minimum seconds between two room announcements.
    pub room_announcement_interval_secs: u64,
    /// Longest accepted visitor message, in characters.
    pub max_message_length: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            reply_delay_min_ms: 1_000,
            reply_delay_max_ms: 2_000,
            room_announcements: true,
            room_announcement_interval_secs: 12,
            max_message_length: 2_000,
        }
    }
}

impl SessionConfig {
    /// Reply delay bounds as `(min, max)`, swapped if configured backwards.
    pub fn reply_delay_bounds(&self) -> (Duration, Duration) {
        let lo = self.reply_delay_min_ms.min(self.reply_delay_max_ms);
        let hi = self.reply_delay_min_ms.max(self.reply_delay_max_ms);
        (Duration::from_millis(lo), Duration::from_millis(hi))
    }

    pub fn room_announcement_interval(&self) -> Duration {
        Duration::from_secs(self.room_announcement_interval_secs)
    }
}

/// Lead capture trigger policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LeadConfig {
    /// Keywords in the latest visitor message that surface the prompt.
    pub trigger_keywords: Vec<String>,
    /// Per-turn probability of offering without any other trigger.
    pub random_offer_probability: f64,
    /// Visitor messages required before the random fallback may fire.
    pub min_visitor_messages_for_random: usize,
}

impl Default for LeadConfig {
    fn default() -> Self {
        Self {
            trigger_keywords: [
                "contacto",
                "email",
                "teléfono",
                "información",
                "interesa",
                "agendar",
                "visita",
                "precio",
                "comprar",
                "alquilar",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            random_offer_probability: 0.05,
            min_visitor_messages_for_random: 2,
        }
    }
}

impl LeadConfig {
    /// Random offer probability within `[0, 0.2]`.
    pub fn offer_probability(&self) -> f64 {
        if self.random_offer_probability.is_nan() {
            return 0.0;
        }
        self.random_offer_probability
            .clamp(0.0, MAX_RANDOM_OFFER_PROBABILITY)
    }
}

/// Backend transcript sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// When false the session keeps an in-memory transcript only.
    pub enabled: bool,
    pub api_base_url: String,
    pub request_timeout_ms: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_base_url: "http://127.0.0.1:8080".to_string(),
            request_timeout_ms: 5_000,
        }
    }
}

impl PersistenceConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Reference API server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
