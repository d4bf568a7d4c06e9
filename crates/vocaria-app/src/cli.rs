//! CLI argument definitions for the Vocaria binary.
//!
//! Priority resolution: CLI args > env vars > config file > defaults.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use vocaria_core::VocariaConfig;

/// Vocaria - conversational assistant for virtual property tours.
#[derive(Parser, Debug)]
#[command(name = "vocaria", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the reference conversation API server.
    Serve {
        /// Bind host.
        #[arg(long)]
        host: Option<String>,

        /// Bind port.
        #[arg(short = 'p', long)]
        port: Option<u16>,
    },
    /// Chat with a tour session from the terminal.
    Chat {
        /// Keep the transcript in memory instead of calling the API.
        #[arg(long)]
        offline: bool,

        /// Embedding URL to read widget settings from (tourId, agentId, ...).
        #[arg(long = "widget-url")]
        widget_url: Option<String>,

        /// Base URL of the conversation API.
        #[arg(long = "api-url")]
        api_url: Option<String>,

        /// Fixed seed for reply delays and the random lead prompt.
        #[arg(long)]
        seed: Option<u64>,
    },
}

impl CliArgs {
    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > VOCARIA_CONFIG env var > ~/.vocaria/config.toml.
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("VOCARIA_CONFIG") {
            return PathBuf::from(p);
        }
        VocariaConfig::default_path()
    }

    /// Resolve the log level.
    ///
    /// Priority: --log-level flag > config file value.
    pub fn resolve_log_level(&self, config_level: &str) -> String {
        self.log_level
            .clone()
            .unwrap_or_else(|| config_level.to_string())
    }
}

/// Resolve the API server port.
///
/// Priority: --port flag > VOCARIA_PORT env var > config file value.
pub fn resolve_port(flag: Option<u16>, config_port: u16) -> u16 {
    if let Some(p) = flag {
        return p;
    }
    if let Ok(val) = std::env::var("VOCARIA_PORT") {
        if let Ok(p) = val.parse::<u16>() {
            return p;
        }
    }
    config_port
}
