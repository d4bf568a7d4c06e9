//! Vocaria application binary - composition root.
//!
//! 1. Parse the CLI and load configuration from TOML
//! 2. Install tracing
//! 3. Either serve the reference conversation API (`serve`) or run an
//!    interactive tour session in the terminal (`chat`)

mod chat;
mod cli;

use std::sync::Arc;

use clap::Parser;
use vocaria_api::{start_server, AppState};
use vocaria_core::VocariaConfig;
use vocaria_session::{
    settings_from_url, HttpTranscriptSink, MemoryTranscriptSink, OrchestratorSettings,
    TranscriptSink,
};

use crate::cli::{CliArgs, Command};

async fn serve(
    config: VocariaConfig,
    host: Option<String>,
    port: Option<u16>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut server = config.server.clone();
    if let Some(host) = host {
        server.host = host;
    }
    server.port = cli::resolve_port(port, server.port);

    let state = AppState::new(config);
    start_server(&server, state).await?;
    Ok(())
}

async fn chat(
    config: VocariaConfig,
    offline: bool,
    widget_url: Option<String>,
    api_url: Option<String>,
    seed: Option<u64>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut settings = OrchestratorSettings::from_config(&config);
    if let Some(url) = widget_url {
        settings.widget = settings_from_url(&url, settings.widget)?;
    }
    settings.rng_seed = seed;
    tracing::info!(
        tour_id = %settings.widget.tour_id,
        voice_agent = !settings.widget.agent_id.trim().is_empty(),
        "Widget configured"
    );

    let sink: Option<Arc<dyn TranscriptSink>> = if offline {
        tracing::info!("Offline mode: transcript kept in memory");
        Some(Arc::new(MemoryTranscriptSink::new()))
    } else if config.persistence.enabled {
        let mut persistence = config.persistence.clone();
        if let Some(url) = api_url {
            persistence.api_base_url = url;
        }
        tracing::info!(api = %persistence.api_base_url, "Persisting transcript");
        Some(Arc::new(HttpTranscriptSink::from_config(&persistence)?))
    } else {
        tracing::info!("Persistence disabled: transcript stays local");
        None
    };

    chat::run(settings, sink).await
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Config.
    let config_file = args.resolve_config_path();
    let config = VocariaConfig::load_or_default(&config_file);

    // Tracing. Logs go to stderr so they don't mix with the chat transcript.
    let level = args.resolve_log_level(&config.general.log_level);
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&level)),
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("Starting Vocaria v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(path = %config_file.display(), "Configuration loaded");

    match args.command {
        Command::Serve { host, port } => serve(config, host, port).await,
        Command::Chat {
            offline,
            widget_url,
            api_url,
            seed,
        } => chat(config, offline, widget_url, api_url, seed).await,
    }
}
