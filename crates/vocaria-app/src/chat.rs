//! Interactive terminal session.
//!
//! Reads visitor input from stdin and drives one conversation session. The
//! voice agent is the in-process loopback provider; `/say` stands in for the
//! visitor speaking into the microphone.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use vocaria_core::{ContactInfo, DomainEvent, Message, RoomContext, Sender};
use vocaria_session::{
    host_message_for, LoopbackInjector, LoopbackVoiceProvider, OrchestratorSettings,
    SessionDeps, SessionError, SessionHandle, SessionOrchestrator, TranscriptSink, VoiceEvent,
};

const HELP: &str = "\
Comandos:
  <texto>                 escribir al agente
  /room <nombre> [m2]     moverse a otra estancia
  /voice                  activar el modo voz
  /say <texto>            hablar (con el modo voz activo)
  /stop                   desactivar el modo voz
  /lead <email|tel> [nombre]  dejar tus datos de contacto
  /decline                rechazar el formulario de contacto
  /quit                   salir";

/// Simulated handshake of the loopback voice agent.
const VOICE_CONNECT_DELAY: Duration = Duration::from_millis(300);
/// Grace period for the background end-of-conversation call on exit.
const EXIT_GRACE: Duration = Duration::from_millis(500);

/// One line of terminal input.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatInput {
    Text(String),
    Room(RoomContext),
    Voice,
    Say(String),
    Stop,
    Lead(ContactInfo),
    Decline,
    Help,
    Quit,
    Empty,
}

pub fn parse_input(line: &str) -> Result<ChatInput, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(ChatInput::Empty);
    }
    let Some(command) = line.strip_prefix('/') else {
        return Ok(ChatInput::Text(line.to_string()));
    };

    let (name, rest) = command
        .split_once(char::is_whitespace)
        .map(|(n, r)| (n, r.trim()))
        .unwrap_or((command, ""));

    match name {
        "room" => parse_room(rest).map(ChatInput::Room),
        "voice" => Ok(ChatInput::Voice),
        "say" if !rest.is_empty() => Ok(ChatInput::Say(rest.to_string())),
        "say" => Err("uso: /say <texto>".to_string()),
        "stop" => Ok(ChatInput::Stop),
        "lead" => parse_lead(rest).map(ChatInput::Lead),
        "decline" => Ok(ChatInput::Decline),
        "help" => Ok(ChatInput::Help),
        "quit" | "exit" => Ok(ChatInput::Quit),
        other => Err(format!("comando desconocido: /{other}")),
    }
}

/// `/room Dormitorio principal 14.5`: a trailing number is the area.
fn parse_room(rest: &str) -> Result<RoomContext, String> {
    let mut words: Vec<&str> = rest.split_whitespace().collect();
    let area = match words.last().map(|w| w.replace(',', ".").parse::<f64>()) {
        Some(Ok(area)) if words.len() > 1 => {
            words.pop();
            Some(area)
        }
        _ => None,
    };
    RoomContext::new(words.join(" "), area).map_err(|_| "uso: /room <nombre> [m2]".to_string())
}

/// `/lead <email|teléfono> [nombre]`
fn parse_lead(rest: &str) -> Result<ContactInfo, String> {
    let (contact, name) = rest
        .split_once(char::is_whitespace)
        .map(|(c, n)| (c, n.trim()))
        .unwrap_or((rest, ""));
    if contact.is_empty() {
        return Err("uso: /lead <email|teléfono> [nombre]".to_string());
    }
    let mut info = if contact.contains('@') {
        ContactInfo::with_email(contact)
    } else {
        ContactInfo::with_phone(contact)
    };
    if !name.is_empty() {
        info.name = Some(name.to_string());
    }
    Ok(info)
}

pub fn render_message(message: &Message) -> String {
    let who = match message.sender {
        Sender::Visitor => "tú",
        Sender::Agent => "agente",
        Sender::System => "aviso",
    };
    let channel = if message.is_voice() { " (voz)" } else { "" };
    format!("[{who}{channel}] {}", message.content)
}

async fn print_events(mut events: broadcast::Receiver<DomainEvent>) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Terminal fell behind the session events");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        match &event {
            DomainEvent::MessageAccepted { message, .. } => println!("{}", render_message(message)),
            DomainEvent::AgentTyping { typing: true, .. } => println!("  ..."),
            DomainEvent::LeadOffered { .. } => {
                println!("  ¿Te contactamos? /lead <email|teléfono> [nombre] o /decline")
            }
            DomainEvent::VoiceStateChanged { to, .. } => println!("  [voz: {to}]"),
            DomainEvent::SessionDegraded { .. } => {
                println!("  (sin conexión con el servidor: la conversación se guarda solo aquí)")
            }
            DomainEvent::LeadSubmitted { .. } => {
                if let Some(host) = host_message_for(&event) {
                    println!("  host <- {}", host.to_json());
                }
            }
            _ => {}
        }
    }
}

/// Plays the remote side of a spoken turn through the loopback agent.
fn speak(injector: &LoopbackInjector, text: &str) -> bool {
    let words = text.split_whitespace().count() as u64;
    if !injector.emit(VoiceEvent::UserTranscript {
        text: text.to_string(),
        audio_duration_ms: Some(400 * words.max(1)),
        confidence_score: Some(0.9),
    }) {
        return false;
    }
    injector.emit(VoiceEvent::AgentThinking);
    injector.emit(VoiceEvent::AgentSpeakingStarted);
    injector.emit(VoiceEvent::AgentTranscript {
        text: format!("Has dicho: «{text}». ¿Te cuento algo más de la casa?"),
        response_duration_ms: Some(1200),
    });
    injector.emit(VoiceEvent::AgentSpeakingStopped)
}

async fn dispatch(handle: &SessionHandle, injector: &LoopbackInjector, input: ChatInput) {
    let result = match input {
        ChatInput::Text(text) => handle.send_text(text).await.map(|_| ()),
        ChatInput::Room(room) => handle.room_changed(room),
        ChatInput::Voice => handle.start_voice().await,
        ChatInput::Say(text) => {
            if !speak(injector, &text) {
                println!("  (el modo voz no está activo: usa /voice)");
            }
            Ok(())
        }
        ChatInput::Stop => handle.stop_voice().await,
        ChatInput::Lead(contact) => handle.submit_lead(contact).await,
        ChatInput::Decline => handle.decline_lead().await,
        ChatInput::Help => {
            println!("{HELP}");
            Ok(())
        }
        ChatInput::Quit | ChatInput::Empty => Ok(()),
    };
    if let Err(e) = result {
        println!("  ! {e}");
    }
}

/// Opens the panel up front when the widget asks for it. Otherwise the
/// session starts with the first message.
async fn open_if_configured(
    handle: &SessionHandle,
    auto_open: bool,
) -> Result<bool, SessionError> {
    if !auto_open {
        return Ok(false);
    }
    handle.open().await?;
    Ok(true)
}

pub async fn run(
    settings: OrchestratorSettings,
    sink: Option<Arc<dyn TranscriptSink>>,
) -> Result<(), Box<dyn std::error::Error>> {
    let provider = LoopbackVoiceProvider::new()
        .with_connect_delay(VOICE_CONNECT_DELAY)
        .with_text_echo();
    let injector = provider.injector();

    let mut deps = SessionDeps::new(Arc::new(provider));
    if let Some(sink) = sink {
        deps = deps.with_sink(sink);
    }
    let auto_open = settings.widget.auto_open;
    let handle = SessionOrchestrator::spawn(settings, deps);
    let printer = tokio::spawn(print_events(handle.subscribe()));

    println!("{HELP}\n");
    open_if_configured(&handle, auto_open).await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match parse_input(&line) {
            Ok(ChatInput::Quit) => break,
            Ok(input) => dispatch(&handle, &injector, input).await,
            Err(message) => println!("  ! {message}"),
        }
    }

    handle.teardown().await?;
    tokio::time::sleep(EXIT_GRACE).await;
    printer.abort();
    Ok(())
}
