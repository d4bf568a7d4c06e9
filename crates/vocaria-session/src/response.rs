//! Simulated agent replies for pure text mode.
//!
//! When no live voice agent answers, the orchestrator asks a
//! [`ResponsePolicy`] for the reply and delivers it after a short typing
//! delay.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::LazyLock;

use vocaria_core::{Message, RoomContext, Sender};

use crate::text::KeywordSet;

/// A reply produced by a policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyReply {
    pub text: String,
    /// The reply invites the visitor to leave contact details.
    pub should_offer_lead: bool,
}

/// Strategy producing agent replies from the transcript so far.
pub trait ResponsePolicy: Send + Sync {
    fn respond(&self, transcript: &[Message], room: Option<&RoomContext>) -> PolicyReply;
}

// =============================================================================
// CannedResponsePolicy
// =============================================================================

const PRICE_KEYWORDS: &[&str] = &["precio", "cuesta", "cuanto vale", "valor", "coste", "euros"];
const SIZE_KEYWORDS: &[&str] = &[
    "metros",
    "m2",
    "tamaño",
    "superficie",
    "grande",
    "habitaciones",
    "dormitorios",
];
const LOCATION_KEYWORDS: &[&str] = &[
    "donde",
    "ubicacion",
    "ubicada",
    "zona",
    "barrio",
    "cerca",
    "direccion",
];
const VISIT_KEYWORDS: &[&str] = &["visita", "visitar", "en persona", "cita", "agendar", "ver la casa"];

static PRICE: LazyLock<KeywordSet> = LazyLock::new(|| KeywordSet::new(PRICE_KEYWORDS));
static SIZE: LazyLock<KeywordSet> = LazyLock::new(|| KeywordSet::new(SIZE_KEYWORDS));
static LOCATION: LazyLock<KeywordSet> = LazyLock::new(|| KeywordSet::new(LOCATION_KEYWORDS));
static VISIT: LazyLock<KeywordSet> = LazyLock::new(|| KeywordSet::new(VISIT_KEYWORDS));

const GENERIC_REPLIES: &[&str] = &[
    "¡Buena pregunta! Esta propiedad tiene mucho que ofrecer. ¿Hay algo concreto que te gustaría saber?",
    "Puedo ayudarte con el precio, la superficie, la ubicación o para agendar una visita.",
    "Sigue recorriendo el tour con total libertad; estoy aquí para cualquier duda.",
];

/// Keyword buckets (price, size, location, visit) with a rotating generic
/// fallback. Price and visit questions ask for the lead prompt.
#[derive(Debug, Default)]
pub struct CannedResponsePolicy {
    generic_cursor: AtomicUsize,
}

impl CannedResponsePolicy {
    pub fn new() -> Self {
        Self::default()
    }

    fn generic(&self, room: Option<&RoomContext>) -> String {
        let idx = self.generic_cursor.fetch_add(1, Ordering::Relaxed) % GENERIC_REPLIES.len();
        let base = GENERIC_REPLIES[idx];
        match room {
            Some(room) => format!("{base} Ahora mismo estás en {}.", room.name),
            None => base.to_string(),
        }
    }
}

impl ResponsePolicy for CannedResponsePolicy {
    fn respond(&self, transcript: &[Message], room: Option<&RoomContext>) -> PolicyReply {
        let question = transcript
            .iter()
            .rev()
            .find(|m| m.sender == Sender::Visitor)
            .map(|m| m.content.as_str())
            .unwrap_or_default();

        if PRICE.is_match(question) {
            return PolicyReply {
                text: "El precio depende de las condiciones de la operación. ¿Quieres que un asesor te envíe el detalle completo?"
                    .to_string(),
                should_offer_lead: true,
            };
        }
        if VISIT.is_match(question) {
            return PolicyReply {
                text: "¡Encantados de enseñártela en persona! Déjanos tus datos y te proponemos horarios."
                    .to_string(),
                should_offer_lead: true,
            };
        }
        if SIZE.is_match(question) {
            let text = match room.and_then(|r| r.area.map(|a| (r, a))) {
                Some((room, area)) => format!(
                    "{} tiene unos {} m². ¿Quieres saber algo más de esta estancia?",
                    room.name, area
                ),
                None => "La vivienda es muy amplia y luminosa. Puedes ver la superficie de cada estancia mientras la recorres."
                    .to_string(),
            };
            return PolicyReply {
                text,
                should_offer_lead: false,
            };
        }
        if LOCATION.is_match(question) {
            return PolicyReply {
                text: "Está en una zona muy bien comunicada, con comercios y transporte a pocos minutos."
                    .to_string(),
                should_offer_lead: false,
            };
        }
        PolicyReply {
            text: self.generic(room),
            should_offer_lead: false,
        }
    }
}
