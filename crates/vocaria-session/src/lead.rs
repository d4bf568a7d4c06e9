//! Lead Capture Gate.
//!
//! Decides when to surface the contact prompt. The decision is pure apart
//! from the random fallback, which draws from a caller-supplied RNG so
//! sessions can be replayed with a fixed seed.

use rand::Rng;
use vocaria_core::config::LeadConfig;
use vocaria_core::{ContactInfo, LeadCaptureState, LeadOfferReason, Message, Sender};

use crate::error::SessionError;
use crate::text::KeywordSet;
use crate::transcript::Transcript;

/// Decides whether a visitor message expresses buying intent.
pub trait LeadTriggerPolicy: Send + Sync {
    fn is_trigger(&self, message: &Message) -> bool;
}

/// Matches whole keywords in the message, ignoring case and accents.
#[derive(Debug, Clone)]
pub struct KeywordLeadTrigger {
    keywords: KeywordSet,
}

impl KeywordLeadTrigger {
    pub fn new<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            keywords: KeywordSet::new(keywords),
        }
    }
}

impl LeadTriggerPolicy for KeywordLeadTrigger {
    fn is_trigger(&self, message: &Message) -> bool {
        message.sender == Sender::Visitor && self.keywords.is_match(&message.content)
    }
}

pub struct LeadCaptureGate {
    trigger: Box<dyn LeadTriggerPolicy>,
    random_probability: f64,
    min_visitor_messages: usize,
}

impl LeadCaptureGate {
    pub fn new(
        trigger: Box<dyn LeadTriggerPolicy>,
        random_probability: f64,
        min_visitor_messages: usize,
    ) -> Self {
        Self {
            trigger,
            random_probability,
            min_visitor_messages,
        }
    }

    pub fn from_config(config: &LeadConfig) -> Self {
        Self::new(
            Box::new(KeywordLeadTrigger::new(&config.trigger_keywords)),
            config.offer_probability(),
            config.min_visitor_messages_for_random,
        )
    }

    /// Returns why the prompt should be offered now, or `None`.
    ///
    /// Never offers twice: once `state.offered()` is set the answer is always
    /// `None`. `agent_signal` is the latest agent reply's request to offer.
    /// Only visitor messages are inspected, so system notices cannot trigger.
    pub fn should_offer<R: Rng + ?Sized>(
        &self,
        transcript: &Transcript,
        state: &LeadCaptureState,
        agent_signal: bool,
        rng: &mut R,
    ) -> Option<LeadOfferReason> {
        if state.offered() {
            return None;
        }
        if agent_signal {
            return Some(LeadOfferReason::AgentSignal);
        }
        let last = transcript.last_visitor_message()?;
        if self.trigger.is_trigger(last) {
            return Some(LeadOfferReason::KeywordMatch);
        }
        if self.random_probability > 0.0
            && transcript.visitor_message_count() >= self.min_visitor_messages
            && rng.random_bool(self.random_probability)
        {
            return Some(LeadOfferReason::RandomFallback);
        }
        None
    }
}

/// Normalizes and validates submitted contact details.
///
/// At least one of email or phone is required. An email needs an `@` and a
/// `.` somewhere after it; a phone needs at least six digits.
pub fn validate_contact(contact: ContactInfo) -> Result<ContactInfo, SessionError> {
    fn clean(value: Option<String>) -> Option<String> {
        value
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    let contact = ContactInfo {
        name: clean(contact.name),
        email: clean(contact.email),
        phone: clean(contact.phone),
    };

    if contact.email.is_none() && contact.phone.is_none() {
        return Err(SessionError::InvalidContact(
            "an email or phone number is required".to_string(),
        ));
    }
    if let Some(email) = &contact.email {
        if !is_valid_email(email) {
            return Err(SessionError::InvalidContact(format!("malformed email: {email}")));
        }
    }
    if let Some(phone) = &contact.phone {
        if phone.chars().filter(char::is_ascii_digit).count() < 6 {
            return Err(SessionError::InvalidContact(format!("malformed phone: {phone}")));
        }
    }
    Ok(contact)
}

fn is_valid_email(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain
                    .rsplit_once('.')
                    .is_some_and(|(host, tld)| !host.is_empty() && !tld.is_empty())
        }
        None => false,
    }
}
