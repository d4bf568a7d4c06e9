//! Voice session state machine.
//!
//! Valid transitions:
//! - Idle -> Connecting (explicit start)
//! - Connecting -> Connected | Error | Disconnected | Idle
//! - Connected <-> Listening <-> Speaking
//! - any live state -> Error | Disconnected | Idle
//! - Error -> Idle (fallback or explicit stop)
//! - Disconnected -> Idle | Connecting

use vocaria_core::VoiceSessionState;

/// The orchestrator-owned voice state plus the voice mode switch.
#[derive(Debug, Clone, Default)]
pub struct VoiceStateMachine {
    state: VoiceSessionState,
    voice_mode: bool,
}

impl VoiceStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> VoiceSessionState {
        self.state
    }

    /// Whether the visitor has voice mode switched on.
    pub fn voice_mode(&self) -> bool {
        self.voice_mode
    }

    pub fn set_voice_mode(&mut self, on: bool) {
        self.voice_mode = on;
    }

    /// Attempt to move to `target`.
    ///
    /// Returns the applied `(from, to)` pair, or `None` when the transition
    /// is not permitted or is a no-op. Rejected transitions are logged and
    /// leave the state untouched.
    pub fn transition(
        &mut self,
        target: VoiceSessionState,
    ) -> Option<(VoiceSessionState, VoiceSessionState)> {
        let from = self.state;
        if from == target {
            return None;
        }
        if !from.can_transition_to(target) {
            tracing::warn!(%from, to = %target, "Ignoring invalid voice state transition");
            return None;
        }
        tracing::debug!("Voice state: {} -> {}", from, target);
        self.state = target;
        Some((from, target))
    }

    /// Force the machine back to Idle with voice mode off.
    ///
    /// Returns the `(from, Idle)` pair when the state actually changed.
    pub fn reset(&mut self) -> Option<(VoiceSessionState, VoiceSessionState)> {
        self.voice_mode = false;
        let from = self.state;
        if from == VoiceSessionState::Idle {
            return None;
        }
        tracing::debug!("Voice state reset to Idle from {}", from);
        self.state = VoiceSessionState::Idle;
        Some((from, VoiceSessionState::Idle))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use VoiceSessionState::*;

    #[test]
    fn test_initial_state() {
        let sm = VoiceStateMachine::new();
        assert_eq!(sm.current(), Idle);
        assert!(!sm.voice_mode());
    }

    #[test]
    fn test_full_lifecycle() {
        let mut sm = VoiceStateMachine::new();
        assert_eq!(sm.transition(Connecting), Some((Idle, Connecting)));
        assert_eq!(sm.transition(Connected), Some((Connecting, Connected)));
        assert_eq!(sm.transition(Speaking), Some((Connected, Speaking)));
        assert_eq!(sm.transition(Listening), Some((Speaking, Listening)));
        assert_eq!(sm.transition(Error), Some((Listening, Error)));
        assert_eq!(sm.transition(Idle), Some((Error, Idle)));
    }

    #[test]
    fn test_invalid_transition_is_ignored() {
        let mut sm = VoiceStateMachine::new();
        assert_eq!(sm.transition(Speaking), None);
        assert_eq!(sm.current(), Idle);
    }

    #[test]
    fn test_same_state_is_noop() {
        let mut sm = VoiceStateMachine::new();
        sm.transition(Connecting);
        assert_eq!(sm.transition(Connecting), None);
        assert_eq!(sm.current(), Connecting);
    }

    #[test]
    fn test_error_cannot_reconnect_directly() {
        let mut sm = VoiceStateMachine::new();
        sm.transition(Connecting);
        sm.transition(Error);
        assert_eq!(sm.transition(Connecting), None);
        assert_eq!(sm.current(), Error);
    }

    #[test]
    fn test_reset_clears_voice_mode() {
        let mut sm = VoiceStateMachine::new();
        sm.set_voice_mode(true);
        sm.transition(Connecting);
        assert_eq!(sm.reset(), Some((Connecting, Idle)));
        assert!(!sm.voice_mode());
        assert_eq!(sm.reset(), None);
    }
}
