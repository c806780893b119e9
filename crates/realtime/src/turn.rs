//! Conversation turn state machine.
//!
//! A single authoritative value driven by capture, playback, and transport
//! signals. Undeclared combinations are logged and ignored; the machine never
//! raises.

use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    Listening,
    Thinking,
    Speaking,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnEvent {
    /// A capture segment was armed.
    CaptureStarted,
    /// The segment was committed and a response requested.
    CaptureCommitted,
    /// The first audio chunk of a response arrived.
    AssistantAudioStarted,
    /// The response reached its terminal event.
    ResponseCompleted { had_audio: bool },
    /// The rendered reply finished playing.
    PlaybackFinished,
    /// The user started speaking over the assistant.
    BargeIn,
}

#[derive(Debug)]
pub struct TurnTracker {
    state: TurnState,
}

impl TurnTracker {
    pub fn new() -> Self {
        Self {
            state: TurnState::Idle,
        }
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    /// Applies one event, returning the new state when a declared transition
    /// fired and `None` when the event was ignored.
    pub fn apply(&mut self, event: TurnEvent) -> Option<TurnState> {
        use TurnEvent::*;
        use TurnState::*;

        let next = match (self.state, event) {
            (Idle, CaptureStarted) => Listening,
            (Listening, CaptureCommitted) => Thinking,
            (Thinking, AssistantAudioStarted) => Speaking,
            (Thinking, ResponseCompleted { had_audio: false }) => Idle,
            (Speaking, PlaybackFinished) => Idle,
            (Speaking, BargeIn) => Listening,
            (state, event) => {
                trace!(?state, ?event, "no declared turn transition; ignoring");
                return None;
            }
        };
        debug!(from = ?self.state, to = ?next, "turn transition");
        self.state = next;
        Some(next)
    }
}

impl Default for TurnTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn voiced_exchange_walks_the_full_cycle() {
        let mut turn = TurnTracker::new();
        assert_eq!(turn.apply(TurnEvent::CaptureStarted), Some(TurnState::Listening));
        assert_eq!(turn.apply(TurnEvent::CaptureCommitted), Some(TurnState::Thinking));
        assert_eq!(
            turn.apply(TurnEvent::AssistantAudioStarted),
            Some(TurnState::Speaking)
        );
        assert_eq!(turn.apply(TurnEvent::PlaybackFinished), Some(TurnState::Idle));
    }

    #[test]
    fn silent_response_returns_to_idle_from_thinking() {
        let mut turn = TurnTracker::new();
        turn.apply(TurnEvent::CaptureStarted);
        turn.apply(TurnEvent::CaptureCommitted);
        assert_eq!(
            turn.apply(TurnEvent::ResponseCompleted { had_audio: false }),
            Some(TurnState::Idle)
        );
    }

    #[test]
    fn barge_in_moves_speaking_to_listening() {
        let mut turn = TurnTracker::new();
        turn.apply(TurnEvent::CaptureStarted);
        turn.apply(TurnEvent::CaptureCommitted);
        turn.apply(TurnEvent::AssistantAudioStarted);
        assert_eq!(turn.apply(TurnEvent::BargeIn), Some(TurnState::Listening));
    }

    #[test]
    fn undeclared_events_leave_the_state_untouched() {
        let mut turn = TurnTracker::new();
        assert_eq!(turn.apply(TurnEvent::PlaybackFinished), None);
        assert_eq!(turn.apply(TurnEvent::BargeIn), None);
        assert_eq!(turn.state(), TurnState::Idle);

        turn.apply(TurnEvent::CaptureStarted);
        turn.apply(TurnEvent::CaptureCommitted);
        turn.apply(TurnEvent::AssistantAudioStarted);
        // A completed response while audio is still rendering changes nothing.
        assert_eq!(turn.apply(TurnEvent::ResponseCompleted { had_audio: true }), None);
        assert_eq!(turn.state(), TurnState::Speaking);
    }
}
