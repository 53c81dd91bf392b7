//! Conversation state and the busy flags derived from it

use std::fmt;

/// Phase of the current conversation turn
///
/// Exactly one state holds at any instant. Transitions are checked against
/// [`ConversationState::can_transition_to`] by the guard.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ConversationState {
    /// No turn in progress, input enabled
    #[default]
    Idle,
    /// Capturing and recognizing one utterance
    Listening,
    /// Message sent to the dialogue agent, waiting for the reply
    Dispatching,
    /// Synthesizing and playing the reply
    Speaking,
}

impl ConversationState {
    /// Whether `self -> next` is a legal transition
    ///
    /// `Idle -> Dispatching` is the typed-input path and `Idle -> Speaking`
    /// covers replies the agent pushes without a pending turn.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::Listening | Self::Dispatching | Self::Speaking)
                | (Self::Listening, Self::Dispatching | Self::Idle)
                | (Self::Dispatching, Self::Speaking | Self::Idle)
                | (Self::Speaking, Self::Idle)
        )
    }

    /// Whether no turn is in progress
    #[must_use]
    pub const fn is_idle(self) -> bool {
        matches!(self, Self::Idle)
    }

    /// Busy flags for UI enablement
    #[must_use]
    pub const fn flags(self) -> BusyFlags {
        BusyFlags {
            recognizing: matches!(self, Self::Listening),
            dispatching: matches!(self, Self::Dispatching),
            speaking: matches!(self, Self::Speaking),
        }
    }

    /// Lowercase name used in logs
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Listening => "listening",
            Self::Dispatching => "dispatching",
            Self::Speaking => "speaking",
        }
    }
}

impl fmt::Display for ConversationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only view of the conversation state as three flags
///
/// At most one flag is set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[allow(clippy::struct_excessive_bools)]
pub struct BusyFlags {
    /// Waiting on speech recognition
    pub recognizing: bool,
    /// Waiting on the dialogue agent
    pub dispatching: bool,
    /// Playing synthesized speech
    pub speaking: bool,
}

impl BusyFlags {
    /// Whether any phase of a turn is active
    #[must_use]
    pub const fn any(self) -> bool {
        self.recognizing || self.dispatching || self.speaking
    }
}
