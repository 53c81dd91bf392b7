//! Events published by the conversation guard
//!
//! UI and logging collaborators subscribe to these; nothing in the turn flow
//! depends on anyone listening.

use super::ConversationState;
use crate::language::LanguageTag;

/// Something that happened during a conversation turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversationEvent {
    /// The guard moved between two states
    StateChanged {
        /// Turn the transition belongs to
        turn: u64,
        /// Previous state
        from: ConversationState,
        /// New state
        to: ConversationState,
    },
    /// An utterance was recognized
    Recognized(String),
    /// Text was handed to the dialogue channel
    Dispatched(String),
    /// A reply from the agent is about to be spoken
    ReplyReceived(String),
    /// The language used for synthesis of the current reply
    LanguageResolved(LanguageTag),
    /// Playback of a reply ended
    PlaybackFinished {
        /// Samples decoded for the device
        samples: usize,
        /// Whether the reply exceeded the playback cap
        truncated: bool,
    },
    /// A turn ended early or degraded
    Diagnostic(Diagnostic),
}

/// Category of a [`Diagnostic`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagnosticKind {
    /// Recognition produced no transcript
    NoMatch,
    /// The recognition engine canceled
    RecognitionCanceled,
    /// The dialogue channel rejected the message
    DispatchFailed,
    /// The agent never replied
    DispatchTimedOut,
    /// A reply arrived while another phase was active
    ReplySkipped,
    /// Language detection failed, prior language kept
    LanguageDetectionFailed,
    /// The synthesis engine failed or stopped streaming
    SynthesisCanceled,
    /// The playback device failed
    PlaybackFailed,
}

/// A user-facing diagnostic message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// What went wrong
    pub kind: DiagnosticKind,
    /// Human-readable detail
    pub message: String,
}

impl Diagnostic {
    /// Create a diagnostic
    #[must_use]
    pub fn new(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}
