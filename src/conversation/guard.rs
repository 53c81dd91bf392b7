//! Single lock over the conversation state and the synthesis language
//!
//! Recognition, dispatch and playback complete on different tasks. Every
//! read used for input enablement and every state transition goes through
//! this guard, which also publishes state changes to UI collaborators.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};

use super::{BusyFlags, ConversationEvent, ConversationState};
use crate::language::LanguageTag;

/// Capacity of the event broadcast buffer
const EVENT_CAPACITY: usize = 64;

/// State protected by the guard
#[derive(Debug)]
struct Shared {
    state: ConversationState,
    /// Id of the most recently admitted turn
    turn: u64,
    language: LanguageTag,
}

/// Shared handle to the conversation state
#[derive(Debug, Clone)]
pub struct ConversationGuard {
    inner: Arc<Mutex<Shared>>,
    state_tx: Arc<watch::Sender<ConversationState>>,
    events: broadcast::Sender<ConversationEvent>,
}

impl ConversationGuard {
    /// Create an idle guard with the given synthesis language
    #[must_use]
    pub fn new(language: LanguageTag) -> Self {
        let (state_tx, _) = watch::channel(ConversationState::Idle);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            inner: Arc::new(Mutex::new(Shared {
                state: ConversationState::Idle,
                turn: 0,
                language,
            })),
            state_tx: Arc::new(state_tx),
            events,
        }
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> ConversationState {
        self.inner.lock().state
    }

    /// Current busy flags
    #[must_use]
    pub fn flags(&self) -> BusyFlags {
        self.state().flags()
    }

    /// Whether the user may start a turn
    #[must_use]
    pub fn input_enabled(&self) -> bool {
        self.state().is_idle()
    }

    /// Id of the most recently admitted turn (0 before the first)
    #[must_use]
    pub fn turn(&self) -> u64 {
        self.inner.lock().turn
    }

    /// Language the next synthesis will use
    #[must_use]
    pub fn language(&self) -> LanguageTag {
        self.inner.lock().language
    }

    /// Overwrite the synthesis language, returning the previous one
    pub fn set_language(&self, language: LanguageTag) -> LanguageTag {
        let mut shared = self.inner.lock();
        let previous = std::mem::replace(&mut shared.language, language);
        if previous != language {
            tracing::debug!(%previous, %language, "synthesis language changed");
        }
        previous
    }

    /// Watch state changes (coalesced to the latest value)
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<ConversationState> {
        self.state_tx.subscribe()
    }

    /// Subscribe to every conversation event
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ConversationEvent> {
        self.events.subscribe()
    }

    /// Publish an event; dropped when nobody is subscribed
    pub fn emit(&self, event: ConversationEvent) {
        let _ = self.events.send(event);
    }

    /// Start a new turn by leaving `Idle` for `to`
    ///
    /// Returns the new turn id, or `None` when a turn is already in progress.
    /// Requests made while busy are dropped, never queued.
    pub fn admit(&self, to: ConversationState) -> Option<u64> {
        let mut shared = self.inner.lock();
        if !shared.state.is_idle() || !shared.state.can_transition_to(to) {
            return None;
        }
        shared.turn += 1;
        self.apply(&mut shared, to);
        Some(shared.turn)
    }

    /// Move turn `turn` from `from` to `to`
    ///
    /// Fails without side effects if another turn has been admitted since,
    /// the state is no longer `from`, or the transition is illegal.
    pub fn advance(&self, turn: u64, from: ConversationState, to: ConversationState) -> bool {
        let mut shared = self.inner.lock();
        if shared.turn != turn || shared.state != from || !from.can_transition_to(to) {
            return false;
        }
        self.apply(&mut shared, to);
        true
    }

    /// Enter `Speaking` for an incoming reply
    ///
    /// A reply to the pending turn continues it; a reply while idle opens a
    /// new turn. Any other state is returned as the error.
    pub fn begin_speaking(&self) -> Result<u64, ConversationState> {
        let mut shared = self.inner.lock();
        match shared.state {
            ConversationState::Idle => {
                shared.turn += 1;
            }
            ConversationState::Dispatching => {}
            other => return Err(other),
        }
        self.apply(&mut shared, ConversationState::Speaking);
        Ok(shared.turn)
    }

    fn apply(&self, shared: &mut Shared, to: ConversationState) {
        let from = std::mem::replace(&mut shared.state, to);
        self.state_tx.send_replace(to);
        tracing::debug!(turn = shared.turn, %from, %to, "conversation state changed");
        self.emit(ConversationEvent::StateChanged {
            turn: shared.turn,
            from,
            to,
        });
    }
}

impl Default for ConversationGuard {
    fn default() -> Self {
        Self::new(LanguageTag::default())
    }
}
