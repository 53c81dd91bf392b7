//! Conversation orchestration
//!
//! Sequences recognize, dispatch, detect, synthesize and play for each turn
//! under a single guard.

mod events;
mod guard;
mod orchestrator;
mod state;

pub use events::{ConversationEvent, Diagnostic, DiagnosticKind};
pub use guard::ConversationGuard;
pub use orchestrator::{Orchestrator, OrchestratorBuilder, ReplyOutcome, TurnOutcome};
pub use state::{BusyFlags, ConversationState};
