//! Parley - Voice front-end for remote dialogue agents
//!
//! This library provides the core functionality for Parley:
//! - Conversation state machine (listen, dispatch, speak)
//! - Streaming playback of synthesized PCM
//! - Reply language detection
//! - Bot Framework Direct Line channel
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                     Operator                         │
//! │        Microphone  │  Speaker  │  Typed input        │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                   Orchestrator                       │
//! │   Guard  │  STT  │  Language  │  TTS  │  PCM ring    │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │              Remote services                         │
//! │   Speech  │  Text Analytics  │  Direct Line bot      │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod conversation;
pub mod dialogue;
pub mod error;
mod http;
pub mod language;
pub mod voice;

pub use config::Config;
pub use conversation::{
    ConversationEvent, ConversationState, Orchestrator, ReplyOutcome, TurnOutcome,
};
pub use error::{Error, Result};
pub use language::LanguageTag;
