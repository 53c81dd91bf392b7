//! Dialogue agent channel
//!
//! A channel sends user text to the remote agent and delivers its replies to
//! exactly one registered handler.

mod direct_line;
mod sentinel;

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

pub use direct_line::{Activity, ChannelAccount, DEFAULT_BASE_URL, DirectLineChannel};
pub use sentinel::{SentinelFilter, WELCOME_BANNER};

use crate::Result;

/// A reply from the dialogue agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyMessage {
    /// Activity identifier (if the channel provides one)
    pub id: Option<String>,

    /// Sender display name or id
    pub from: Option<String>,

    /// Reply text
    pub text: String,
}

impl ReplyMessage {
    /// Create a reply carrying only text
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            id: None,
            from: None,
            text: text.into(),
        }
    }
}

/// Callback invoked once per inbound reply
pub type ReplyHandler = Arc<dyn Fn(ReplyMessage) + Send + Sync>;

/// Trait for dialogue agent channels
#[async_trait]
pub trait DialogueChannel: Send + Sync {
    /// Get the channel name
    fn name(&self) -> &'static str;

    /// Open the conversation with the agent
    ///
    /// Default implementation is a no-op for channels without a session
    async fn connect(&self) -> Result<()> {
        Ok(())
    }

    /// Send user text to the agent
    async fn send(&self, text: &str) -> Result<()>;

    /// Register the reply handler, replacing any previous one
    fn set_reply_handler(&self, handler: ReplyHandler);
}

/// Holds the single reply handler of a channel
#[derive(Default)]
pub struct ReplySlot {
    handler: RwLock<Option<ReplyHandler>>,
}

impl ReplySlot {
    /// Create an empty slot
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `handler`, returning whether one was replaced
    pub fn replace(&self, handler: ReplyHandler) -> bool {
        let replaced = self.handler.write().replace(handler).is_some();
        if replaced {
            tracing::debug!("reply handler replaced");
        }
        replaced
    }

    /// Hand `message` to the registered handler
    ///
    /// Returns `false` (and drops the message) when no handler is registered.
    pub fn deliver(&self, message: ReplyMessage) -> bool {
        // Clone out so the handler runs without the lock held
        let handler = self.handler.read().clone();
        if let Some(handler) = handler {
            handler(message);
            true
        } else {
            tracing::debug!(text = %message.text, "no reply handler registered, dropping reply");
            false
        }
    }
}

impl std::fmt::Debug for ReplySlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplySlot")
            .field("registered", &self.handler.read().is_some())
            .finish()
    }
}
