//! Bot Framework Direct Line 3.0 channel
//!
//! Opens a conversation with the bot, posts user messages as activities and
//! polls the activity set for bot replies using the watermark.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::{DialogueChannel, ReplyHandler, ReplyMessage, ReplySlot};
use crate::{Error, Result};

/// Public Direct Line endpoint
pub const DEFAULT_BASE_URL: &str = "https://directline.botframework.com";

/// Response to starting a conversation
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConversationResponse {
    conversation_id: String,
    token: Option<String>,
}

/// Page of activities returned by a poll
#[derive(Debug, Deserialize)]
struct ActivitySet {
    #[serde(default)]
    activities: Vec<Activity>,
    watermark: Option<String>,
}

/// Bot Framework activity
#[derive(Debug, Clone, Deserialize)]
pub struct Activity {
    /// Activity type (message, typing, conversationUpdate, ...)
    #[serde(rename = "type")]
    pub activity_type: String,
    /// Activity ID
    pub id: Option<String>,
    /// Sender
    pub from: Option<ChannelAccount>,
    /// Message text
    pub text: Option<String>,
}

/// Channel account (user or bot)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChannelAccount {
    /// Account ID
    pub id: String,
    /// Display name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Outgoing message activity
#[derive(Debug, Serialize)]
struct OutgoingActivity<'a> {
    #[serde(rename = "type")]
    activity_type: &'static str,
    from: &'a ChannelAccount,
    text: &'a str,
}

/// Open conversation
#[derive(Debug)]
struct Session {
    conversation_id: String,
    token: String,
    watermark: Option<String>,
}

/// Direct Line channel adapter
#[derive(Clone)]
pub struct DirectLineChannel {
    secret: String,
    base_url: String,
    user: ChannelAccount,
    client: reqwest::Client,
    session: Arc<Mutex<Option<Session>>>,
    replies: Arc<ReplySlot>,
}

impl DirectLineChannel {
    /// Create a new Direct Line channel
    ///
    /// # Arguments
    ///
    /// * `secret` - Direct Line channel secret from the bot registration
    /// * `user_id` - Id this client posts activities as
    ///
    /// # Errors
    ///
    /// Returns error if the secret is empty
    pub fn new(secret: String, user_id: String) -> Result<Self> {
        if secret.is_empty() {
            return Err(Error::Config("Direct Line secret required".to_string()));
        }

        Ok(Self {
            secret,
            base_url: DEFAULT_BASE_URL.to_string(),
            user: ChannelAccount {
                id: user_id,
                name: None,
            },
            client: crate::http::client()?,
            session: Arc::new(Mutex::new(None)),
            replies: Arc::new(ReplySlot::new()),
        })
    }

    /// Use a different Direct Line endpoint (regional or test server)
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Id this client posts activities as
    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.user.id
    }

    /// Conversation id, once connected
    pub async fn conversation_id(&self) -> Option<String> {
        self.session
            .lock()
            .await
            .as_ref()
            .map(|s| s.conversation_id.clone())
    }

    /// Spawn a background task that polls for bot replies every `interval`
    pub fn start_polling(&self, interval: Duration) -> tokio::task::JoinHandle<()> {
        let channel = self.clone();

        tokio::spawn(async move {
            tracing::info!(interval_ms = interval.as_millis(), "direct line polling started");
            loop {
                if let Err(e) = channel.poll_once().await {
                    tracing::warn!(error = %e, "direct line poll failed");
                }
                tokio::time::sleep(interval).await;
            }
        })
    }

    /// Fetch activities after the current watermark and deliver bot replies
    ///
    /// Returns the number of replies handed to the reply handler.
    ///
    /// # Errors
    ///
    /// Returns error if not connected or the request fails
    pub async fn poll_once(&self) -> Result<usize> {
        let (conversation_id, token, watermark) = {
            let session = self.session.lock().await;
            let session = session
                .as_ref()
                .ok_or_else(|| Error::Channel("direct line not connected".to_string()))?;
            (
                session.conversation_id.clone(),
                session.token.clone(),
                session.watermark.clone(),
            )
        };

        let url = format!(
            "{}/v3/directline/conversations/{conversation_id}/activities",
            self.base_url
        );
        let mut request = self.client.get(&url).bearer_auth(&token);
        if let Some(watermark) = &watermark {
            request = request.query(&[("watermark", watermark)]);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Channel(format!(
                "direct line poll error {status}: {body}"
            )));
        }

        let set: ActivitySet = response.json().await?;

        if let Some(next) = set.watermark {
            if let Some(session) = self.session.lock().await.as_mut() {
                session.watermark = Some(next);
            }
        }

        let mut delivered = 0;
        for activity in set.activities {
            if let Some(reply) = self.reply_from(activity) {
                tracing::debug!(id = ?reply.id, "bot reply received");
                if self.replies.deliver(reply) {
                    delivered += 1;
                }
            }
        }

        Ok(delivered)
    }

    /// Convert a bot `message` activity into a reply; skips our own echoes
    fn reply_from(&self, activity: Activity) -> Option<ReplyMessage> {
        if activity.activity_type != "message" {
            return None;
        }
        if activity
            .from
            .as_ref()
            .is_some_and(|from| from.id == self.user.id)
        {
            return None;
        }
        let text = activity.text.filter(|t| !t.trim().is_empty())?;

        Some(ReplyMessage {
            id: activity.id,
            from: activity.from.map(|f| f.name.unwrap_or(f.id)),
            text,
        })
    }
}

#[async_trait]
impl DialogueChannel for DirectLineChannel {
    fn name(&self) -> &'static str {
        "directline"
    }

    async fn connect(&self) -> Result<()> {
        let response = self
            .client
            .post(format!("{}/v3/directline/conversations", self.base_url))
            .bearer_auth(&self.secret)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Channel(format!(
                "direct line connect error {status}: {body}"
            )));
        }

        let conversation: ConversationResponse = response.json().await?;
        tracing::info!(
            conversation_id = %conversation.conversation_id,
            user_id = %self.user.id,
            "direct line conversation started"
        );

        *self.session.lock().await = Some(Session {
            conversation_id: conversation.conversation_id,
            token: conversation.token.unwrap_or_else(|| self.secret.clone()),
            watermark: None,
        });

        Ok(())
    }

    async fn send(&self, text: &str) -> Result<()> {
        let (conversation_id, token) = {
            let session = self.session.lock().await;
            let session = session
                .as_ref()
                .ok_or_else(|| Error::Channel("direct line not connected".to_string()))?;
            (session.conversation_id.clone(), session.token.clone())
        };

        let activity = OutgoingActivity {
            activity_type: "message",
            from: &self.user,
            text,
        };

        let response = self
            .client
            .post(format!(
                "{}/v3/directline/conversations/{conversation_id}/activities",
                self.base_url
            ))
            .bearer_auth(&token)
            .json(&activity)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Channel(format!(
                "direct line send error {status}: {body}"
            )));
        }

        tracing::debug!(chars = text.len(), "activity posted");
        Ok(())
    }

    fn set_reply_handler(&self, handler: ReplyHandler) {
        self.replies.replace(handler);
    }
}
