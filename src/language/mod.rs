//! Reply language detection
//!
//! Replies are classified by a remote service and mapped onto the three
//! languages the synthesizer has voices for. The resolved tag is written to
//! the conversation guard, where synthesis reads it.

mod text_analytics;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use text_analytics::TextAnalyticsClassifier;

use crate::conversation::ConversationGuard;
use crate::{Error, Result};

/// Synthesis language
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LanguageTag {
    /// English (United States)
    #[serde(rename = "en-US")]
    EnUs,
    /// Japanese
    #[serde(rename = "ja-JP")]
    JaJp,
    /// Chinese (Taiwan), also the fallback for unsupported languages
    #[default]
    #[serde(rename = "zh-TW")]
    ZhTw,
}

impl LanguageTag {
    /// Every supported tag
    pub const ALL: [Self; 3] = [Self::EnUs, Self::JaJp, Self::ZhTw];

    /// BCP-47 form of the tag
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::EnUs => "en-US",
            Self::JaJp => "ja-JP",
            Self::ZhTw => "zh-TW",
        }
    }

    /// Map a classifier language code onto a supported tag
    ///
    /// Only the primary subtag is considered, so "en", "EN" and "en-GB" all
    /// map to `en-US`. Anything unrecognized falls back to `zh-TW`.
    #[must_use]
    pub fn from_code(code: &str) -> Self {
        let primary = code
            .trim()
            .split(['-', '_'])
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase();

        match primary.as_str() {
            "en" => Self::EnUs,
            "ja" => Self::JaJp,
            _ => Self::ZhTw,
        }
    }
}

impl fmt::Display for LanguageTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LanguageTag {
    type Err = Error;

    /// Parse an exact tag such as "ja-JP" (case-insensitive)
    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|tag| tag.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                Error::Config(format!(
                    "unsupported language tag {s:?} (expected en-US, ja-JP or zh-TW)"
                ))
            })
    }
}

/// Remote text classification service
#[async_trait]
pub trait LanguageClassifier: Send + Sync {
    /// Return the raw language code detected for `text` (e.g. "en")
    async fn classify(&self, text: &str) -> Result<String>;
}

/// Resolves the synthesis language of reply text
#[derive(Clone)]
pub struct LanguageDetector {
    classifier: Arc<dyn LanguageClassifier>,
    guard: ConversationGuard,
}

impl LanguageDetector {
    /// Create a detector that writes its results to `guard`
    #[must_use]
    pub fn new(classifier: Arc<dyn LanguageClassifier>, guard: ConversationGuard) -> Self {
        Self { classifier, guard }
    }

    /// Classify `text` and store the mapped tag
    ///
    /// Returns `None` when classification fails; the stored tag is then left
    /// as it was.
    pub async fn detect(&self, text: &str) -> Option<LanguageTag> {
        match self.classifier.classify(text).await {
            Ok(code) => {
                let tag = LanguageTag::from_code(&code);
                self.guard.set_language(tag);
                tracing::debug!(code, %tag, "language detected");
                Some(tag)
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    kept = %self.guard.language(),
                    "language detection failed, keeping previous language"
                );
                None
            }
        }
    }
}
