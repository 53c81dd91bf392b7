//! Configuration management for Parley
//!
//! Values resolve as environment variable, then config file, then default.

pub mod file;

use std::path::Path;
use std::time::Duration;

use crate::dialogue::{SentinelFilter, DEFAULT_BASE_URL};
use crate::language::LanguageTag;
use crate::voice::VoiceNames;
use crate::{Error, Result};

/// Parley configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Speech resource
    pub speech: SpeechConfig,

    /// Language detection resource
    pub language: LanguageServiceConfig,

    /// Direct Line channel
    pub direct_line: DirectLineConfig,

    /// Turn handling
    pub conversation: ConversationConfig,
}

/// Speech resource configuration
#[derive(Debug, Clone)]
pub struct SpeechConfig {
    /// Subscription key (`AZURE_SPEECH_KEY`)
    pub key: Option<String>,

    /// Resource region (`AZURE_SPEECH_REGION`)
    pub region: Option<String>,

    /// Locale utterances are recognized in
    pub recognition_language: String,

    /// Voice per synthesis language
    pub voices: VoiceNames,
}

impl SpeechConfig {
    /// Key and region, or an error naming what is missing
    ///
    /// # Errors
    ///
    /// Returns error if either value is unset
    pub fn credentials(&self) -> Result<(&str, &str)> {
        let key = self
            .key
            .as_deref()
            .ok_or_else(|| Error::Config("AZURE_SPEECH_KEY is not set".to_string()))?;
        let region = self
            .region
            .as_deref()
            .ok_or_else(|| Error::Config("AZURE_SPEECH_REGION is not set".to_string()))?;
        Ok((key, region))
    }
}

/// Language detection resource configuration
#[derive(Debug, Clone, Default)]
pub struct LanguageServiceConfig {
    /// Resource endpoint (`AZURE_LANGUAGE_ENDPOINT`)
    pub endpoint: Option<String>,

    /// Subscription key (`AZURE_LANGUAGE_KEY`)
    pub key: Option<String>,
}

impl LanguageServiceConfig {
    /// Endpoint and key when both are set
    #[must_use]
    pub fn credentials(&self) -> Option<(&str, &str)> {
        Some((self.endpoint.as_deref()?, self.key.as_deref()?))
    }
}

/// Direct Line configuration
#[derive(Debug, Clone)]
pub struct DirectLineConfig {
    /// Channel secret (`DIRECT_LINE_SECRET`)
    pub secret: Option<String>,

    /// Service base URL (`DIRECT_LINE_ENDPOINT`)
    pub endpoint: String,

    /// User id activities are posted as (`PARLEY_USER_ID`)
    pub user_id: String,

    /// Reply polling interval
    pub poll_interval: Duration,
}

/// Turn handling configuration
#[derive(Debug, Clone)]
pub struct ConversationConfig {
    /// Synthesis language before the first successful detection
    pub initial_language: LanguageTag,

    /// How long synthesis waits for language detection
    pub detection_timeout: Duration,

    /// How long a dispatched turn waits for a reply; `None` waits forever
    pub dispatch_timeout: Option<Duration>,

    /// Longest reply that will be played
    pub max_playback: Duration,

    /// Replies that are never spoken
    pub sentinels: SentinelFilter,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            initial_language: LanguageTag::ZhTw,
            detection_timeout: Duration::from_secs(5),
            dispatch_timeout: Some(Duration::from_secs(30)),
            max_playback: Duration::from_secs(600),
            sentinels: SentinelFilter::default(),
        }
    }
}

impl Config {
    /// Load configuration from the environment and a config file
    ///
    /// With an explicit `path` the file must exist and parse; otherwise the
    /// standard path is tried and silently skipped when absent.
    ///
    /// # Errors
    ///
    /// Returns error if an explicit config file is unreadable or a value is invalid
    pub fn load(path: Option<&Path>) -> Result<Self> {
        // env > toml > default
        let fc = match path {
            Some(path) => file::read_config_file(path)?,
            None => file::load_config_file(),
        };

        Self::resolve(fc, |name| std::env::var(name).ok())
    }

    /// Resolve a parsed config file against an environment lookup
    ///
    /// # Errors
    ///
    /// Returns error if a value is invalid
    pub fn resolve(
        fc: file::ParleyConfigFile,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        // Empty variables count as unset
        let env = |name: &str| env(name).filter(|v| !v.trim().is_empty());

        let speech = SpeechConfig {
            key: env("AZURE_SPEECH_KEY").or(fc.speech.key),
            region: env("AZURE_SPEECH_REGION").or(fc.speech.region),
            recognition_language: fc
                .speech
                .recognition_language
                .unwrap_or_else(|| "en-US".to_string()),
            voices: fc.speech.voices.unwrap_or_default(),
        };

        let language = LanguageServiceConfig {
            endpoint: env("AZURE_LANGUAGE_ENDPOINT").or(fc.language.endpoint),
            key: env("AZURE_LANGUAGE_KEY").or(fc.language.key),
        };

        let direct_line = DirectLineConfig {
            secret: env("DIRECT_LINE_SECRET").or(fc.direct_line.secret),
            endpoint: env("DIRECT_LINE_ENDPOINT")
                .or(fc.direct_line.endpoint)
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            user_id: env("PARLEY_USER_ID")
                .or(fc.direct_line.user_id)
                .unwrap_or_else(|| format!("parley-{}", uuid::Uuid::new_v4().simple())),
            poll_interval: Duration::from_millis(fc.direct_line.poll_interval_ms.unwrap_or(1000)),
        };
        if direct_line.poll_interval.is_zero() {
            return Err(Error::Config("poll_interval_ms must be positive".to_string()));
        }

        let defaults = ConversationConfig::default();
        let initial_language = fc
            .language
            .initial
            .as_deref()
            .map(str::parse::<LanguageTag>)
            .transpose()?
            .unwrap_or(defaults.initial_language);

        let sentinels = match (
            fc.conversation.sentinel_exact,
            fc.conversation.sentinel_substrings,
        ) {
            (None, None) => defaults.sentinels,
            (exact, substrings) => {
                let fallback = SentinelFilter::default();
                SentinelFilter::new(
                    exact.unwrap_or_else(|| fallback.exact().to_vec()),
                    substrings.unwrap_or_else(|| fallback.substrings().to_vec()),
                )
            }
        };

        let conversation = ConversationConfig {
            initial_language,
            detection_timeout: fc
                .language
                .detection_timeout_ms
                .map_or(defaults.detection_timeout, Duration::from_millis),
            dispatch_timeout: match fc.conversation.dispatch_timeout_secs {
                Some(0) => None,
                Some(secs) => Some(Duration::from_secs(secs)),
                None => defaults.dispatch_timeout,
            },
            max_playback: fc
                .conversation
                .max_playback_secs
                .map_or(defaults.max_playback, Duration::from_secs),
            sentinels,
        };

        if conversation.max_playback.is_zero() {
            return Err(Error::Config("max_playback_secs must be positive".to_string()));
        }

        Ok(Self {
            speech,
            language,
            direct_line,
            conversation,
        })
    }
}
