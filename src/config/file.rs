//! TOML configuration file loading
//!
//! Supports `~/.config/parley/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::Result;
use crate::voice::VoiceNames;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct ParleyConfigFile {
    /// Speech resource (recognition and synthesis)
    #[serde(default)]
    pub speech: SpeechFileConfig,

    /// Language resource (reply language detection)
    #[serde(default)]
    pub language: LanguageFileConfig,

    /// Direct Line channel
    #[serde(default)]
    pub direct_line: DirectLineFileConfig,

    /// Turn handling
    #[serde(default)]
    pub conversation: ConversationFileConfig,
}

/// Speech resource configuration
#[derive(Debug, Default, Deserialize)]
pub struct SpeechFileConfig {
    /// Subscription key
    pub key: Option<String>,

    /// Resource region (e.g. "eastasia")
    pub region: Option<String>,

    /// Recognition locale (e.g. "en-US")
    pub recognition_language: Option<String>,

    /// Voice per synthesis language
    pub voices: Option<VoiceNames>,
}

/// Language resource configuration
#[derive(Debug, Default, Deserialize)]
pub struct LanguageFileConfig {
    /// Resource endpoint URL
    pub endpoint: Option<String>,

    /// Subscription key
    pub key: Option<String>,

    /// Synthesis language before the first detection ("en-US", "ja-JP", "zh-TW")
    pub initial: Option<String>,

    /// How long synthesis waits for detection
    pub detection_timeout_ms: Option<u64>,
}

/// Direct Line configuration
#[derive(Debug, Default, Deserialize)]
pub struct DirectLineFileConfig {
    /// Channel secret
    pub secret: Option<String>,

    /// Service base URL
    pub endpoint: Option<String>,

    /// User id to post as
    pub user_id: Option<String>,

    /// Reply polling interval
    pub poll_interval_ms: Option<u64>,
}

/// Turn handling configuration
#[derive(Debug, Default, Deserialize)]
pub struct ConversationFileConfig {
    /// Seconds to wait for a reply before re-enabling input (0 disables)
    pub dispatch_timeout_secs: Option<u64>,

    /// Longest reply that will be played
    pub max_playback_secs: Option<u64>,

    /// Replies never spoken (exact match); replaces the built-in list
    pub sentinel_exact: Option<Vec<String>>,

    /// Replies never spoken (substring match); replaces the built-in list
    pub sentinel_substrings: Option<Vec<String>>,
}

/// Read and parse a config file
///
/// # Errors
///
/// Returns error if the file cannot be read or is not valid TOML
pub fn read_config_file(path: &Path) -> Result<ParleyConfigFile> {
    let content = std::fs::read_to_string(path)?;
    let config = toml::from_str(&content)?;
    tracing::info!(path = %path.display(), "loaded config file");
    Ok(config)
}

/// Load the TOML config file from the standard path
///
/// Returns `ParleyConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> ParleyConfigFile {
    let Some(path) = config_file_path() else {
        return ParleyConfigFile::default();
    };

    if !path.exists() {
        return ParleyConfigFile::default();
    }

    match read_config_file(&path) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to load config file, using defaults"
            );
            ParleyConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/parley/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("parley").join("config.toml"))
}
