//! Speech-to-text (STT) recognition
//!
//! One call captures one utterance and returns it with its outcome. Failures
//! are reported as a canceled outcome rather than an error so that the
//! conversation can always return to idle.

use std::fmt;

use async_trait::async_trait;
use serde::Deserialize;

use super::wav::samples_to_wav;
use crate::{Error, Result};

/// Why recognition was canceled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancellationReason {
    /// Engine, network or device failure
    Error,
    /// Audio ended before an utterance completed
    EndOfStream,
}

impl fmt::Display for CancellationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Error => "Error",
            Self::EndOfStream => "EndOfStream",
        })
    }
}

/// Details of a canceled recognition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancellationDetails {
    /// Cancellation reason
    pub reason: CancellationReason,
    /// Engine or network detail
    pub error_details: String,
}

impl fmt::Display for CancellationDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Reason={} ErrorDetails={}",
            self.reason, self.error_details
        )
    }
}

/// How a recognition attempt ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionOutcome {
    /// Speech was transcribed
    Recognized,
    /// Audio contained no recognizable speech
    NoMatch,
    /// Recognition stopped early
    Canceled(CancellationDetails),
}

/// Result of recognizing one utterance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utterance {
    /// Transcript (empty unless recognized)
    pub text: String,
    /// Outcome
    pub outcome: RecognitionOutcome,
}

impl Utterance {
    /// A recognized utterance
    #[must_use]
    pub fn recognized(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            outcome: RecognitionOutcome::Recognized,
        }
    }

    /// No speech could be recognized
    #[must_use]
    pub const fn no_match() -> Self {
        Self {
            text: String::new(),
            outcome: RecognitionOutcome::NoMatch,
        }
    }

    /// Recognition was canceled
    #[must_use]
    pub fn canceled(reason: CancellationReason, error_details: impl Into<String>) -> Self {
        Self {
            text: String::new(),
            outcome: RecognitionOutcome::Canceled(CancellationDetails {
                reason,
                error_details: error_details.into(),
            }),
        }
    }
}

/// Recognizes a single utterance
#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    /// Listen until the utterance ends (silence or timeout) and transcribe it
    async fn recognize_once(&self) -> Utterance;
}

/// Source of one endpointed utterance of audio
#[async_trait]
pub trait UtteranceCapture: Send + Sync {
    /// Capture one utterance; `None` when no speech started before the timeout
    async fn capture_utterance(&self) -> Result<Option<Vec<f32>>>;

    /// Sample rate of captured audio
    fn sample_rate(&self) -> u32;
}

/// Response from the short-audio recognition API (simple format)
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RecognitionResponse {
    recognition_status: String,
    #[serde(default)]
    display_text: String,
}

/// Azure Speech short-audio REST recognizer
pub struct AzureSpeechRecognizer<C> {
    capture: C,
    client: reqwest::Client,
    key: String,
    endpoint: String,
    language: String,
}

impl<C: UtteranceCapture> AzureSpeechRecognizer<C> {
    /// Create a recognizer that transcribes audio from `capture`
    ///
    /// # Errors
    ///
    /// Returns error if the key or region is empty
    pub fn new(capture: C, key: String, region: &str, language: &str) -> Result<Self> {
        if key.is_empty() {
            return Err(Error::Config("speech key required for STT".to_string()));
        }
        if region.trim().is_empty() {
            return Err(Error::Config("speech region required for STT".to_string()));
        }

        Ok(Self {
            capture,
            client: crate::http::client()?,
            key,
            endpoint: format!(
                "https://{}.stt.speech.microsoft.com/speech/recognition/conversation/cognitiveservices/v1",
                region.trim()
            ),
            language: language.to_string(),
        })
    }

    /// Override the recognition endpoint
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Transcribe WAV audio
    ///
    /// # Errors
    ///
    /// Returns error if the request fails or the service rejects it
    pub async fn transcribe(&self, wav: Vec<u8>, sample_rate: u32) -> Result<Utterance> {
        tracing::debug!(audio_bytes = wav.len(), language = %self.language, "starting transcription");

        let response = self
            .client
            .post(&self.endpoint)
            .query(&[("language", self.language.as_str()), ("format", "simple")])
            .header("Ocp-Apim-Subscription-Key", &self.key)
            .header(
                "Content-Type",
                format!("audio/wav; codecs=audio/pcm; samplerate={sample_rate}"),
            )
            .header("Accept", "application/json")
            .body(wav)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "recognition API error");
            return Err(Error::Stt(format!("recognition error {status}: {body}")));
        }

        let result: RecognitionResponse = response.json().await?;

        let utterance = match result.recognition_status.as_str() {
            "Success" => Utterance::recognized(result.display_text),
            "NoMatch" | "InitialSilenceTimeout" | "BabbleTimeout" => Utterance::no_match(),
            "EndOfDictation" => Utterance::canceled(
                CancellationReason::EndOfStream,
                "audio ended before an utterance completed",
            ),
            other => Utterance::canceled(
                CancellationReason::Error,
                format!("recognition status {other}"),
            ),
        };

        tracing::info!(transcript = %utterance.text, outcome = ?utterance.outcome, "transcription complete");
        Ok(utterance)
    }
}

#[async_trait]
impl<C: UtteranceCapture> SpeechRecognizer for AzureSpeechRecognizer<C> {
    async fn recognize_once(&self) -> Utterance {
        let samples = match self.capture.capture_utterance().await {
            Ok(Some(samples)) => samples,
            Ok(None) => return Utterance::no_match(),
            Err(e) => return Utterance::canceled(CancellationReason::Error, e.to_string()),
        };

        let sample_rate = self.capture.sample_rate();
        let wav = match samples_to_wav(&samples, sample_rate) {
            Ok(wav) => wav,
            Err(e) => return Utterance::canceled(CancellationReason::Error, e.to_string()),
        };

        self.transcribe(wav, sample_rate)
            .await
            .unwrap_or_else(|e| Utterance::canceled(CancellationReason::Error, e.to_string()))
    }
}

/// Recognizer for hosts without a microphone
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableRecognizer;

#[async_trait]
impl SpeechRecognizer for UnavailableRecognizer {
    async fn recognize_once(&self) -> Utterance {
        Utterance::canceled(
            CancellationReason::Error,
            "no audio input available (headless mode)",
        )
    }
}
