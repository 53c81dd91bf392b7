//! Turn orchestration
//!
//! `begin_turn` and `submit_text` are user initiated and run to the point of
//! dispatch. Replies arrive asynchronously through the dialogue channel and
//! drive detection, synthesis and playback.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch};

use super::{
    BusyFlags, ConversationEvent, ConversationGuard, ConversationState, Diagnostic,
    DiagnosticKind,
};
use crate::config::ConversationConfig;
use crate::dialogue::{DialogueChannel, ReplyMessage, SentinelFilter};
use crate::language::{LanguageClassifier, LanguageDetector, LanguageTag};
use crate::voice::{
    AudioSink, CancellationDetails, RecognitionOutcome, SpeechRecognizer, SpeechSynthesizer,
};
use crate::{Error, Result};

use ConversationState::{Dispatching, Idle, Listening, Speaking};

/// How a user-initiated turn ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Another turn was in progress; nothing happened
    Busy(ConversationState),
    /// Typed input was blank; nothing happened
    Empty,
    /// No speech was recognized
    NoMatch,
    /// Recognition was canceled
    Canceled(CancellationDetails),
    /// Text was sent; the reply arrives later
    Dispatched {
        /// Turn id
        turn: u64,
        /// Text sent to the agent
        text: String,
    },
    /// The channel rejected the message
    DispatchFailed(String),
}

/// How an inbound reply was handled
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyOutcome {
    /// Blank or sentinel text; not spoken
    Suppressed,
    /// Arrived while listening or speaking; not spoken
    Skipped(ConversationState),
    /// Reply was synthesized and played
    Spoken {
        /// Language used for synthesis
        language: LanguageTag,
        /// Samples played
        samples: usize,
        /// Playback hit the duration cap
        truncated: bool,
    },
    /// Synthesis could not start
    SynthesisFailed(String),
    /// Output device failed
    PlaybackFailed(String),
}

/// The conversation state machine
pub struct Orchestrator {
    guard: ConversationGuard,
    recognizer: Arc<dyn SpeechRecognizer>,
    channel: Arc<dyn DialogueChannel>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    sink: Arc<dyn AudioSink>,
    detector: Option<LanguageDetector>,
    sentinels: SentinelFilter,
    detection_timeout: Duration,
    dispatch_timeout: Option<Duration>,
}

impl Orchestrator {
    /// Start building an orchestrator
    #[must_use]
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::default()
    }

    /// Register this orchestrator as the channel's reply handler
    ///
    /// Replies are queued and handled one at a time, in arrival order, by a
    /// single task. That task holds only a weak reference, so dropping the
    /// orchestrator stops reply handling.
    ///
    /// # Errors
    ///
    /// Returns error if called outside a tokio runtime
    pub fn attach(self: &Arc<Self>) -> Result<()> {
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::Channel(format!("attach requires a tokio runtime: {e}")))?;
        let (tx, mut rx) = mpsc::unbounded_channel::<ReplyMessage>();
        let orchestrator = Arc::downgrade(self);

        handle.spawn(async move {
            while let Some(message) = rx.recv().await {
                let Some(orchestrator) = orchestrator.upgrade() else {
                    tracing::debug!("orchestrator dropped, ignoring reply");
                    break;
                };
                orchestrator.on_reply(message).await;
            }
        });

        self.channel.set_reply_handler(Arc::new(move |message: ReplyMessage| {
            if tx.send(message).is_err() {
                tracing::debug!("reply queue closed, ignoring reply");
            }
        }));

        tracing::debug!(channel = self.channel.name(), "reply handler attached");
        Ok(())
    }

    /// Run a voice turn: listen, recognize, and dispatch the transcript
    ///
    /// Dropped without effect unless the conversation is idle.
    pub async fn begin_turn(&self) -> TurnOutcome {
        let Some(turn) = self.guard.admit(Listening) else {
            let state = self.guard.state();
            tracing::debug!(%state, "turn requested while busy, dropping");
            return TurnOutcome::Busy(state);
        };

        let utterance = self.recognizer.recognize_once().await;

        match utterance.outcome {
            RecognitionOutcome::Recognized => {
                let text = utterance.text.trim();
                if text.is_empty() {
                    self.guard.advance(turn, Listening, Idle);
                    tracing::debug!(turn, "empty transcript, nothing to send");
                    return TurnOutcome::NoMatch;
                }

                tracing::info!(turn, text, "utterance recognized");
                self.guard.emit(ConversationEvent::Recognized(text.to_string()));
                self.guard.advance(turn, Listening, Dispatching);
                self.dispatch(turn, text.to_string()).await
            }
            RecognitionOutcome::NoMatch => {
                self.guard.advance(turn, Listening, Idle);
                self.diagnose(DiagnosticKind::NoMatch, "NOMATCH: Speech could not be recognized.");
                TurnOutcome::NoMatch
            }
            RecognitionOutcome::Canceled(details) => {
                self.guard.advance(turn, Listening, Idle);
                self.diagnose(
                    DiagnosticKind::RecognitionCanceled,
                    format!("CANCELED: {details}"),
                );
                TurnOutcome::Canceled(details)
            }
        }
    }

    /// Run a typed turn: send `text` without recognition
    ///
    /// Same admission rule as [`Orchestrator::begin_turn`]; blank text is
    /// rejected without a transition.
    pub async fn submit_text(&self, text: &str) -> TurnOutcome {
        let text = text.trim();
        if text.is_empty() {
            return TurnOutcome::Empty;
        }

        let Some(turn) = self.guard.admit(Dispatching) else {
            let state = self.guard.state();
            tracing::debug!(%state, "text submitted while busy, dropping");
            return TurnOutcome::Busy(state);
        };

        self.dispatch(turn, text.to_string()).await
    }

    /// Handle one reply from the dialogue agent
    pub async fn on_reply(&self, message: ReplyMessage) -> ReplyOutcome {
        let ReplyMessage { id, text, .. } = message;
        let text = text.trim();
        if text.is_empty() || self.sentinels.is_sentinel(text) {
            tracing::debug!(text, "suppressing system reply");
            return ReplyOutcome::Suppressed;
        }

        let turn = match self.guard.begin_speaking() {
            Ok(turn) => turn,
            Err(state) => {
                self.diagnose(
                    DiagnosticKind::ReplySkipped,
                    format!("reply arrived while {state}, not speaking it"),
                );
                return ReplyOutcome::Skipped(state);
            }
        };

        tracing::info!(turn, id = ?id, text, "reply received");
        self.guard.emit(ConversationEvent::ReplyReceived(text.to_string()));

        let language = self.resolve_language(text).await;
        self.guard.emit(ConversationEvent::LanguageResolved(language));

        let outcome = self.speak(text, language).await;

        self.guard.advance(turn, Speaking, Idle);
        outcome
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> ConversationState {
        self.guard.state()
    }

    /// Derived busy flags
    #[must_use]
    pub fn flags(&self) -> BusyFlags {
        self.guard.flags()
    }

    /// Whether a new turn may be started
    #[must_use]
    pub fn input_enabled(&self) -> bool {
        self.guard.input_enabled()
    }

    /// Language the next reply will be spoken in, unless detection changes it
    #[must_use]
    pub fn language(&self) -> LanguageTag {
        self.guard.language()
    }

    /// Subscribe to conversation events
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ConversationEvent> {
        self.guard.subscribe()
    }

    /// Watch state changes
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<ConversationState> {
        self.guard.watch()
    }

    /// The shared guard
    #[must_use]
    pub const fn guard(&self) -> &ConversationGuard {
        &self.guard
    }

    async fn dispatch(&self, turn: u64, text: String) -> TurnOutcome {
        match self.channel.send(&text).await {
            Ok(()) => {
                tracing::info!(turn, channel = self.channel.name(), "message dispatched");
                self.guard.emit(ConversationEvent::Dispatched(text.clone()));
                self.arm_watchdog(turn);
                TurnOutcome::Dispatched { turn, text }
            }
            Err(e) => {
                self.guard.advance(turn, Dispatching, Idle);
                self.diagnose(DiagnosticKind::DispatchFailed, format!("send failed: {e}"));
                TurnOutcome::DispatchFailed(e.to_string())
            }
        }
    }

    /// Return turn `turn` to idle if no reply has started it speaking in time
    fn arm_watchdog(&self, turn: u64) {
        let Some(timeout) = self.dispatch_timeout else {
            return;
        };
        let guard = self.guard.clone();

        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if guard.advance(turn, Dispatching, Idle) {
                let message = format!("no reply within {}s", timeout.as_secs());
                tracing::warn!(turn, "{message}");
                guard.emit(ConversationEvent::Diagnostic(Diagnostic::new(
                    DiagnosticKind::DispatchTimedOut,
                    message,
                )));
            }
        });
    }

    /// Detect the reply language, falling back to the stored tag
    async fn resolve_language(&self, text: &str) -> LanguageTag {
        let Some(detector) = &self.detector else {
            return self.guard.language();
        };

        match tokio::time::timeout(self.detection_timeout, detector.detect(text)).await {
            Ok(Some(language)) => language,
            Ok(None) => {
                let kept = self.guard.language();
                self.diagnose(
                    DiagnosticKind::LanguageDetectionFailed,
                    format!("language detection failed, speaking {kept}"),
                );
                kept
            }
            Err(_) => {
                let kept = self.guard.language();
                self.diagnose(
                    DiagnosticKind::LanguageDetectionFailed,
                    format!(
                        "language detection timed out after {}ms, speaking {kept}",
                        self.detection_timeout.as_millis()
                    ),
                );
                kept
            }
        }
    }

    async fn speak(&self, text: &str, language: LanguageTag) -> ReplyOutcome {
        let stream = match self.synthesizer.speak(text, language).await {
            Ok(stream) => stream,
            Err(e) => {
                self.diagnose(DiagnosticKind::SynthesisCanceled, format!("CANCELED: {e}"));
                return ReplyOutcome::SynthesisFailed(e.to_string());
            }
        };

        match self.sink.play(stream).await {
            Ok(report) => {
                if let Some(reason) = &report.interrupted {
                    self.diagnose(
                        DiagnosticKind::SynthesisCanceled,
                        format!("CANCELED: synthesis stream ended early: {reason}"),
                    );
                }
                tracing::info!(samples = report.samples, %language, "reply spoken");
                self.guard.emit(ConversationEvent::PlaybackFinished {
                    samples: report.samples,
                    truncated: report.truncated,
                });
                ReplyOutcome::Spoken {
                    language,
                    samples: report.samples,
                    truncated: report.truncated,
                }
            }
            Err(e) => {
                self.diagnose(DiagnosticKind::PlaybackFailed, format!("playback failed: {e}"));
                ReplyOutcome::PlaybackFailed(e.to_string())
            }
        }
    }

    fn diagnose(&self, kind: DiagnosticKind, message: impl Into<String>) {
        let message = message.into();
        match kind {
            DiagnosticKind::NoMatch | DiagnosticKind::ReplySkipped => {
                tracing::info!(?kind, "{message}");
            }
            _ => tracing::warn!(?kind, "{message}"),
        }
        self.guard
            .emit(ConversationEvent::Diagnostic(Diagnostic::new(kind, message)));
    }
}

/// Assembles an [`Orchestrator`] from its ports
#[derive(Default)]
pub struct OrchestratorBuilder {
    recognizer: Option<Arc<dyn SpeechRecognizer>>,
    channel: Option<Arc<dyn DialogueChannel>>,
    synthesizer: Option<Arc<dyn SpeechSynthesizer>>,
    sink: Option<Arc<dyn AudioSink>>,
    classifier: Option<Arc<dyn LanguageClassifier>>,
    settings: ConversationConfig,
}

impl OrchestratorBuilder {
    /// Speech recognition port
    #[must_use]
    pub fn recognizer(mut self, recognizer: Arc<dyn SpeechRecognizer>) -> Self {
        self.recognizer = Some(recognizer);
        self
    }

    /// Dialogue channel
    #[must_use]
    pub fn channel(mut self, channel: Arc<dyn DialogueChannel>) -> Self {
        self.channel = Some(channel);
        self
    }

    /// Speech synthesis port
    #[must_use]
    pub fn synthesizer(mut self, synthesizer: Arc<dyn SpeechSynthesizer>) -> Self {
        self.synthesizer = Some(synthesizer);
        self
    }

    /// Audio output
    #[must_use]
    pub fn sink(mut self, sink: Arc<dyn AudioSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Reply language classifier; without one every reply uses the stored tag
    #[must_use]
    pub fn classifier(mut self, classifier: Arc<dyn LanguageClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    /// Conversation settings
    #[must_use]
    pub fn settings(mut self, settings: ConversationConfig) -> Self {
        self.settings = settings;
        self
    }

    /// Build the orchestrator
    ///
    /// # Errors
    ///
    /// Returns error if a required port is missing
    pub fn build(self) -> Result<Orchestrator> {
        let missing = |port: &str| Error::Config(format!("orchestrator requires a {port}"));

        let guard = ConversationGuard::new(self.settings.initial_language);
        let detector = self
            .classifier
            .map(|classifier| LanguageDetector::new(classifier, guard.clone()));

        Ok(Orchestrator {
            recognizer: self.recognizer.ok_or_else(|| missing("speech recognizer"))?,
            channel: self.channel.ok_or_else(|| missing("dialogue channel"))?,
            synthesizer: self.synthesizer.ok_or_else(|| missing("speech synthesizer"))?,
            sink: self.sink.ok_or_else(|| missing("audio sink"))?,
            detector,
            sentinels: self.settings.sentinels,
            detection_timeout: self.settings.detection_timeout,
            dispatch_timeout: self.settings.dispatch_timeout,
            guard,
        })
    }
}
