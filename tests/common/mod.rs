//! Shared test utilities: scripted conversation ports

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use parley::config::ConversationConfig;
use parley::conversation::{ConversationEvent, ConversationState, Orchestrator};
use parley::dialogue::{DialogueChannel, ReplyHandler, ReplyMessage, ReplySlot};
use parley::language::{LanguageClassifier, LanguageTag};
use parley::voice::{
    AudioSink, DrainSink, PlaybackReport, SpeechRecognizer, SpeechSynthesizer, SynthesisStream,
    Utterance, encode_pcm16, memory_stream,
};
use parley::{Error, Result};
use tokio::sync::{Mutex, Notify, broadcast};

/// Recognizer that returns scripted utterances, optionally waiting on a gate
#[derive(Default)]
pub struct MockRecognizer {
    script: Mutex<VecDeque<Utterance>>,
    gate: Option<Arc<Notify>>,
    calls: Mutex<usize>,
}

impl MockRecognizer {
    pub fn new(script: Vec<Utterance>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            ..Self::default()
        }
    }

    /// Each recognition waits for one `notify_one` on the returned gate
    pub fn gated(script: Vec<Utterance>) -> (Self, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        let recognizer = Self {
            script: Mutex::new(script.into()),
            gate: Some(Arc::clone(&gate)),
            calls: Mutex::new(0),
        };
        (recognizer, gate)
    }

    pub async fn calls(&self) -> usize {
        *self.calls.lock().await
    }
}

#[async_trait]
impl SpeechRecognizer for MockRecognizer {
    async fn recognize_once(&self) -> Utterance {
        *self.calls.lock().await += 1;
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        self.script
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(Utterance::no_match)
    }
}

/// Channel that records sent text and delivers replies on demand
#[derive(Default)]
pub struct MockChannel {
    sent: Mutex<Vec<String>>,
    fail: bool,
    replies: ReplySlot,
}

impl MockChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub async fn sent(&self) -> Vec<String> {
        self.sent.lock().await.clone()
    }

    /// Simulate an inbound reply from the agent
    pub fn push_reply(&self, text: &str) -> bool {
        self.replies.deliver(ReplyMessage::text(text))
    }
}

#[async_trait]
impl DialogueChannel for MockChannel {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn send(&self, text: &str) -> Result<()> {
        if self.fail {
            return Err(Error::Channel("bot unreachable".to_string()));
        }
        self.sent.lock().await.push(text.to_string());
        Ok(())
    }

    fn set_reply_handler(&self, handler: ReplyHandler) {
        self.replies.replace(handler);
    }
}

/// Synthesizer that records requests and returns a short tone
#[derive(Default)]
pub struct MockSynthesizer {
    calls: Mutex<Vec<(String, LanguageTag)>>,
    fail: bool,
    stall: bool,
}

impl MockSynthesizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Delivers the first chunk, then never another byte nor end of stream
    pub fn stalling() -> Self {
        Self {
            stall: true,
            ..Self::default()
        }
    }

    pub async fn calls(&self) -> Vec<(String, LanguageTag)> {
        self.calls.lock().await.clone()
    }
}

/// Samples in the audio every mock synthesis returns
pub const SPOKEN_SAMPLES: usize = 2400;

#[async_trait]
impl SpeechSynthesizer for MockSynthesizer {
    async fn speak(&self, text: &str, language: LanguageTag) -> Result<SynthesisStream> {
        self.calls.lock().await.push((text.to_string(), language));
        if self.fail {
            return Err(Error::Tts("Reason=Error ErrorDetails=quota exceeded".to_string()));
        }
        let pcm = encode_pcm16(&vec![0.1; SPOKEN_SAMPLES]);
        let (head, tail) = pcm.split_at(1001);
        if self.stall {
            let head = memory_stream(vec![Bytes::copy_from_slice(head)]);
            return Ok(Box::pin(head.chain(futures::stream::pending())));
        }
        Ok(memory_stream(vec![
            Bytes::copy_from_slice(head),
            Bytes::copy_from_slice(tail),
        ]))
    }
}

/// Classifier that returns a fixed code (or fails) after an optional delay
pub struct MockClassifier {
    code: Option<&'static str>,
    delay: Duration,
}

impl MockClassifier {
    pub fn returning(code: &'static str) -> Self {
        Self {
            code: Some(code),
            delay: Duration::ZERO,
        }
    }

    pub fn failing() -> Self {
        Self {
            code: None,
            delay: Duration::ZERO,
        }
    }

    pub fn slow(code: &'static str, delay: Duration) -> Self {
        Self {
            code: Some(code),
            delay,
        }
    }
}

#[async_trait]
impl LanguageClassifier for MockClassifier {
    async fn classify(&self, _text: &str) -> Result<String> {
        tokio::time::sleep(self.delay).await;
        self.code
            .map(ToString::to_string)
            .ok_or_else(|| Error::Language("service unavailable".to_string()))
    }
}

/// Sink that drains audio only after its gate is opened
pub struct GatedSink {
    gate: Arc<Notify>,
}

impl GatedSink {
    pub fn new() -> (Self, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        (
            Self {
                gate: Arc::clone(&gate),
            },
            gate,
        )
    }
}

#[async_trait]
impl AudioSink for GatedSink {
    async fn play(&self, stream: SynthesisStream) -> Result<PlaybackReport> {
        self.gate.notified().await;
        DrainSink::default().play(stream).await
    }
}

/// Ports shared between a test and its orchestrator
pub struct Harness {
    pub orchestrator: Arc<Orchestrator>,
    pub recognizer: Arc<MockRecognizer>,
    pub channel: Arc<MockChannel>,
    pub synthesizer: Arc<MockSynthesizer>,
}

/// Build and attach an orchestrator over mock ports
pub fn harness(
    recognizer: MockRecognizer,
    channel: MockChannel,
    synthesizer: MockSynthesizer,
    sink: Arc<dyn AudioSink>,
    classifier: Option<MockClassifier>,
    settings: ConversationConfig,
) -> Harness {
    let recognizer = Arc::new(recognizer);
    let channel = Arc::new(channel);
    let synthesizer = Arc::new(synthesizer);

    let mut builder = Orchestrator::builder()
        .recognizer(recognizer.clone())
        .channel(channel.clone())
        .synthesizer(synthesizer.clone())
        .sink(sink)
        .settings(settings);
    if let Some(classifier) = classifier {
        builder = builder.classifier(Arc::new(classifier));
    }

    let orchestrator = Arc::new(builder.build().expect("all ports provided"));
    orchestrator.attach().expect("inside a runtime");

    Harness {
        orchestrator,
        recognizer,
        channel,
        synthesizer,
    }
}

/// Harness with default settings, a drain sink and an English classifier
pub fn default_harness(recognizer: MockRecognizer) -> Harness {
    harness(
        recognizer,
        MockChannel::new(),
        MockSynthesizer::new(),
        Arc::new(DrainSink::default()),
        Some(MockClassifier::returning("en")),
        ConversationConfig::default(),
    )
}

/// Wait (bounded) until the orchestrator reaches `state`
pub async fn wait_for_state(orchestrator: &Orchestrator, state: ConversationState) {
    let mut watch = orchestrator.watch();
    tokio::time::timeout(Duration::from_secs(2), watch.wait_for(|s| *s == state))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {state}"))
        .expect("guard dropped");
}

/// Everything published so far
pub fn drain_events(events: &mut broadcast::Receiver<ConversationEvent>) -> Vec<ConversationEvent> {
    let mut collected = Vec::new();
    while let Ok(event) = events.try_recv() {
        collected.push(event);
    }
    collected
}

/// `(from, to)` pairs of the state changes among `events`
pub fn transitions(events: &[ConversationEvent]) -> Vec<(ConversationState, ConversationState)> {
    events
        .iter()
        .filter_map(|event| match event {
            ConversationEvent::StateChanged { from, to, .. } => Some((*from, *to)),
            _ => None,
        })
        .collect()
}
