//! Audio capture from microphone

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, Stream, StreamConfig};
use parking_lot::Mutex;

use super::endpoint::{EndpointSettings, EndpointStatus, UtteranceEndpointer};
use super::stt::UtteranceCapture;
use super::wav::CAPTURE_SAMPLE_RATE;
use crate::{Error, Result};

/// How often the capture buffer is handed to the endpointer
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Captures audio from the default input device
pub struct AudioCapture {
    config: StreamConfig,
    buffer: Arc<Mutex<Vec<f32>>>,
    stream: Option<Stream>,
}

impl AudioCapture {
    /// Open the default input device at 16 kHz mono
    ///
    /// # Errors
    ///
    /// Returns error if audio device cannot be opened
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_input_device()
            .ok_or_else(|| Error::Audio("no input device available".to_string()))?;

        let supported_config = device
            .supported_input_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .find(|c| {
                c.channels() == 1
                    && c.min_sample_rate() <= SampleRate(CAPTURE_SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(CAPTURE_SAMPLE_RATE)
            })
            .ok_or_else(|| Error::Audio("no suitable audio config found".to_string()))?;

        let config = supported_config
            .with_sample_rate(SampleRate(CAPTURE_SAMPLE_RATE))
            .config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = CAPTURE_SAMPLE_RATE,
            channels = config.channels,
            "audio capture initialized"
        );

        Ok(Self {
            config,
            buffer: Arc::new(Mutex::new(Vec::new())),
            stream: None,
        })
    }

    /// Start capturing audio
    ///
    /// # Errors
    ///
    /// Returns error if capture fails
    pub fn start(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let buffer = Arc::clone(&self.buffer);
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| Error::Audio("no input device".to_string()))?;

        let stream = device
            .build_input_stream(
                &self.config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    buffer.lock().extend_from_slice(data);
                },
                |err| {
                    tracing::error!(error = %err, "audio capture error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?;

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;
        self.stream = Some(stream);

        tracing::debug!("audio capture started");
        Ok(())
    }

    /// Stop capturing audio
    pub fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            tracing::debug!("audio capture stopped");
        }
    }

    /// Take the samples captured since the last call
    #[must_use]
    pub fn take_buffer(&self) -> Vec<f32> {
        std::mem::take(&mut *self.buffer.lock())
    }
}

/// Captures one endpointed utterance from the microphone
#[derive(Debug, Clone, Default)]
pub struct MicrophoneCapture {
    settings: EndpointSettings,
}

impl MicrophoneCapture {
    /// Create a capture with the given endpointing settings
    #[must_use]
    pub const fn new(settings: EndpointSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl UtteranceCapture for MicrophoneCapture {
    async fn capture_utterance(&self) -> Result<Option<Vec<f32>>> {
        let settings = self.settings.clone();

        // cpal streams are not Send; capture runs on a blocking thread
        tokio::task::spawn_blocking(move || capture_blocking(&settings))
            .await
            .map_err(|e| Error::Audio(format!("capture task failed: {e}")))?
    }

    fn sample_rate(&self) -> u32 {
        CAPTURE_SAMPLE_RATE
    }
}

fn capture_blocking(settings: &EndpointSettings) -> Result<Option<Vec<f32>>> {
    let mut capture = AudioCapture::new()?;
    let mut endpointer = UtteranceEndpointer::new(settings, CAPTURE_SAMPLE_RATE);
    let deadline =
        Instant::now() + settings.initial_timeout + settings.max_duration + Duration::from_secs(1);

    capture.start()?;
    tracing::info!("listening");

    let utterance = loop {
        std::thread::sleep(POLL_INTERVAL);

        match endpointer.process(&capture.take_buffer()) {
            EndpointStatus::Complete => break Some(endpointer.take_utterance()),
            EndpointStatus::TimedOut => break None,
            EndpointStatus::Waiting | EndpointStatus::Speaking => {}
        }

        if Instant::now() > deadline {
            // Device delivered too little audio to reach either end condition
            tracing::warn!("capture deadline passed without an utterance");
            break None;
        }
    };

    capture.stop();
    Ok(utterance)
}
