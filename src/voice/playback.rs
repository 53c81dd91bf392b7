//! Streaming audio playback
//!
//! A sink consumes a synthesis stream through the PCM ring and decoder. The
//! speaker sink pulls from the ring inside the device callback, so playback
//! starts with the first synthesized chunk.

use std::time::Duration;

use async_trait::async_trait;

use super::decoder::{BYTES_PER_SAMPLE, PCM_SAMPLE_RATE, PcmDecoder};
use super::stream::{DEFAULT_STALL_TIMEOUT, FeedReport, pcm_channel};
use super::tts::SynthesisStream;
use crate::Result;

/// Plays synthesized speech
#[async_trait]
pub trait AudioSink: Send + Sync {
    /// Play `stream` to completion
    ///
    /// # Errors
    ///
    /// Returns error if the output device cannot be used
    async fn play(&self, stream: SynthesisStream) -> Result<PlaybackReport>;
}

/// Summary of one playback
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaybackReport {
    /// Samples decoded from the stream
    pub samples: usize,
    /// Audio past the duration cap was discarded
    pub truncated: bool,
    /// The stream ended with an error after partial playback
    pub interrupted: Option<String>,
}

impl PlaybackReport {
    fn new(samples: usize, feed: FeedReport) -> Self {
        Self {
            samples,
            truncated: feed.truncated,
            interrupted: feed.error,
        }
    }
}

/// Bounds on buffered and total audio
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackLimits {
    /// Longest reply that will be played; the rest is truncated
    pub max_duration: Duration,
    /// Audio buffered ahead of the playback cursor
    pub ring_duration: Duration,
    /// Longest gap between synthesis chunks before the stream is abandoned
    pub stall_timeout: Duration,
}

impl Default for PlaybackLimits {
    fn default() -> Self {
        Self {
            max_duration: Duration::from_secs(600),
            ring_duration: Duration::from_secs(30),
            stall_timeout: DEFAULT_STALL_TIMEOUT,
        }
    }
}

impl PlaybackLimits {
    /// Limits with a custom cap on total duration
    #[must_use]
    pub fn with_max_duration(max_duration: Duration) -> Self {
        Self {
            max_duration,
            ..Self::default()
        }
    }

    /// Total bytes accepted from one stream
    #[must_use]
    pub fn max_bytes(&self) -> usize {
        duration_to_bytes(self.max_duration)
    }

    /// Ring capacity in bytes
    #[must_use]
    pub fn ring_bytes(&self) -> usize {
        duration_to_bytes(self.ring_duration.min(self.max_duration))
    }
}

#[allow(clippy::cast_possible_truncation)]
fn duration_to_bytes(duration: Duration) -> usize {
    let bytes_per_ms = u128::from(PCM_SAMPLE_RATE) * BYTES_PER_SAMPLE as u128 / 1000;
    (duration.as_millis() * bytes_per_ms) as usize
}

/// Samples decoded per pull when draining without a device (20 ms)
const DRAIN_PULL: usize = 480;

/// Sink that decodes and discards audio
///
/// Used in headless mode and tests; exercises the same ring and decoder as
/// the speaker sink.
#[derive(Debug, Clone, Copy, Default)]
pub struct DrainSink {
    limits: PlaybackLimits,
}

impl DrainSink {
    /// Create a drain sink with the given limits
    #[must_use]
    pub const fn new(limits: PlaybackLimits) -> Self {
        Self { limits }
    }
}

#[async_trait]
impl AudioSink for DrainSink {
    async fn play(&self, stream: SynthesisStream) -> Result<PlaybackReport> {
        let (feeder, mut reader) = pcm_channel(self.limits.ring_bytes(), self.limits.max_bytes());

        let drain = async move {
            let mut decoder = PcmDecoder::with_capacity(DRAIN_PULL);
            let mut out = vec![0.0f32; DRAIN_PULL];
            let mut samples = 0;

            loop {
                let decoded = decoder.fill(&mut reader, &mut out);
                samples += decoded;
                if decoded == 0 {
                    if reader.is_drained() {
                        break;
                    }
                    tokio::time::sleep(Duration::from_millis(1)).await;
                }
            }
            samples
        };

        let feeder = feeder.with_stall_timeout(self.limits.stall_timeout);
        let (feed, samples) = tokio::join!(feeder.feed(stream), drain);

        tracing::debug!(samples, truncated = feed.truncated, "stream drained");
        Ok(PlaybackReport::new(samples, feed))
    }
}

#[cfg(feature = "audio-io")]
pub use speaker::SpeakerSink;

#[cfg(feature = "audio-io")]
mod speaker {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    use async_trait::async_trait;
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use cpal::{SampleRate, StreamConfig};
    use parking_lot::Mutex;

    use super::{AudioSink, PlaybackLimits, PlaybackReport};
    use crate::voice::decoder::{PCM_SAMPLE_RATE, PcmDecoder};
    use crate::voice::stream::{PcmReader, pcm_channel};
    use crate::voice::tts::SynthesisStream;
    use crate::{Error, Result};

    /// Extra wall-clock time allowed beyond the duration cap for network stalls
    const STALL_ALLOWANCE: Duration = Duration::from_secs(30);

    /// Plays to the default output device
    pub struct SpeakerSink {
        config: StreamConfig,
        limits: PlaybackLimits,
    }

    impl SpeakerSink {
        /// Open the default output device at 24 kHz, mono or stereo
        ///
        /// # Errors
        ///
        /// Returns error if no suitable output device is available
        pub fn new(limits: PlaybackLimits) -> Result<Self> {
            let host = cpal::default_host();

            let device = host
                .default_output_device()
                .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

            let supports = |channels: u16| {
                move |c: &cpal::SupportedStreamConfigRange| {
                    c.channels() == channels
                        && c.min_sample_rate() <= SampleRate(PCM_SAMPLE_RATE)
                        && c.max_sample_rate() >= SampleRate(PCM_SAMPLE_RATE)
                }
            };

            let supported_config = device
                .supported_output_configs()
                .map_err(|e| Error::Audio(e.to_string()))?
                .find(supports(1))
                .or_else(|| {
                    // Fallback: try stereo
                    device.supported_output_configs().ok()?.find(supports(2))
                })
                .ok_or_else(|| Error::Audio("no suitable output config found".to_string()))?;

            let config = supported_config
                .with_sample_rate(SampleRate(PCM_SAMPLE_RATE))
                .config();

            tracing::debug!(
                device = device.name().unwrap_or_default(),
                sample_rate = PCM_SAMPLE_RATE,
                channels = config.channels,
                "audio playback initialized"
            );

            Ok(Self { config, limits })
        }
    }

    #[async_trait]
    impl AudioSink for SpeakerSink {
        async fn play(&self, stream: SynthesisStream) -> Result<PlaybackReport> {
            let (feeder, reader) =
                pcm_channel(self.limits.ring_bytes(), self.limits.max_bytes());
            let config = self.config.clone();
            let deadline = self.limits.max_duration + STALL_ALLOWANCE;

            // cpal streams are not Send; the device stream lives on a blocking thread
            let device =
                tokio::task::spawn_blocking(move || play_blocking(&config, reader, deadline));

            let feed = feeder
                .with_stall_timeout(self.limits.stall_timeout)
                .feed(stream)
                .await;
            let samples = device
                .await
                .map_err(|e| Error::Audio(format!("playback task failed: {e}")))??;

            tracing::debug!(samples, truncated = feed.truncated, "playback complete");
            Ok(PlaybackReport::new(samples, feed))
        }
    }

    /// Run the output stream until the reader is drained or `deadline` passes
    fn play_blocking(config: &StreamConfig, mut reader: PcmReader, deadline: Duration) -> Result<usize> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device".to_string()))?;

        let channels = usize::from(config.channels.max(1));
        let played = Arc::new(AtomicUsize::new(0));
        let drained = Arc::new(AtomicBool::new(false));
        let failure: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));

        let played_cb = Arc::clone(&played);
        let drained_cb = Arc::clone(&drained);
        let failure_cb = Arc::clone(&failure);

        let mut decoder = PcmDecoder::with_capacity(4096);
        let mut mono = Vec::new();

        let stream = device
            .build_output_stream(
                config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let frames = data.len() / channels;
                    if mono.len() < frames {
                        mono.resize(frames, 0.0);
                    }

                    let decoded = decoder.fill(&mut reader, &mut mono[..frames]);
                    played_cb.fetch_add(decoded, Ordering::Relaxed);

                    for (frame, &sample) in data.chunks_mut(channels).zip(mono.iter()) {
                        frame.fill(sample);
                    }

                    if decoded == 0 && reader.is_drained() {
                        drained_cb.store(true, Ordering::Release);
                    }
                },
                move |err| {
                    tracing::error!(error = %err, "audio playback error");
                    *failure_cb.lock() = Some(err.to_string());
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?;

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;

        let start = Instant::now();
        while !drained.load(Ordering::Acquire) {
            if failure.lock().is_some() {
                break;
            }
            if start.elapsed() > deadline {
                tracing::warn!("playback deadline passed, stopping");
                break;
            }
            std::thread::sleep(Duration::from_millis(20));
        }

        // Let the device flush its last buffer
        std::thread::sleep(Duration::from_millis(100));
        drop(stream);

        if let Some(err) = failure.lock().take() {
            return Err(Error::Audio(err));
        }

        Ok(played.load(Ordering::Relaxed))
    }
}
