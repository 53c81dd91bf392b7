//! Utterance endpointing
//!
//! Energy-based detection of where a single spoken utterance starts and
//! ends in a live microphone stream.

use std::time::Duration;

/// Endpointing thresholds
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointSettings {
    /// RMS energy above which a chunk counts as speech
    pub threshold: f32,
    /// Voiced audio required for an utterance to count
    pub min_speech: Duration,
    /// Silence that ends an utterance
    pub trailing_silence: Duration,
    /// Give up if no speech starts within this time
    pub initial_timeout: Duration,
    /// Hard cap on utterance length
    pub max_duration: Duration,
}

impl Default for EndpointSettings {
    fn default() -> Self {
        Self {
            threshold: 0.03,
            min_speech: Duration::from_millis(300),
            trailing_silence: Duration::from_millis(800),
            initial_timeout: Duration::from_secs(5),
            max_duration: Duration::from_secs(15),
        }
    }
}

/// Endpointer progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointStatus {
    /// No speech yet
    Waiting,
    /// Inside an utterance
    Speaking,
    /// Utterance finished; take it with [`UtteranceEndpointer::take_utterance`]
    Complete,
    /// No speech before the initial timeout
    TimedOut,
}

/// Finds one utterance in a stream of sample chunks
#[derive(Debug)]
pub struct UtteranceEndpointer {
    threshold: f32,
    min_speech: usize,
    trailing_silence: usize,
    initial_timeout: usize,
    max_samples: usize,
    status: EndpointStatus,
    speech_buffer: Vec<f32>,
    silence_counter: usize,
    elapsed: usize,
}

impl UtteranceEndpointer {
    /// Create an endpointer for audio at `sample_rate`
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn new(settings: &EndpointSettings, sample_rate: u32) -> Self {
        let samples = |d: Duration| (d.as_secs_f64() * f64::from(sample_rate)) as usize;

        Self {
            threshold: settings.threshold,
            min_speech: samples(settings.min_speech),
            trailing_silence: samples(settings.trailing_silence),
            initial_timeout: samples(settings.initial_timeout),
            max_samples: samples(settings.max_duration),
            status: EndpointStatus::Waiting,
            speech_buffer: Vec::new(),
            silence_counter: 0,
            elapsed: 0,
        }
    }

    /// Feed the next chunk of samples
    pub fn process(&mut self, samples: &[f32]) -> EndpointStatus {
        if samples.is_empty() {
            return self.status;
        }

        self.elapsed += samples.len();
        let energy = calculate_energy(samples);
        let is_speech = energy > self.threshold;

        match self.status {
            EndpointStatus::Waiting => {
                if is_speech {
                    self.status = EndpointStatus::Speaking;
                    self.speech_buffer.clear();
                    self.speech_buffer.extend_from_slice(samples);
                    self.silence_counter = 0;
                    tracing::trace!(energy, "speech started");
                } else if self.elapsed >= self.initial_timeout {
                    tracing::debug!("no speech before initial timeout");
                    self.status = EndpointStatus::TimedOut;
                }
            }
            EndpointStatus::Speaking => {
                self.speech_buffer.extend_from_slice(samples);

                if is_speech {
                    self.silence_counter = 0;
                } else {
                    self.silence_counter += samples.len();
                }

                let voiced = self.speech_buffer.len() - self.silence_counter;

                if self.speech_buffer.len() >= self.max_samples {
                    tracing::debug!(samples = self.speech_buffer.len(), "utterance hit max duration");
                    self.status = EndpointStatus::Complete;
                } else if self.silence_counter >= self.trailing_silence {
                    if voiced >= self.min_speech {
                        tracing::debug!(samples = self.speech_buffer.len(), "utterance complete");
                        self.status = EndpointStatus::Complete;
                    } else {
                        // Too short to be speech: a click or a cough
                        tracing::trace!(voiced, "discarding short burst");
                        self.speech_buffer.clear();
                        self.silence_counter = 0;
                        self.status = if self.elapsed >= self.initial_timeout {
                            EndpointStatus::TimedOut
                        } else {
                            EndpointStatus::Waiting
                        };
                    }
                }
            }
            EndpointStatus::Complete | EndpointStatus::TimedOut => {}
        }

        self.status
    }

    /// Current status
    #[must_use]
    pub const fn status(&self) -> EndpointStatus {
        self.status
    }

    /// Take the captured utterance, clearing it
    pub fn take_utterance(&mut self) -> Vec<f32> {
        std::mem::take(&mut self.speech_buffer)
    }

    /// Reset to waiting for a new utterance
    pub fn reset(&mut self) {
        self.status = EndpointStatus::Waiting;
        self.speech_buffer.clear();
        self.silence_counter = 0;
        self.elapsed = 0;
    }
}

/// Calculate RMS energy of audio samples
#[allow(clippy::cast_precision_loss)]
fn calculate_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}
