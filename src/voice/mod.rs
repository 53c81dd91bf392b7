//! Voice processing module
//!
//! Utterance capture and recognition, speech synthesis, and streaming
//! playback of synthesized PCM through a bounded ring.

#[cfg(feature = "audio-io")]
mod capture;
mod decoder;
mod endpoint;
mod playback;
mod stream;
mod stt;
mod tts;
mod wav;

#[cfg(feature = "audio-io")]
pub use capture::{AudioCapture, MicrophoneCapture};
pub use decoder::{BYTES_PER_SAMPLE, ByteSource, PCM_SAMPLE_RATE, PcmDecoder, encode_pcm16};
pub use endpoint::{EndpointSettings, EndpointStatus, UtteranceEndpointer};
#[cfg(feature = "audio-io")]
pub use playback::SpeakerSink;
pub use playback::{AudioSink, DrainSink, PlaybackLimits, PlaybackReport};
pub use stream::{FeedReport, PcmFeeder, PcmReader, pcm_channel};
pub use stt::{
    AzureSpeechRecognizer, CancellationDetails, CancellationReason, RecognitionOutcome,
    SpeechRecognizer, UnavailableRecognizer, Utterance, UtteranceCapture,
};
pub use tts::{
    AzureSpeechSynthesizer, SpeechSynthesizer, SynthesisStream, VoiceNames, build_ssml,
    memory_stream,
};
pub use wav::{CAPTURE_SAMPLE_RATE, samples_to_wav};
