//! Text-to-speech (TTS) synthesis

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde::Deserialize;

use crate::language::LanguageTag;
use crate::{Error, Result};

/// Raw 16-bit little-endian mono PCM at 24 kHz, delivered as it is synthesized
pub type SynthesisStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Output format requested from the synthesis service
const OUTPUT_FORMAT: &str = "raw-24khz-16bit-mono-pcm";

/// Synthesizes speech from text
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Start synthesizing `text` in `language`
    ///
    /// Returns once synthesis has begun; audio arrives on the stream.
    async fn speak(&self, text: &str, language: LanguageTag) -> Result<SynthesisStream>;
}

/// Wrap in-memory chunks as a synthesis stream
#[must_use]
pub fn memory_stream(chunks: Vec<Bytes>) -> SynthesisStream {
    Box::pin(futures::stream::iter(chunks.into_iter().map(Ok)))
}

/// Neural voice used for each language
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct VoiceNames {
    /// Voice for `en-US`
    pub en_us: String,
    /// Voice for `ja-JP`
    pub ja_jp: String,
    /// Voice for `zh-TW`
    pub zh_tw: String,
}

impl Default for VoiceNames {
    fn default() -> Self {
        Self {
            en_us: "en-US-JennyNeural".to_string(),
            ja_jp: "ja-JP-NanamiNeural".to_string(),
            zh_tw: "zh-TW-HsiaoChenNeural".to_string(),
        }
    }
}

impl VoiceNames {
    /// Voice name for `language`
    #[must_use]
    pub fn for_language(&self, language: LanguageTag) -> &str {
        match language {
            LanguageTag::EnUs => &self.en_us,
            LanguageTag::JaJp => &self.ja_jp,
            LanguageTag::ZhTw => &self.zh_tw,
        }
    }
}

/// Azure Speech REST synthesizer
pub struct AzureSpeechSynthesizer {
    client: reqwest::Client,
    key: String,
    endpoint: String,
    voices: VoiceNames,
}

impl AzureSpeechSynthesizer {
    /// Create a synthesizer for a Speech resource
    ///
    /// # Arguments
    ///
    /// * `key` - Speech resource subscription key
    /// * `region` - Resource region, e.g. `eastasia`
    /// * `voices` - Voice per language
    ///
    /// # Errors
    ///
    /// Returns error if the key or region is empty
    pub fn new(key: String, region: &str, voices: VoiceNames) -> Result<Self> {
        if key.is_empty() {
            return Err(Error::Config("speech key required for TTS".to_string()));
        }
        if region.trim().is_empty() {
            return Err(Error::Config("speech region required for TTS".to_string()));
        }

        Ok(Self {
            client: crate::http::client()?,
            key,
            endpoint: format!(
                "https://{}.tts.speech.microsoft.com/cognitiveservices/v1",
                region.trim()
            ),
            voices,
        })
    }

    /// Override the synthesis endpoint
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[async_trait]
impl SpeechSynthesizer for AzureSpeechSynthesizer {
    async fn speak(&self, text: &str, language: LanguageTag) -> Result<SynthesisStream> {
        let voice = self.voices.for_language(language);
        let ssml = build_ssml(text, language, voice);

        tracing::debug!(%language, voice, chars = text.len(), "starting synthesis");

        let response = self
            .client
            .post(&self.endpoint)
            .header("Ocp-Apim-Subscription-Key", &self.key)
            .header("Content-Type", "application/ssml+xml")
            .header("X-Microsoft-OutputFormat", OUTPUT_FORMAT)
            .header("User-Agent", "parley")
            .body(ssml)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("synthesis error {status}: {body}")));
        }

        Ok(Box::pin(response.bytes_stream().map(|chunk| chunk.map_err(Error::from))))
    }
}

/// Build the SSML request body
#[must_use]
pub fn build_ssml(text: &str, language: LanguageTag, voice: &str) -> String {
    format!(
        "<speak version='1.0' xml:lang='{lang}'><voice xml:lang='{lang}' name='{voice}'>{text}</voice></speak>",
        lang = language.as_str(),
        voice = escape_xml(voice),
        text = escape_xml(text),
    )
}

/// Escape text for inclusion in XML content or attributes
fn escape_xml(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ssml_escapes_text() {
        let ssml = build_ssml("Tom & Jerry <3", LanguageTag::EnUs, "en-US-JennyNeural");
        assert!(ssml.contains("xml:lang='en-US'"));
        assert!(ssml.contains("name='en-US-JennyNeural'"));
        assert!(ssml.contains(">Tom &amp; Jerry &lt;3</voice>"));
    }

    #[test]
    fn test_voice_per_language() {
        let voices = VoiceNames::default();
        assert_eq!(voices.for_language(LanguageTag::JaJp), "ja-JP-NanamiNeural");
        assert_eq!(voices.for_language(LanguageTag::ZhTw), "zh-TW-HsiaoChenNeural");
    }

    #[test]
    fn test_requires_key_and_region() {
        assert!(AzureSpeechSynthesizer::new(String::new(), "eastasia", VoiceNames::default()).is_err());
        assert!(AzureSpeechSynthesizer::new("k".to_string(), " ", VoiceNames::default()).is_err());
    }

    #[tokio::test]
    async fn test_memory_stream_yields_chunks() {
        let mut stream = memory_stream(vec![Bytes::from_static(b"ab"), Bytes::from_static(b"c")]);
        assert_eq!(stream.next().await.unwrap().unwrap(), Bytes::from_static(b"ab"));
        assert_eq!(stream.next().await.unwrap().unwrap(), Bytes::from_static(b"c"));
        assert!(stream.next().await.is_none());
    }
}
