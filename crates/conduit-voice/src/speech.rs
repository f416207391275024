//! Speech capabilities the session is composed from

use bytes::Bytes;
use conduit_config::VoiceConfig;
use futures_util::stream::BoxStream;

use crate::error::VoiceError;

/// Incremental or final recognition result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptEvent {
    pub text: String,
    /// Final results replace every partial before them and are not revised
    pub is_final: bool,
}

impl TranscriptEvent {
    pub fn partial(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: false,
        }
    }

    pub fn final_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: true,
        }
    }
}

/// Output settings passed to the synthesizer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeechConfig {
    pub voice: Option<String>,
    /// Audio encoding, e.g. `pcm` or `mp3`
    pub format: String,
    pub sample_rate: u32,
}

impl From<&VoiceConfig> for SpeechConfig {
    fn from(config: &VoiceConfig) -> Self {
        Self {
            voice: config.voice.clone(),
            format: config.format.clone(),
            sample_rate: config.sample_rate,
        }
    }
}

/// Streaming speech recognition
///
/// Consumes raw audio chunks for the lifetime of the session; dropping the
/// returned stream tears down the recognizer connection.
pub trait SpeechToText: Send + Sync {
    fn transcribe(&self, audio: BoxStream<'static, Bytes>) -> BoxStream<'static, Result<TranscriptEvent, VoiceError>>;
}

/// Speech synthesis for one segment of text
pub trait TextToSpeech: Send + Sync {
    fn synthesize(&self, text: &str, config: &SpeechConfig) -> BoxStream<'static, Result<Bytes, VoiceError>>;
}
