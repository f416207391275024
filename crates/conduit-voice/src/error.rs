use conduit_core::ErrorKind;
use thiserror::Error;

use crate::session::VoiceEvent;

/// Errors raised by speech capabilities and the session handle
#[derive(Debug, Error)]
pub enum VoiceError {
    /// Speech-to-text backend failed
    #[error("transcription failed: {0}")]
    Transcription(String),

    /// Text-to-speech backend failed
    #[error("speech synthesis failed: {0}")]
    Synthesis(String),

    /// The session was closed or its tasks have stopped
    #[error("voice session closed")]
    Closed,
}

impl VoiceError {
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Transcription(_) | Self::Synthesis(_) => ErrorKind::ProviderTransport,
            Self::Closed => ErrorKind::Canceled,
        }
    }

    /// Session event describing this error
    pub fn to_event(&self) -> VoiceEvent {
        VoiceEvent::Error {
            kind: self.kind(),
            message: self.to_string(),
        }
    }
}
