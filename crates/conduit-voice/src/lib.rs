//! Live voice sessions for Conduit
//!
//! Composes a speech recognizer, the run engine and a speech synthesizer
//! into one duplex session: caller audio goes in, transcripts, model text,
//! tool calls and synthesized audio come out on a single event sequence.

#![allow(clippy::must_use_candidate, clippy::missing_errors_doc)]

mod error;
mod segment;
mod session;
mod speech;

pub use error::VoiceError;
pub use segment::SentenceSegmenter;
pub use session::{VoiceEvent, VoiceSession};
pub use speech::{SpeechConfig, SpeechToText, TextToSpeech, TranscriptEvent};
