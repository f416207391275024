//! Duplex voice conversation over the run engine
//!
//! Three kinds of task cooperate under one session context: a listener
//! feeding audio to the recognizer, a conversation task running one engine
//! turn per final transcript, and a speaker per turn turning sentences into
//! audio. All of them publish onto the same bounded event channel.

use std::sync::Arc;

use bytes::Bytes;
use conduit_config::VoiceConfig;
use conduit_core::{ErrorKind, RequestContext};
use conduit_engine::{Engine, RunOptions, StopCause};
use conduit_llm::{Delta, Message, MessageRequest, StreamEvent, SystemPrompt};
use futures_util::StreamExt;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::DropGuard;

use crate::error::VoiceError;
use crate::segment::SentenceSegmenter;
use crate::speech::{SpeechConfig, SpeechToText, TextToSpeech};

const EVENT_CAPACITY: usize = 64;
const AUDIO_CAPACITY: usize = 32;
const SEGMENT_CAPACITY: usize = 16;
/// Final transcripts waiting for the in-flight turn to finish
const TURN_CAPACITY: usize = 8;

/// Everything a session reports to its caller
#[derive(Debug, Clone, PartialEq)]
pub enum VoiceEvent {
    /// Recognizer output; partials may be revised, finals start a turn
    TranscriptDelta { text: String, is_final: bool },
    /// Model text as it streams
    TextDelta { text: String },
    /// A tool handler finished during the turn
    ToolCall {
        id: String,
        name: String,
        input: Map<String, Value>,
        is_error: bool,
    },
    /// Synthesized speech
    Audio(Bytes),
    /// The turn's run stopped and its history was kept
    TurnComplete { stop: StopCause },
    Error { kind: ErrorKind, message: String },
}

/// Handle to a live voice session
///
/// Dropping the handle cancels the session; [`VoiceSession::close`] also
/// waits for its tasks to stop.
pub struct VoiceSession {
    audio: mpsc::Sender<Bytes>,
    events: mpsc::Receiver<VoiceEvent>,
    context: RequestContext,
    tasks: Vec<JoinHandle<()>>,
    _cancel_on_drop: DropGuard,
}

impl VoiceSession {
    /// Start listening
    ///
    /// `template` supplies the model, system prompt, tools and any prior
    /// history; an empty model or missing system prompt is filled from
    /// `config`.
    pub fn start(
        engine: Engine,
        template: MessageRequest,
        options: RunOptions,
        stt: Arc<dyn SpeechToText>,
        tts: Arc<dyn TextToSpeech>,
        config: &VoiceConfig,
    ) -> Self {
        let context = RequestContext::new();
        let (audio_tx, audio_rx) = mpsc::channel(AUDIO_CAPACITY);
        let (events_tx, events_rx) = mpsc::channel(EVENT_CAPACITY);
        let (turns_tx, turns_rx) = mpsc::channel(TURN_CAPACITY);

        let mut template = template;
        if template.model.is_empty() {
            template.model.clone_from(&config.model);
        }
        if template.system.is_none() {
            template.system = config.system.as_deref().map(SystemPrompt::from);
        }
        let history = std::mem::take(&mut template.messages);

        tracing::debug!(request_id = %context.request_id, model = %template.model, "voice session started");

        let listener = tokio::spawn(listen(stt, audio_rx, turns_tx, events_tx.clone(), context.clone()));
        let conversation = Conversation {
            engine,
            template,
            history,
            options,
            tts,
            speech: SpeechConfig::from(config),
            max_segment_chars: config.max_segment_chars,
            events: events_tx,
            context: context.clone(),
        };
        let conversation = tokio::spawn(conversation.run(turns_rx));

        let guard = context.token().clone().drop_guard();
        Self {
            audio: audio_tx,
            events: events_rx,
            context,
            tasks: vec![listener, conversation],
            _cancel_on_drop: guard,
        }
    }

    /// Forward one chunk of caller audio to the recognizer
    pub async fn send_audio(&self, chunk: Bytes) -> Result<(), VoiceError> {
        if self.context.is_cancelled() {
            return Err(VoiceError::Closed);
        }
        self.audio.send(chunk).await.map_err(|_| VoiceError::Closed)
    }

    /// Next event, or `None` once every task has stopped
    pub async fn next_event(&mut self) -> Option<VoiceEvent> {
        self.events.recv().await
    }

    /// Cancel the in-flight turn, tear down recognition and synthesis and
    /// wait for the session's tasks to exit
    ///
    /// Queued and partial transcripts are discarded.
    pub async fn close(self) {
        let Self {
            audio,
            events,
            context,
            tasks,
            _cancel_on_drop,
        } = self;

        drop(events);
        drop(audio);
        context.cancel();

        for task in tasks {
            if let Err(e) = task.await
                && e.is_panic()
            {
                tracing::error!(error = %e, "voice session task panicked");
            }
        }
        tracing::debug!(request_id = %context.request_id, "voice session closed");
    }
}

/// Feed caller audio to the recognizer and queue final transcripts
async fn listen(
    stt: Arc<dyn SpeechToText>,
    audio: mpsc::Receiver<Bytes>,
    turns: mpsc::Sender<String>,
    events: mpsc::Sender<VoiceEvent>,
    context: RequestContext,
) {
    let mut transcripts = stt.transcribe(ReceiverStream::new(audio).boxed());

    loop {
        let next = tokio::select! {
            biased;
            () = context.cancelled() => return,
            next = transcripts.next() => next,
        };

        match next {
            Some(Ok(transcript)) => {
                let turn = transcript
                    .is_final
                    .then(|| transcript.text.trim().to_owned())
                    .filter(|text| !text.is_empty());
                let event = VoiceEvent::TranscriptDelta {
                    text: transcript.text,
                    is_final: transcript.is_final,
                };
                if events.send(event).await.is_err() {
                    return;
                }
                if let Some(text) = turn
                    && turns.send(text).await.is_err()
                {
                    return;
                }
            }
            Some(Err(e)) => {
                tracing::warn!(error = %e, "speech recognition failed");
                let _ = events.send(e.to_event()).await;
                return;
            }
            None => {
                tracing::debug!("audio input ended");
                return;
            }
        }
    }
}

/// Runs queued transcripts one at a time and owns the history between them
struct Conversation {
    engine: Engine,
    template: MessageRequest,
    history: Vec<Message>,
    options: RunOptions,
    tts: Arc<dyn TextToSpeech>,
    speech: SpeechConfig,
    max_segment_chars: usize,
    events: mpsc::Sender<VoiceEvent>,
    context: RequestContext,
}

impl Conversation {
    async fn run(mut self, mut turns: mpsc::Receiver<String>) {
        loop {
            let text = tokio::select! {
                biased;
                () = self.context.cancelled() => return,
                text = turns.recv() => text,
            };
            let Some(text) = text else { return };

            if !self.turn(text).await {
                return;
            }
        }
    }

    /// Run one turn; returns `false` once nobody is listening
    async fn turn(&mut self, text: String) -> bool {
        self.history.push(Message::user(text));
        let request = MessageRequest {
            messages: self.history.clone(),
            ..self.template.clone()
        };

        let mut run = self.engine.run_stream(request, self.options.clone(), &self.context);
        let (segments, speaker) = self.spawn_speaker();
        let mut segmenter = SentenceSegmenter::new(self.max_segment_chars);
        let mut listening = true;

        while let Some(event) = run.next().await {
            let event = match event {
                StreamEvent::ContentBlockDelta {
                    delta: Delta::Text { text },
                    ..
                } => {
                    for segment in segmenter.push(&text) {
                        if segments.send(segment).await.is_err() {
                            tracing::debug!("speaker stopped, dropping segment");
                        }
                    }
                    VoiceEvent::TextDelta { text }
                }
                StreamEvent::ToolCall {
                    id,
                    name,
                    input,
                    is_error,
                } => VoiceEvent::ToolCall {
                    id,
                    name,
                    input,
                    is_error,
                },
                StreamEvent::Error { kind, message } => VoiceEvent::Error { kind, message },
                _ => continue,
            };

            if self.events.send(event).await.is_err() {
                listening = false;
                run.cancel();
                break;
            }
        }

        if let Some(rest) = segmenter.flush()
            && segments.send(rest).await.is_err()
        {
            tracing::debug!("speaker stopped, dropping final segment");
        }
        drop(segments);
        let _ = speaker.await;

        match run.finish().await {
            Ok(result) => {
                self.history = result.messages;
                listening && self.events.send(VoiceEvent::TurnComplete { stop: result.stop }).await.is_ok()
            }
            Err(e) => {
                tracing::warn!(error = %e, "voice turn failed");
                self.history.pop();
                listening
            }
        }
    }

    /// Synthesize segments in order until the sender is dropped
    fn spawn_speaker(&self) -> (mpsc::Sender<String>, JoinHandle<()>) {
        let (sender, mut segments) = mpsc::channel::<String>(SEGMENT_CAPACITY);
        let tts = Arc::clone(&self.tts);
        let config = self.speech.clone();
        let events = self.events.clone();
        let context = self.context.clone();

        let handle = tokio::spawn(async move {
            while let Some(segment) = segments.recv().await {
                let mut audio = tts.synthesize(&segment, &config);
                loop {
                    let chunk = tokio::select! {
                        biased;
                        () = context.cancelled() => return,
                        chunk = audio.next() => chunk,
                    };
                    match chunk {
                        Some(Ok(bytes)) => {
                            if events.send(VoiceEvent::Audio(bytes)).await.is_err() {
                                return;
                            }
                        }
                        Some(Err(e)) => {
                            tracing::warn!(error = %e, "speech synthesis failed");
                            let _ = events.send(e.to_event()).await;
                            return;
                        }
                        None => break,
                    }
                }
            }
        });

        (sender, handle)
    }
}
