//! Capability traits for the external speech and language engines.
//!
//! Transcription and synthesis engines are blocking: they consume a live
//! request iterator and hand back a live response iterator, and must only be
//! driven from a worker thread. Generation is async and yields a stream.

use crate::config::SynthesisConfig;
use crate::error::VoiceError;
use crate::queue::{BridgeReceiver, Popped};
use futures_util::Stream;
use parley_types::{AudioChunk, ConversationMessage, TextChunk, TranscriptResult};
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::time::Duration;

/// One response from a streaming recognizer, carrying zero or more results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecognitionResponse {
    #[serde(default)]
    pub results: Vec<TranscriptResult>,
}

pub type RecognitionStream =
    Box<dyn Iterator<Item = Result<RecognitionResponse, VoiceError>> + Send>;

pub type SynthesisStream = Box<dyn Iterator<Item = Result<AudioChunk, VoiceError>> + Send>;

pub type TextStream = Pin<Box<dyn Stream<Item = Result<TextChunk, VoiceError>> + Send>>;

/// Speech-to-text over a live audio stream.
pub trait TranscriptionEngine: Send + Sync {
    /// Starts recognition. Blocking; the returned iterator blocks as well.
    fn streaming_recognize(&self, audio: AudioInput) -> Result<RecognitionStream, VoiceError>;
}

/// Text generation from a conversation.
pub trait GenerationEngine: Send + Sync {
    /// Streams the reply to `user_text` given the prior turns in `history`.
    fn generate(&self, history: &[ConversationMessage], user_text: &str) -> TextStream;
}

/// Text-to-speech over a live text stream.
pub trait SynthesisEngine: Send + Sync {
    /// Starts synthesis. Blocking; the returned iterator blocks as well.
    fn streaming_synthesize(&self, requests: SynthesisRequests)
        -> Result<SynthesisStream, VoiceError>;
}

/// Audio request stream handed to a [`TranscriptionEngine`].
///
/// Yields chunks from the inbound queue until the sentinel arrives or no
/// chunk shows up for the idle timeout, whichever comes first.
pub struct AudioInput {
    queue: BridgeReceiver<AudioChunk>,
    idle_timeout: Duration,
    done: bool,
}

impl AudioInput {
    pub fn new(queue: BridgeReceiver<AudioChunk>, idle_timeout: Duration) -> Self {
        Self {
            queue,
            idle_timeout,
            done: false,
        }
    }
}

impl Iterator for AudioInput {
    type Item = AudioChunk;

    fn next(&mut self) -> Option<AudioChunk> {
        if self.done {
            return None;
        }
        match self.queue.pop(self.idle_timeout) {
            Popped::Item(chunk) => Some(chunk),
            Popped::TimedOut => {
                tracing::info!(
                    idle_ms = self.idle_timeout.as_millis() as u64,
                    "no audio received within idle timeout; ending request stream"
                );
                self.done = true;
                None
            }
            Popped::Closed => {
                self.done = true;
                None
            }
        }
    }
}

/// A single request on a synthesis stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SynthesisRequest {
    /// Always the first request; selects voice and locale.
    Config(SynthesisConfig),
    Text(TextChunk),
}

/// Request stream handed to a [`SynthesisEngine`]: one configuration request
/// followed by a text request per chunk pulled from the bridging queue.
pub struct SynthesisRequests {
    config: Option<SynthesisConfig>,
    queue: BridgeReceiver<TextChunk>,
    poll_interval: Duration,
}

impl SynthesisRequests {
    pub fn new(
        config: SynthesisConfig,
        queue: BridgeReceiver<TextChunk>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            config: Some(config),
            queue,
            poll_interval,
        }
    }
}

impl Iterator for SynthesisRequests {
    type Item = SynthesisRequest;

    fn next(&mut self) -> Option<SynthesisRequest> {
        if let Some(config) = self.config.take() {
            return Some(SynthesisRequest::Config(config));
        }
        loop {
            match self.queue.pop(self.poll_interval) {
                Popped::Item(text) => return Some(SynthesisRequest::Text(text)),
                Popped::TimedOut => continue,
                Popped::Closed => return None,
            }
        }
    }
}
