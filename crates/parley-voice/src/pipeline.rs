//! Generation-to-synthesis chaining.
//!
//! [`SpeechPipeline::stream`] pipes a live [`TextStream`] into a blocking
//! [`SynthesisEngine`] and returns the synthesized audio as a stream. Text
//! crosses into the synthesis worker through a bridging queue fed by a
//! forwarding task; each blocking pull of the next audio chunk runs on the
//! blocking pool so the runtime is never stalled.

use crate::config::{SessionSettings, SynthesisConfig};
use crate::engine::{SynthesisEngine, SynthesisRequests, SynthesisStream, TextStream};
use crate::error::VoiceError;
use crate::queue::{bridge, BridgeSender};
use futures_util::{stream, Stream, StreamExt};
use parley_types::{AudioChunk, TextChunk};
use std::pin::Pin;
use std::sync::Arc;
use tokio::task::JoinHandle;

pub type AudioStream = Pin<Box<dyn Stream<Item = Result<AudioChunk, VoiceError>> + Send>>;

/// Turns generated text into speech, one request at a time.
#[derive(Clone)]
pub struct SpeechPipeline {
    synthesizer: Arc<dyn SynthesisEngine>,
    voice: SynthesisConfig,
    settings: SessionSettings,
}

impl SpeechPipeline {
    pub fn new(
        synthesizer: Arc<dyn SynthesisEngine>,
        voice: SynthesisConfig,
        settings: SessionSettings,
    ) -> Self {
        Self {
            synthesizer,
            voice,
            settings,
        }
    }

    pub fn voice(&self) -> &SynthesisConfig {
        &self.voice
    }

    /// Streams the audio for `text`.
    ///
    /// Nothing starts until the returned stream is first polled. The stream
    /// ends when synthesis ends. A generation or synthesis failure is yielded
    /// as the final item. Dropping the stream cancels the forwarding task,
    /// which ends the synthesis request stream.
    pub fn stream(&self, text: TextStream) -> AudioStream {
        let stage = Stage::Pending {
            text,
            pipeline: self.clone(),
        };
        Box::pin(stream::unfold(stage, advance))
    }

    async fn start(self, text: TextStream) -> Result<(SynthesisStream, Forwarder), VoiceError> {
        let (tx, rx) = bridge(self.settings.queue_capacity, self.settings.push_timeout());
        let requests = SynthesisRequests::new(self.voice, rx, self.settings.poll_interval());
        let forwarder = Forwarder(tokio::spawn(forward_text(text, tx)));

        let synthesizer = self.synthesizer;
        let audio = tokio::task::spawn_blocking(move || synthesizer.streaming_synthesize(requests))
            .await
            .map_err(|e| VoiceError::Synthesis(format!("synthesis worker failed: {}", e)))??;

        tracing::debug!("synthesis stream opened");
        Ok((audio, forwarder))
    }
}

enum Stage {
    Pending {
        text: TextStream,
        pipeline: SpeechPipeline,
    },
    Running {
        audio: SynthesisStream,
        forwarder: Option<Forwarder>,
    },
    Done,
}

type Step = Option<(Result<AudioChunk, VoiceError>, Stage)>;

async fn advance(stage: Stage) -> Step {
    let (mut audio, mut forwarder) = match stage {
        Stage::Done => return None,
        Stage::Running { audio, forwarder } => (audio, forwarder),
        Stage::Pending { text, pipeline } => match pipeline.start(text).await {
            Ok((audio, forwarder)) => (audio, Some(forwarder)),
            Err(e) => return fail(e),
        },
    };

    loop {
        // A generation failure tears synthesis down without waiting for it.
        if let Some(task) = forwarder.as_mut().filter(|task| task.is_finished()) {
            let outcome = task.join().await;
            forwarder = None;
            if let Err(e) = outcome {
                tokio::task::spawn_blocking(move || drop(audio));
                return fail(e);
            }
        }

        let pulled = tokio::task::spawn_blocking(move || {
            let next = audio.next();
            (audio, next)
        })
        .await;

        let (returned, next) = match pulled {
            Ok(pulled) => pulled,
            Err(e) => return fail(VoiceError::Synthesis(format!("synthesis worker failed: {}", e))),
        };
        audio = returned;

        match next {
            Some(Ok(chunk)) if chunk.is_empty() => continue,
            Some(Ok(chunk)) => {
                tracing::trace!(bytes = chunk.len(), "audio chunk synthesized");
                return Some((Ok(chunk), Stage::Running { audio, forwarder }));
            }
            Some(Err(e)) => {
                tracing::error!(error = %e, "synthesis failed");
                return fail(e);
            }
            None => {
                tracing::debug!("synthesis stream finished");
                return match forwarder {
                    Some(mut task) => match task.join().await {
                        Ok(()) => None,
                        Err(e) => fail(e),
                    },
                    None => None,
                };
            }
        }
    }
}

fn fail(e: VoiceError) -> Step {
    Some((Err(e), Stage::Done))
}

/// The task moving generated text onto the synthesis queue. Aborted on drop.
struct Forwarder(JoinHandle<Result<(), VoiceError>>);

impl Forwarder {
    fn is_finished(&self) -> bool {
        self.0.is_finished()
    }

    async fn join(&mut self) -> Result<(), VoiceError> {
        match (&mut self.0).await {
            Ok(outcome) => outcome,
            Err(e) => Err(VoiceError::Generation(format!("text forwarding task failed: {}", e))),
        }
    }
}

impl Drop for Forwarder {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Moves every non-empty chunk of `text` onto `queue` in order, then sends
/// the sentinel. The sentinel is sent on failure as well.
async fn forward_text(mut text: TextStream, queue: BridgeSender<TextChunk>) -> Result<(), VoiceError> {
    let mut forwarded = 0usize;
    let outcome = loop {
        match text.next().await {
            Some(Ok(chunk)) if chunk.is_empty() => continue,
            Some(Ok(chunk)) => {
                if let Err(e) = queue.push_async(chunk).await {
                    tracing::debug!(error = %e, "synthesis no longer accepting text");
                    break Ok(());
                }
                forwarded += 1;
            }
            Some(Err(e)) => {
                tracing::error!(forwarded, error = %e, "generation failed");
                break Err(e);
            }
            None => break Ok(()),
        }
    };

    queue.close_async().await;
    tracing::debug!(forwarded, "text forwarding finished");
    outcome
}
