//! Transcription sessions: one blocking recognizer call per client connection.

use crate::config::SessionSettings;
use crate::engine::{AudioInput, TranscriptionEngine};
use crate::error::VoiceError;
use crate::queue::{bridge, BridgeReceiver, BridgeSender};
use parley_types::{AudioChunk, ResultFrame};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// How a session's worker ended when the session was finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// The worker returned within the join timeout.
    Joined,
    /// The worker task could not be joined (cancelled or panicked outside the catch).
    Failed,
    /// The join timeout elapsed; the worker was left to finish on its own.
    Abandoned,
}

/// A running recognizer call bridged to async code by two queues.
///
/// Audio goes in through [`audio`](Self::audio), result frames come out of
/// [`results`](Self::results). The results queue always ends with exactly one
/// sentinel, preceded by at most one error frame.
pub struct TranscriptionSession {
    audio: BridgeSender<AudioChunk>,
    results: BridgeReceiver<ResultFrame>,
    worker: JoinHandle<usize>,
}

impl TranscriptionSession {
    /// Allocates the queues and starts the worker on the blocking pool.
    pub fn start(engine: Arc<dyn TranscriptionEngine>, settings: &SessionSettings) -> Self {
        let (audio, audio_rx) = bridge(settings.queue_capacity, settings.push_timeout());
        let (results_tx, results) = bridge(settings.queue_capacity, settings.push_timeout());
        let input = AudioInput::new(audio_rx, settings.idle_timeout());

        let worker =
            tokio::task::spawn_blocking(move || run_transcription(engine.as_ref(), input, results_tx));

        Self {
            audio,
            results,
            worker,
        }
    }

    pub fn audio(&self) -> &BridgeSender<AudioChunk> {
        &self.audio
    }

    pub fn results(&self) -> &BridgeReceiver<ResultFrame> {
        &self.results
    }

    /// Ends the audio stream (idempotent) and waits up to `join_timeout` for
    /// the worker.
    pub async fn finish(self, join_timeout: Duration) -> WorkerExit {
        self.audio.close_async().await;
        match tokio::time::timeout(join_timeout, self.worker).await {
            Ok(Ok(delivered)) => {
                tracing::debug!(delivered, "transcription worker joined");
                WorkerExit::Joined
            }
            Ok(Err(e)) => {
                tracing::error!(error = %e, "transcription worker failed to join");
                WorkerExit::Failed
            }
            Err(_) => {
                tracing::warn!(
                    timeout_ms = join_timeout.as_millis() as u64,
                    "transcription worker did not finish in time; abandoning it"
                );
                WorkerExit::Abandoned
            }
        }
    }
}

/// Runs one recognition to completion on the calling thread.
///
/// Every result is pushed to `results` in arrival order. A failure, including
/// a panic inside the engine, becomes a single error frame. The sentinel is
/// sent last on every path. Returns the number of results delivered.
pub fn run_transcription(
    engine: &dyn TranscriptionEngine,
    input: AudioInput,
    results: BridgeSender<ResultFrame>,
) -> usize {
    let mut delivered = 0;
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        forward_results(engine, input, &results, &mut delivered)
    }));

    let failure = match outcome {
        Ok(Ok(())) => None,
        Ok(Err(e)) => Some(e.to_string()),
        Err(payload) => Some(panic_message(payload.as_ref())),
    };

    match failure {
        None => tracing::info!(delivered, "transcription stream finished"),
        Some(message) => {
            tracing::error!(delivered, error = %message, "transcription failed");
            if let Err(e) = results.push(ResultFrame::error(message)) {
                tracing::debug!(error = %e, "error frame not delivered");
            }
        }
    }

    results.close();
    delivered
}

fn forward_results(
    engine: &dyn TranscriptionEngine,
    input: AudioInput,
    results: &BridgeSender<ResultFrame>,
    delivered: &mut usize,
) -> Result<(), VoiceError> {
    for response in engine.streaming_recognize(input)? {
        for result in response?.results {
            if let Err(e) = results.push(ResultFrame::Result(result)) {
                tracing::warn!(error = %e, "result consumer unavailable; stopping recognition");
                return Ok(());
            }
            *delivered += 1;
        }
    }
    Ok(())
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("transcription worker panicked: {}", detail)
}
