use parley_types::{Alternative, ResultFrame, TranscriptResult};
use parley_voice::{
    bridge, run_transcription, AudioInput, Popped, RecognitionResponse, RecognitionStream,
    SessionSettings, TranscriptionEngine, TranscriptionSession, VoiceError, WorkerExit,
};
use std::sync::Arc;
use std::time::Duration;

fn result(text: &str) -> TranscriptResult {
    TranscriptResult {
        is_final: true,
        stability: 1.0,
        alternatives: vec![Alternative {
            transcript: text.to_string(),
            confidence: 0.9,
        }],
    }
}

fn response(chunk: &[u8]) -> RecognitionResponse {
    RecognitionResponse {
        results: vec![result(&String::from_utf8_lossy(chunk))],
    }
}

/// Emits one result per audio chunk, transcribing the bytes as UTF-8.
struct EchoRecognizer;

impl TranscriptionEngine for EchoRecognizer {
    fn streaming_recognize(&self, audio: AudioInput) -> Result<RecognitionStream, VoiceError> {
        Ok(Box::new(audio.map(|chunk| Ok::<_, VoiceError>(response(&chunk)))))
    }
}

/// Fails while producing its second response.
struct FailsOnSecondResponse;

impl TranscriptionEngine for FailsOnSecondResponse {
    fn streaming_recognize(&self, audio: AudioInput) -> Result<RecognitionStream, VoiceError> {
        Ok(Box::new(audio.enumerate().map(|(i, chunk)| {
            if i == 1 {
                Err(VoiceError::Transcription("stream reset by engine".to_string()))
            } else {
                Ok(response(&chunk))
            }
        })))
    }
}

struct RefusesToStart;

impl TranscriptionEngine for RefusesToStart {
    fn streaming_recognize(&self, _audio: AudioInput) -> Result<RecognitionStream, VoiceError> {
        Err(VoiceError::Transcription("credentials rejected".to_string()))
    }
}

struct Panics;

impl TranscriptionEngine for Panics {
    fn streaming_recognize(&self, _audio: AudioInput) -> Result<RecognitionStream, VoiceError> {
        panic!("decoder state corrupted");
    }
}

/// Ignores its input and holds the worker for a while before finishing.
struct Stalls(Duration);

impl TranscriptionEngine for Stalls {
    fn streaming_recognize(&self, _audio: AudioInput) -> Result<RecognitionStream, VoiceError> {
        std::thread::sleep(self.0);
        Ok(Box::new(std::iter::empty()))
    }
}

fn test_settings() -> SessionSettings {
    SessionSettings {
        idle_timeout_ms: 2_000,
        poll_interval_ms: 20,
        join_timeout_ms: 2_000,
        queue_capacity: 64,
        push_timeout_ms: 500,
    }
}

/// Pops frames until the sentinel, failing the test if it takes too long.
async fn drain(session: &TranscriptionSession) -> Vec<ResultFrame> {
    let poll = Duration::from_millis(20);
    tokio::time::timeout(Duration::from_secs(5), async {
        let mut frames = Vec::new();
        loop {
            match session.results().pop_async(poll).await {
                Popped::Item(frame) => frames.push(frame),
                Popped::TimedOut => continue,
                Popped::Closed => return frames,
            }
        }
    })
    .await
    .expect("results queue never reached its sentinel")
}

#[test]
fn error_on_second_response_yields_one_result_then_error_then_sentinel() {
    let (audio_tx, audio_rx) = bridge(8, Duration::from_millis(100));
    let (results_tx, results_rx) = bridge(8, Duration::from_millis(100));
    for chunk in ["one", "two", "three"] {
        audio_tx.push(chunk.as_bytes().to_vec()).unwrap();
    }
    audio_tx.close();

    let input = AudioInput::new(audio_rx, Duration::from_secs(1));
    let delivered = run_transcription(&FailsOnSecondResponse, input, results_tx);
    assert_eq!(delivered, 1);

    let wait = Duration::from_millis(100);
    assert_eq!(results_rx.pop(wait), Popped::Item(ResultFrame::Result(result("one"))));
    assert_eq!(
        results_rx.pop(wait),
        Popped::Item(ResultFrame::error(
            "transcription error: stream reset by engine"
        ))
    );
    assert_eq!(results_rx.pop(wait), Popped::Closed);
}

#[tokio::test]
async fn every_chunk_before_the_sentinel_is_transcribed_in_order() {
    let session = TranscriptionSession::start(Arc::new(EchoRecognizer), &test_settings());

    let chunks: Vec<String> = (0..40).map(|i| format!("chunk-{}", i)).collect();
    for chunk in &chunks {
        session.audio().push_async(chunk.clone().into_bytes()).await.unwrap();
    }
    assert!(session.audio().close_async().await);

    let frames = drain(&session).await;
    let transcripts: Vec<String> = frames
        .iter()
        .map(|frame| match frame {
            ResultFrame::Result(r) => r.best_transcript().unwrap().to_string(),
            ResultFrame::Error { error } => panic!("unexpected error frame: {}", error),
        })
        .collect();
    assert_eq!(transcripts, chunks);

    assert_eq!(session.finish(Duration::from_secs(2)).await, WorkerExit::Joined);
}

#[tokio::test]
async fn results_queued_before_input_ends_are_still_delivered() {
    let session = TranscriptionSession::start(Arc::new(EchoRecognizer), &test_settings());
    session.audio().push_async(b"early".to_vec()).await.unwrap();
    session.audio().push_async(b"late".to_vec()).await.unwrap();

    // The inbound side goes away before anything has been read back.
    session.audio().close_async().await;
    assert!(!session.audio().close_async().await);

    let frames = drain(&session).await;
    assert_eq!(
        frames,
        vec![
            ResultFrame::Result(result("early")),
            ResultFrame::Result(result("late")),
        ]
    );
}

#[tokio::test]
async fn idle_input_ends_the_request_stream() {
    let settings = SessionSettings {
        idle_timeout_ms: 100,
        ..test_settings()
    };
    let session = TranscriptionSession::start(Arc::new(EchoRecognizer), &settings);

    // No audio and no sentinel: the idle timeout alone must end the session.
    let frames = drain(&session).await;
    assert!(frames.is_empty());

    assert_eq!(session.finish(settings.join_timeout()).await, WorkerExit::Joined);
}

#[tokio::test]
async fn engine_that_cannot_start_reports_one_error() {
    let session = TranscriptionSession::start(Arc::new(RefusesToStart), &test_settings());

    let frames = drain(&session).await;
    assert_eq!(
        frames,
        vec![ResultFrame::error("transcription error: credentials rejected")]
    );
    assert_eq!(session.finish(Duration::from_secs(2)).await, WorkerExit::Joined);
}

#[tokio::test]
async fn engine_panic_becomes_an_error_frame() {
    let session = TranscriptionSession::start(Arc::new(Panics), &test_settings());

    let frames = drain(&session).await;
    assert_eq!(frames.len(), 1);
    match &frames[0] {
        ResultFrame::Error { error } => assert!(error.contains("decoder state corrupted"), "got: {}", error),
        other => panic!("expected error frame, got {:?}", other),
    }
    assert_eq!(session.finish(Duration::from_secs(2)).await, WorkerExit::Joined);
}

#[tokio::test]
async fn slow_worker_is_abandoned_after_join_timeout() {
    let session = TranscriptionSession::start(
        Arc::new(Stalls(Duration::from_millis(500))),
        &test_settings(),
    );

    let started = std::time::Instant::now();
    let exit = session.finish(Duration::from_millis(50)).await;
    assert_eq!(exit, WorkerExit::Abandoned);
    assert!(started.elapsed() < Duration::from_millis(400));
}
