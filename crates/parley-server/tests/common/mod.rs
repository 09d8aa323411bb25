//! Mock engines and app setup shared by the server integration tests.

#![allow(dead_code)]

use futures_util::stream;
use parley_server::config::LimitsConfig;
use parley_server::AppState;
use parley_types::{Alternative, ConversationMessage, TranscriptResult};
use parley_voice::{
    AudioInput, GenerationEngine, RecognitionResponse, RecognitionStream, SessionSettings,
    SpeechPipeline, SynthesisConfig, SynthesisEngine, SynthesisRequest, SynthesisRequests,
    SynthesisStream, TextStream, TranscriptionEngine, VoiceError,
};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Transcribes every audio chunk as its UTF-8 text, one final result each.
pub struct EchoRecognizer;

impl TranscriptionEngine for EchoRecognizer {
    fn streaming_recognize(&self, audio: AudioInput) -> Result<RecognitionStream, VoiceError> {
        Ok(Box::new(audio.map(|chunk| {
            Ok::<_, VoiceError>(RecognitionResponse {
                results: vec![TranscriptResult {
                    is_final: true,
                    stability: 1.0,
                    alternatives: vec![Alternative {
                        transcript: String::from_utf8_lossy(&chunk).into_owned(),
                        confidence: 0.75,
                    }],
                }],
            })
        })))
    }
}

/// A recognizer whose stream cannot be opened.
pub struct UnavailableRecognizer;

impl TranscriptionEngine for UnavailableRecognizer {
    fn streaming_recognize(&self, _audio: AudioInput) -> Result<RecognitionStream, VoiceError> {
        Err(VoiceError::Transcription("recognizer unavailable".to_string()))
    }
}

/// Yields a fixed list of text chunks, optionally failing after them.
///
/// Every call is recorded so tests can inspect what the handler asked for.
#[derive(Default)]
pub struct ScriptedGenerator {
    pub chunks: Vec<String>,
    /// When set, the stream fails with this message after a short pause.
    pub failure: Option<String>,
    pub calls: Mutex<Vec<(Vec<ConversationMessage>, String)>>,
}

impl ScriptedGenerator {
    pub fn new(chunks: &[&str]) -> Self {
        Self {
            chunks: chunks.iter().map(|c| c.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn failing_after(chunks: &[&str], message: &str) -> Self {
        Self {
            failure: Some(message.to_string()),
            ..Self::new(chunks)
        }
    }
}

impl GenerationEngine for ScriptedGenerator {
    fn generate(&self, history: &[ConversationMessage], user_text: &str) -> TextStream {
        self.calls
            .lock()
            .unwrap()
            .push((history.to_vec(), user_text.to_string()));

        let chunks = stream::iter(self.chunks.clone().into_iter().map(Ok::<String, VoiceError>));
        match self.failure.clone() {
            None => Box::pin(chunks),
            Some(message) => {
                let failure = stream::once(async move {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    Err::<String, VoiceError>(VoiceError::Generation(message))
                });
                Box::pin(futures_util::StreamExt::chain(chunks, failure))
            }
        }
    }
}

/// Produces one `audio(<text>)` chunk per text request.
pub struct EchoSynthesizer;

impl SynthesisEngine for EchoSynthesizer {
    fn streaming_synthesize(
        &self,
        requests: SynthesisRequests,
    ) -> Result<SynthesisStream, VoiceError> {
        Ok(Box::new(requests.filter_map(|request| match request {
            SynthesisRequest::Text(text) => Some(Ok::<_, VoiceError>(format!("audio({})", text).into_bytes())),
            SynthesisRequest::Config(_) => None,
        })))
    }
}

pub fn fast_settings() -> SessionSettings {
    SessionSettings {
        idle_timeout_ms: 2_000,
        poll_interval_ms: 20,
        join_timeout_ms: 2_000,
        queue_capacity: 32,
        push_timeout_ms: 500,
    }
}

pub fn build_state(
    transcriber: Arc<dyn TranscriptionEngine>,
    generator: Arc<dyn GenerationEngine>,
    session: SessionSettings,
) -> AppState {
    AppState {
        transcriber,
        generator,
        speech: SpeechPipeline::new(
            Arc::new(EchoSynthesizer),
            SynthesisConfig::default(),
            session.clone(),
        ),
        session,
        limits: LimitsConfig {
            max_content_bytes: 64,
            max_history_messages: 4,
        },
        cors_origins: vec![],
    }
}

/// Serves `state` on an ephemeral local port.
pub async fn spawn_server(state: AppState) -> SocketAddr {
    let app = parley_server::app(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });
    addr
}
