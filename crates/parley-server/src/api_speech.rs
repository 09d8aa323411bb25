//! Streaming text-to-speech endpoint.

use crate::api::ApiError;
use crate::config::LimitsConfig;
use crate::AppState;
use axum::{
    body::{Body, Bytes},
    extract::{Extension, Json},
    http::header,
    response::{IntoResponse, Response},
};
use futures_util::{future, StreamExt};
use parley_types::ConversationMessage;
use parley_voice::AudioStream;
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;

/// Characters of the request content included in the request log line.
const CONTENT_PREVIEW_CHARS: usize = 50;

/// Request body for `POST /generate-speech`.
#[derive(Debug, Deserialize)]
pub struct GenerateSpeechRequest {
    /// The new user text.
    pub content: String,
    /// Prior turns, oldest first.
    #[serde(default)]
    pub conversation_history: Option<Vec<ConversationMessage>>,
}

impl GenerateSpeechRequest {
    fn validate(&self, limits: &LimitsConfig) -> Result<(), ApiError> {
        if self.content.trim().is_empty() {
            return Err(ApiError::BadRequest("content must not be empty".to_string()));
        }
        if self.content.len() > limits.max_content_bytes {
            return Err(ApiError::BadRequest(format!(
                "content exceeds {} bytes",
                limits.max_content_bytes
            )));
        }
        let turns = self.conversation_history.as_ref().map_or(0, Vec::len);
        if turns > limits.max_history_messages {
            return Err(ApiError::BadRequest(format!(
                "conversation_history exceeds {} messages",
                limits.max_history_messages
            )));
        }
        Ok(())
    }
}

/// Handler for `POST /generate-speech`.
///
/// Generates a reply to `content` and streams it back as synthesized
/// `audio/l16` as soon as the first audio chunk exists.
pub async fn generate_speech_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<GenerateSpeechRequest>,
) -> Result<Response, ApiError> {
    payload.validate(&state.limits)?;

    let history = payload.conversation_history.unwrap_or_default();
    let preview: String = payload.content.chars().take(CONTENT_PREVIEW_CHARS).collect();
    tracing::info!(
        history = history.len(),
        content = %preview,
        voice = %state.speech.voice().voice,
        "generating speech"
    );

    let text = state.generator.generate(&history, &payload.content);
    Ok(stream_audio(state.speech.stream(text)))
}

/// Wraps synthesized audio as a chunked `audio/l16` response.
///
/// Headers are committed before the first chunk, so a failure mid-stream is
/// logged and simply ends the body.
pub fn stream_audio(audio: AudioStream) -> Response {
    let body = audio.scan(0usize, |sent, chunk| {
        future::ready(match chunk {
            Ok(bytes) => {
                *sent += bytes.len();
                Some(Ok::<_, Infallible>(Bytes::from(bytes)))
            }
            Err(e) => {
                tracing::error!(error = %e, sent = *sent, "speech stream failed; ending response");
                None
            }
        })
    });

    (
        [
            (header::CONTENT_TYPE, "audio/l16"),
            (header::CONTENT_DISPOSITION, "inline"),
        ],
        Body::from_stream(body),
    )
        .into_response()
}
