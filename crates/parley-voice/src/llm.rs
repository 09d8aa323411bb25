//! Text generation through the Gemini `streamGenerateContent` REST endpoint.

use crate::config::GeminiConfig;
use crate::engine::{GenerationEngine, TextStream};
use crate::error::VoiceError;
use futures_util::{stream, Stream, StreamExt, TryStreamExt};
use parley_types::{ConversationMessage, TextChunk};
use serde::Deserialize;
use serde_json::json;
use std::pin::Pin;

/// Timeout for establishing the connection to the generation API.
const CONNECT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct GeminiGenerator {
    client: reqwest::Client,
    config: GeminiConfig,
}

impl GeminiGenerator {
    pub fn new(config: GeminiConfig) -> Result<Self, VoiceError> {
        if config.model.trim().is_empty() {
            return Err(VoiceError::Config("generation model must not be empty".to_string()));
        }
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        Ok(Self { client, config })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:streamGenerateContent",
            self.config.base_url.trim_end_matches('/'),
            self.config.model
        )
    }

    /// Builds the full turn list: the priming exchange, the prior history and
    /// finally the new user text.
    fn contents(&self, history: &[ConversationMessage], user_text: &str) -> Vec<ConversationMessage> {
        let mut contents = Vec::with_capacity(history.len() + 3);
        if !self.config.system_prompt.is_empty() {
            contents.push(ConversationMessage::user(self.config.system_prompt.clone()));
            contents.push(ConversationMessage::model(self.config.acknowledgement.clone()));
        }
        contents.extend_from_slice(history);
        contents.push(ConversationMessage::user(user_text));
        contents
    }
}

impl GenerationEngine for GeminiGenerator {
    fn generate(&self, history: &[ConversationMessage], user_text: &str) -> TextStream {
        let request = self
            .client
            .post(self.endpoint())
            .query(&[("alt", "sse")])
            .header("x-goog-api-key", &self.config.api_key)
            .json(&json!({ "contents": self.contents(history, user_text) }));

        let opened = async move {
            let response = request.send().await?;
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(VoiceError::Generation(format!(
                    "generation API returned {}: {}",
                    status, body
                )));
            }
            tracing::debug!("generation stream opened");
            Ok::<_, VoiceError>(text_chunks(response.bytes_stream()))
        };

        Box::pin(stream::once(opened).try_flatten())
    }
}

/// Decodes an SSE body into the text of each event, skipping events that
/// carry no text. The stream ends after the first error.
pub fn text_chunks<S, B, E>(body: S) -> impl Stream<Item = Result<TextChunk, VoiceError>> + Send
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send,
    E: Send,
    VoiceError: From<E>,
{
    let state = EventBody {
        body: Box::pin(body),
        decoder: SseDecoder::default(),
        ended: false,
        failed: false,
    };
    stream::unfold(state, |mut state| async move {
        if state.failed {
            return None;
        }
        loop {
            let event = match state.decoder.next_event() {
                Some(event) => Some(event),
                None if state.ended => state.decoder.finish(),
                None => None,
            };

            if let Some(data) = event {
                match chunk_text(&data) {
                    Ok(text) if text.is_empty() => continue,
                    Ok(text) => return Some((Ok(text), state)),
                    Err(e) => {
                        state.failed = true;
                        return Some((Err(e), state));
                    }
                }
            }
            if state.ended {
                return None;
            }

            match state.body.next().await {
                Some(Ok(bytes)) => state.decoder.push(bytes.as_ref()),
                Some(Err(e)) => {
                    state.failed = true;
                    return Some((Err(VoiceError::from(e)), state));
                }
                None => state.ended = true,
            }
        }
    })
}

struct EventBody<S> {
    body: Pin<Box<S>>,
    decoder: SseDecoder,
    ended: bool,
    failed: bool,
}

/// Incremental parser for `text/event-stream` bodies.
///
/// Bytes are buffered until a blank line completes an event, so multi-byte
/// characters split across network reads are reassembled intact.
#[derive(Debug, Default)]
struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend(bytes.iter().copied().filter(|b| *b != b'\r'));
    }

    /// Returns the `data` payload of the next complete event.
    fn next_event(&mut self) -> Option<String> {
        loop {
            let end = self.buffer.windows(2).position(|w| w == b"\n\n")?;
            let raw: Vec<u8> = self.buffer.drain(..end + 2).collect();
            if let Some(data) = event_data(&raw[..end]) {
                return Some(data);
            }
        }
    }

    /// Returns the trailing event of a body that did not end with a blank line.
    fn finish(&mut self) -> Option<String> {
        let raw = std::mem::take(&mut self.buffer);
        event_data(&raw)
    }
}

fn event_data(raw: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(raw);
    let data: Vec<&str> = text
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|value| value.strip_prefix(' ').unwrap_or(value))
        .collect();
    if data.is_empty() {
        None
    } else {
        Some(data.join("\n"))
    }
}

#[derive(Debug, Default, Deserialize)]
struct GenerateContentChunk {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Default, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Default, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Default, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

fn chunk_text(data: &str) -> Result<String, VoiceError> {
    let chunk: GenerateContentChunk = serde_json::from_str(data)
        .map_err(|e| VoiceError::Generation(format!("malformed generation event: {}", e)))?;
    Ok(chunk
        .candidates
        .into_iter()
        .take(1)
        .filter_map(|candidate| candidate.content)
        .flat_map(|content| content.parts)
        .filter_map(|part| part.text)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_types::Role;

    fn event(text: &str) -> String {
        format!(
            "data: {}\r\n\r\n",
            json!({"candidates": [{"content": {"role": "model", "parts": [{"text": text}]}}]})
        )
    }

    async fn collect(pieces: Vec<Vec<u8>>) -> Vec<Result<String, VoiceError>> {
        let body = stream::iter(pieces.into_iter().map(Ok::<_, VoiceError>));
        text_chunks(body).collect().await
    }

    #[tokio::test]
    async fn decodes_events_split_across_reads() {
        let mut body = event("こんにちは").into_bytes();
        body.extend(event("").into_bytes());
        body.extend(event("世界").into_bytes());

        // Split in the middle of a multi-byte character.
        let split = body.iter().position(|b| *b == 0xe3).unwrap() + 1;
        let pieces = vec![body[..split].to_vec(), body[split..].to_vec()];

        let texts: Vec<String> = collect(pieces)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(texts, vec!["こんにちは", "世界"]);
    }

    #[tokio::test]
    async fn trailing_event_without_blank_line_is_kept() {
        let body = event("tail");
        let trimmed = body.trim_end().as_bytes().to_vec();
        let texts: Vec<String> = collect(vec![trimmed])
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(texts, vec!["tail"]);
    }

    #[tokio::test]
    async fn malformed_event_ends_the_stream_with_an_error() {
        let mut body = event("ok").into_bytes();
        body.extend(b"data: {not json}\n\n");
        body.extend(event("never").into_bytes());

        let results = collect(vec![body]).await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].as_ref().unwrap(), "ok");
        assert!(matches!(results[1], Err(VoiceError::Generation(_))));
    }

    #[test]
    fn contents_wrap_history_with_priming_and_new_turn() {
        let generator = GeminiGenerator::new(GeminiConfig {
            system_prompt: "be brief".to_string(),
            acknowledgement: "ok".to_string(),
            ..GeminiConfig::default()
        })
        .unwrap();

        let history = vec![
            ConversationMessage::user("hi"),
            ConversationMessage::model("hello"),
        ];
        let contents = generator.contents(&history, "how are you?");

        let roles: Vec<Role> = contents.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::User, Role::Model, Role::User, Role::Model, Role::User]
        );
        assert_eq!(contents[0].parts[0].text, "be brief");
        assert_eq!(contents[4].parts[0].text, "how are you?");
    }

    #[test]
    fn empty_prompt_disables_priming() {
        let generator = GeminiGenerator::new(GeminiConfig {
            system_prompt: String::new(),
            ..GeminiConfig::default()
        })
        .unwrap();
        let contents = generator.contents(&[], "hi");
        assert_eq!(contents, vec![ConversationMessage::user("hi")]);
    }

    #[test]
    fn endpoint_uses_model_name() {
        let generator = GeminiGenerator::new(GeminiConfig {
            base_url: "http://localhost:8080/".to_string(),
            model: "test-model".to_string(),
            ..GeminiConfig::default()
        })
        .unwrap();
        assert_eq!(
            generator.endpoint(),
            "http://localhost:8080/v1beta/models/test-model:streamGenerateContent"
        );
    }
}
