//! Speech-recognition results and the frames that carry them to clients.

use serde::{Deserialize, Serialize};

/// One candidate transcription for a recognized segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alternative {
    /// Recognized text.
    pub transcript: String,
    /// Engine confidence in `[0, 1]`. Interim results usually report `0.0`.
    #[serde(default)]
    pub confidence: f32,
}

/// A decoded speech-recognition result, possibly interim (`is_final = false`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptResult {
    /// Whether the engine will revise this segment again.
    #[serde(default)]
    pub is_final: bool,
    /// Likelihood in `[0, 1]` that an interim result will not change.
    #[serde(default)]
    pub stability: f32,
    /// Candidates ordered from most to least likely.
    #[serde(default)]
    pub alternatives: Vec<Alternative>,
}

impl TranscriptResult {
    /// Returns the transcript of the most likely alternative, if any.
    pub fn best_transcript(&self) -> Option<&str> {
        self.alternatives.first().map(|alt| alt.transcript.as_str())
    }
}

/// A single server-to-client frame on the transcription socket.
///
/// Serialized untagged: a result frame is the bare [`TranscriptResult`]
/// object, an error frame is `{"error": "..."}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResultFrame {
    Error { error: String },
    Result(TranscriptResult),
}

impl ResultFrame {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            error: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }
}

impl From<TranscriptResult> for ResultFrame {
    fn from(result: TranscriptResult) -> Self {
        Self::Result(result)
    }
}
