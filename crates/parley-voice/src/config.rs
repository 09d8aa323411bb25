use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

fn default_idle_timeout_ms() -> u64 {
    10_000
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_join_timeout_ms() -> u64 {
    5_000
}

fn default_queue_capacity() -> usize {
    256
}

fn default_push_timeout_ms() -> u64 {
    1_000
}

/// Timing and sizing knobs shared by every per-request worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSettings {
    /// How long the transcription request stream waits for the next audio
    /// chunk before ending on its own. Default: 10 s.
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
    /// How often the event-loop side re-checks a bridging queue. Default: 100 ms.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Upper bound on waiting for a worker to finish during teardown. Default: 5 s.
    #[serde(default = "default_join_timeout_ms")]
    pub join_timeout_ms: u64,
    /// Capacity of each bridging queue. Default: 256 items.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Longest a producer waits on a full queue before giving up. Default: 1 s.
    #[serde(default = "default_push_timeout_ms")]
    pub push_timeout_ms: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            idle_timeout_ms: default_idle_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            join_timeout_ms: default_join_timeout_ms(),
            queue_capacity: default_queue_capacity(),
            push_timeout_ms: default_push_timeout_ms(),
        }
    }
}

impl SessionSettings {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    pub fn push_timeout(&self) -> Duration {
        Duration::from_millis(self.push_timeout_ms)
    }
}

/// An external program driven over stdin/stdout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandConfig {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl CommandConfig {
    pub fn new(program: impl Into<String>, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

fn default_voice() -> String {
    "ja-JP-Chirp3-HD-Kore".to_string()
}

fn default_language_code() -> String {
    "ja-JP".to_string()
}

/// Voice selection sent as the first request of every synthesis stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynthesisConfig {
    #[serde(default = "default_voice")]
    pub voice: String,
    #[serde(default = "default_language_code")]
    pub language_code: String,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            voice: default_voice(),
            language_code: default_language_code(),
        }
    }
}

fn default_model() -> String {
    "gemini-2.5-flash-lite".to_string()
}

fn default_base_url() -> String {
    "https://generativelanguage.googleapis.com".to_string()
}

fn default_system_prompt() -> String {
    "You are a kind and knowledgeable assistant. Your replies are read aloud, so never use \
     Markdown (no bold, headings or lists) and answer in natural spoken Japanese."
        .to_string()
}

fn default_acknowledgement() -> String {
    "Understood. I will answer in natural language that is easy to read aloud.".to_string()
}

#[derive(Clone, Serialize, Deserialize)]
pub struct GeminiConfig {
    #[serde(default, skip_serializing)]
    pub api_key: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Sent as a priming user turn ahead of the conversation. Empty disables priming.
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    /// The model turn that answers the priming prompt.
    #[serde(default = "default_acknowledgement")]
    pub acknowledgement: String,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: default_model(),
            base_url: default_base_url(),
            system_prompt: default_system_prompt(),
            acknowledgement: default_acknowledgement(),
        }
    }
}

impl fmt::Debug for GeminiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeminiConfig")
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("system_prompt", &self.system_prompt)
            .field("acknowledgement", &self.acknowledgement)
            .finish()
    }
}
