//! Voice plumbing for the Parley relay.
//!
//! Bridges the blocking speech engines (transcription, synthesis) and the
//! async generation engine to the async server. Every blocking engine call
//! runs on its own worker and talks to async code only through the bounded,
//! sentinel-terminated queues in [`queue`].
//!
//! The two compositions built on top are the [`TranscriptionSession`], which
//! carries one client's audio into a recognizer and its results back out, and
//! the [`SpeechPipeline`], which feeds generated text into a synthesizer as it
//! is produced and streams the audio onward.
//!
//! Concrete engines drive external programs over stdio ([`CommandRecognizer`],
//! [`CommandSynthesizer`]) or call the Gemini REST API ([`GeminiGenerator`]).

mod command;
pub mod config;
pub mod engine;
pub mod error;
pub mod llm;
pub mod pipeline;
pub mod queue;
pub mod stt;
pub mod transcription;
pub mod tts;

pub use config::{CommandConfig, GeminiConfig, SessionSettings, SynthesisConfig};
pub use engine::{
    AudioInput, GenerationEngine, RecognitionResponse, RecognitionStream, SynthesisEngine,
    SynthesisRequest, SynthesisRequests, SynthesisStream, TextStream, TranscriptionEngine,
};
pub use error::VoiceError;
pub use llm::GeminiGenerator;
pub use pipeline::{AudioStream, SpeechPipeline};
pub use queue::{bridge, BridgeReceiver, BridgeSender, Popped, QueueError};
pub use stt::CommandRecognizer;
pub use transcription::{run_transcription, TranscriptionSession, WorkerExit};
pub use tts::CommandSynthesizer;
