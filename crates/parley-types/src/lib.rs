//! Shared types for the Parley voice relay.
//!
//! This crate provides the data vocabulary used across all Parley crates:
//! raw audio and text fragments, speech-recognition results and the JSON
//! frames they are delivered in, and the conversation turns handed to the
//! text-generation engine.
//!
//! No crate in the workspace depends on anything *except* `parley-types` for
//! cross-cutting type definitions. This keeps the dependency graph clean and
//! prevents circular dependencies.

mod conversation;
mod transcript;

pub use conversation::{ConversationMessage, Part, Role};
pub use transcript::{Alternative, ResultFrame, TranscriptResult};

/// A fragment of raw PCM audio bytes.
///
/// No framing is implied; the length is whatever the producer delivered.
pub type AudioChunk = Vec<u8>;

/// A fragment of generated natural-language text.
///
/// Order-significant; no sentence boundary is assumed.
pub type TextChunk = String;
